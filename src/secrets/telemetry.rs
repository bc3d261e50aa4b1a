//! Installation-wide telemetry identifier.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::secrets::{ClusterSingleton, SecretError, SecretResult};
use crate::storage::TELEMETRY_ID_KEY;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryId(String);

#[derive(Serialize, Deserialize)]
pub struct TelemetryIdRecord {
    id: String,
}

impl TelemetryId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ClusterSingleton for TelemetryId {
    const KIND: &'static str = "telemetry_id";
    const RECORD_NAME: &'static str = TELEMETRY_ID_KEY;
    type Record = TelemetryIdRecord;

    fn generate() -> SecretResult<Self> {
        Ok(Self(Uuid::new_v4().simple().to_string()))
    }

    fn to_record(&self) -> Self::Record {
        TelemetryIdRecord { id: self.0.clone() }
    }

    fn from_record(record: Self::Record) -> SecretResult<Self> {
        if record.id.is_empty() {
            return Err(SecretError::Corrupt {
                name: Self::RECORD_NAME,
                reason: "empty identifier".into(),
            });
        }
        Ok(Self(record.id))
    }
}
