//! Symmetric secret used to sign post-action cookies.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::secrets::{base64_bytes, ClusterSingleton, SecretError, SecretResult};
use crate::storage::POST_ACTION_COOKIE_SECRET_KEY;

/// Length of the cookie secret in bytes.
pub const COOKIE_SECRET_LEN: usize = 32;

/// 32 random bytes shared by every node.
#[derive(Clone, PartialEq, Eq)]
pub struct PostActionCookieSecret(Vec<u8>);

#[derive(Serialize, Deserialize)]
pub struct CookieSecretRecord {
    #[serde(with = "base64_bytes")]
    key: Vec<u8>,
}

impl PostActionCookieSecret {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PostActionCookieSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PostActionCookieSecret([redacted])")
    }
}

impl ClusterSingleton for PostActionCookieSecret {
    const KIND: &'static str = "cookie_secret";
    const RECORD_NAME: &'static str = POST_ACTION_COOKIE_SECRET_KEY;
    type Record = CookieSecretRecord;

    fn generate() -> SecretResult<Self> {
        let mut key = vec![0u8; COOKIE_SECRET_LEN];
        OsRng
            .try_fill_bytes(&mut key)
            .map_err(|e| SecretError::Generate {
                name: Self::RECORD_NAME,
                reason: e.to_string(),
            })?;
        Ok(Self(key))
    }

    fn to_record(&self) -> Self::Record {
        CookieSecretRecord { key: self.0.clone() }
    }

    fn from_record(record: Self::Record) -> SecretResult<Self> {
        if record.key.len() != COOKIE_SECRET_LEN {
            return Err(SecretError::Corrupt {
                name: Self::RECORD_NAME,
                reason: format!(
                    "expected {} bytes, found {}",
                    COOKIE_SECRET_LEN,
                    record.key.len()
                ),
            });
        }
        Ok(Self(record.key))
    }
}
