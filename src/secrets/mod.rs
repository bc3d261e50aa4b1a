//! Cluster-wide singleton secrets.
//!
//! # Data Flow
//! ```text
//! first use on any node
//!     → in-process cache hit? return
//!     → SystemStore::get_by_name → decode → cache
//!     → generate locally → SystemStore::save (insert-if-absent)
//!         → conflict: another node won, re-read its value once
//!     → cache whichever value is durable
//! ```
//!
//! # Design Decisions
//! - No distributed lock: the store's insert-if-absent is the only
//!   serialization point, duplicate generation is tolerated
//! - A failed fallback read is fatal and never retried, so a store outage
//!   is not mistaken for contention
//! - A record that exists but does not decode is corrupt state, never a
//!   reason to regenerate

pub mod cookie;
pub mod coordinator;
pub mod signing;
pub mod telemetry;

use arc_swap::ArcSwapOption;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::storage::{StoreError, SystemRecord, SystemStore};

pub use cookie::PostActionCookieSecret;
pub use coordinator::SecretCoordinator;
pub use signing::AsymmetricSigningKey;
pub use telemetry::TelemetryId;

/// Errors raised while resolving a cluster singleton.
#[derive(Debug, Error)]
pub enum SecretError {
    /// The store failed where a value was required.
    #[error("failed to read {name} from store: {source}")]
    Store {
        name: &'static str,
        #[source]
        source: StoreError,
    },

    /// A persisted record exists but cannot be used.
    #[error("persisted {name} is corrupt: {reason}")]
    Corrupt { name: &'static str, reason: String },

    /// A persisted signing key names a curve this node cannot use.
    #[error("unknown curve: {0}")]
    UnknownCurve(String),

    /// Local generation failed.
    #[error("failed to generate {name}: {reason}")]
    Generate { name: &'static str, reason: String },

    #[error("failed to encode {name}: {source}")]
    Encode {
        name: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl SecretError {
    /// True when the error reflects bad persisted state rather than an outage.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, SecretError::Corrupt { .. } | SecretError::UnknownCurve(_))
    }
}

/// Result type for secret operations.
pub type SecretResult<T> = Result<T, SecretError>;

/// A value that must exist exactly once across the cluster.
pub trait ClusterSingleton: Sized + Send + Sync + 'static {
    /// Short label used in logs and metrics.
    const KIND: &'static str;

    /// Name of the system record holding the value.
    const RECORD_NAME: &'static str;

    /// JSON shape of the persisted record.
    type Record: Serialize + DeserializeOwned;

    fn generate() -> SecretResult<Self>;

    fn to_record(&self) -> Self::Record;

    fn from_record(record: Self::Record) -> SecretResult<Self>;
}

fn decode<S: ClusterSingleton>(value: &str) -> SecretResult<S> {
    let record: S::Record = serde_json::from_str(value).map_err(|e| SecretError::Corrupt {
        name: S::RECORD_NAME,
        reason: e.to_string(),
    })?;
    S::from_record(record)
}

fn encode<S: ClusterSingleton>(value: &S) -> SecretResult<String> {
    serde_json::to_string(&value.to_record()).map_err(|source| SecretError::Encode {
        name: S::RECORD_NAME,
        source,
    })
}

fn record_outcome(kind: &'static str, outcome: &'static str) {
    metrics::counter!(
        "clusterconf_secret_resolutions_total",
        "kind" => kind,
        "outcome" => outcome
    )
    .increment(1);
}

/// Resolve `S` so every node in the cluster ends up with the same value.
pub async fn ensure_singleton<S: ClusterSingleton>(
    store: &dyn SystemStore,
    cache: &ArcSwapOption<S>,
) -> SecretResult<Arc<S>> {
    if let Some(cached) = cache.load_full() {
        return Ok(cached);
    }

    let mut resolved: Option<S> = match store.get_by_name(S::RECORD_NAME).await {
        Ok(record) => Some(decode::<S>(&record.value)?),
        Err(e) if e.is_not_found() => None,
        Err(e) => {
            tracing::warn!(kind = S::KIND, error = %e, "Failed to read singleton, generating a new one");
            None
        }
    };
    let mut outcome = "loaded";

    if resolved.is_none() {
        let generated = S::generate()?;
        let record = SystemRecord::new(S::RECORD_NAME, encode(&generated)?);

        match store.save(record).await {
            Ok(()) => {
                tracing::info!(kind = S::KIND, "Generated and persisted new singleton");
                resolved = Some(generated);
                outcome = "generated";
            }
            Err(e) => {
                tracing::warn!(
                    kind = S::KIND,
                    error = %e,
                    "Failed to save generated singleton, adopting the persisted one"
                );
            }
        }
    }

    let value = match resolved {
        Some(value) => value,
        None => {
            outcome = "adopted";
            let record = store
                .get_by_name(S::RECORD_NAME)
                .await
                .map_err(|source| SecretError::Store {
                    name: S::RECORD_NAME,
                    source,
                })?;
            decode::<S>(&record.value)?
        }
    };

    record_outcome(S::KIND, outcome);
    let value = Arc::new(value);
    cache.store(Some(value.clone()));
    Ok(value)
}

/// Serde helpers for byte fields stored as standard base64.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
