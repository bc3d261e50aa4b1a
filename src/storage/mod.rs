//! Persistent store contracts.
//!
//! # Data Flow
//! ```text
//! secrets / install bookkeeping
//!     → SystemStore (named records, insert-if-absent, upsert)
//!
//! client config computed fields
//!     → DataStore (accounts, terms of service, post limits)
//! ```
//!
//! # Design Decisions
//! - `save` must fail with `StoreError::Conflict` when the name is taken;
//!   that conflict is the only serialization point for cluster singletons
//! - Records are opaque strings; callers choose the encoding

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryStore;

/// Record holding the post-action cookie secret.
pub const POST_ACTION_COOKIE_SECRET_KEY: &str = "PostActionCookieSecret";
/// Record holding the asymmetric signing key.
pub const ASYMMETRIC_SIGNING_KEY_KEY: &str = "AsymmetricSigningKey";
/// Record holding the telemetry identifier.
pub const TELEMETRY_ID_KEY: &str = "DiagnosticId";
/// Record holding the installation date (epoch millis).
pub const INSTALLATION_DATE_KEY: &str = "InstallationDate";
/// Record holding the first server run timestamp (epoch millis).
pub const FIRST_SERVER_RUN_TIMESTAMP_KEY: &str = "FirstServerRunTimestamp";
/// Record marking an install upgraded from the team edition.
pub const UPGRADED_FROM_TE_KEY: &str = "UpgradedFromTE";

/// A named system record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemRecord {
    pub name: String,
    pub value: String,
}

impl SystemRecord {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The latest accepted terms of service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermsOfService {
    pub id: String,
    pub text: String,
    pub create_at: i64,
}

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record with the given name exists.
    #[error("record {0} not found")]
    NotFound(String),

    /// Insert rejected because the name is already taken.
    #[error("record {0} already exists")]
    Conflict(String),

    /// The store could not serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Named-record store shared by every node of the cluster.
#[async_trait]
pub trait SystemStore: Send + Sync {
    /// Fetch a record by name.
    async fn get_by_name(&self, name: &str) -> StoreResult<SystemRecord>;

    /// Insert a record. Fails with [`StoreError::Conflict`] if the name exists.
    async fn save(&self, record: SystemRecord) -> StoreResult<()>;

    /// Insert or overwrite a record.
    async fn save_or_update(&self, record: SystemRecord) -> StoreResult<()>;
}

/// Lookups backing the computed client config fields.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Number of user accounts.
    async fn user_count(&self) -> StoreResult<u64>;

    /// Earliest account creation time, used to infer the install date.
    async fn infer_system_install_date(&self) -> StoreResult<i64>;

    /// Latest terms of service, if any were ever created.
    async fn latest_terms_of_service(&self) -> StoreResult<Option<TermsOfService>>;

    /// Maximum allowed post size in characters.
    async fn max_post_size(&self) -> StoreResult<usize>;
}
