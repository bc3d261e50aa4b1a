//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) / memory
//!     → loader.rs (parse & deserialize, env overrides)
//!     → validation.rs (semantic checks)
//!     → store.rs (persist, atomic swap of Arc<ServerConfig>)
//!     → listeners observe (old, new)
//!
//! On reload signal:
//!     watcher.rs detects change
//!     → store.rs re-reads source and environment
//!     → validation.rs validates
//!     → atomic swap, listeners fire
//! ```
//!
//! # Design Decisions
//! - Documents are immutable once active; changes clone, mutate, swap
//! - All fields have defaults so documents are always fully populated
//! - Environment overrides are node-local and never persisted
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod store;
pub mod validation;
pub mod watcher;

pub use loader::{ConfigError, ConfigSource, EnvOverrides, EnvSource, FileSource, MemorySource};
pub use schema::{
    AdminSettings, ClusterSettings, EmailSettings, LogSettings, MessageExportSettings,
    MetricsSettings, ServerConfig, ServiceSettings, SupportSettings, FAKE_SETTING,
};
pub use store::{ConfigListener, ConfigStore};
