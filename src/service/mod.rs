//! Configuration service exposed to the rest of the node.
//!
//! # Data Flow
//! ```text
//! save(new, send_cluster_message)
//!     → ConfigStore::set (validate, persist, swap, listeners)
//!     → metrics endpoint on/off
//!     → ClusterTransport::config_changed(stripped old, stripped new)
//!
//! reload()
//!     → ConfigStore::load (source + environment, validate, swap, listeners)
//!     → metrics endpoint on/off
//! ```
//!
//! # Design Decisions
//! - Read-only failures are distinguished so the admin API can answer 403
//! - Cluster notification is not transactional with the local swap: a
//!   failed notification is returned but the new document stays active
//! - `ConfigStore` writes and reads its source synchronously; the service
//!   runs those calls on the blocking pool, listeners included

pub mod mail;
pub mod message_export;

use axum::http::StatusCode;
use std::sync::Arc;
use thiserror::Error;

use crate::cluster::{ClusterError, ClusterTransport};
use crate::config::{ConfigError, ConfigStore, EnvOverrides, ServerConfig};
use crate::observability::MetricsControl;

pub use mail::{mail_service_config, SmtpConfig};
pub use message_export::handle_message_export_config;

/// Error id returned when saving on a read-only node.
pub const SAVE_READ_ONLY_ERROR_ID: &str = "config.save.read_only";
/// Error id returned for every other save failure.
pub const SAVE_FAILED_ERROR_ID: &str = "config.save.failed";

/// Errors returned by [`ConfigService::save`].
#[derive(Debug, Error)]
pub enum SaveError {
    /// The node does not accept configuration writes.
    #[error("configuration is read-only")]
    ReadOnly,

    /// The document was rejected; the previous one stays active.
    #[error("invalid configuration: {0}")]
    Invalid(#[source] ConfigError),

    /// The document could not be persisted; the previous one stays active.
    #[error("failed to save configuration: {0}")]
    Persist(#[source] ConfigError),

    /// The new document is active locally but peers may not know about it.
    #[error("failed to notify cluster of configuration change: {0}")]
    ClusterNotify(#[source] ClusterError),
}

impl SaveError {
    /// Stable identifier for API clients.
    pub fn id(&self) -> &'static str {
        match self {
            SaveError::ReadOnly => SAVE_READ_ONLY_ERROR_ID,
            _ => SAVE_FAILED_ERROR_ID,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            SaveError::ReadOnly => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ConfigError> for SaveError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::ReadOnly => SaveError::ReadOnly,
            e @ (ConfigError::Validation(_) | ConfigError::Override { .. }) => SaveError::Invalid(e),
            e => SaveError::Persist(e),
        }
    }
}

/// Owns the configuration of one node.
pub struct ConfigService {
    store: Arc<ConfigStore>,
    metrics: Arc<dyn MetricsControl>,
    metrics_allowed: bool,
    cluster: Option<Arc<dyn ClusterTransport>>,
}

impl ConfigService {
    pub fn new(store: ConfigStore, metrics: Arc<dyn MetricsControl>) -> Self {
        Self {
            store: Arc::new(store),
            metrics,
            metrics_allowed: true,
            cluster: None,
        }
    }

    /// Notify `cluster` of every saved change.
    pub fn with_cluster(mut self, cluster: Arc<dyn ClusterTransport>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Whether this node may serve metrics at all, regardless of settings.
    pub fn with_metrics_allowed(mut self, allowed: bool) -> Self {
        self.metrics_allowed = allowed;
        self
    }

    /// The active document.
    pub fn get(&self) -> Arc<ServerConfig> {
        self.store.get()
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn is_read_only(&self) -> bool {
        self.store.is_read_only()
    }

    /// Register a function called with the old and new document after every
    /// successful swap. Returns an id for [`Self::remove_listener`].
    pub fn add_listener<F>(&self, listener: F) -> String
    where
        F: Fn(&ServerConfig, &ServerConfig) + Send + Sync + 'static,
    {
        self.store.add_listener(listener)
    }

    pub fn remove_listener(&self, id: &str) {
        self.store.remove_listener(id);
    }

    /// Apply `mutate` to a copy of the active document and save it.
    ///
    /// Does nothing on a read-only node. Failures are logged, not returned.
    pub async fn update<F>(&self, mutate: F)
    where
        F: FnOnce(&mut ServerConfig),
    {
        if self.store.is_read_only() {
            return;
        }
        let mut updated = (*self.get()).clone();
        mutate(&mut updated);
        if let Err(e) = self.save(updated, true).await {
            tracing::error!(error = %e, id = e.id(), "Failed to update config");
        }
    }

    /// Install `new` and tell the cluster about it.
    ///
    /// Pass `send_cluster_message = false` when the change came from a peer.
    pub async fn save(
        &self,
        new: ServerConfig,
        send_cluster_message: bool,
    ) -> Result<(Arc<ServerConfig>, Arc<ServerConfig>), SaveError> {
        let store = self.store.clone();
        let (old, new) = tokio::task::spawn_blocking(move || store.set(new))
            .await
            .map_err(ConfigError::Task)??;
        self.sync_metrics(&new);

        if let Some(cluster) = &self.cluster {
            let old_stripped = Arc::new(self.store.remove_environment_overrides(&old)?);
            let new_stripped = Arc::new(self.store.remove_environment_overrides(&new)?);

            let result = cluster
                .config_changed(old_stripped, new_stripped, send_cluster_message)
                .await;
            let outcome = if result.is_ok() { "ok" } else { "error" };
            metrics::counter!("clusterconf_cluster_notifications_total", "outcome" => outcome)
                .increment(1);

            if let Err(e) = result {
                tracing::error!(error = %e, "Configuration saved locally but cluster notification failed");
                return Err(SaveError::ClusterNotify(e));
            }
        }

        Ok((old, new))
    }

    /// Start or stop the metrics endpoint to match `config`.
    pub fn sync_metrics(&self, config: &ServerConfig) {
        if self.metrics_allowed && config.metrics.enable {
            self.metrics.register();
            self.metrics.start_server(&config.metrics);
        } else {
            self.metrics.stop_server();
        }
    }

    /// Re-read the configuration from its source and environment.
    ///
    /// Swaps like [`Self::save`], metrics toggle included, but never
    /// notifies the cluster.
    pub async fn reload(&self) -> Result<Arc<ServerConfig>, ConfigError> {
        let store = self.store.clone();
        let (_, new) = tokio::task::spawn_blocking(move || store.load()).await??;
        self.sync_metrics(&new);
        Ok(new)
    }

    /// Settings overridden by the environment on this node.
    pub fn environment_overrides(&self) -> Arc<EnvOverrides> {
        self.store.environment_overrides()
    }

    /// The active document with secrets masked.
    pub fn sanitized(&self) -> ServerConfig {
        let mut config = (*self.get()).clone();
        config.sanitize();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_ids_and_status() {
        let read_only = SaveError::from(ConfigError::ReadOnly);
        assert_eq!(read_only.id(), "config.save.read_only");
        assert_eq!(read_only.status_code(), StatusCode::FORBIDDEN);

        let invalid = SaveError::from(ConfigError::Validation(Vec::new()));
        assert!(matches!(invalid, SaveError::Invalid(_)));
        assert_eq!(invalid.id(), "config.save.failed");
        assert_eq!(invalid.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let notify = SaveError::ClusterNotify(ClusterError::Closed);
        assert_eq!(notify.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
