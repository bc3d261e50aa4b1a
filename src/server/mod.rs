//! Composition root for one node.
//!
//! # Data Flow
//! ```text
//! Server::start
//!     → config listener registered
//!     → installation date, first run timestamp (system records)
//!     → telemetry id, cookie secret, signing key (cluster singletons)
//!     → latest terms of service
//!     → client config regenerated
//!
//! ConfigService swap → listener → ClientConfigProjector::refresh(current)
//! ```
//!
//! # Design Decisions
//! - Every component is owned by the `Server` instance, so several nodes
//!   can run side by side in one process
//! - Computed client fields are read per request and never cached
//! - The projector rebuilds from the active document, not from the listener
//!   arguments, since listeners of concurrent saves may run out of order

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::client_config::{ClientConfig, ClientConfigProjector};
use crate::clock::now_millis;
use crate::config::ServerConfig;
use crate::secrets::{AsymmetricSigningKey, SecretCoordinator, SecretError};
use crate::service::mail::{hostname_from_site_url, mail_service_config, SmtpConfig};
use crate::service::ConfigService;
use crate::storage::memory::DEFAULT_MAX_POST_SIZE;
use crate::storage::{
    DataStore, StoreError, SystemRecord, SystemStore, FIRST_SERVER_RUN_TIMESTAMP_KEY,
    INSTALLATION_DATE_KEY, UPGRADED_FROM_TE_KEY,
};

/// Errors that abort node startup.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("{operation} failed: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("asymmetric signing key has not been resolved")]
    SigningKeyUnavailable,
}

/// Client config hash signed with the cluster's asymmetric signing key.
///
/// Clients verify `signature` against `AsymmetricSigningPublicKey` from the
/// same config generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientConfigAssertion {
    pub hash: String,
    /// Base64 DER ECDSA signature over the UTF-8 bytes of `hash`.
    pub signature: String,
}

pub struct Server {
    config: Arc<ConfigService>,
    secrets: SecretCoordinator,
    client_config: Arc<ClientConfigProjector>,
    system_store: Arc<dyn SystemStore>,
    data_store: Arc<dyn DataStore>,
    regenerate_listener: Mutex<Option<String>>,
}

impl Server {
    pub fn new(
        config: Arc<ConfigService>,
        system_store: Arc<dyn SystemStore>,
        data_store: Arc<dyn DataStore>,
    ) -> Self {
        Self {
            secrets: SecretCoordinator::new(system_store.clone()),
            client_config: Arc::new(ClientConfigProjector::new()),
            config,
            system_store,
            data_store,
            regenerate_listener: Mutex::new(None),
        }
    }

    /// Resolve every piece of cluster-wide state this node depends on and
    /// start tracking configuration changes.
    pub async fn start(&self) -> Result<(), ServerError> {
        self.watch_config();
        self.ensure_installation_date().await?;
        self.ensure_first_server_run_timestamp().await?;

        let telemetry_id = self.secrets.ensure_telemetry_id().await?;
        self.client_config.set_telemetry_id(telemetry_id.as_str());

        self.secrets.ensure_post_action_cookie_secret().await?;
        self.refresh_terms_of_service().await;
        self.ensure_asymmetric_signing_key().await?;

        tracing::info!(
            telemetry_id = %telemetry_id.as_str(),
            hash = %self.client_config.client_config_hash(),
            "Server started"
        );
        Ok(())
    }

    /// Stop reacting to configuration changes.
    pub fn shutdown(&self) {
        if let Some(id) = self.listener_slot().take() {
            self.config.remove_listener(&id);
        }
        tracing::info!("Server stopped");
    }

    fn listener_slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.regenerate_listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn watch_config(&self) {
        let mut slot = self.listener_slot();
        if slot.is_some() {
            return;
        }
        let projector = self.client_config.clone();
        let service = Arc::downgrade(&self.config);
        let id = self.config.add_listener(move |_old, _new| {
            if let Some(service) = service.upgrade() {
                projector.refresh(|| service.get());
            }
        });
        *slot = Some(id);
    }

    pub fn config(&self) -> &Arc<ConfigService> {
        &self.config
    }

    pub fn secrets(&self) -> &SecretCoordinator {
        &self.secrets
    }

    pub fn client_config_projector(&self) -> &Arc<ClientConfigProjector> {
        &self.client_config
    }

    /// Make sure the signing key exists, then publish its public half to
    /// clients.
    pub async fn ensure_asymmetric_signing_key(
        &self,
    ) -> Result<Arc<AsymmetricSigningKey>, ServerError> {
        let key = self.secrets.ensure_asymmetric_signing_key().await?;
        self.client_config
            .set_signing_public_key(Some(key.public_key_base64()?));
        self.regenerate_client_config();
        Ok(key)
    }

    /// Re-read the latest terms of service and regenerate the client config.
    pub async fn refresh_terms_of_service(&self) {
        match self.data_store.latest_terms_of_service().await {
            Ok(terms) => self
                .client_config
                .set_terms_of_service_id(terms.map(|t| t.id)),
            Err(e) => tracing::error!(error = %e, "Failed to load latest terms of service"),
        }
        self.regenerate_client_config();
    }

    pub fn regenerate_client_config(&self) {
        self.client_config.refresh(|| self.config.get());
    }

    async fn ensure_installation_date(&self) -> Result<(), ServerError> {
        if self.installation_date().await.is_some() {
            return Ok(());
        }

        let installation_date = match self.data_store.infer_system_install_date().await {
            Ok(date) if date > 0 => date,
            Ok(_) => now_millis(),
            Err(e) => {
                tracing::debug!(error = %e, "Could not infer install date, using now");
                now_millis()
            }
        };

        self.system_store
            .save_or_update(SystemRecord::new(
                INSTALLATION_DATE_KEY,
                installation_date.to_string(),
            ))
            .await
            .map_err(|source| ServerError::Store {
                operation: "save installation date",
                source,
            })?;
        tracing::info!(installation_date, "Recorded installation date");
        Ok(())
    }

    async fn ensure_first_server_run_timestamp(&self) -> Result<(), ServerError> {
        if self
            .read_millis(FIRST_SERVER_RUN_TIMESTAMP_KEY)
            .await
            .is_some()
        {
            return Ok(());
        }

        self.system_store
            .save_or_update(SystemRecord::new(
                FIRST_SERVER_RUN_TIMESTAMP_KEY,
                now_millis().to_string(),
            ))
            .await
            .map_err(|source| ServerError::Store {
                operation: "save first server run timestamp",
                source,
            })
    }

    /// Epoch millis stored under `name`, if present and well formed.
    async fn read_millis(&self, name: &str) -> Option<i64> {
        match self.system_store.get_by_name(name).await {
            Ok(record) => match record.value.parse() {
                Ok(millis) => Some(millis),
                Err(_) => {
                    tracing::warn!(record = name, value = %record.value, "Ignoring malformed timestamp");
                    None
                }
            },
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                tracing::warn!(record = name, error = %e, "Failed to read system record");
                None
            }
        }
    }

    pub async fn installation_date(&self) -> Option<i64> {
        self.read_millis(INSTALLATION_DATE_KEY).await
    }

    pub async fn first_server_run_timestamp(&self) -> Option<i64> {
        self.read_millis(FIRST_SERVER_RUN_TIMESTAMP_KEY).await
    }

    async fn is_upgraded_from_te(&self) -> bool {
        self.system_store
            .get_by_name(UPGRADED_FROM_TE_KEY)
            .await
            .map(|record| record.value == "true")
            .unwrap_or(false)
    }

    async fn is_first_user_account(&self) -> bool {
        match self.data_store.user_count().await {
            Ok(count) => count == 0,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to count accounts");
                false
            }
        }
    }

    async fn max_post_size(&self) -> usize {
        self.data_store
            .max_post_size()
            .await
            .unwrap_or(DEFAULT_MAX_POST_SIZE)
    }

    /// Full client config plus the computed, non-configurable fields.
    pub async fn client_config_with_computed(&self) -> ClientConfig {
        let mut props = self.client_config.client_config();

        props.insert(
            "NoAccounts".into(),
            self.is_first_user_account().await.to_string(),
        );
        props.insert("MaxPostSize".into(), self.max_post_size().await.to_string());
        props.insert(
            "UpgradedFromTE".into(),
            self.is_upgraded_from_te().await.to_string(),
        );
        props.insert(
            "InstallationDate".into(),
            self.installation_date()
                .await
                .map(|date| date.to_string())
                .unwrap_or_default(),
        );

        props
    }

    /// Limited client config plus whether any account exists yet.
    pub async fn limited_client_config_with_computed(&self) -> ClientConfig {
        let mut props = self.client_config.limited_client_config();
        props.insert(
            "NoAccounts".into(),
            self.is_first_user_account().await.to_string(),
        );
        props
    }

    pub fn client_config_hash(&self) -> String {
        self.client_config.client_config_hash()
    }

    /// Sign the hash of the current client config.
    pub fn client_config_assertion(&self) -> Result<ClientConfigAssertion, ServerError> {
        let key = self
            .secrets
            .asymmetric_signing_key()
            .ok_or(ServerError::SigningKeyUnavailable)?;
        let hash = self.client_config.client_config_hash();
        let signature = STANDARD.encode(key.sign(hash.as_bytes()));
        Ok(ClientConfigAssertion { hash, signature })
    }

    /// Domain for session cookies, empty unless subdomains share them.
    pub fn cookie_domain(&self) -> String {
        let config = self.config.get();
        if config.service.allow_cookies_for_subdomains {
            hostname_from_site_url(&config.service.site_url)
        } else {
            String::new()
        }
    }

    pub fn site_url(&self) -> String {
        self.config.get().service.site_url.clone()
    }

    /// Active configuration with secrets masked, for administrators.
    pub fn sanitized_config(&self) -> ServerConfig {
        self.config.sanitized()
    }

    /// Settings overridden by the environment, nested like the document.
    pub fn environment_config(&self) -> serde_json::Value {
        self.config.environment_overrides().to_nested()
    }

    pub fn mail_service_config(&self) -> SmtpConfig {
        mail_service_config(&self.config.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, EnvSource, MemorySource};
    use crate::observability::PrometheusMetrics;
    use crate::storage::MemoryStore;

    fn server_with(store: MemoryStore, config: ServerConfig) -> Server {
        let config_store = ConfigStore::open(
            Box::new(MemorySource::new(config)),
            EnvSource::Fixed(Vec::new()),
            false,
        )
        .unwrap();
        let service = ConfigService::new(config_store, Arc::new(PrometheusMetrics::new()))
            .with_metrics_allowed(false);
        let store = Arc::new(store);
        Server::new(Arc::new(service), store.clone(), store)
    }

    #[tokio::test]
    async fn test_start_records_install_date_from_oldest_account() {
        let store = MemoryStore::new();
        store.add_user("a", 1_000);
        store.add_user("b", 500);
        let server = server_with(store, ServerConfig::default());

        server.start().await.unwrap();
        assert_eq!(server.installation_date().await, Some(500));
        assert!(server.first_server_run_timestamp().await.is_some());
    }

    #[tokio::test]
    async fn test_existing_install_date_is_kept() {
        let store = MemoryStore::new();
        store
            .save(SystemRecord::new(INSTALLATION_DATE_KEY, "42"))
            .await
            .unwrap();
        let server = server_with(store, ServerConfig::default());

        server.start().await.unwrap();
        assert_eq!(server.installation_date().await, Some(42));
    }

    #[tokio::test]
    async fn test_start_publishes_public_key() {
        let server = server_with(MemoryStore::new(), ServerConfig::default());
        server.start().await.unwrap();

        let key = server.secrets().asymmetric_signing_key().unwrap();
        let config = server.client_config_projector().client_config();
        assert_eq!(
            config["AsymmetricSigningPublicKey"],
            key.public_key_base64().unwrap()
        );
        assert!(server.secrets().post_action_cookie_secret().is_some());
    }

    #[tokio::test]
    async fn test_computed_fields() {
        let store = MemoryStore::new();
        store
            .save(SystemRecord::new(UPGRADED_FROM_TE_KEY, "true"))
            .await
            .unwrap();
        let server = server_with(store, ServerConfig::default());
        server.start().await.unwrap();

        let full = server.client_config_with_computed().await;
        assert_eq!(full["NoAccounts"], "true");
        assert_eq!(full["UpgradedFromTE"], "true");
        assert_eq!(full["MaxPostSize"], DEFAULT_MAX_POST_SIZE.to_string());
        assert!(!full["InstallationDate"].is_empty());

        let limited = server.limited_client_config_with_computed().await;
        assert_eq!(limited["NoAccounts"], "true");
        assert!(limited.get("MaxPostSize").is_none());
    }

    #[tokio::test]
    async fn test_config_change_regenerates_client_config() {
        let server = server_with(MemoryStore::new(), ServerConfig::default());
        server.start().await.unwrap();
        let before = server.client_config_hash();

        server
            .config()
            .update(|cfg| cfg.support.about_link = "https://about.example.com".into())
            .await;

        assert_ne!(server.client_config_hash(), before);
        assert_eq!(
            server.client_config_projector().client_config()["AboutLink"],
            "https://about.example.com"
        );
    }

    #[tokio::test]
    async fn test_assertion_requires_signing_key() {
        let server = server_with(MemoryStore::new(), ServerConfig::default());
        assert!(matches!(
            server.client_config_assertion(),
            Err(ServerError::SigningKeyUnavailable)
        ));

        server.start().await.unwrap();
        let assertion = server.client_config_assertion().unwrap();
        assert_eq!(assertion.hash, server.client_config_hash());
        assert!(!assertion.signature.is_empty());
    }

    #[tokio::test]
    async fn test_listener_is_registered_before_startup_work() {
        let server = server_with(MemoryStore::new(), ServerConfig::default());
        server.start().await.unwrap();
        assert_eq!(server.config().store().listener_count(), 1);

        server.start().await.unwrap();
        assert_eq!(server.config().store().listener_count(), 1);

        server.shutdown();
        assert_eq!(server.config().store().listener_count(), 0);
    }

    #[test]
    fn test_cookie_domain() {
        let mut config = ServerConfig::default();
        config.service.site_url = "https://chat.example.com".into();
        let server = server_with(MemoryStore::new(), config.clone());
        assert_eq!(server.cookie_domain(), "");

        config.service.allow_cookies_for_subdomains = true;
        let server = server_with(MemoryStore::new(), config);
        assert_eq!(server.cookie_domain(), "chat.example.com");
    }
}
