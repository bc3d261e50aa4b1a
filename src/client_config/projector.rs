//! Atomically published client config snapshot.

use arc_swap::{ArcSwap, ArcSwapOption};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};

use crate::client_config::generate::{generate_client_config, generate_limited_client_config};
use crate::client_config::ClientConfig;
use crate::config::ServerConfig;

/// Full and limited projections plus the hash of the full one.
///
/// Always published as a unit, so the hash matches the maps it travels with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfigSnapshot {
    pub full: ClientConfig,
    pub limited: ClientConfig,
    pub hash: String,
}

impl ClientConfigSnapshot {
    fn new(full: ClientConfig, limited: ClientConfig) -> Self {
        let hash = client_config_hash(&full);
        Self {
            full,
            limited,
            hash,
        }
    }
}

/// Lowercase hex SHA-256 of the JSON serialization of `config`.
pub fn client_config_hash(config: &ClientConfig) -> String {
    let json = serde_json::to_vec(config).unwrap_or_default();
    format!("{:x}", Sha256::digest(&json))
}

/// Keeps the client-facing projections in sync with the configuration and
/// the computed fields that feed them.
pub struct ClientConfigProjector {
    snapshot: ArcSwap<ClientConfigSnapshot>,
    telemetry_id: ArcSwap<String>,
    terms_of_service_id: ArcSwapOption<String>,
    signing_public_key: ArcSwapOption<String>,
    /// Serializes regeneration so the last published snapshot is built from
    /// the last document read.
    regenerate_lock: Mutex<()>,
}

impl ClientConfigProjector {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(ClientConfigSnapshot::new(
                ClientConfig::new(),
                ClientConfig::new(),
            )),
            telemetry_id: ArcSwap::from_pointee(String::new()),
            terms_of_service_id: ArcSwapOption::empty(),
            signing_public_key: ArcSwapOption::empty(),
            regenerate_lock: Mutex::new(()),
        }
    }

    pub fn set_telemetry_id(&self, id: impl Into<String>) {
        self.telemetry_id.store(Arc::new(id.into()));
    }

    /// Id of the latest custom terms of service, injected when enabled.
    pub fn set_terms_of_service_id(&self, id: Option<String>) {
        self.terms_of_service_id.store(id.map(Arc::new));
    }

    /// Base64 SPKI DER of the signing key, injected into both projections.
    pub fn set_signing_public_key(&self, key: Option<String>) {
        self.signing_public_key.store(key.map(Arc::new));
    }

    /// Rebuild both projections from the document `current` returns and
    /// publish them.
    ///
    /// `current` is called under the regeneration lock, so concurrent
    /// refreshes publish in the order they read, and the final snapshot always
    /// reflects the newest document any of them saw.
    pub fn refresh<F>(&self, current: F)
    where
        F: FnOnce() -> Arc<ServerConfig>,
    {
        let _guard = self
            .regenerate_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.publish(&current());
    }

    fn publish(&self, config: &ServerConfig) {
        let telemetry_id = self.telemetry_id.load();
        let mut full = generate_client_config(config, &telemetry_id);
        let mut limited = generate_limited_client_config(config, &telemetry_id);

        if full.get("EnableCustomTermsOfService").map(String::as_str) == Some("true") {
            if let Some(id) = self.terms_of_service_id.load_full() {
                full.insert("CustomTermsOfServiceId".into(), (*id).clone());
                limited.insert("CustomTermsOfServiceId".into(), (*id).clone());
            }
        }

        if let Some(key) = self.signing_public_key.load_full() {
            full.insert("AsymmetricSigningPublicKey".into(), (*key).clone());
            limited.insert("AsymmetricSigningPublicKey".into(), (*key).clone());
        }

        let snapshot = ClientConfigSnapshot::new(full, limited);
        tracing::debug!(hash = %snapshot.hash, "Client config regenerated");
        self.snapshot.store(Arc::new(snapshot));
    }

    /// The current snapshot, with maps and hash from the same generation.
    pub fn snapshot(&self) -> Arc<ClientConfigSnapshot> {
        self.snapshot.load_full()
    }

    pub fn client_config(&self) -> ClientConfig {
        self.snapshot.load().full.clone()
    }

    pub fn limited_client_config(&self) -> ClientConfig {
        self.snapshot.load().limited.clone()
    }

    pub fn client_config_hash(&self) -> String {
        self.snapshot.load().hash.clone()
    }
}

impl Default for ClientConfigProjector {
    fn default() -> Self {
        Self::new()
    }
}
