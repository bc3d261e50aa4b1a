//! Client config projection as seen through a running server.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use clusterconf::config::{EnvSource, MemorySource, ServerConfig};
use clusterconf::storage::{DataStore, MemoryStore, StoreResult, TermsOfService};
use clusterconf::{ConfigService, Server};

mod common;
use common::config_service;

async fn started_server(store: MemoryStore, config: ServerConfig) -> Server {
    let source = Arc::new(MemorySource::new(config));
    let (service, _) = config_service(source, EnvSource::Fixed(Vec::new()), false);
    let store = Arc::new(store);
    let server = Server::new(Arc::new(service), store.clone(), store);
    server.start().await.unwrap();
    server
}

#[tokio::test]
async fn test_hash_is_digest_of_served_config() {
    let server = started_server(MemoryStore::new(), ServerConfig::default()).await;

    let projector = server.client_config_projector();
    let snapshot = projector.snapshot();
    let expected = format!(
        "{:x}",
        Sha256::digest(serde_json::to_vec(&snapshot.full).unwrap())
    );

    assert_eq!(snapshot.hash, expected);
    assert_eq!(server.client_config_hash(), expected);
}

#[tokio::test]
async fn test_hash_tracks_config_changes() {
    let server = started_server(MemoryStore::new(), ServerConfig::default()).await;
    let before = server.client_config_hash();

    let mut updated = (*server.config().get()).clone();
    updated.support.help_link = "https://help.example.com".into();
    server.config().save(updated, true).await.unwrap();

    let projector = server.client_config_projector();
    assert_ne!(server.client_config_hash(), before);
    assert_eq!(
        projector.client_config()["HelpLink"],
        "https://help.example.com"
    );
    let expected = format!(
        "{:x}",
        Sha256::digest(serde_json::to_vec(&projector.client_config()).unwrap())
    );
    assert_eq!(server.client_config_hash(), expected);
}

#[tokio::test]
async fn test_terms_of_service_and_public_key_are_injected() {
    let store = MemoryStore::new();
    store.set_terms_of_service(TermsOfService {
        id: "tos-7".into(),
        text: "Be nice.".into(),
        create_at: 1,
    });
    let mut config = ServerConfig::default();
    config.support.custom_terms_of_service_enabled = true;

    let server = started_server(store, config).await;
    let key = server.secrets().asymmetric_signing_key().unwrap();
    let public_key = key.public_key_base64().unwrap();

    let full = server.client_config_with_computed().await;
    let limited = server.limited_client_config_with_computed().await;
    for props in [&full, &limited] {
        assert_eq!(props["CustomTermsOfServiceId"], "tos-7");
        assert_eq!(props["AsymmetricSigningPublicKey"], public_key);
        assert_eq!(props["EnableCustomTermsOfService"], "true");
    }
}

#[tokio::test]
async fn test_computed_fields_reflect_store_state() {
    let store = MemoryStore::new();
    store.add_user("first", 1_700_000_000_000);
    store.set_max_post_size(65_535);

    let server = started_server(store, ServerConfig::default()).await;
    let full = server.client_config_with_computed().await;

    assert_eq!(full["NoAccounts"], "false");
    assert_eq!(full["MaxPostSize"], "65535");
    assert_eq!(full["UpgradedFromTE"], "false");
    assert_eq!(full["InstallationDate"], "1700000000000");

    // Computed fields are not part of the cached projection or its hash.
    assert!(server
        .client_config_projector()
        .client_config()
        .get("NoAccounts")
        .is_none());
}

#[tokio::test]
async fn test_limited_config_hides_authenticated_settings() {
    let mut config = ServerConfig::default();
    config.service.enable_developer = true;
    let server = started_server(MemoryStore::new(), config).await;

    let limited = server.limited_client_config_with_computed().await;
    assert!(limited.get("EnableDeveloper").is_none());
    assert!(limited.contains_key("SiteURL"));
    assert_eq!(limited["NoAccounts"], "true");
}

fn with_site(url: &str) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.service.site_url = url.to_string();
    config
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_client_config_follows_latest_of_concurrent_saves() {
    let server = started_server(MemoryStore::new(), ServerConfig::default()).await;
    let service = server.config().clone();
    service.add_listener(|_, new| {
        if new.service.site_url.starts_with("https://slow.") {
            std::thread::sleep(Duration::from_millis(100));
        }
    });

    for round in 0..5 {
        let slow = {
            let service = service.clone();
            let url = format!("https://slow.example.com/{round}");
            tokio::spawn(async move { service.save(with_site(&url), true).await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        service
            .save(with_site(&format!("https://fast.example.com/{round}")), true)
            .await
            .unwrap();
        slow.await.unwrap();

        let snapshot = server.client_config_projector().snapshot();
        assert_eq!(snapshot.full["SiteURL"], service.get().service.site_url);
        assert_eq!(
            snapshot.hash,
            format!("{:x}", Sha256::digest(serde_json::to_vec(&snapshot.full).unwrap()))
        );
    }
}

/// Saves a new help link the first time startup asks for the install date.
struct SavingDataStore {
    inner: MemoryStore,
    service: Arc<ConfigService>,
}

#[async_trait]
impl DataStore for SavingDataStore {
    async fn user_count(&self) -> StoreResult<u64> {
        self.inner.user_count().await
    }

    async fn infer_system_install_date(&self) -> StoreResult<i64> {
        let mut updated = (*self.service.get()).clone();
        updated.support.help_link = "https://help.example.com".into();
        self.service.save(updated, true).await.unwrap();
        self.inner.infer_system_install_date().await
    }

    async fn latest_terms_of_service(&self) -> StoreResult<Option<TermsOfService>> {
        self.inner.latest_terms_of_service().await
    }

    async fn max_post_size(&self) -> StoreResult<usize> {
        self.inner.max_post_size().await
    }
}

#[tokio::test]
async fn test_save_during_startup_is_projected() {
    let source = Arc::new(MemorySource::new(ServerConfig::default()));
    let (service, _) = config_service(source, EnvSource::Fixed(Vec::new()), false);
    let service = Arc::new(service);
    let store = Arc::new(MemoryStore::new());
    let data = Arc::new(SavingDataStore {
        inner: MemoryStore::new(),
        service: service.clone(),
    });

    let server = Server::new(service, store, data);
    server.start().await.unwrap();

    assert_eq!(
        server.client_config_projector().client_config()["HelpLink"],
        "https://help.example.com"
    );
}

#[tokio::test]
async fn test_assertion_verifies_with_published_key() {
    let server = started_server(MemoryStore::new(), ServerConfig::default()).await;

    let assertion = server.client_config_assertion().unwrap();
    assert_eq!(assertion.hash, server.client_config_hash());

    let config = server.client_config_projector().client_config();
    let der = STANDARD.decode(&config["AsymmetricSigningPublicKey"]).unwrap();
    let verifying_key = VerifyingKey::from_public_key_der(&der).unwrap();
    let signature = Signature::from_der(&STANDARD.decode(&assertion.signature).unwrap()).unwrap();

    assert!(verifying_key
        .verify(assertion.hash.as_bytes(), &signature)
        .is_ok());
    assert!(verifying_key.verify(b"tampered", &signature).is_err());
}
