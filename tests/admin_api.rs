//! Admin HTTP API over a real listener.

use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use clusterconf::admin::{setup_admin_router, AdminState};
use clusterconf::config::{EnvSource, MemorySource, ServerConfig, FAKE_SETTING};
use clusterconf::storage::MemoryStore;
use clusterconf::Server;

mod common;
use common::{config_service, env};

const KEY: &str = "test-admin-key";

async fn spawn_admin(
    config: ServerConfig,
    env: EnvSource,
    read_only: bool,
) -> (SocketAddr, Arc<Server>) {
    let source = Arc::new(MemorySource::new(config));
    let (service, _) = config_service(source, env, read_only);
    let store = Arc::new(MemoryStore::new());
    let server = Arc::new(Server::new(Arc::new(service), store.clone(), store));
    server.start().await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = setup_admin_router(AdminState::new(server.clone()));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, server)
}

fn base_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.admin.api_key = KEY.into();
    config.email.smtp_password = "hunter2".into();
    config
}

#[tokio::test]
async fn test_requests_without_key_are_rejected() {
    let (addr, _) = spawn_admin(base_config(), EnvSource::Fixed(Vec::new()), false).await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("http://{addr}/api/v1/config"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    let res = client
        .get(format!("http://{addr}/api/v1/config"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);
}

#[tokio::test]
async fn test_limited_client_config_is_public() {
    let (addr, _) = spawn_admin(base_config(), EnvSource::Fixed(Vec::new()), false).await;

    let res = reqwest::get(format!("http://{addr}/api/v1/config/client/limited"))
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["NoAccounts"], "true");
    assert!(body.get("AsymmetricSigningPublicKey").is_some());
}

#[tokio::test]
async fn test_client_config_assertion_is_public() {
    let (addr, server) = spawn_admin(base_config(), EnvSource::Fixed(Vec::new()), false).await;

    let res = reqwest::get(format!("http://{addr}/api/v1/config/client/assertion"))
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["hash"], server.client_config_hash());
    assert!(!body["signature"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_get_config_is_sanitized() {
    let (addr, _) = spawn_admin(base_config(), EnvSource::Fixed(Vec::new()), false).await;

    let body: Value = reqwest::Client::new()
        .get(format!("http://{addr}/api/v1/config"))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["email"]["smtp_password"], FAKE_SETTING);
    assert_eq!(body["admin"]["api_key"], FAKE_SETTING);
}

#[tokio::test]
async fn test_save_on_read_only_node_is_forbidden() {
    let (addr, server) = spawn_admin(base_config(), EnvSource::Fixed(Vec::new()), true).await;

    let mut edited = server.sanitized_config();
    edited.support.help_link = "https://help.example.com".into();
    let res = reqwest::Client::new()
        .put(format!("http://{addr}/api/v1/config"))
        .bearer_auth(KEY)
        .json(&edited)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 403);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["id"], "config.save.read_only");
    assert_eq!(body["status_code"], 403);
    assert_eq!(server.config().get().support.help_link, "");
}

#[tokio::test]
async fn test_save_keeps_masked_secrets() {
    let (addr, server) = spawn_admin(base_config(), EnvSource::Fixed(Vec::new()), false).await;

    let mut edited = server.sanitized_config();
    edited.support.help_link = "https://help.example.com".into();
    edited.message_export.enable_export = true;
    let res = reqwest::Client::new()
        .put(format!("http://{addr}/api/v1/config"))
        .bearer_auth(KEY)
        .json(&edited)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let active = server.config().get();
    assert_eq!(active.support.help_link, "https://help.example.com");
    assert_eq!(active.email.smtp_password, "hunter2");
    assert_eq!(active.admin.api_key, KEY);
    assert!(active.message_export.export_from_timestamp > 0);
}

#[tokio::test]
async fn test_invalid_save_is_a_server_error() {
    let (addr, _) = spawn_admin(base_config(), EnvSource::Fixed(Vec::new()), false).await;

    let mut invalid = base_config();
    invalid.email.connection_security = "CARRIER_PIGEON".into();
    let res = reqwest::Client::new()
        .put(format!("http://{addr}/api/v1/config"))
        .bearer_auth(KEY)
        .json(&invalid)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 500);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["id"], "config.save.failed");
}

#[tokio::test]
async fn test_environment_overrides_are_listed() {
    let (addr, _) = spawn_admin(
        base_config(),
        env(&[("CLUSTERCONF_SERVICE__ENABLE_DEVELOPER", "true")]),
        false,
    )
    .await;

    let body: Value = reqwest::Client::new()
        .get(format!("http://{addr}/api/v1/config/environment"))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body, serde_json::json!({"service": {"enable_developer": true}}));
}
