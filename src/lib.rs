//! Cluster-safe configuration and secret coordination.

pub mod admin;
pub mod client_config;
pub mod clock;
pub mod cluster;
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod secrets;
pub mod server;
pub mod service;
pub mod storage;

pub use config::schema::ServerConfig;
pub use lifecycle::Shutdown;
pub use server::Server;
pub use service::ConfigService;
