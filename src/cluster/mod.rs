//! Cluster configuration propagation.
//!
//! # Data Flow
//! ```text
//! ConfigService::save (local swap committed)
//!     → strip env overrides from old and new
//!     → ClusterTransport::config_changed(old, new, send_message)
//!     → peers reload from the shared source (never re-broadcast)
//! ```
//!
//! # Design Decisions
//! - Synchronous with respect to save: a transport failure is reported to
//!   the caller, but the local change is not rolled back
//! - Only env-stripped documents cross the wire; overrides are node-local

pub mod local;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::ServerConfig;

pub use local::{spawn_config_receiver, ClusterHub, ClusterMessage, LocalClusterNode};

/// Errors raised by cluster transports.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Every peer channel is gone.
    #[error("cluster channel closed")]
    Closed,

    /// The transport failed to deliver the message.
    #[error("cluster transport error: {0}")]
    Transport(String),
}

/// Transport used to tell peers about configuration changes.
#[async_trait]
pub trait ClusterTransport: Send + Sync {
    /// Called after a local configuration swap.
    ///
    /// `old` and `new` never contain environment overrides. When
    /// `send_message` is false the change came from a peer and must not be
    /// broadcast again.
    async fn config_changed(
        &self,
        old: Arc<ServerConfig>,
        new: Arc<ServerConfig>,
        send_message: bool,
    ) -> Result<(), ClusterError>;
}
