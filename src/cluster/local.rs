//! In-process cluster transport over a tokio broadcast channel.
//!
//! Every node joined to the same [`ClusterHub`] sees every message; a node
//! ignores its own.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::cluster::{ClusterError, ClusterTransport};
use crate::config::ServerConfig;
use crate::service::ConfigService;

/// Messages exchanged between nodes.
#[derive(Debug, Clone)]
pub enum ClusterMessage {
    ConfigChanged {
        origin: String,
        config: Arc<ServerConfig>,
    },
}

/// Shared medium the nodes of one process-local cluster talk over.
#[derive(Clone)]
pub struct ClusterHub {
    tx: broadcast::Sender<ClusterMessage>,
    closed: Arc<AtomicBool>,
}

impl ClusterHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Join the hub as `node_id`.
    pub fn join(&self, node_id: impl Into<String>) -> LocalClusterNode {
        LocalClusterNode {
            node_id: node_id.into(),
            tx: self.tx.clone(),
            closed: self.closed.clone(),
        }
    }

    /// Fail every subsequent send.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl Default for ClusterHub {
    fn default() -> Self {
        Self::new(64)
    }
}

/// One node's handle on a [`ClusterHub`].
#[derive(Clone)]
pub struct LocalClusterNode {
    node_id: String,
    tx: broadcast::Sender<ClusterMessage>,
    closed: Arc<AtomicBool>,
}

impl LocalClusterNode {
    pub fn id(&self) -> &str {
        &self.node_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterMessage> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl ClusterTransport for LocalClusterNode {
    async fn config_changed(
        &self,
        _old: Arc<ServerConfig>,
        new: Arc<ServerConfig>,
        send_message: bool,
    ) -> Result<(), ClusterError> {
        if !send_message {
            return Ok(());
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClusterError::Closed);
        }

        let message = ClusterMessage::ConfigChanged {
            origin: self.node_id.clone(),
            config: new,
        };
        match self.tx.send(message) {
            Ok(receivers) => {
                tracing::debug!(node = %self.node_id, receivers, "Broadcast configuration change");
            }
            Err(_) => {
                tracing::debug!(node = %self.node_id, "No peers listening for configuration changes");
            }
        }
        Ok(())
    }
}

/// Reload the configuration whenever a peer announces a change, until
/// shutdown.
///
/// Nodes of one cluster share a configuration source, so a reload picks up
/// the peer's persisted document together with this node's own environment
/// overrides. Reloading never broadcasts, so changes do not bounce back.
pub fn spawn_config_receiver(
    node: &LocalClusterNode,
    service: Arc<ConfigService>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let mut rx = node.subscribe();
    let node_id = node.id().to_string();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                message = rx.recv() => match message {
                    Ok(ClusterMessage::ConfigChanged { origin, .. }) => {
                        if origin == node_id {
                            continue;
                        }
                        tracing::info!(node = %node_id, origin = %origin, "Peer changed configuration, reloading");
                        if let Err(e) = service.reload().await {
                            tracing::warn!(node = %node_id, error = %e, "Failed to reload after peer change");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(node = %node_id, skipped, "Missed cluster messages, reloading");
                        if let Err(e) = service.reload().await {
                            tracing::error!(node = %node_id, error = %e, "Reload after lag failed");
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        tracing::debug!(node = %node_id, "Cluster receiver stopped");
    })
}
