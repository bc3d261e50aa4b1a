//! clusterconf node.
//!
//! # Architecture Overview
//!
//! ```text
//!   config.toml + CLUSTERCONF_* env ──▶ ConfigStore ──▶ ConfigService ──▶ ClusterTransport
//!                                           │               │                 (peers reload)
//!                                           ▼               ▼
//!                                   ClientConfigProjector  metrics endpoint
//!                                           ▲
//!   system records (MemoryStore) ──▶ SecretCoordinator ──┘
//!
//!   admin API (axum) ──▶ Server ──▶ all of the above
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use clusterconf::admin::{setup_admin_router, AdminState};
use clusterconf::cluster::{spawn_config_receiver, ClusterHub};
use clusterconf::config::watcher::ConfigWatcher;
use clusterconf::config::{ConfigSource, ConfigStore, EnvOverrides, EnvSource, FileSource};
use clusterconf::observability::{init_logging, MetricsControl, PrometheusMetrics};
use clusterconf::storage::MemoryStore;
use clusterconf::{ConfigService, Server, Shutdown};

#[derive(Parser)]
#[command(name = "clusterconf")]
#[command(about = "Cluster-safe configuration and secret coordination node", long_about = None)]
struct Args {
    /// Configuration file, created with defaults if missing
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// File backing the system record store
    #[arg(short, long, default_value = "clusterconf-store.json")]
    store: PathBuf,

    /// Reject configuration writes regardless of settings
    #[arg(long)]
    read_only: bool,

    /// Identifier of this node in the cluster
    #[arg(long, default_value = "node-1")]
    node_id: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let source = FileSource::new(&args.config);
    let persisted = source.load()?;
    let bootstrap = EnvOverrides::resolve(&EnvSource::Process, &persisted)?.apply(&persisted)?;
    init_logging(&bootstrap.log);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), node = %args.node_id, "clusterconf starting");

    let read_only =
        args.read_only || (bootstrap.cluster.enable && bootstrap.cluster.read_only_config);
    let config_store = ConfigStore::open(Box::new(source), EnvSource::Process, read_only)?;

    let metrics = Arc::new(PrometheusMetrics::new());
    let mut service = ConfigService::new(config_store, metrics.clone());

    let cluster_node = if bootstrap.cluster.enable {
        let hub = ClusterHub::default();
        let node = hub.join(args.node_id.clone());
        service = service.with_cluster(Arc::new(node.clone()));
        tracing::info!(cluster = %bootstrap.cluster.cluster_name, "Cluster messaging enabled");
        Some(node)
    } else {
        None
    };
    let service = Arc::new(service);
    service.sync_metrics(&service.get());

    let store = Arc::new(MemoryStore::open(&args.store)?);
    let server = Arc::new(Server::new(service.clone(), store.clone(), store));
    server.start().await?;

    let shutdown = Shutdown::new();
    let mut tasks = Vec::new();

    if let Some(node) = &cluster_node {
        tasks.push(spawn_config_receiver(node, service.clone(), shutdown.subscribe()));
    }

    let (watcher, mut reload_rx) = ConfigWatcher::new(&args.config);
    let _watcher = watcher.run()?;
    {
        let service = service.clone();
        let mut stop = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.recv() => break,
                    event = reload_rx.recv() => {
                        if event.is_none() {
                            break;
                        }
                        if let Err(e) = service.reload().await {
                            tracing::error!(error = %e, "Failed to reload configuration");
                        }
                    }
                }
            }
        }));
    }

    let admin = service.get().admin.clone();
    if admin.enable {
        let addr: SocketAddr = admin.listen_address.parse()?;
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");

        let app = setup_admin_router(AdminState::new(server.clone()));
        let mut stop = shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = stop.recv().await;
            });
            if let Err(e) = serve.await {
                tracing::error!(error = %e, "Admin API failed");
            }
        }));
    }

    shutdown.listen_for_signals().await;

    for task in tasks {
        let _ = task.await;
    }
    server.shutdown();
    metrics.stop_server();

    tracing::info!("Shutdown complete");
    Ok(())
}
