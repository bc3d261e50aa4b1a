//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Describe node metrics (config saves/reloads, secret resolutions,
//!   cluster notifications)
//! - Expose a Prometheus-compatible endpoint that can be started and
//!   stopped as the metrics settings change
//!
//! # Metrics
//! - `clusterconf_config_saves_total` (counter): successful document installs
//! - `clusterconf_config_reloads_total` (counter): reloads from the source
//! - `clusterconf_secret_resolutions_total` (counter): by kind, outcome
//! - `clusterconf_cluster_notifications_total` (counter): by outcome
//!
//! # Design Decisions
//! - The global recorder is installed once per process; the HTTP endpoint
//!   comes and goes independently
//! - Start and stop are idempotent

use axum::{routing::get, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::{Mutex, OnceLock};
use tokio::sync::oneshot;

use crate::config::MetricsSettings;

/// Operations the configuration service needs from the metrics subsystem.
pub trait MetricsControl: Send + Sync {
    /// Install the recorder and describe metrics. Safe to call repeatedly.
    fn register(&self);

    /// Serve metrics at `settings.listen_address`.
    fn start_server(&self, settings: &MetricsSettings);

    /// Stop serving metrics, if serving.
    fn stop_server(&self);
}

struct RunningServer {
    address: SocketAddr,
    shutdown: oneshot::Sender<()>,
}

/// Prometheus exporter with an on-demand HTTP endpoint.
#[derive(Default)]
pub struct PrometheusMetrics {
    handle: OnceLock<PrometheusHandle>,
    server: Mutex<Option<RunningServer>>,
}

impl PrometheusMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Address the endpoint is bound to, if it is running.
    pub fn running_address(&self) -> Option<SocketAddr> {
        self.lock_server().as_ref().map(|s| s.address)
    }

    /// Render the current metrics in Prometheus text format.
    pub fn render(&self) -> Option<String> {
        self.handle.get().map(PrometheusHandle::render)
    }

    fn lock_server(&self) -> std::sync::MutexGuard<'_, Option<RunningServer>> {
        match self.server.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn install(&self) -> PrometheusHandle {
        self.handle
            .get_or_init(|| {
                let recorder = PrometheusBuilder::new().build_recorder();
                let handle = recorder.handle();
                if metrics::set_global_recorder(recorder).is_err() {
                    tracing::warn!("A metrics recorder is already installed");
                }

                metrics::describe_counter!(
                    "clusterconf_config_saves_total",
                    "Configuration documents installed by save or update"
                );
                metrics::describe_counter!(
                    "clusterconf_config_reloads_total",
                    "Configuration reloads from the source"
                );
                metrics::describe_counter!(
                    "clusterconf_secret_resolutions_total",
                    "Cluster singleton resolutions by kind and outcome"
                );
                metrics::describe_counter!(
                    "clusterconf_cluster_notifications_total",
                    "Configuration change notifications sent to the cluster"
                );
                handle
            })
            .clone()
    }

    fn spawn(&self, address: SocketAddr, handle: PrometheusHandle) -> std::io::Result<RunningServer> {
        let std_listener = std::net::TcpListener::bind(address)?;
        std_listener.set_nonblocking(true)?;
        let listener = tokio::net::TcpListener::from_std(std_listener)?;
        let bound = listener.local_addr()?;

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );

        let (shutdown, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Metrics server failed");
            }
        });

        Ok(RunningServer {
            address: bound,
            shutdown,
        })
    }
}

impl MetricsControl for PrometheusMetrics {
    fn register(&self) {
        self.install();
    }

    fn start_server(&self, settings: &MetricsSettings) {
        let address: SocketAddr = match settings.listen_address.parse() {
            Ok(address) => address,
            Err(_) => {
                tracing::error!(
                    metrics_address = %settings.listen_address,
                    "Failed to parse metrics address"
                );
                return;
            }
        };

        if tokio::runtime::Handle::try_current().is_err() {
            tracing::error!("Metrics server requires a running tokio runtime");
            return;
        }

        let mut server = self.lock_server();
        if let Some(running) = server.as_ref() {
            if running.address == address || address.port() == 0 {
                return;
            }
        }
        if let Some(running) = server.take() {
            let _ = running.shutdown.send(());
        }

        match self.spawn(address, self.install()) {
            Ok(running) => {
                tracing::info!(address = %running.address, "Metrics server started");
                *server = Some(running);
            }
            Err(e) => {
                tracing::error!(address = %address, error = %e, "Failed to start metrics server");
            }
        }
    }

    fn stop_server(&self) {
        if let Some(running) = self.lock_server().take() {
            let _ = running.shutdown.send(());
            tracing::info!(address = %running.address, "Metrics server stopped");
        }
    }
}
