//! Shared fixtures for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Barrier;

use clusterconf::cluster::{ClusterError, ClusterTransport};
use clusterconf::config::{ConfigStore, EnvSource, MemorySource, MetricsSettings, ServerConfig};
use clusterconf::observability::MetricsControl;
use clusterconf::storage::{MemoryStore, StoreError, StoreResult, SystemRecord, SystemStore};
use clusterconf::ConfigService;

/// A store that can be told to fail reads and that holds the first
/// `gated` reads until they have all arrived, so racing callers all miss.
pub struct FlakyStore {
    pub inner: MemoryStore,
    fail_reads: AtomicBool,
    gate: Option<Barrier>,
    gated_reads: AtomicUsize,
    gated: usize,
    pub saves: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_reads: AtomicBool::new(false),
            gate: None,
            gated_reads: AtomicUsize::new(0),
            gated: 0,
            saves: AtomicUsize::new(0),
        }
    }

    /// Hold the first `n` reads until all `n` have arrived.
    pub fn gated(inner: MemoryStore, n: usize) -> Self {
        Self {
            gate: Some(Barrier::new(n)),
            gated: n,
            ..Self::new(inner)
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SystemStore for FlakyStore {
    async fn get_by_name(&self, name: &str) -> StoreResult<SystemRecord> {
        if let Some(gate) = &self.gate {
            if self.gated_reads.fetch_add(1, Ordering::SeqCst) < self.gated {
                gate.wait().await;
            }
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected read failure".into()));
        }
        self.inner.get_by_name(name).await
    }

    async fn save(&self, record: SystemRecord) -> StoreResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(record).await
    }

    async fn save_or_update(&self, record: SystemRecord) -> StoreResult<()> {
        self.inner.save_or_update(record).await
    }
}

/// One recorded `config_changed` call.
#[derive(Clone)]
pub struct Notification {
    pub old: Arc<ServerConfig>,
    pub new: Arc<ServerConfig>,
    pub send_message: bool,
}

/// Cluster transport that records calls and can be told to fail.
#[derive(Default)]
pub struct RecordingCluster {
    pub calls: Mutex<Vec<Notification>>,
    fail: AtomicBool,
}

impl RecordingCluster {
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Notification> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterTransport for RecordingCluster {
    async fn config_changed(
        &self,
        old: Arc<ServerConfig>,
        new: Arc<ServerConfig>,
        send_message: bool,
    ) -> Result<(), ClusterError> {
        self.calls.lock().unwrap().push(Notification {
            old,
            new,
            send_message,
        });
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClusterError::Transport("injected failure".into()));
        }
        Ok(())
    }
}

/// Metrics control that only counts calls.
#[derive(Default)]
pub struct RecordingMetrics {
    pub registers: AtomicUsize,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub running: AtomicBool,
}

impl MetricsControl for RecordingMetrics {
    fn register(&self) {
        self.registers.fetch_add(1, Ordering::SeqCst);
    }

    fn start_server(&self, _settings: &MetricsSettings) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
    }

    fn stop_server(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }
}

pub fn env(vars: &[(&str, &str)]) -> EnvSource {
    EnvSource::Fixed(
        vars.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

/// A config service over `source` with recording collaborators.
pub fn config_service(
    source: Arc<MemorySource>,
    env: EnvSource,
    read_only: bool,
) -> (ConfigService, Arc<RecordingMetrics>) {
    let store = ConfigStore::open(Box::new(source), env, read_only).unwrap();
    let metrics = Arc::new(RecordingMetrics::default());
    (ConfigService::new(store, metrics.clone()), metrics)
}
