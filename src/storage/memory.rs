//! In-process store with optional JSON file persistence.

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::storage::{
    DataStore, StoreError, StoreResult, SystemRecord, SystemStore, TermsOfService,
};

/// Default post size limit when nothing else is configured.
pub const DEFAULT_MAX_POST_SIZE: usize = 16_383;

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    systems: BTreeMap<String, String>,
}

/// A thread-safe store for system records and the small amount of
/// account data the client config needs.
#[derive(Clone, Default)]
pub struct MemoryStore {
    systems: Arc<DashMap<String, String>>,
    users: Arc<DashMap<String, i64>>,
    terms: Arc<ArcSwapOption<TermsOfService>>,
    max_post_size: Arc<AtomicUsize>,
    persistence_path: Option<PathBuf>,
    write_lock: Arc<Mutex<()>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            max_post_size: Arc::new(AtomicUsize::new(DEFAULT_MAX_POST_SIZE)),
            ..Default::default()
        }
    }

    /// Open a store persisted at `path`, loading existing records if the file exists.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut store = Self::new();

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            let state: PersistedState = serde_json::from_reader(reader)?;
            for (name, value) in state.systems {
                store.systems.insert(name, value);
            }
            tracing::info!(
                path = %path.display(),
                records = store.systems.len(),
                "Loaded system records"
            );
        }

        store.persistence_path = Some(path);
        Ok(store)
    }

    /// Write every record to the backing file, if any.
    ///
    /// Snapshots are taken and written under one lock, so the file never
    /// goes back to an older state. The write itself runs on the blocking pool.
    async fn persist(&self) -> StoreResult<()> {
        let Some(path) = self.persistence_path.clone() else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;

        let state = PersistedState {
            systems: self
                .systems
                .iter()
                .map(|r| (r.key().clone(), r.value().clone()))
                .collect(),
        };

        let bytes = serde_json::to_vec_pretty(&state)?;

        tokio::task::spawn_blocking(move || {
            let tmp = path.with_extension("tmp");
            fs::write(&tmp, bytes)?;
            fs::rename(&tmp, &path)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("persist task failed: {e}")))??;
        Ok(())
    }

    /// Register a user account created at `create_at` (epoch millis).
    pub fn add_user(&self, id: impl Into<String>, create_at: i64) {
        self.users.insert(id.into(), create_at);
    }

    /// Replace the latest terms of service.
    pub fn set_terms_of_service(&self, terms: TermsOfService) {
        self.terms.store(Some(Arc::new(terms)));
    }

    pub fn set_max_post_size(&self, size: usize) {
        self.max_post_size.store(size, Ordering::Relaxed);
    }

    /// Number of system records held.
    pub fn record_count(&self) -> usize {
        self.systems.len()
    }
}

#[async_trait]
impl SystemStore for MemoryStore {
    async fn get_by_name(&self, name: &str) -> StoreResult<SystemRecord> {
        self.systems
            .get(name)
            .map(|r| SystemRecord::new(name, r.value().clone()))
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn save(&self, record: SystemRecord) -> StoreResult<()> {
        match self.systems.entry(record.name) {
            Entry::Occupied(e) => return Err(StoreError::Conflict(e.key().clone())),
            Entry::Vacant(e) => {
                e.insert(record.value);
            }
        }
        self.persist().await
    }

    async fn save_or_update(&self, record: SystemRecord) -> StoreResult<()> {
        self.systems.insert(record.name, record.value);
        self.persist().await
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn user_count(&self) -> StoreResult<u64> {
        Ok(self.users.len() as u64)
    }

    async fn infer_system_install_date(&self) -> StoreResult<i64> {
        self.users
            .iter()
            .map(|r| *r.value())
            .filter(|create_at| *create_at > 0)
            .min()
            .ok_or_else(|| StoreError::NotFound("users".into()))
    }

    async fn latest_terms_of_service(&self) -> StoreResult<Option<TermsOfService>> {
        Ok(self.terms.load_full().map(|t| (*t).clone()))
    }

    async fn max_post_size(&self) -> StoreResult<usize> {
        Ok(self.max_post_size.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_is_insert_if_absent() {
        let store = MemoryStore::new();
        store.save(SystemRecord::new("k", "first")).await.unwrap();

        let err = store.save(SystemRecord::new("k", "second")).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.get_by_name("k").await.unwrap().value, "first");
    }

    #[tokio::test]
    async fn test_save_or_update_overwrites() {
        let store = MemoryStore::new();
        store.save_or_update(SystemRecord::new("k", "a")).await.unwrap();
        store.save_or_update(SystemRecord::new("k", "b")).await.unwrap();
        assert_eq!(store.get_by_name("k").await.unwrap().value, "b");
    }

    #[tokio::test]
    async fn test_missing_record() {
        let store = MemoryStore::new();
        assert!(store.get_by_name("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_infer_install_date_uses_oldest_account() {
        let store = MemoryStore::new();
        assert!(store.infer_system_install_date().await.is_err());

        store.add_user("u1", 2_000);
        store.add_user("u2", 1_000);
        assert_eq!(store.infer_system_install_date().await.unwrap(), 1_000);
        assert_eq!(store.user_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system.json");

        let store = MemoryStore::open(&path).unwrap();
        store.save(SystemRecord::new("k", "v")).await.unwrap();

        let loaded = MemoryStore::open(&path).unwrap();
        assert_eq!(loaded.get_by_name("k").await.unwrap().value, "v");
        assert_eq!(loaded.record_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_leave_latest_state_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system.json");
        let store = MemoryStore::open(&path).unwrap();

        let writers: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .save(SystemRecord::new(format!("k{i}"), i.to_string()))
                        .await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let loaded = MemoryStore::open(&path).unwrap();
        assert_eq!(loaded.record_count(), 16);
        assert!(!path.with_extension("tmp").exists());
    }
}
