//! The active configuration document and its listeners.
//!
//! # Design Decisions
//! - Readers load an `Arc<ServerConfig>` from an `ArcSwap`; they never block
//!   and never observe a partially written document
//! - Writers are serialized by a mutex readers never touch, so persisted and
//!   active documents are swapped in the same order
//! - Listeners run after the writer lock is released, from a snapshot of the
//!   registry, so they may add or remove listeners or update the config
//! - `set` and `load` block on the source; async callers go through
//!   `ConfigService`, which moves them to the blocking pool

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::config::loader::{ConfigError, ConfigSource, EnvOverrides, EnvSource};
use crate::config::schema::ServerConfig;
use crate::config::validation::validate_config;

/// Callback invoked with the previous and the new active document.
pub type ConfigListener = Arc<dyn Fn(&ServerConfig, &ServerConfig) + Send + Sync>;

/// Holds the active configuration of one node.
pub struct ConfigStore {
    source: Box<dyn ConfigSource>,
    env: EnvSource,
    /// Active document: persisted document plus environment overrides.
    active: ArcSwap<ServerConfig>,
    /// Document as persisted in the source.
    persisted: ArcSwap<ServerConfig>,
    overrides: ArcSwap<EnvOverrides>,
    listeners: DashMap<String, ConfigListener>,
    read_only: bool,
    write_lock: Mutex<()>,
}

impl ConfigStore {
    /// Load the initial document from `source` and `env`.
    pub fn open(
        source: Box<dyn ConfigSource>,
        env: EnvSource,
        read_only: bool,
    ) -> Result<Self, ConfigError> {
        let (persisted, overrides, active) = Self::read(source.as_ref(), &env)?;

        tracing::info!(
            source = %source.describe(),
            read_only,
            overrides = overrides.paths().count(),
            "Configuration loaded"
        );

        Ok(Self {
            source,
            env,
            active: ArcSwap::from_pointee(active),
            persisted: ArcSwap::from_pointee(persisted),
            overrides: ArcSwap::from_pointee(overrides),
            listeners: DashMap::new(),
            read_only,
            write_lock: Mutex::new(()),
        })
    }

    fn read(
        source: &dyn ConfigSource,
        env: &EnvSource,
    ) -> Result<(ServerConfig, EnvOverrides, ServerConfig), ConfigError> {
        let persisted = source.load()?;
        let overrides = EnvOverrides::resolve(env, &persisted)?;
        let active = overrides.apply(&persisted)?;
        validate_config(&active).map_err(ConfigError::Validation)?;
        Ok((persisted, overrides, active))
    }

    /// The active document.
    pub fn get(&self) -> Arc<ServerConfig> {
        self.active.load_full()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Settings overridden by the environment on this node.
    pub fn environment_overrides(&self) -> Arc<EnvOverrides> {
        self.overrides.load_full()
    }

    /// Copy of `config` with every environment override replaced by its persisted value.
    pub fn remove_environment_overrides(
        &self,
        config: &ServerConfig,
    ) -> Result<ServerConfig, ConfigError> {
        self.overrides
            .load()
            .strip(config, &self.persisted.load())
    }

    /// Register a listener, returning its id.
    pub fn add_listener<F>(&self, listener: F) -> String
    where
        F: Fn(&ServerConfig, &ServerConfig) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4().to_string();
        self.listeners.insert(id.clone(), Arc::new(listener));
        id
    }

    pub fn remove_listener(&self, id: &str) {
        self.listeners.remove(id);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Validate, persist and activate `config`.
    ///
    /// Environment overrides present in `config` are not persisted; this
    /// node's overrides are re-applied on top of the persisted document.
    pub fn set(
        &self,
        config: ServerConfig,
    ) -> Result<(Arc<ServerConfig>, Arc<ServerConfig>), ConfigError> {
        if self.read_only {
            return Err(ConfigError::ReadOnly);
        }

        let (old, new) = {
            let _guard = self.lock_writers();
            let overrides = self.overrides.load_full();

            let persisted = overrides.strip(&config, &self.persisted.load())?;
            let active = overrides.apply(&persisted)?;
            validate_config(&active).map_err(ConfigError::Validation)?;

            self.source.persist(&persisted)?;
            self.persisted.store(Arc::new(persisted));

            let new = Arc::new(active);
            let old = self.active.swap(new.clone());
            (old, new)
        };

        metrics::counter!("clusterconf_config_saves_total").increment(1);
        self.notify(&old, &new);
        Ok((old, new))
    }

    /// Re-read the source and environment and activate the result.
    pub fn load(&self) -> Result<(Arc<ServerConfig>, Arc<ServerConfig>), ConfigError> {
        let (old, new) = {
            let _guard = self.lock_writers();
            let (persisted, overrides, active) = Self::read(self.source.as_ref(), &self.env)?;

            self.persisted.store(Arc::new(persisted));
            self.overrides.store(Arc::new(overrides));

            let new = Arc::new(active);
            let old = self.active.swap(new.clone());
            (old, new)
        };

        metrics::counter!("clusterconf_config_reloads_total").increment(1);
        tracing::info!(source = %self.source.describe(), "Configuration reloaded");
        self.notify(&old, &new);
        Ok((old, new))
    }

    fn lock_writers(&self) -> std::sync::MutexGuard<'_, ()> {
        match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn notify(&self, old: &ServerConfig, new: &ServerConfig) {
        let listeners: Vec<ConfigListener> =
            self.listeners.iter().map(|r| r.value().clone()).collect();
        for listener in listeners {
            listener(old, new);
        }
    }
}
