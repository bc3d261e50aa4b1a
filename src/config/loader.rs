//! Configuration loading from disk and the environment.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Prefix of environment variables that override settings.
pub const ENV_PREFIX: &str = "CLUSTERCONF_";

/// Error type for configuration loading and installation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("Invalid override {key}: {reason}")]
    Override { key: String, reason: String },

    #[error("configuration is read-only")]
    ReadOnly,

    #[error("configuration task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse a TOML configuration file without validating it.
pub fn parse_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let config = parse_config(path)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Where the persisted configuration document lives.
pub trait ConfigSource: Send + Sync {
    /// Read the persisted document, without environment overrides.
    fn load(&self) -> Result<ServerConfig, ConfigError>;

    /// Replace the persisted document.
    fn persist(&self, config: &ServerConfig) -> Result<(), ConfigError>;

    /// Human-readable location for logs.
    fn describe(&self) -> String;
}

impl<T: ConfigSource + ?Sized> ConfigSource for Arc<T> {
    fn load(&self) -> Result<ServerConfig, ConfigError> {
        (**self).load()
    }

    fn persist(&self, config: &ServerConfig) -> Result<(), ConfigError> {
        (**self).persist(config)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// A TOML file on local disk.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileSource {
    fn load(&self) -> Result<ServerConfig, ConfigError> {
        if !self.path.exists() {
            tracing::info!(path = %self.path.display(), "Config file missing, writing defaults");
            let config = ServerConfig::default();
            self.persist(&config)?;
            return Ok(config);
        }
        parse_config(&self.path)
    }

    fn persist(&self, config: &ServerConfig) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(config)?;
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file://{}", self.path.display())
    }
}

/// An in-memory document, for tests and ephemeral nodes.
#[derive(Default)]
pub struct MemorySource {
    config: Mutex<ServerConfig>,
}

impl MemorySource {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Mutex::new(config),
        }
    }

    /// The last persisted document.
    pub fn current(&self) -> ServerConfig {
        match self.config.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ConfigSource for MemorySource {
    fn load(&self) -> Result<ServerConfig, ConfigError> {
        Ok(self.current())
    }

    fn persist(&self, config: &ServerConfig) -> Result<(), ConfigError> {
        let mut guard = match self.config.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = config.clone();
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Where environment overrides are read from.
#[derive(Debug, Clone, Default)]
pub enum EnvSource {
    /// The process environment.
    #[default]
    Process,
    /// A fixed set of variables.
    Fixed(Vec<(String, String)>),
}

impl EnvSource {
    fn vars(&self) -> Vec<(String, String)> {
        match self {
            EnvSource::Process => std::env::vars().collect(),
            EnvSource::Fixed(vars) => vars.clone(),
        }
    }
}

/// Settings overridden by environment variables on this node.
///
/// Keys are dotted paths (`service.site_url`); values are already coerced
/// to the JSON type of the field they replace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvOverrides {
    values: BTreeMap<String, Value>,
}

impl EnvOverrides {
    /// Collect the overrides in `source` that apply to `base`.
    pub fn resolve(source: &EnvSource, base: &ServerConfig) -> Result<Self, ConfigError> {
        let doc = serde_json::to_value(base)?;
        let mut values = BTreeMap::new();

        for (name, raw) in source.vars() {
            let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let segments: Vec<String> = rest.split("__").map(str::to_ascii_lowercase).collect();
            let Some(current) = lookup(&doc, &segments) else {
                tracing::warn!(variable = %name, "Ignoring override for unknown setting");
                continue;
            };
            let value = coerce(current, &raw).map_err(|reason| ConfigError::Override {
                key: name.clone(),
                reason,
            })?;
            values.insert(segments.join("."), value);
        }

        Ok(Self { values })
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Dotted paths of every overridden setting.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Apply the overrides on top of `config`.
    pub fn apply(&self, config: &ServerConfig) -> Result<ServerConfig, ConfigError> {
        if self.is_empty() {
            return Ok(config.clone());
        }
        let mut doc = serde_json::to_value(config)?;
        for (path, value) in &self.values {
            set(&mut doc, path, value.clone());
        }
        Ok(serde_json::from_value(doc)?)
    }

    /// Replace every overridden setting in `config` with its value in `persisted`.
    pub fn strip(
        &self,
        config: &ServerConfig,
        persisted: &ServerConfig,
    ) -> Result<ServerConfig, ConfigError> {
        if self.is_empty() {
            return Ok(config.clone());
        }
        let mut doc = serde_json::to_value(config)?;
        let base = serde_json::to_value(persisted)?;
        for path in self.values.keys() {
            let segments: Vec<String> = path.split('.').map(str::to_string).collect();
            if let Some(original) = lookup(&base, &segments) {
                set(&mut doc, path, original.clone());
            }
        }
        Ok(serde_json::from_value(doc)?)
    }

    /// Nested map marking overridden settings with `true`, for display.
    pub fn to_nested(&self) -> Value {
        let mut root = Value::Object(Map::new());
        for path in self.values.keys() {
            set(&mut root, path, Value::Bool(true));
        }
        root
    }
}

fn lookup<'a>(doc: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(doc, |node, segment| node.as_object()?.get(segment))
}

fn set(doc: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut node = doc;
    for segment in parents {
        node = ensure_object(node)
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    ensure_object(node).insert(last.to_string(), value);
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

fn coerce(current: &Value, raw: &str) -> Result<Value, String> {
    match current {
        Value::Bool(_) => raw
            .trim()
            .parse::<bool>()
            .map(Value::Bool)
            .map_err(|_| format!("expected a boolean, found {:?}", raw)),
        Value::Number(n) if n.is_u64() => raw
            .trim()
            .parse::<u64>()
            .map(Value::from)
            .map_err(|_| format!("expected an unsigned integer, found {:?}", raw)),
        Value::Number(n) if n.is_i64() => raw
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("expected an integer, found {:?}", raw)),
        Value::Number(_) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("expected a number, found {:?}", raw)),
        Value::String(_) => Ok(Value::String(raw.to_string())),
        Value::Array(_) => serde_json::from_str(raw).map_err(|e| e.to_string()),
        Value::Null | Value::Object(_) => Err("setting group cannot be overridden".to_string()),
    }
}
