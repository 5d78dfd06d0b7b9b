//! Worker configuration: YAML file, then environment overrides.
//!
//! Every field has a default except the database URL: the default store is
//! Postgres, so a bare config only needs `database_url` to run. The
//! in-memory store must be chosen explicitly and does not survive restarts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use process_incident_core::controller::DEFAULT_DEPENDENCY_TIMEOUT;
use process_incident_core::ControllerOptions;

use crate::consumer::RedeliveryPolicy;

pub const ENV_ENGINE_URL: &str = "INCIDENT_ENGINE_URL";
pub const ENV_DATABASE_URL: &str = "INCIDENT_DATABASE_URL";
pub const ENV_STORE: &str = "INCIDENT_STORE";
pub const ENV_DEPENDENCY_TIMEOUT_MS: &str = "INCIDENT_DEPENDENCY_TIMEOUT_MS";
pub const ENV_DEBUG: &str = "INCIDENT_DEBUG";
pub const ENV_MAX_REDELIVERIES: &str = "INCIDENT_MAX_REDELIVERIES";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("{var}={value:?}: {reason}")]
    Override {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// StoreBackend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    Postgres,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres => "postgres",
        }
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(format!("unknown store backend '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Engine base URL for tenants without a dedicated engine.
    pub engine_url: String,
    /// tenant id → engine base URL.
    pub tenant_engine_urls: BTreeMap<String, String>,
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Bound on each engine or store call.
    pub dependency_timeout_ms: u64,
    /// Redeliveries of a failed message before the worker gives up.
    pub max_redeliveries: u32,
    pub redelivery_backoff_ms: u64,
    pub max_redelivery_backoff_ms: u64,
    /// Capacity of the source → consumer channel.
    pub channel_capacity: usize,
    pub debug: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            engine_url: "http://localhost:8080".to_string(),
            tenant_engine_urls: BTreeMap::new(),
            store: StoreBackend::Postgres,
            database_url: None,
            max_connections: 5,
            dependency_timeout_ms: DEFAULT_DEPENDENCY_TIMEOUT.as_millis() as u64,
            max_redeliveries: 5,
            redelivery_backoff_ms: 250,
            max_redelivery_backoff_ms: 30_000,
            channel_capacity: 64,
            debug: false,
        }
    }
}

impl WorkerConfig {
    /// Load from a YAML (or JSON) file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Build the effective configuration: file (or defaults), then overrides
    /// from `lookup`, then the CLI debug flag, then validation.
    pub fn resolve<F>(
        path: Option<&Path>,
        lookup: F,
        force_debug: bool,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(lookup)?;
        config.debug |= force_debug;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_ENGINE_URL) {
            self.engine_url = url;
        }
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.database_url = Some(url);
        }
        if let Some(value) = lookup(ENV_STORE) {
            self.store = value.parse().map_err(|reason| ConfigError::Override {
                var: ENV_STORE,
                value: value.clone(),
                reason,
            })?;
        }
        if let Some(value) = lookup(ENV_DEPENDENCY_TIMEOUT_MS) {
            self.dependency_timeout_ms = parse_number(ENV_DEPENDENCY_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_REDELIVERIES) {
            self.max_redeliveries = parse_number(ENV_MAX_REDELIVERIES, &value)?;
        }
        if let Some(value) = lookup(ENV_DEBUG) {
            self.debug = parse_flag(ENV_DEBUG, &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine_url.trim().is_empty() {
            return Err(ConfigError::Invalid("engine_url must not be empty".into()));
        }
        if let Some((tenant, _)) = self
            .tenant_engine_urls
            .iter()
            .find(|(_, url)| url.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "engine url for tenant '{tenant}' must not be empty"
            )));
        }
        if self.dependency_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "dependency_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "channel_capacity must be greater than zero".into(),
            ));
        }
        if self.store == StoreBackend::Postgres
            && self.database_url.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "store 'postgres' requires database_url".into(),
            ));
        }
        Ok(())
    }

    pub fn dependency_timeout(&self) -> Duration {
        Duration::from_millis(self.dependency_timeout_ms)
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            dependency_timeout: self.dependency_timeout(),
        }
    }

    pub fn redelivery_policy(&self) -> RedeliveryPolicy {
        RedeliveryPolicy {
            max_redeliveries: self.max_redeliveries,
            initial_backoff: Duration::from_millis(self.redelivery_backoff_ms),
            max_backoff: Duration::from_millis(self.max_redelivery_backoff_ms),
        }
    }
}

fn parse_number<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Override {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Override {
            var,
            value: value.to_string(),
            reason: "expected a boolean".into(),
        }),
    }
}
