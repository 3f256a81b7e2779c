//! TOML-based configuration for fsbridge.
//!
//! Supports a config file (fsbridge.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [provider]
//! adapter = "local"
//! root = "${HOME}/data"
//!
//! [pool]
//! min_size = 0
//! max_size = 50
//! idle_timeout_secs = 60
//!
//! [worker]
//! mode = "process"
//! path = "./target/debug/fsbridge-worker"
//!
//! [listing]
//! order = "ascending"
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pool::PoolConfig;
use crate::provider::ProviderHandle;
use crate::worker::protocol::ListOrder;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Storage backend the workers drive.
    pub provider: ProviderSettings,

    /// Worker pool sizing.
    pub pool: PoolSettings,

    /// How workers are run.
    pub worker: WorkerSettings,

    /// Directory listing options.
    pub listing: ListingSettings,
}

/// Provider configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "adapter", rename_all = "snake_case")]
pub enum ProviderSettings {
    /// A directory on disk (root supports ${ENV_VAR} expansion).
    Local { root: String },
    /// A named in-memory store. Stores live in one process, so worker
    /// processes never share one.
    Memory { name: String },
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self::Local {
            root: ".".to_string(),
        }
    }
}

impl ProviderSettings {
    /// Build the provider handle shipped to workers.
    pub fn to_handle(&self) -> Result<ProviderHandle, SettingsError> {
        match self {
            Self::Local { root } => Ok(ProviderHandle::local(expand_env_vars(root)?)),
            Self::Memory { name } => Ok(ProviderHandle::memory(name.clone())),
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Workers kept alive even when idle.
    pub min_size: usize,

    /// Upper bound on live workers.
    pub max_size: usize,

    /// Idle workers above `min_size` are retired after this many seconds.
    pub idle_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 50,
            idle_timeout_secs: 60,
        }
    }
}

impl PoolSettings {
    /// Convert to a validated pool configuration.
    pub fn to_pool_config(&self) -> Result<PoolConfig, SettingsError> {
        let config = PoolConfig {
            min_size: self.min_size,
            max_size: self.max_size,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
        };
        config
            .validate()
            .map_err(|e| SettingsError::InvalidConfig(format!("pool: {e}")))?;
        Ok(config)
    }
}

/// Where worker code runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    /// One `fsbridge-worker` child process per worker.
    #[default]
    Process,
    /// Workers inside this process, on Tokio's blocking pool.
    Thread,
}

/// Worker configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub mode: WorkerMode,

    /// Path to worker binary (supports ${ENV_VAR} expansion).
    pub path: Option<String>,

    /// Extra arguments passed to every worker process.
    pub args: Vec<String>,
}

/// Listing configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ListingSettings {
    /// Order requested from workers for `readdir`.
    pub order: ListOrder,
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn parse(content: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(content)?)
    }

    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `FSBRIDGE_CONFIG`
    /// 2. `./fsbridge.toml`
    /// 3. `~/.config/fsbridge/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("FSBRIDGE_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("fsbridge.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("fsbridge").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        // Return defaults if no config file found
        Ok(Settings::default())
    }

    /// Reject combinations that cannot work together.
    ///
    /// Memory stores are per process, so with process workers every worker
    /// would see a different store once the pool grows past one.
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.pool.to_pool_config()?;
        if matches!(self.provider, ProviderSettings::Memory { .. })
            && self.worker.mode == WorkerMode::Process
            && self.pool.max_size > 1
        {
            return Err(SettingsError::InvalidConfig(
                "memory provider needs worker.mode = \"thread\" or pool.max_size = 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the configured worker binary path, if any.
    pub fn worker_path(&self) -> Option<PathBuf> {
        let path = self.worker.path.as_ref()?;
        let expanded = expand_env_vars(path).ok()?;
        Some(PathBuf::from(expanded))
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let var_name: String = if chars.next_if_eq(&'{').is_some() {
            let name: String = std::iter::from_fn(|| chars.next_if(|&ch| ch != '}')).collect();
            chars.next(); // consume '}'
            name
        } else {
            std::iter::from_fn(|| chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_')).collect()
        };

        if var_name.is_empty() {
            // Just a lone $, keep it
            result.push('$');
            continue;
        }

        let value = env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name))?;
        result.push_str(&value);
    }

    Ok(result)
}
