//! Configuration module for fsbridge.
//!
//! Handles the TOML settings file and environment variable expansion.

mod settings;

pub use settings::{
    expand_env_vars, ListingSettings, PoolSettings, ProviderSettings, Settings, SettingsError,
    WorkerMode, WorkerSettings,
};
