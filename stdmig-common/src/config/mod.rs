//! Configuration system for the migrator.
//!
//! This module provides:
//! - Environment variable parsing with type safety (`STDMIG_` prefix)
//! - An optional TOML file for tuning and tool synonyms
//! - Source tracking so `stdmig config` can explain every value
//! - Settings structs consumed by the registry client and the engine

pub mod env;
pub mod file;
pub mod settings;
pub mod source;

pub use env::{EnvError, EnvParser};
pub use file::ConfigFile;
pub use settings::{
    ConfigEntry, ConfigError, EndpointSettings, HttpSettings, MigrationConfig, RegistryEndpoint,
    ReplicationSettings, ValidationSettings,
};
pub use source::{ConfigSource, Sourced};

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
