//! Configuration for the mapping engine
//!
//! Sources, lowest to highest priority:
//! 1. Built-in defaults
//! 2. `config/propmap.{toml,yaml,json}`
//! 3. An explicit file passed by the caller
//! 4. Environment variables prefixed with `PROPMAP_` (`PROPMAP_CACHE__MAX_CAPACITY=500`)

use crate::error::{MappingError, Result};
use crate::logging::LoggingConfig;
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "PROPMAP_";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PropmapConfig {
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub store: StoreConfig,
}

/// Mapping cache bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached devices
    pub max_capacity: usize,
    /// Entries expire this long after being loaded
    pub expire_after_write_secs: u64,
    /// Optional idle expiry, measured from the last read
    pub expire_after_access_secs: Option<u64>,
    /// Upper bound on resolutions running at the same time
    pub max_concurrent_loads: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            expire_after_write_secs: 300,
            expire_after_access_secs: None,
            max_concurrent_loads: 16,
        }
    }
}

impl CacheConfig {
    pub fn expire_after_write(&self) -> Duration {
        Duration::from_secs(self.expire_after_write_secs)
    }

    pub fn expire_after_access(&self) -> Option<Duration> {
        self.expire_after_access_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_capacity == 0 {
            return Err(MappingError::config("cache.max_capacity must be > 0"));
        }
        if self.expire_after_write_secs == 0 {
            return Err(MappingError::config("cache.expire_after_write_secs must be > 0"));
        }
        if self.expire_after_access_secs == Some(0) {
            return Err(MappingError::config("cache.expire_after_access_secs must be > 0"));
        }
        if self.max_concurrent_loads == 0 {
            return Err(MappingError::config("cache.max_concurrent_loads must be > 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite URL of the rule store; in-memory store when absent
    pub database_url: Option<String>,
}

impl PropmapConfig {
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()
    }
}

/// Build the layered figment without extracting it
pub fn figment(explicit: Option<&Path>) -> Result<Figment> {
    let mut figment = Figment::from(Serialized::defaults(PropmapConfig::default()))
        .merge(Toml::file("config/propmap.toml"))
        .merge(Yaml::file("config/propmap.yaml"))
        .merge(Json::file("config/propmap.json"));

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(MappingError::config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        figment = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => figment.merge(Toml::file(path)),
            Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
            Some("json") => figment.merge(Json::file(path)),
            other => {
                return Err(MappingError::config(format!(
                    "Unsupported config file format: {}",
                    other.unwrap_or("<none>")
                )))
            }
        };
    }

    Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
}

/// Load and validate configuration
pub fn load_config(explicit: Option<&Path>) -> Result<PropmapConfig> {
    let config: PropmapConfig = figment(explicit)?.extract()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PropmapConfig::default();
        assert_eq!(config.cache.max_capacity, 10_000);
        assert_eq!(config.cache.expire_after_write(), Duration::from_secs(300));
        assert_eq!(config.cache.expire_after_access(), None);
        assert!(config.store.database_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_yaml_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "cache:\n  max_capacity: 50\n  expire_after_access_secs: 30\nstore:\n  database_url: \"sqlite://rules.db\""
        )
        .unwrap();

        let config: PropmapConfig = figment(Some(file.path())).unwrap().extract().unwrap();
        assert_eq!(config.cache.max_capacity, 50);
        assert_eq!(config.cache.expire_after_write_secs, 300);
        assert_eq!(config.cache.expire_after_access(), Some(Duration::from_secs(30)));
        assert_eq!(config.store.database_url.as_deref(), Some("sqlite://rules.db"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[cache]\nmax_capacity = 0").unwrap();

        let err = load_config(Some(file.path())).unwrap_err();
        assert!(matches!(err, MappingError::Config(_)));
    }

    #[test]
    fn test_explicit_file_must_exist_and_be_known_format() {
        assert!(figment(Some(Path::new("/nonexistent/propmap.yaml"))).is_err());

        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(figment(Some(file.path())).is_err());
    }
}
