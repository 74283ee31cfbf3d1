//! Configuration file for `flowquery`

use anyhow::{bail, Context, Result};
use flowdb_core::config::DEFAULT_LOCK_TIMEOUT;
use flowdb_core::storage::StorageConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database root directory
    pub db_path: PathBuf,
    /// Seconds to wait for the summary lock
    pub lock_timeout_secs: u64,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: StorageConfig::default().db_path,
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT.as_secs(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_slice(&data)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.db_path.as_os_str().is_empty() {
            bail!("db_path must not be empty");
        }
        if self.lock_timeout_secs == 0 {
            bail!("lock_timeout_secs must be positive");
        }
        if self.logging.level.trim().is_empty() {
            bail!("logging.level must not be empty");
        }
        Ok(())
    }

    pub fn storage(&self) -> StorageConfig {
        StorageConfig {
            db_path: self.db_path.clone(),
            lock_timeout: Duration::from_secs(self.lock_timeout_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("flowquery.json");
        std::fs::write(&path, r#"{ "db_path": "/var/lib/flows" }"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/var/lib/flows"));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.storage().lock_timeout, DEFAULT_LOCK_TIMEOUT);
    }

    #[test]
    fn test_rejects_invalid() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("flowquery.json");
        std::fs::write(&path, r#"{ "db_path": "" }"#).unwrap();
        assert!(Config::load(&path).is_err());

        std::fs::write(&path, "not json").unwrap();
        assert!(Config::load(&path).is_err());
        assert!(Config::load(&temp_dir.path().join("missing.json")).is_err());
    }
}
