//! Wacast configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WacastConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Default for WacastConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            transport: TransportConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl WacastConfig {
    /// Load config from the default path (~/.wacast/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::WacastError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::error::WacastError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| {
            crate::error::WacastError::Config(format!("Failed to serialize config: {e}"))
        })?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the wacast home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".wacast")
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "~/.wacast/wacast.db".into()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Transport (WhatsApp Cloud API) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Sending accounts. The numeric id is the claim identity used in the
    /// database; the phone_number_id + access_token pair is the Cloud API
    /// identity.
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

fn default_api_base() -> String {
    "https://graph.facebook.com/v21.0".into()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { api_base: default_api_base(), accounts: Vec::new() }
    }
}

/// One sending account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub id: i64,
    #[serde(default)]
    pub label: String,
    pub access_token: String,
    pub phone_number_id: String,
}

/// Scheduler pacing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How often the scheduled-campaign checker polls, in seconds.
    #[serde(default = "default_checker_interval")]
    pub checker_interval_secs: u64,
    /// Lower bound of the retry delay after a failed send cycle.
    #[serde(default = "default_retry_min")]
    pub retry_delay_min_secs: u64,
    /// Upper bound of the retry delay after a failed send cycle.
    #[serde(default = "default_retry_max")]
    pub retry_delay_max_secs: u64,
    /// Recheck delay when contacts are stuck in `sending` elsewhere.
    #[serde(default = "default_stuck_recheck")]
    pub stuck_recheck_secs: u64,
    /// Running campaigns older than this are paused instead of resumed
    /// at process start.
    #[serde(default = "default_resume_max_age")]
    pub resume_max_age_days: i64,
}

fn default_checker_interval() -> u64 { 3600 }
fn default_retry_min() -> u64 { 60 }
fn default_retry_max() -> u64 { 120 }
fn default_stuck_recheck() -> u64 { 60 }
fn default_resume_max_age() -> i64 { 7 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            checker_interval_secs: default_checker_interval(),
            retry_delay_min_secs: default_retry_min(),
            retry_delay_max_secs: default_retry_max(),
            stuck_recheck_secs: default_stuck_recheck(),
            resume_max_age_days: default_resume_max_age(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WacastConfig::default();
        assert_eq!(config.scheduler.checker_interval_secs, 3600);
        assert_eq!(config.scheduler.retry_delay_min_secs, 60);
        assert_eq!(config.scheduler.retry_delay_max_secs, 120);
        assert!(config.transport.accounts.is_empty());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [database]
            path = "/tmp/test.db"

            [scheduler]
            checker_interval_secs = 600

            [[transport.accounts]]
            id = 1
            label = "primary"
            access_token = "tok"
            phone_number_id = "123456"
        "#;

        let config: WacastConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database.path, "/tmp/test.db");
        assert_eq!(config.scheduler.checker_interval_secs, 600);
        assert_eq!(config.transport.accounts.len(), 1);
        assert_eq!(config.transport.accounts[0].phone_number_id, "123456");
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: WacastConfig = toml::from_str("").unwrap();
        assert_eq!(config.database.path, "~/.wacast/wacast.db");
        assert_eq!(config.scheduler.resume_max_age_days, 7);
    }

    #[test]
    fn test_home_dir() {
        let home = WacastConfig::home_dir();
        assert!(home.to_string_lossy().contains("wacast"));
    }
}
