//! Runtime configuration.
//!
//! Values come from an optional YAML file; `YOUTUBE_API_KEY`, `DOWNLOADS_DIR`
//! and `DB_PATH` override it from the process environment or from a `.env`
//! file next to the config file.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "ytrssil";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub downloads_dir: PathBuf,
    pub youtube_api_key: String,
    pub fetch_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    /// How long after being watched a downloaded file is kept.
    pub cleanup_age_secs: u64,
    pub fetch_concurrency: usize,
    pub shutdown_grace_secs: u64,
    pub watched_page_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);
        Self {
            database_path: data_dir.join("ytrssil.db"),
            downloads_dir: data_dir.join("downloads"),
            youtube_api_key: String::new(),
            fetch_interval_secs: 300,
            cleanup_interval_secs: 3600,
            cleanup_age_secs: 48 * 3600,
            fetch_concurrency: 8,
            shutdown_grace_secs: 10,
            watched_page_size: 50,
        }
    }
}

impl Config {
    /// `$YTRSSIL_CONFIG`, or `<config dir>/ytrssil/config.yaml`.
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var("YTRSSIL_CONFIG") {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.yaml")
    }

    /// Load the YAML file at `path` (defaults if it does not exist), then apply overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            Self::from_yaml(&content)
                .with_context(|| format!("failed to parse config {}", path.display()))?
        } else {
            log::info!("No config file at {}, using defaults", path.display());
            Self::default()
        };

        let env_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.apply_overrides(|key| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .or_else(|| load_env_value(env_dir, key))
        });
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("YOUTUBE_API_KEY") {
            self.youtube_api_key = key;
        }
        if let Some(dir) = lookup("DOWNLOADS_DIR") {
            self.downloads_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("DB_PATH") {
            self.database_path = PathBuf::from(path);
        }
    }

    /// Reject unusable settings and create the directories the app writes to.
    pub fn validate(&self) -> Result<()> {
        if self.youtube_api_key.trim().is_empty() {
            bail!("YOUTUBE_API_KEY is not set");
        }
        if self.fetch_interval_secs == 0 || self.cleanup_interval_secs == 0 {
            bail!("fetch and cleanup intervals must be greater than zero");
        }
        if self.fetch_concurrency == 0 {
            bail!("fetch_concurrency must be at least 1");
        }
        if self.watched_page_size == 0 {
            bail!("watched_page_size must be at least 1");
        }

        std::fs::create_dir_all(&self.downloads_dir).with_context(|| {
            format!(
                "failed to create downloads directory {}",
                self.downloads_dir.display()
            )
        })?;
        if let Some(parent) = self.database_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
        Ok(())
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::from_secs(self.fetch_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn cleanup_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cleanup_age_secs as i64)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    #[cfg(test)]
    pub fn for_tests(dir: &Path) -> Self {
        Self {
            database_path: dir.join("test.db"),
            downloads_dir: dir.join("downloads"),
            youtube_api_key: "test-key".to_string(),
            watched_page_size: 2,
            ..Self::default()
        }
    }
}

/// Read `key` from a `.env` file in `dir`, ignoring quotes and empty values.
pub fn load_env_value(dir: &Path, key: &str) -> Option<String> {
    let env_path = dir.join(".env");
    let prefix = format!("{}=", key);
    let content = std::fs::read_to_string(&env_path).ok()?;

    content.lines().find_map(|line| {
        let value = line
            .trim()
            .strip_prefix(&prefix)?
            .trim()
            .trim_matches('"')
            .trim_matches('\'');
        (!value.is_empty()).then(|| value.to_string())
    })
}
