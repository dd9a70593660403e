//! ges-stats configuration file

use crate::cache::CacheOptions;
use crate::stats::StatsServiceConfig;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8090".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Reporting database settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    config_dir().join("stats.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Where cached statistics live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Process memory; lost on restart
    #[default]
    Memory,

    /// A SQLite file shared by every process using the same path
    Sqlite,
}

/// Cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub backend: CacheBackend,

    /// Cache file for the sqlite backend
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,

    /// Share one computation between concurrent misses on a key
    #[serde(default = "default_true")]
    pub single_flight: bool,

    /// Seconds between expired-entry sweeps while serving
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_cache_path() -> PathBuf {
    config_dir().join("cache.db")
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackend::default(),
            path: default_cache_path(),
            single_flight: true,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// Statistics settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Seconds rolled-up statistics stay cached
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// Seconds each database fetch may take
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

fn default_ttl() -> u64 {
    300
}

fn default_query_timeout() -> u64 {
    30
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

/// ges-stats configuration
///
/// Represents ~/.config/ges-stats/config.yaml. Every field has a default,
/// so an empty file (or no file) is a working configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GesStatsConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub stats: StatsConfig,
}

impl GesStatsConfig {
    /// Load configuration from the default path (~/.config/ges-stats/config.yaml)
    pub fn load_default() -> Result<Self> {
        Self::load_or_default(Self::default_path())
    }

    /// Load configuration from a specific path
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(crate::StatsError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading ges-stats configuration");

        let content = fs::read_to_string(path)?;
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&content)?
        };

        tracing::debug!(
            bind = %config.server.bind,
            backend = ?config.cache.backend,
            ttl_secs = config.stats.ttl_secs,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Load from `path` if it exists, otherwise use defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Save configuration to the default path
    pub fn save_default(&self) -> Result<()> {
        self.save(Self::default_path())
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving ges-stats configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// Get the default config path (~/.config/ges-stats/config.yaml)
    pub fn default_path() -> PathBuf {
        config_dir().join("config.yaml")
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            enabled: self.cache.enabled,
            single_flight: self.cache.single_flight,
        }
    }

    pub fn stats_service_config(&self) -> StatsServiceConfig {
        StatsServiceConfig {
            ttl: Duration::from_secs(self.stats.ttl_secs),
            query_timeout: Duration::from_secs(self.stats.query_timeout_secs),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache.sweep_interval_secs)
    }
}

/// ~/.config/ges-stats, on every platform
fn config_dir() -> PathBuf {
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".config");
    path.push("ges-stats");
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_defaults() {
        let config = GesStatsConfig::default();
        assert_eq!(config.server.bind, "127.0.0.1:8090");
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert!(config.cache.enabled);
        assert!(config.cache.single_flight);
        assert_eq!(config.stats.ttl_secs, 300);
        assert_eq!(config.stats_service_config().query_timeout, Duration::from_secs(30));
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
cache:
  backend: sqlite
  single_flight: false
stats:
  ttl_secs: 60
"#;
        let config: GesStatsConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.cache.backend, CacheBackend::Sqlite);
        assert!(config.cache.enabled);
        assert!(!config.cache_options().single_flight);
        assert_eq!(config.stats.ttl_secs, 60);
        assert_eq!(config.stats.query_timeout_secs, 30);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.yaml");

        let mut config = GesStatsConfig::default();
        config.server.bind = "0.0.0.0:9000".to_string();
        config.database.path = temp_dir.path().join("stats.db");
        config.save(&path).unwrap();

        let loaded = GesStatsConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let result = GesStatsConfig::load("/nonexistent/ges-stats/config.yaml");
        assert!(result.is_err());

        let config = GesStatsConfig::load_or_default("/nonexistent/ges-stats/config.yaml").unwrap();
        assert_eq!(config, GesStatsConfig::default());
    }

    #[test]
    fn test_empty_file_is_default() {
        let file = NamedTempFile::new().unwrap();
        let config = GesStatsConfig::load(file.path()).unwrap();
        assert_eq!(config, GesStatsConfig::default());
    }

    #[test]
    fn test_default_path() {
        let path = GesStatsConfig::default_path();
        assert!(path.ends_with(".config/ges-stats/config.yaml"));
    }
}
