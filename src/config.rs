//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `gateway.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - ServerConfig: listening port, connection bound, idle timeout.
//!     - DatamgrConfig: sensor map and alert thresholds.
//!     - StorageConfig: where the csv store lives.
//!     - LoggingConfig: diagnostics level and the event log file.
//!
//! ==============================================================================

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub datamgr: DatamgrConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// connections admitted before ingestion shuts down
    pub max_connections: usize,
    pub idle_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatamgrConfig {
    pub sensor_map: PathBuf,
    pub run_avg_length: usize,
    pub min_temp: f64,
    pub max_temp: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub csv_path: PathBuf,
    pub append: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub event_log: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 5678, max_connections: 3, idle_timeout_seconds: 5 }
    }
}

impl Default for DatamgrConfig {
    fn default() -> Self {
        Self {
            sensor_map: PathBuf::from("config").join("room_sensor.map"),
            run_avg_length: 5,
            min_temp: 10.0,
            max_temp: 20.0,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { csv_path: PathBuf::from("data.csv"), append: false }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), event_log: PathBuf::from("gateway.log") }
    }
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }
}

impl GatewayConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let config: GatewayConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load with default fallback
    ///
    /// runs before the tracing subscriber exists, so it reports on stdout/stderr.
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("gateway.toml"),
            PathBuf::from("..").join("config").join("gateway.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        eprintln!("[CONFIG] Warning: Failed to load {}: {:#}", path.display(), e);
                    }
                }
            }
        }

        eprintln!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.max_connections == 0 {
            bail!("server.max_connections must be at least 1");
        }
        if self.server.idle_timeout_seconds == 0 {
            bail!("server.idle_timeout_seconds must be at least 1");
        }
        if self.datamgr.run_avg_length == 0 {
            bail!("datamgr.run_avg_length must be at least 1");
        }
        if self.datamgr.min_temp > self.datamgr.max_temp {
            bail!(
                "datamgr.min_temp ({}) is above datamgr.max_temp ({})",
                self.datamgr.min_temp,
                self.datamgr.max_temp
            );
        }
        Ok(())
    }

    /// Log configuration summary
    pub fn print_summary(&self) {
        tracing::info!("┌─────────────────────────────────────────┐");
        tracing::info!("│          GATEWAY CONFIGURATION          │");
        tracing::info!("├─────────────────────────────────────────┤");
        tracing::info!("│ Port: {}", self.server.port);
        tracing::info!("│ Max connections: {}", self.server.max_connections);
        tracing::info!("│ Idle timeout: {}s", self.server.idle_timeout_seconds);
        tracing::info!("│ Sensor map: {}", self.datamgr.sensor_map.display());
        tracing::info!("│ Comfort band: {} .. {}", self.datamgr.min_temp, self.datamgr.max_temp);
        tracing::info!("│ CSV store: {}", self.storage.csv_path.display());
        tracing::info!("│ Event log: {}", self.logging.event_log.display());
        tracing::info!("└─────────────────────────────────────────┘");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [server]
            port = 1234

            [datamgr]
            max_temp = 25.5
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 1234);
        assert_eq!(config.server.max_connections, 3);
        assert_eq!(config.datamgr.max_temp, 25.5);
        assert_eq!(config.datamgr.run_avg_length, 5);
        assert_eq!(config.datamgr.sensor_map, PathBuf::from("config").join("room_sensor.map"));
        assert_eq!(config.storage.csv_path, PathBuf::from("data.csv"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");

        std::fs::write(&path, "[server]\nmax_connections = 0\n").unwrap();
        assert!(GatewayConfig::load(&path).is_err());

        std::fs::write(&path, "[datamgr]\nmin_temp = 30.0\nmax_temp = 20.0\n").unwrap();
        assert!(GatewayConfig::load(&path).is_err());

        std::fs::write(&path, "[server]\nport = 9000\nidle_timeout_seconds = 2\n").unwrap();
        let config = GatewayConfig::load(&path).unwrap();
        assert_eq!(config.server.idle_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn load_reports_unparsable_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(GatewayConfig::load(&path).is_err());
        assert!(GatewayConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
