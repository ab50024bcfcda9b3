//! # Configuration
//!
//! TOML configuration for the router panel. Sections:
//!
//! - [`ModemConfig`] - serial discovery and AT framing parameters
//! - [`MonitorConfig`] - background polling
//! - [`LoggingConfig`] - log level and optional log file
//!
//! Top-level keys `apn` and `wan_mode` are owned by the web layer; the
//! `apn` value is only written after the modem acknowledged the change.
//!
//! ```toml
//! apn = "internet"
//! wan_mode = "auto"
//!
//! [modem]
//! port_glob = "/dev/ttyUSB*"
//! priority_ports = ["/dev/ttyUSB2", "/dev/ttyUSB3"]
//! baud_rate = 115200
//!
//! [monitor]
//! interval_secs = 5
//! enabled = true
//! ```
//!
//! Every section and field has a default, so a partial file is valid.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::modem::transport::TransportSettings;
use crate::monitor::MonitorSettings;

pub const WAN_MODES: [&str; 3] = ["auto", "eth", "lte"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Last APN written to the modem successfully.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apn: Option<String>,
    pub wan_mode: String,
    pub modem: ModemConfig,
    pub monitor: MonitorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    /// Device glob, e.g. `/dev/ttyUSB*` or `/dev/tty[UA]*`.
    pub port_glob: String,
    /// Probed before the rest of the glob matches. The usual EC25 AT
    /// interface is ttyUSB2, but the USB composition can move it.
    pub priority_ports: Vec<String>,
    pub baud_rate: u32,
    pub probe_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub port_cache_ttl_secs: u64,
    pub settle_delay_ms: u64,
    pub probe_read_attempts: u32,
    pub command_read_attempts: u32,
    pub read_interval_ms: u64,
}

impl Default for ModemConfig {
    fn default() -> Self {
        let t = TransportSettings::default();
        Self {
            port_glob: t.port_glob,
            priority_ports: t.priority_ports,
            baud_rate: t.baud_rate,
            probe_timeout_ms: t.probe_timeout.as_millis() as u64,
            command_timeout_ms: t.command_timeout.as_millis() as u64,
            port_cache_ttl_secs: t.cache_ttl.as_secs(),
            settle_delay_ms: t.settle_delay.as_millis() as u64,
            probe_read_attempts: t.probe_read_attempts,
            command_read_attempts: t.command_read_attempts,
            read_interval_ms: t.read_interval.as_millis() as u64,
        }
    }
}

impl ModemConfig {
    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            port_glob: self.port_glob.clone(),
            priority_ports: self.priority_ports.clone(),
            baud_rate: self.baud_rate,
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            command_timeout: Duration::from_millis(self.command_timeout_ms),
            cache_ttl: Duration::from_secs(self.port_cache_ttl_secs),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            probe_read_attempts: self.probe_read_attempts,
            command_read_attempts: self.command_read_attempts,
            read_interval: Duration::from_millis(self.read_interval_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: u64,
    /// Poll the modem as soon as the monitor starts.
    pub enabled: bool,
    pub history_capacity: usize,
    pub stop_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            enabled: true,
            history_capacity: 10,
            stop_timeout_secs: 5,
        }
    }
}

impl MonitorConfig {
    pub fn settings(&self) -> MonitorSettings {
        MonitorSettings {
            interval: Duration::from_secs(self.interval_secs),
            history_capacity: self.history_capacity,
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("ec25-router.log".to_string()),
        }
    }
}

impl LoggingConfig {
    /// Parsed level; unknown strings fall back to Info.
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }

    /// Log file path; an empty string turns file output off.
    pub fn log_file(&self) -> Option<&str> {
        self.file.as_deref().filter(|f| !f.trim().is_empty())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            apn: None,
            wan_mode: "auto".to_string(),
            modem: ModemConfig::default(),
            monitor: MonitorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;
        let config = Self::from_toml(&content)
            .map_err(|e| anyhow!("Invalid config file {}: {}", path, e))?;
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults so a
    /// fresh box can still be inspected. A file that exists and fails to
    /// parse or validate is an error; callers that save afterwards would
    /// otherwise replace it with defaults.
    pub async fn load_or_default(path: &str) -> Result<Self> {
        match fs::try_exists(path).await {
            Ok(true) => Self::load(path).await,
            Ok(false) => {
                eprintln!("Config file {} not found; using defaults", path);
                Ok(Config::default())
            }
            Err(e) => Err(anyhow!("Cannot access config file {}: {}", path, e)),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration, replacing the file.
    pub async fn save(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;
        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;
        Ok(())
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        Config::default().save(path).await
    }

    pub fn validate(&self) -> Result<()> {
        let m = &self.modem;
        if m.baud_rate == 0 {
            bail!("modem.baud_rate must be greater than zero");
        }
        if m.port_glob.trim().is_empty() {
            bail!("modem.port_glob must not be empty");
        }
        for (name, value) in [
            ("modem.probe_read_attempts", m.probe_read_attempts),
            ("modem.command_read_attempts", m.command_read_attempts),
        ] {
            if !(1..=10).contains(&value) {
                bail!("{} must be between 1 and 10 (got {})", name, value);
            }
        }
        if self.monitor.interval_secs == 0 {
            bail!("monitor.interval_secs must be greater than zero");
        }
        if self.monitor.history_capacity == 0 {
            bail!("monitor.history_capacity must be greater than zero");
        }
        if !WAN_MODES.contains(&self.wan_mode.as_str()) {
            bail!(
                "wan_mode must be one of {} (got '{}')",
                WAN_MODES.join(", "),
                self.wan_mode
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().expect("default config valid");
        assert_eq!(config.monitor.interval_secs, 5);
        assert_eq!(config.monitor.history_capacity, 10);
        assert_eq!(config.modem.port_cache_ttl_secs, 30);
    }

    #[test]
    fn partial_file_uses_defaults() {
        let config = Config::from_toml(
            r#"
apn = "internet.movil"

[modem]
priority_ports = ["/dev/ttyUSB3"]
"#,
        )
        .expect("parse");
        assert_eq!(config.apn.as_deref(), Some("internet.movil"));
        assert_eq!(config.modem.priority_ports, vec!["/dev/ttyUSB3"]);
        assert_eq!(config.modem.baud_rate, 115_200);
        assert!(config.monitor.enabled);
    }

    #[test]
    fn transport_settings_conversion() {
        let mut modem = ModemConfig::default();
        modem.command_timeout_ms = 3000;
        modem.port_cache_ttl_secs = 10;
        let t = modem.transport_settings();
        assert_eq!(t.command_timeout, Duration::from_secs(3));
        assert_eq!(t.cache_ttl, Duration::from_secs(10));
        assert_eq!(t.priority_ports, modem.priority_ports);
    }

    #[test]
    fn rejects_invalid_values() {
        let cases = [
            "wan_mode = \"wifi\"",
            "[modem]\nbaud_rate = 0",
            "[modem]\ncommand_read_attempts = 0",
            "[modem]\nprobe_read_attempts = 11",
            "[modem]\nport_glob = \"  \"",
            "[monitor]\ninterval_secs = 0",
            "[monitor]\nhistory_capacity = 0",
        ];
        for case in cases {
            assert!(Config::from_toml(case).is_err(), "accepted: {case}");
        }
    }

    #[test]
    fn level_filter_fallback() {
        let mut logging = LoggingConfig::default();
        assert_eq!(logging.level_filter(), log::LevelFilter::Info);
        logging.level = "debug".to_string();
        assert_eq!(logging.level_filter(), log::LevelFilter::Debug);
        logging.level = "loud".to_string();
        assert_eq!(logging.level_filter(), log::LevelFilter::Info);
    }

    #[test]
    fn empty_log_file_disables_file_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();
        let mut config = Config::default();
        config.logging.file = Some(String::new());
        tokio_test::block_on(config.save(path)).unwrap();

        let loaded = tokio_test::block_on(Config::load(path)).unwrap();
        assert_eq!(loaded.logging.log_file(), None);
        assert_eq!(Config::default().logging.log_file(), Some("ec25-router.log"));
    }
}
