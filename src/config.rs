use crate::flow_classifier::ServiceBackends;
use crate::obfuscation_policy::DEFAULT_OBFUSCATION_INTERVAL;
use crate::stats::DEFAULT_TOP_ENTRIES;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Controller configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub obfuscation: ObfuscationConfig,
    #[serde(default)]
    pub services: ServiceBackends,
    #[serde(default)]
    pub stats: StatsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Host address the control channel binds to
    pub host: String,
    /// Control-channel listen port
    pub listen_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObfuscationConfig {
    /// Obfuscate every N-th packet per switch
    pub interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Flow entries reported per statistics reply
    pub top_entries: usize,
    /// Seconds between flow statistics requests (0 = never ask)
    pub poll_interval_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            listen_port: 6653,
        }
    }
}

impl Default for ObfuscationConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_OBFUSCATION_INTERVAL,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            top_entries: DEFAULT_TOP_ENTRIES,
            poll_interval_secs: 0,
        }
    }
}

impl StatsConfig {
    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_secs > 0).then(|| Duration::from_secs(self.poll_interval_secs))
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(&self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Address the control channel listens on
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.controller.host, self.controller.listen_port)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.controller.listen_port == 0 {
            anyhow::bail!("Invalid listen_port: cannot be 0");
        }

        if self.obfuscation.interval == 0 {
            anyhow::bail!("Invalid obfuscation interval: must be > 0");
        }

        if !self.services.all_distinct() {
            anyhow::bail!(
                "Service backends must be distinct (http={}, https={}, custom={})",
                self.services.http_backend,
                self.services.https_backend,
                self.services.custom_backend
            );
        }

        if self.stats.top_entries == 0 {
            anyhow::bail!("Invalid stats top_entries: must be > 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.controller.host, "0.0.0.0");
        assert_eq!(config.controller.listen_port, 6653);
        assert_eq!(config.obfuscation.interval, 100);
        assert_eq!(config.services.http_backend, Ipv4Addr::new(172, 16, 0, 10));
        assert_eq!(config.services.https_backend, Ipv4Addr::new(172, 16, 0, 20));
        assert_eq!(config.services.custom_backend, Ipv4Addr::new(172, 16, 0, 30));
        assert_eq!(config.stats.top_entries, 10);
        assert!(config.stats.poll_interval().is_none());
    }

    #[test]
    fn test_config_validation_succeeds() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_fails_zero_port() {
        let mut config = Config::default();
        config.controller.listen_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_fails_zero_interval() {
        let mut config = Config::default();
        config.obfuscation.interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_fails_duplicate_backends() {
        let mut config = Config::default();
        config.services.custom_backend = config.services.http_backend;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("distinct"));
    }

    #[test]
    fn test_config_validation_fails_zero_top_entries() {
        let mut config = Config::default();
        config.stats.top_entries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [controller]
            host = "127.0.0.1"
            listen_port = 6633

            [obfuscation]
            interval = 50

            [services]
            http_backend = "10.1.0.1"
            https_backend = "10.1.0.2"
            custom_backend = "10.1.0.3"

            [stats]
            top_entries = 5
            poll_interval_secs = 30
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:6633");
        assert_eq!(config.obfuscation.interval, 50);
        assert_eq!(config.services.https_backend, Ipv4Addr::new(10, 1, 0, 2));
        assert_eq!(config.stats.top_entries, 5);
        assert_eq!(config.stats.poll_interval(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str("[obfuscation]\ninterval = 7\n").unwrap();
        assert_eq!(config.obfuscation.interval, 7);
        assert_eq!(config.controller.listen_port, 6653);
        assert!(config.services.all_distinct());
        let config: Config = toml::from_str("[controller]\nlisten_port = 6633\n").unwrap();
        assert_eq!(config.controller.host, "0.0.0.0");
        assert_eq!(config.listen_addr(), "0.0.0.0:6633");

        let config: Config = toml::from_str("[stats]\npoll_interval_secs = 30\n").unwrap();
        assert_eq!(config.stats.top_entries, 10);
        assert_eq!(config.stats.poll_interval(), Some(Duration::from_secs(30)));

        let config: Config = toml::from_str("[services]\nhttp_backend = \"10.9.0.1\"\n").unwrap();
        assert_eq!(config.services.http_backend, Ipv4Addr::new(10, 9, 0, 1));
        assert_eq!(config.services.https_backend, Ipv4Addr::new(172, 16, 0, 20));
        config.validate().unwrap();
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controller.toml");

        let mut original = Config::default();
        original.obfuscation.interval = 250;
        original.to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.obfuscation.interval, 250);
        assert_eq!(loaded.services, original.services);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = Config::from_file("/nonexistent/controller.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/controller.toml"));
    }
}
