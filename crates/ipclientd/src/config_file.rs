//! Configuration file support for ipclientd
//!
//! Loads and validates daemon tunables from TOML files.
//! Default location: /etc/sonic/ipclientd.conf

use crate::error::{IpClientError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/ipclientd.conf";

/// DTIM multiplier caps per provisioning state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtimConfig {
    /// Cap while multicast filtering is disabled
    #[serde(default = "default_multicast_lock_multiplier")]
    pub multicast_lock_multiplier: i32,

    /// Cap during the initial IPv6 grace period
    #[serde(default = "default_before_ipv6_multiplier")]
    pub before_ipv6_provisioning_multiplier: i32,

    #[serde(default = "default_ipv6_only_multiplier")]
    pub ipv6_only_multiplier: i32,

    #[serde(default = "default_ipv4_only_multiplier")]
    pub ipv4_only_multiplier: i32,

    #[serde(default = "default_dual_stack_multiplier")]
    pub dual_stack_multiplier: i32,

    /// Grace period after start and delay of the one-shot re-check
    #[serde(default = "default_initial_provisioning_delay")]
    pub initial_provisioning_delay_ms: u64,
}

/// Timer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Wait for a global IPv6 address after delegation before giving up
    #[serde(default = "default_ipv6_autoconf_timeout")]
    pub ipv6_autoconf_timeout_ms: u64,

    /// Packet filter snapshot polling interval in seconds
    #[serde(default = "default_packet_filter_polling_interval")]
    pub packet_filter_polling_interval_secs: u64,
}

/// Feature flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureConfig {
    #[serde(default)]
    pub dhcp6_prefix_delegation: bool,

    #[serde(default = "default_true")]
    pub gratuitous_na: bool,

    /// Announce addresses again after a BSSID change
    #[serde(default)]
    pub garp_na_on_roam: bool,

    #[serde(default = "default_true")]
    pub multicast_ns: bool,

    #[serde(default)]
    pub packet_filter_polling: bool,

    /// accept_ra_min_lft value in seconds; 0 leaves the sysctl untouched
    #[serde(default)]
    pub accept_ra_min_lifetime: u32,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// tracing level directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Complete ipclientd configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpClientConfig {
    #[serde(default)]
    pub dtim: DtimConfig,

    #[serde(default)]
    pub timers: TimerConfig,

    #[serde(default)]
    pub features: FeatureConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

// Default functions
fn default_multicast_lock_multiplier() -> i32 {
    1
}

fn default_before_ipv6_multiplier() -> i32 {
    1
}

fn default_ipv6_only_multiplier() -> i32 {
    2
}

fn default_ipv4_only_multiplier() -> i32 {
    9
}

fn default_dual_stack_multiplier() -> i32 {
    2
}

fn default_initial_provisioning_delay() -> u64 {
    18_000
}

fn default_ipv6_autoconf_timeout() -> u64 {
    5_000
}

fn default_packet_filter_polling_interval() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DtimConfig {
    fn default() -> Self {
        Self {
            multicast_lock_multiplier: default_multicast_lock_multiplier(),
            before_ipv6_provisioning_multiplier: default_before_ipv6_multiplier(),
            ipv6_only_multiplier: default_ipv6_only_multiplier(),
            ipv4_only_multiplier: default_ipv4_only_multiplier(),
            dual_stack_multiplier: default_dual_stack_multiplier(),
            initial_provisioning_delay_ms: default_initial_provisioning_delay(),
        }
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            ipv6_autoconf_timeout_ms: default_ipv6_autoconf_timeout(),
            packet_filter_polling_interval_secs: default_packet_filter_polling_interval(),
        }
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            dhcp6_prefix_delegation: false,
            gratuitous_na: default_true(),
            garp_na_on_roam: false,
            multicast_ns: default_true(),
            packet_filter_polling: false,
            accept_ra_min_lifetime: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl IpClientConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => {
                let config = toml::from_str(&content).map_err(|e| {
                    IpClientError::Config(format!(
                        "Failed to parse config file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                eprintln!(
                    "ipclientd: Config file {} not found, using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(IpClientError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> Result<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| IpClientError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path.as_ref(), content)?;
        Ok(())
    }

    pub fn initial_provisioning_delay(&self) -> Duration {
        Duration::from_millis(self.dtim.initial_provisioning_delay_ms)
    }

    pub fn ipv6_autoconf_timeout(&self) -> Duration {
        Duration::from_millis(self.timers.ipv6_autoconf_timeout_ms)
    }

    pub fn packet_filter_polling_interval(&self) -> Duration {
        Duration::from_secs(self.timers.packet_filter_polling_interval_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let caps = [
            ("multicast_lock_multiplier", self.dtim.multicast_lock_multiplier),
            (
                "before_ipv6_provisioning_multiplier",
                self.dtim.before_ipv6_provisioning_multiplier,
            ),
            ("ipv6_only_multiplier", self.dtim.ipv6_only_multiplier),
            ("ipv4_only_multiplier", self.dtim.ipv4_only_multiplier),
            ("dual_stack_multiplier", self.dtim.dual_stack_multiplier),
        ];
        for (name, value) in caps {
            if value < 1 {
                return Err(IpClientError::Config(format!("{} must be >= 1", name)));
            }
        }

        if self.timers.ipv6_autoconf_timeout_ms == 0 {
            return Err(IpClientError::Config(
                "ipv6_autoconf_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.features.packet_filter_polling && self.timers.packet_filter_polling_interval_secs == 0
        {
            return Err(IpClientError::Config(
                "packet_filter_polling_interval_secs must be > 0".to_string(),
            ));
        }

        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(IpClientError::Config(format!(
                "unknown log level {}",
                self.logging.level
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = IpClientConfig::default();
        assert_eq!(config.dtim.ipv4_only_multiplier, 9);
        assert_eq!(config.dtim.ipv6_only_multiplier, 2);
        assert_eq!(config.dtim.dual_stack_multiplier, 2);
        assert_eq!(config.dtim.multicast_lock_multiplier, 1);
        assert_eq!(config.logging.level, "info");
        assert!(config.features.gratuitous_na);
        assert!(config.features.multicast_ns);
        assert!(!config.features.dhcp6_prefix_delegation);
    }

    #[test]
    fn test_durations() {
        let config = IpClientConfig::default();
        assert_eq!(config.initial_provisioning_delay(), Duration::from_millis(18_000));
        assert_eq!(config.ipv6_autoconf_timeout(), Duration::from_millis(5_000));
        assert_eq!(config.packet_filter_polling_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(IpClientConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_multiplier() {
        let mut config = IpClientConfig::default();
        config.dtim.ipv4_only_multiplier = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_level() {
        let mut config = IpClientConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[dtim]
ipv4_only_multiplier = 6

[features]
dhcp6_prefix_delegation = true
garp_na_on_roam = true
"#;
        let config: IpClientConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.dtim.ipv4_only_multiplier, 6);
        assert!(config.features.dhcp6_prefix_delegation);
        assert!(config.features.garp_na_on_roam);
        // Unspecified values should use defaults
        assert_eq!(config.dtim.dual_stack_multiplier, 2);
        assert!(config.features.gratuitous_na);
        assert_eq!(config.timers.ipv6_autoconf_timeout_ms, 5_000);
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = IpClientConfig::load_or_default("/nonexistent/ipclientd.conf").unwrap();
        assert_eq!(config, IpClientConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();
        let config = IpClientConfig::load_or_default(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[dtim\nbroken").unwrap();
        let err = IpClientConfig::load_or_default(file.path()).unwrap_err();
        assert!(matches!(err, IpClientError::Config(_)));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ipclientd.conf");
        let mut config = IpClientConfig::default();
        config.features.packet_filter_polling = true;
        config.save(&path).unwrap();
        let loaded = IpClientConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
