//! Configuration management for sysconfd.
//!
//! Loads settings from /etc/sysconf/config.toml or uses defaults. Every field
//! has a default so a partial file is enough.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use sysconf_common::HostPaths;

use crate::reconcile::ReconcileSettings;

/// Config file path
pub const CONFIG_PATH: &str = "/etc/sysconf/config.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Unix socket the RPC server listens on
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/run/sysconf/sysconfd.sock")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            log_level: default_log_level(),
        }
    }
}

/// Host files the adapter reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_passwd")]
    pub passwd: PathBuf,
    #[serde(default = "default_shadow")]
    pub shadow: PathBuf,
    #[serde(default = "default_hostname_file")]
    pub hostname_file: PathBuf,
    #[serde(default = "default_ntp_conf")]
    pub ntp_conf: PathBuf,
    #[serde(default = "default_localtime")]
    pub localtime: PathBuf,
    #[serde(default = "default_zoneinfo")]
    pub zoneinfo: PathBuf,

    /// Files owned by the daemon itself (location marker)
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_passwd() -> PathBuf {
    HostPaths::default().passwd
}

fn default_shadow() -> PathBuf {
    HostPaths::default().shadow
}

fn default_hostname_file() -> PathBuf {
    HostPaths::default().hostname_file
}

fn default_ntp_conf() -> PathBuf {
    HostPaths::default().ntp_conf
}

fn default_localtime() -> PathBuf {
    HostPaths::default().localtime
}

fn default_zoneinfo() -> PathBuf {
    HostPaths::default().zoneinfo
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/sysconf")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            passwd: default_passwd(),
            shadow: default_shadow(),
            hostname_file: default_hostname_file(),
            ntp_conf: default_ntp_conf(),
            localtime: default_localtime(),
            zoneinfo: default_zoneinfo(),
            state_dir: default_state_dir(),
        }
    }
}

/// Policy for accounts created by the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsConfig {
    #[serde(default = "default_home_base")]
    pub home_base: PathBuf,

    /// Login shell of created accounts
    #[serde(default = "default_shell")]
    pub shell: String,

    #[serde(default = "default_uid_min")]
    pub uid_min: u32,

    #[serde(default = "default_uid_max")]
    pub uid_max: u32,
}

fn default_home_base() -> PathBuf {
    PathBuf::from("/home")
}

fn default_shell() -> String {
    "/bin/sh".to_string()
}

fn default_uid_min() -> u32 {
    1000
}

fn default_uid_max() -> u32 {
    60000
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            home_base: default_home_base(),
            shell: default_shell(),
            uid_min: default_uid_min(),
            uid_max: default_uid_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NtpSection {
    /// systemd unit of the NTP daemon
    #[serde(default = "default_ntp_unit")]
    pub unit: String,

    /// Bound on any single systemctl call
    #[serde(default = "default_service_timeout")]
    pub service_timeout_secs: u64,
}

fn default_ntp_unit() -> String {
    "ntpd".to_string()
}

fn default_service_timeout() -> u64 {
    30
}

impl Default for NtpSection {
    fn default() -> Self {
        Self {
            unit: default_ntp_unit(),
            service_timeout_secs: default_service_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostnameSection {
    /// Applied when the hostname leaf is deleted
    #[serde(default = "default_hostname")]
    pub default: String,
}

fn default_hostname() -> String {
    "localhost".to_string()
}

impl Default for HostnameSection {
    fn default() -> Self {
        Self {
            default: default_hostname(),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub accounts: AccountsConfig,

    #[serde(default)]
    pub ntp: NtpSection,

    #[serde(default)]
    pub hostname: HostnameSection,
}

impl Config {
    /// Load config from file, or return defaults
    pub fn load() -> Self {
        Self::load_or_default(Path::new(CONFIG_PATH))
    }

    /// Like [`Config::load`] for an explicit path.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load_from_path(path).unwrap_or_else(|e| {
            warn!("Config not loaded from {}, using defaults: {:#}", path.display(), e);
            Config::default()
        })
    }

    /// Load config from specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.accounts.uid_min == 0 || self.accounts.uid_min > self.accounts.uid_max {
            bail!(
                "invalid uid range {}..={}",
                self.accounts.uid_min,
                self.accounts.uid_max
            );
        }
        if !self.accounts.home_base.is_absolute() {
            bail!("home_base must be absolute: {}", self.accounts.home_base.display());
        }
        if self.ntp.service_timeout_secs == 0 {
            bail!("ntp.service_timeout_secs must be positive");
        }
        Ok(())
    }

    pub fn host_paths(&self) -> HostPaths {
        HostPaths {
            passwd: self.paths.passwd.clone(),
            shadow: self.paths.shadow.clone(),
            hostname_file: self.paths.hostname_file.clone(),
            ntp_conf: self.paths.ntp_conf.clone(),
            localtime: self.paths.localtime.clone(),
            zoneinfo: self.paths.zoneinfo.clone(),
        }
    }

    pub fn service_timeout(&self) -> Duration {
        Duration::from_secs(self.ntp.service_timeout_secs)
    }

    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            default_hostname: self.hostname.default.clone(),
            state_dir: self.paths.state_dir.clone(),
            home_base: self.accounts.home_base.clone(),
            shell: self.accounts.shell.clone(),
            uid_min: self.accounts.uid_min,
            uid_max: self.accounts.uid_max,
            ntp_unit: self.ntp.unit.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.daemon.socket_path, PathBuf::from("/run/sysconf/sysconfd.sock"));
        assert_eq!(config.paths.passwd, PathBuf::from("/etc/passwd"));
        assert_eq!(config.accounts.uid_min, 1000);
        assert_eq!(config.hostname.default, "localhost");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[accounts]
home_base = "/srv/home"
uid_min = 2000

[ntp]
unit = "chronyd"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.accounts.home_base, PathBuf::from("/srv/home"));
        assert_eq!(config.accounts.uid_min, 2000);
        // Defaults for missing fields
        assert_eq!(config.accounts.uid_max, 60000);
        assert_eq!(config.ntp.service_timeout_secs, 30);

        let settings = config.reconcile_settings();
        assert_eq!(settings.ntp_unit, "chronyd");
        assert_eq!(settings.home_base, PathBuf::from("/srv/home"));
    }

    #[test]
    fn test_invalid_uid_range() {
        let mut config = Config::default();
        config.accounts.uid_min = 5000;
        config.accounts.uid_max = 4000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load_or_default(Path::new("/nonexistent/sysconf.toml"));
        assert_eq!(config.ntp.unit, "ntpd");
    }
}
