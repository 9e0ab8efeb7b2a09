//! Typed configuration model for the `ietf-system` subtree.
//!
//! Loosely-typed values from the datastore are converted into these types at
//! the boundary (see [`crate::change`]); reconcilers only ever see validated
//! instances.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::error::SysconfError;

/// Longest hostname accepted by sethostname(2).
pub const HOSTNAME_MAX_LEN: usize = 64;

/// Bound for free-text leaves stored in line-oriented files.
pub const TEXT_MAX_LEN: usize = 255;

/// Range of `timezone-utc-offset`, in minutes.
pub const UTC_OFFSET_RANGE: std::ops::RangeInclusive<i16> = -1500..=1500;

/// SSH public-key algorithms accepted for authorized keys.
pub const KEY_ALGORITHMS: &[&str] = &[
    "ssh-rsa",
    "ssh-dss",
    "ssh-ed25519",
    "rsa-sha2-256",
    "rsa-sha2-512",
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
    "sk-ssh-ed25519@openssh.com",
    "sk-ecdsa-sha2-nistp256@openssh.com",
];

/// Root of the configuration tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SystemConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock: Option<ClockConfig>,
    #[serde(default)]
    pub ntp: NtpConfig,
    /// Local users keyed by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub authentication: BTreeMap<String, LocalUser>,
}

/// Timezone representation of the system clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClockConfig {
    /// Named zone from the tz database, e.g. `Europe/Stockholm`.
    TimezoneName(String),
    /// Fixed offset from UTC in minutes.
    TimezoneUtcOffset(i16),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NtpConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Ordered by insertion; order is the config-file line order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<NtpServer>,
}

impl NtpConfig {
    pub fn server(&self, name: &str) -> Option<&NtpServer> {
        self.servers.iter().find(|s| s.name == name)
    }

    pub fn server_mut(&mut self, name: &str) -> Option<&mut NtpServer> {
        self.servers.iter_mut().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NtpServer {
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default)]
    pub association_type: AssociationType,
    #[serde(default)]
    pub iburst: bool,
    #[serde(default)]
    pub prefer: bool,
}

impl NtpServer {
    pub fn new(name: &str, address: &str) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            port: None,
            association_type: AssociationType::Server,
            iburst: false,
            prefer: false,
        }
    }
}

/// NTP association mode, also the directive keyword in ntp.conf.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssociationType {
    #[default]
    Server,
    Peer,
    Pool,
}

impl AssociationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssociationType::Server => "server",
            AssociationType::Peer => "peer",
            AssociationType::Pool => "pool",
        }
    }
}

impl fmt::Display for AssociationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssociationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "server" => Ok(AssociationType::Server),
            "peer" => Ok(AssociationType::Peer),
            "pool" => Ok(AssociationType::Pool),
            other => Err(format!("unknown association type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LocalUser {
    pub name: String,
    /// Crypt(3) hash. `None` means the account is locked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub authorized_keys: BTreeMap<String, AuthorizedKey>,
}

impl LocalUser {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            password: None,
            authorized_keys: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuthorizedKey {
    pub name: String,
    #[serde(default)]
    pub algorithm: String,
    #[serde(default)]
    pub key_data: String,
}

impl AuthorizedKey {
    pub fn new(name: &str, algorithm: &str, key_data: &str) -> Self {
        Self {
            name: name.to_string(),
            algorithm: algorithm.to_string(),
            key_data: key_data.to_string(),
        }
    }

    /// Content of the key file: algorithm and key data on two lines.
    pub fn file_content(&self) -> String {
        format!("{}\n{}\n", self.algorithm, self.key_data)
    }
}

// =============================================================================
// Validation
// =============================================================================

fn username_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z_][a-z0-9_-]{0,31}$").expect("static regex"))
}

fn timezone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_+\-]+(/[A-Za-z0-9_+\-]+)*$").expect("static regex")
    })
}

pub fn validate_hostname(path: &str, hostname: &str) -> Result<(), SysconfError> {
    if hostname.is_empty() || hostname.len() > HOSTNAME_MAX_LEN {
        return Err(SysconfError::validation(
            path,
            format!("hostname must be 1..={} characters", HOSTNAME_MAX_LEN),
        ));
    }
    for label in hostname.split('.') {
        let ok = !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !ok {
            return Err(SysconfError::validation(
                path,
                format!("invalid hostname label '{}'", label),
            ));
        }
    }
    Ok(())
}

/// Single-line text that ends up in a colon-separated or line-oriented file.
pub fn validate_text(path: &str, value: &str, forbid_colon: bool) -> Result<(), SysconfError> {
    if value.len() > TEXT_MAX_LEN {
        return Err(SysconfError::validation(path, "value too long"));
    }
    if value.contains('\n') || value.contains('\0') {
        return Err(SysconfError::validation(path, "value must be a single line"));
    }
    if forbid_colon && value.contains(':') {
        return Err(SysconfError::validation(path, "value must not contain ':'"));
    }
    Ok(())
}

/// A usable crypt hash. Locked accounts are expressed by leaving the
/// password out, so shadow lock markers are not accepted here.
pub fn validate_password(path: &str, hash: &str) -> Result<(), SysconfError> {
    validate_text(path, hash, true)?;
    if hash.is_empty() || hash.starts_with('!') || hash.starts_with('*') {
        return Err(SysconfError::validation(
            path,
            "password hash must not be empty or a lock marker",
        ));
    }
    Ok(())
}

pub fn validate_clock(path: &str, clock: &ClockConfig) -> Result<(), SysconfError> {
    match clock {
        ClockConfig::TimezoneName(name) => {
            if !timezone_re().is_match(name) || name.split('/').any(|p| p == "..") {
                return Err(SysconfError::validation(
                    path,
                    format!("invalid timezone name '{}'", name),
                ));
            }
        }
        ClockConfig::TimezoneUtcOffset(minutes) => {
            if !UTC_OFFSET_RANGE.contains(minutes) {
                return Err(SysconfError::validation(
                    path,
                    format!("utc offset {} outside -1500..1500", minutes),
                ));
            }
        }
    }
    Ok(())
}

pub fn validate_ntp_server(path: &str, server: &NtpServer) -> Result<(), SysconfError> {
    if server.name.is_empty() {
        return Err(SysconfError::validation(path, "server name is empty"));
    }
    if server.address.is_empty() || server.address.chars().any(char::is_whitespace) {
        return Err(SysconfError::validation(
            path,
            format!("server '{}' has no usable address", server.name),
        ));
    }
    if server.port == Some(0) {
        return Err(SysconfError::validation(path, "port 0 is not allowed"));
    }
    Ok(())
}

pub fn validate_username(path: &str, name: &str) -> Result<(), SysconfError> {
    if !username_re().is_match(name) {
        return Err(SysconfError::validation(
            path,
            format!("invalid user name '{}'", name),
        ));
    }
    Ok(())
}

pub fn validate_key(path: &str, key: &AuthorizedKey) -> Result<(), SysconfError> {
    if key.name.is_empty()
        || key.name == "."
        || key.name == ".."
        || key.name.contains('/')
        || key.name.contains('\0')
    {
        return Err(SysconfError::validation(
            path,
            format!("invalid key name '{}'", key.name),
        ));
    }
    if !KEY_ALGORITHMS.contains(&key.algorithm.as_str()) {
        return Err(SysconfError::validation(
            path,
            format!("unsupported key algorithm '{}'", key.algorithm),
        ));
    }
    if key.key_data.is_empty() || STANDARD.decode(key.key_data.as_bytes()).is_err() {
        return Err(SysconfError::validation(
            path,
            format!("key data of '{}' is not valid base64", key.name),
        ));
    }
    Ok(())
}

impl SystemConfig {
    /// Check every leaf and the key invariants of every collection.
    pub fn validate(&self) -> Result<(), SysconfError> {
        let root = crate::SYSTEM_ROOT;
        if let Some(hostname) = &self.hostname {
            validate_hostname(&format!("{}/hostname", root), hostname)?;
        }
        if let Some(contact) = &self.contact {
            validate_text(&format!("{}/contact", root), contact, true)?;
        }
        if let Some(location) = &self.location {
            validate_text(&format!("{}/location", root), location, false)?;
        }
        if let Some(clock) = &self.clock {
            validate_clock(&format!("{}/clock", root), clock)?;
        }

        let mut seen = std::collections::HashSet::new();
        for server in &self.ntp.servers {
            let path = format!("{}/ntp/server[name='{}']", root, server.name);
            if !seen.insert(server.name.as_str()) {
                return Err(SysconfError::validation(path, "duplicate server name"));
            }
            validate_ntp_server(&path, server)?;
        }

        for (name, user) in &self.authentication {
            let path = format!("{}/authentication/user[name='{}']", root, name);
            if *name != user.name {
                return Err(SysconfError::validation(path, "user key does not match name"));
            }
            validate_username(&path, name)?;
            if let Some(password) = &user.password {
                validate_password(&format!("{}/password", path), password)?;
            }
            for (key_name, key) in &user.authorized_keys {
                let key_path = format!("{}/authorized-key[name='{}']", path, key_name);
                if *key_name != key.name {
                    return Err(SysconfError::validation(key_path, "key does not match name"));
                }
                validate_key(&key_path, key)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key() -> AuthorizedKey {
        AuthorizedKey::new("test_rsa.pub", "ssh-rsa", "AAAAB3NzaC1yc2EAAAADAQABAAABAQ==")
    }

    #[test]
    fn test_hostname_rules() {
        assert!(validate_hostname("p", "test-hostname").is_ok());
        assert!(validate_hostname("p", "a.b.c").is_ok());
        assert!(validate_hostname("p", "").is_err());
        assert!(validate_hostname("p", "-bad").is_err());
        assert!(validate_hostname("p", "under_score").is_err());
        assert!(validate_hostname("p", &"x".repeat(65)).is_err());
    }

    #[test]
    fn test_key_validation() {
        assert!(validate_key("p", &sample_key()).is_ok());

        let mut bad_alg = sample_key();
        bad_alg.algorithm = "ssh-foo".to_string();
        assert!(validate_key("p", &bad_alg).is_err());

        let mut bad_name = sample_key();
        bad_name.name = "../evil".to_string();
        assert!(validate_key("p", &bad_name).is_err());

        let mut bad_data = sample_key();
        bad_data.key_data = "not base64!".to_string();
        assert!(validate_key("p", &bad_data).is_err());
    }

    #[test]
    fn test_config_validate_detects_duplicate_servers() {
        let mut config = SystemConfig::default();
        config.ntp.servers.push(NtpServer::new("a", "10.0.0.1"));
        config.ntp.servers.push(NtpServer::new("a", "10.0.0.2"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_password_rejects_lock_markers() {
        assert!(validate_password("p", "$6$salt$hash").is_ok());
        assert!(validate_password("p", "").is_err());
        assert!(validate_password("p", "!$6$salt$hash").is_err());
        assert!(validate_password("p", "*").is_err());
        assert!(validate_password("p", "$6$a:b").is_err());

        let mut user = LocalUser::new("test_user");
        user.password = Some("!locked".to_string());
        let mut config = SystemConfig::default();
        config.authentication.insert(user.name.clone(), user);
        match config.validate().unwrap_err() {
            SysconfError::Validation { path, .. } => assert!(path.ends_with("/password")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_offset_range() {
        assert!(validate_clock("p", &ClockConfig::TimezoneUtcOffset(120)).is_ok());
        assert!(validate_clock("p", &ClockConfig::TimezoneUtcOffset(1501)).is_err());
        assert!(validate_clock("p", &ClockConfig::TimezoneName("Europe/Stockholm".into())).is_ok());
        assert!(validate_clock("p", &ClockConfig::TimezoneName("../etc/passwd".into())).is_err());
    }

    #[test]
    fn test_config_serde_shape() {
        let mut config = SystemConfig::default();
        config.contact = Some("test_contact".to_string());
        config.clock = Some(ClockConfig::TimezoneName("Europe/Stockholm".to_string()));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["contact"], "test_contact");
        assert_eq!(json["clock"]["timezone-name"], "Europe/Stockholm");
        let back: SystemConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
