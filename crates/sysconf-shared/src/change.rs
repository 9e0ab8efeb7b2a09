//! Change nodes, transactions and their conversion into typed configuration.
//!
//! The datastore delivers a transaction as an ordered list of change nodes,
//! each naming a path below `/ietf-system:system`. [`apply_changes`] folds
//! them onto the committed configuration and validates the result, so every
//! malformed or conflicting input is rejected before any OS mutation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SysconfError;
use crate::model::{AssociationType, AuthorizedKey, ClockConfig, LocalUser, NtpServer, SystemConfig};
use crate::SYSTEM_ROOT;

/// Configuration subtree handled by one reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Hostname,
    Contact,
    Location,
    Clock,
    Ntp,
    Authentication,
}

impl Domain {
    /// Apply order. Identity and time land before account mutations.
    pub const ORDER: [Domain; 6] = [
        Domain::Hostname,
        Domain::Contact,
        Domain::Location,
        Domain::Clock,
        Domain::Ntp,
        Domain::Authentication,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Hostname => "hostname",
            Domain::Contact => "contact",
            Domain::Location => "location",
            Domain::Clock => "clock",
            Domain::Ntp => "ntp",
            Domain::Authentication => "authentication",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOperation {
    Created,
    Modified,
    Deleted,
}

/// One changed node of the configuration tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNode {
    pub path: String,
    pub operation: ChangeOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl ChangeNode {
    pub fn created(path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            operation: ChangeOperation::Created,
            previous_value: None,
            value: Some(value.into()),
        }
    }

    /// Creation of a container or list entry, which carries no value.
    pub fn created_node(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            operation: ChangeOperation::Created,
            previous_value: None,
            value: None,
        }
    }

    pub fn modified(
        path: impl Into<String>,
        previous: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            operation: ChangeOperation::Modified,
            previous_value: Some(previous.into()),
            value: Some(value.into()),
        }
    }

    pub fn deleted(path: impl Into<String>, previous: Option<String>) -> Self {
        Self {
            path: path.into(),
            operation: ChangeOperation::Deleted,
            previous_value: previous,
            value: None,
        }
    }

    fn value_required(&self) -> Result<&str, SysconfError> {
        self.value
            .as_deref()
            .ok_or_else(|| SysconfError::validation(&self.path, "missing value"))
    }
}

/// One atomically-applied batch of changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub changes: Vec<ChangeNode>,
}

impl Transaction {
    pub fn new(changes: Vec<ChangeNode>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            changes,
        }
    }
}

// =============================================================================
// Paths
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NtpServerLeaf {
    Name,
    Udp,
    Address,
    Port,
    AssociationType,
    Iburst,
    Prefer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLeaf {
    Name,
    Algorithm,
    KeyData,
}

/// Typed form of a configuration path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigPath {
    System,
    Hostname,
    Contact,
    Location,
    Clock,
    TimezoneName,
    TimezoneUtcOffset,
    Ntp,
    NtpEnabled,
    NtpServer { server: String },
    NtpServerLeaf { server: String, leaf: NtpServerLeaf },
    Authentication,
    User { user: String },
    UserName { user: String },
    UserPassword { user: String },
    AuthorizedKey { user: String, key: String },
    AuthorizedKeyLeaf { user: String, key: String, leaf: KeyLeaf },
}

struct Segment {
    name: String,
    key: Option<String>,
}

fn split_segments(rest: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in rest.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, '/') if depth == 0 => {
                out.push(&rest[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&rest[start..]);
    out
}

fn parse_segment(path: &str, raw: &str) -> Result<Segment, SysconfError> {
    let raw = raw.strip_prefix("ietf-system:").unwrap_or(raw);
    let Some(open) = raw.find('[') else {
        return Ok(Segment {
            name: raw.to_string(),
            key: None,
        });
    };
    let name = &raw[..open];
    let predicate = raw[open..]
        .strip_prefix("[name=")
        .and_then(|p| p.strip_suffix(']'))
        .ok_or_else(|| SysconfError::validation(path, "only [name=...] keys are supported"))?;
    let key = predicate
        .strip_prefix('\'')
        .and_then(|k| k.strip_suffix('\''))
        .or_else(|| predicate.strip_prefix('"').and_then(|k| k.strip_suffix('"')))
        .ok_or_else(|| SysconfError::validation(path, "list key must be quoted"))?;
    Ok(Segment {
        name: name.to_string(),
        key: Some(key.to_string()),
    })
}

/// Segments of `path` below `root`, each a node name with an optional list key.
pub(crate) fn path_segments(
    path: &str,
    root: &str,
) -> Result<Vec<(String, Option<String>)>, SysconfError> {
    let unknown = || SysconfError::validation(path, "unsupported path");
    let rest = path.strip_prefix(root).ok_or_else(unknown)?;
    if rest.is_empty() {
        return Ok(Vec::new());
    }
    let rest = rest.strip_prefix('/').ok_or_else(unknown)?;
    split_segments(rest)
        .into_iter()
        .map(|s| parse_segment(path, s).map(|seg| (seg.name, seg.key)))
        .collect()
}

impl ConfigPath {
    pub fn parse(path: &str) -> Result<Self, SysconfError> {
        let unknown = || SysconfError::validation(path, "unsupported configuration path");
        let segments = path_segments(path, SYSTEM_ROOT)?;
        if segments.is_empty() {
            return Ok(ConfigPath::System);
        }
        let names: Vec<&str> = segments.iter().map(|(name, _)| name.as_str()).collect();
        let key = |i: usize| -> Result<String, SysconfError> {
            segments[i]
                .1
                .clone()
                .ok_or_else(|| SysconfError::validation(path, "list entry without key"))
        };

        let parsed = match names.as_slice() {
            ["hostname"] => ConfigPath::Hostname,
            ["contact"] => ConfigPath::Contact,
            ["location"] => ConfigPath::Location,
            ["clock"] => ConfigPath::Clock,
            ["clock", "timezone-name"] => ConfigPath::TimezoneName,
            ["clock", "timezone-utc-offset"] => ConfigPath::TimezoneUtcOffset,
            ["ntp"] => ConfigPath::Ntp,
            ["ntp", "enabled"] => ConfigPath::NtpEnabled,
            ["ntp", "server"] => ConfigPath::NtpServer { server: key(1)? },
            ["ntp", "server", tail @ ..] => {
                let leaf = match tail {
                    ["name"] => NtpServerLeaf::Name,
                    ["udp"] => NtpServerLeaf::Udp,
                    ["udp", "address"] => NtpServerLeaf::Address,
                    ["udp", "port"] => NtpServerLeaf::Port,
                    ["association-type"] => NtpServerLeaf::AssociationType,
                    ["iburst"] => NtpServerLeaf::Iburst,
                    ["prefer"] => NtpServerLeaf::Prefer,
                    _ => return Err(unknown()),
                };
                ConfigPath::NtpServerLeaf {
                    server: key(1)?,
                    leaf,
                }
            }
            ["authentication"] => ConfigPath::Authentication,
            ["authentication", "user"] => ConfigPath::User { user: key(1)? },
            ["authentication", "user", "name"] => ConfigPath::UserName { user: key(1)? },
            ["authentication", "user", "password"] => ConfigPath::UserPassword { user: key(1)? },
            ["authentication", "user", "authorized-key"] => ConfigPath::AuthorizedKey {
                user: key(1)?,
                key: key(2)?,
            },
            ["authentication", "user", "authorized-key", leaf] => {
                let leaf = match *leaf {
                    "name" => KeyLeaf::Name,
                    "algorithm" => KeyLeaf::Algorithm,
                    "key-data" => KeyLeaf::KeyData,
                    _ => return Err(unknown()),
                };
                ConfigPath::AuthorizedKeyLeaf {
                    user: key(1)?,
                    key: key(2)?,
                    leaf,
                }
            }
            _ => return Err(unknown()),
        };
        Ok(parsed)
    }

    /// Subtree the path belongs to. `None` for containers spanning several.
    pub fn domain(&self) -> Option<Domain> {
        match self {
            ConfigPath::System => None,
            ConfigPath::Hostname => Some(Domain::Hostname),
            ConfigPath::Contact => Some(Domain::Contact),
            ConfigPath::Location => Some(Domain::Location),
            ConfigPath::Clock | ConfigPath::TimezoneName | ConfigPath::TimezoneUtcOffset => {
                Some(Domain::Clock)
            }
            ConfigPath::Ntp
            | ConfigPath::NtpEnabled
            | ConfigPath::NtpServer { .. }
            | ConfigPath::NtpServerLeaf { .. } => Some(Domain::Ntp),
            ConfigPath::Authentication
            | ConfigPath::User { .. }
            | ConfigPath::UserName { .. }
            | ConfigPath::UserPassword { .. }
            | ConfigPath::AuthorizedKey { .. }
            | ConfigPath::AuthorizedKeyLeaf { .. } => Some(Domain::Authentication),
        }
    }
}

// =============================================================================
// Folding changes onto the configuration
// =============================================================================

fn parse_bool(path: &str, value: &str) -> Result<bool, SysconfError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(SysconfError::validation(
            path,
            format!("expected boolean, got '{}'", other),
        )),
    }
}

fn parse_number<T: std::str::FromStr>(path: &str, value: &str) -> Result<T, SysconfError> {
    value
        .parse::<T>()
        .map_err(|_| SysconfError::validation(path, format!("'{}' is not a valid number", value)))
}

fn ensure_server<'a>(config: &'a mut SystemConfig, name: &str) -> &'a mut NtpServer {
    if let Some(idx) = config.ntp.servers.iter().position(|s| s.name == name) {
        return &mut config.ntp.servers[idx];
    }
    config.ntp.servers.push(NtpServer::new(name, ""));
    let last = config.ntp.servers.len() - 1;
    &mut config.ntp.servers[last]
}

fn ensure_user<'a>(config: &'a mut SystemConfig, name: &str) -> &'a mut LocalUser {
    config
        .authentication
        .entry(name.to_string())
        .or_insert_with(|| LocalUser::new(name))
}

fn ensure_key<'a>(config: &'a mut SystemConfig, user: &str, key: &str) -> &'a mut AuthorizedKey {
    ensure_user(config, user)
        .authorized_keys
        .entry(key.to_string())
        .or_insert_with(|| AuthorizedKey::new(key, "", ""))
}

fn check_key_leaf(node: &ChangeNode, key: &str) -> Result<(), SysconfError> {
    match node.value.as_deref() {
        Some(v) if v != key => Err(SysconfError::validation(
            &node.path,
            format!("name leaf '{}' does not match list key '{}'", v, key),
        )),
        _ => Ok(()),
    }
}

/// Apply one change node to `config`.
pub fn apply_change(config: &mut SystemConfig, node: &ChangeNode) -> Result<(), SysconfError> {
    let path = ConfigPath::parse(&node.path)?;
    let p = node.path.as_str();
    let deleting = node.operation == ChangeOperation::Deleted;

    match path {
        ConfigPath::System => {
            if deleting {
                *config = SystemConfig::default();
            }
        }
        ConfigPath::Hostname => {
            config.hostname = if deleting {
                None
            } else {
                Some(node.value_required()?.to_string())
            };
        }
        ConfigPath::Contact => {
            config.contact = if deleting {
                None
            } else {
                Some(node.value_required()?.to_string())
            };
        }
        ConfigPath::Location => {
            config.location = if deleting {
                None
            } else {
                Some(node.value_required()?.to_string())
            };
        }
        ConfigPath::Clock => {
            if deleting {
                config.clock = None;
            }
        }
        ConfigPath::TimezoneName => {
            if deleting {
                if matches!(config.clock, Some(ClockConfig::TimezoneName(_))) {
                    config.clock = None;
                }
            } else {
                config.clock = Some(ClockConfig::TimezoneName(node.value_required()?.to_string()));
            }
        }
        ConfigPath::TimezoneUtcOffset => {
            if deleting {
                if matches!(config.clock, Some(ClockConfig::TimezoneUtcOffset(_))) {
                    config.clock = None;
                }
            } else {
                let minutes = parse_number::<i16>(p, node.value_required()?)?;
                config.clock = Some(ClockConfig::TimezoneUtcOffset(minutes));
            }
        }
        ConfigPath::Ntp => {
            if deleting {
                config.ntp = Default::default();
            }
        }
        ConfigPath::NtpEnabled => {
            config.ntp.enabled = if deleting {
                false
            } else {
                parse_bool(p, node.value_required()?)?
            };
        }
        ConfigPath::NtpServer { server } => match node.operation {
            ChangeOperation::Created => {
                if config.ntp.server(&server).is_some() {
                    return Err(SysconfError::validation(
                        p,
                        format!("duplicate ntp server '{}'", server),
                    ));
                }
                config.ntp.servers.push(NtpServer::new(&server, ""));
            }
            ChangeOperation::Modified => {}
            ChangeOperation::Deleted => config.ntp.servers.retain(|s| s.name != server),
        },
        ConfigPath::NtpServerLeaf { server, leaf } => {
            if deleting {
                // Leaves of an already-removed entry arrive after the entry itself.
                let Some(entry) = config.ntp.server_mut(&server) else {
                    return Ok(());
                };
                match leaf {
                    NtpServerLeaf::Name => {}
                    NtpServerLeaf::Udp => {
                        entry.address.clear();
                        entry.port = None;
                    }
                    NtpServerLeaf::Address => entry.address.clear(),
                    NtpServerLeaf::Port => entry.port = None,
                    NtpServerLeaf::AssociationType => entry.association_type = AssociationType::Server,
                    NtpServerLeaf::Iburst => entry.iburst = false,
                    NtpServerLeaf::Prefer => entry.prefer = false,
                }
            } else {
                if leaf == NtpServerLeaf::Name {
                    check_key_leaf(node, &server)?;
                }
                let entry = ensure_server(config, &server);
                match leaf {
                    NtpServerLeaf::Name | NtpServerLeaf::Udp => {}
                    NtpServerLeaf::Address => entry.address = node.value_required()?.to_string(),
                    NtpServerLeaf::Port => {
                        entry.port = Some(parse_number::<u16>(p, node.value_required()?)?)
                    }
                    NtpServerLeaf::AssociationType => {
                        entry.association_type = node
                            .value_required()?
                            .parse::<AssociationType>()
                            .map_err(|e: String| SysconfError::validation(p, e))?
                    }
                    NtpServerLeaf::Iburst => entry.iburst = parse_bool(p, node.value_required()?)?,
                    NtpServerLeaf::Prefer => entry.prefer = parse_bool(p, node.value_required()?)?,
                }
            }
        }
        ConfigPath::Authentication => {
            if deleting {
                config.authentication.clear();
            }
        }
        ConfigPath::User { user } => match node.operation {
            ChangeOperation::Created => {
                if config.authentication.contains_key(&user) {
                    return Err(SysconfError::validation(
                        p,
                        format!("duplicate user '{}'", user),
                    ));
                }
                config.authentication.insert(user.clone(), LocalUser::new(&user));
            }
            ChangeOperation::Modified => {}
            ChangeOperation::Deleted => {
                config.authentication.remove(&user);
            }
        },
        ConfigPath::UserName { user } => {
            if !deleting {
                check_key_leaf(node, &user)?;
                ensure_user(config, &user);
            }
        }
        ConfigPath::UserPassword { user } => {
            if deleting {
                if let Some(entry) = config.authentication.get_mut(&user) {
                    entry.password = None;
                }
            } else {
                ensure_user(config, &user).password = Some(node.value_required()?.to_string());
            }
        }
        ConfigPath::AuthorizedKey { user, key } => match node.operation {
            ChangeOperation::Created => {
                let entry = ensure_user(config, &user);
                if entry.authorized_keys.contains_key(&key) {
                    return Err(SysconfError::validation(
                        p,
                        format!("duplicate authorized-key '{}' for user '{}'", key, user),
                    ));
                }
                entry
                    .authorized_keys
                    .insert(key.clone(), AuthorizedKey::new(&key, "", ""));
            }
            ChangeOperation::Modified => {}
            ChangeOperation::Deleted => {
                if let Some(entry) = config.authentication.get_mut(&user) {
                    entry.authorized_keys.remove(&key);
                }
            }
        },
        ConfigPath::AuthorizedKeyLeaf { user, key, leaf } => {
            if deleting {
                let Some(entry) = config
                    .authentication
                    .get_mut(&user)
                    .and_then(|u| u.authorized_keys.get_mut(&key))
                else {
                    return Ok(());
                };
                match leaf {
                    KeyLeaf::Name => {}
                    KeyLeaf::Algorithm => entry.algorithm.clear(),
                    KeyLeaf::KeyData => entry.key_data.clear(),
                }
            } else {
                if leaf == KeyLeaf::Name {
                    check_key_leaf(node, &key)?;
                }
                let entry = ensure_key(config, &user, &key);
                match leaf {
                    KeyLeaf::Name => {}
                    KeyLeaf::Algorithm => entry.algorithm = node.value_required()?.to_string(),
                    KeyLeaf::KeyData => entry.key_data = node.value_required()?.to_string(),
                }
            }
        }
    }
    Ok(())
}

/// Fold `changes` onto `base` and validate the result.
pub fn apply_changes(base: &SystemConfig, changes: &[ChangeNode]) -> Result<SystemConfig, SysconfError> {
    let mut next = base.clone();
    for node in changes {
        apply_change(&mut next, node)?;
    }
    next.validate()?;
    Ok(next)
}

/// Domains touched by a batch, in apply order.
pub fn touched_domains(changes: &[ChangeNode]) -> Vec<Domain> {
    let mut touched = Vec::new();
    for node in changes {
        match ConfigPath::parse(&node.path).ok().map(|p| p.domain()) {
            Some(Some(domain)) => touched.push(domain),
            Some(None) => touched.extend(Domain::ORDER),
            None => {}
        }
    }
    Domain::ORDER
        .into_iter()
        .filter(|d| touched.contains(d))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_paths() {
        assert_eq!(
            ConfigPath::parse("/ietf-system:system/hostname").unwrap(),
            ConfigPath::Hostname
        );
        assert_eq!(
            ConfigPath::parse("/ietf-system:system/ntp/server[name='hr.pool.ntp.org']/udp/address")
                .unwrap(),
            ConfigPath::NtpServerLeaf {
                server: "hr.pool.ntp.org".to_string(),
                leaf: NtpServerLeaf::Address,
            }
        );
        assert_eq!(
            ConfigPath::parse(
                "/ietf-system:system/authentication/user[name=\"u\"]/authorized-key[name='k/x']/key-data"
            )
            .unwrap(),
            ConfigPath::AuthorizedKeyLeaf {
                user: "u".to_string(),
                key: "k/x".to_string(),
                leaf: KeyLeaf::KeyData,
            }
        );
        assert!(ConfigPath::parse("/ietf-system:system/dns-resolver").is_err());
        assert!(ConfigPath::parse("/other:system/hostname").is_err());
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let base = SystemConfig::default();
        let key = "/ietf-system:system/authentication/user[name='u']/authorized-key[name='k']";
        let changes = vec![
            ChangeNode::created_node("/ietf-system:system/authentication/user[name='u']"),
            ChangeNode::created_node(key),
            ChangeNode::created_node(key),
        ];
        let err = apply_changes(&base, &changes).unwrap_err();
        assert!(err.to_string().contains("duplicate authorized-key"));
    }

    #[test]
    fn test_server_order_preserved() {
        let base = SystemConfig::default();
        let server = |n: &str| format!("/ietf-system:system/ntp/server[name='{}']", n);
        let mut changes = Vec::new();
        for (name, addr) in [("A", "10.0.0.1"), ("B", "10.0.0.2")] {
            changes.push(ChangeNode::created_node(server(name)));
            changes.push(ChangeNode::created(format!("{}/udp/address", server(name)), addr));
        }
        let two = apply_changes(&base, &changes).unwrap();

        let three = apply_changes(
            &two,
            &[
                ChangeNode::created_node(server("C")),
                ChangeNode::created(format!("{}/udp/address", server("C")), "10.0.0.3"),
            ],
        )
        .unwrap();
        let names: Vec<_> = three.ntp.servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["A", "B", "C"]);

        let removed = apply_changes(&three, &[ChangeNode::deleted(server("A"), None)]).unwrap();
        let names: Vec<_> = removed.ntp.servers.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["B", "C"]);
    }

    #[test]
    fn test_server_without_address_rejected() {
        let changes = vec![ChangeNode::created_node(
            "/ietf-system:system/ntp/server[name='lonely']",
        )];
        assert!(apply_changes(&SystemConfig::default(), &changes).is_err());
    }

    #[test]
    fn test_delete_root_clears_everything() {
        let mut base = SystemConfig::default();
        base.hostname = Some("h".to_string());
        base.ntp.enabled = true;
        base.authentication.insert("u".to_string(), LocalUser::new("u"));
        let next = apply_changes(&base, &[ChangeNode::deleted(SYSTEM_ROOT, None)]).unwrap();
        assert_eq!(next, SystemConfig::default());
    }

    #[test]
    fn test_touched_domains_in_apply_order() {
        let changes = vec![
            ChangeNode::created_node("/ietf-system:system/authentication/user[name='u']"),
            ChangeNode::created("/ietf-system:system/hostname", "h"),
            ChangeNode::created("/ietf-system:system/ntp/enabled", "true"),
        ];
        assert_eq!(
            touched_domains(&changes),
            vec![Domain::Hostname, Domain::Ntp, Domain::Authentication]
        );
    }
}
