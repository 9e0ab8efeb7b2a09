//! Capability traits over OS resources.
//!
//! Each write either fully succeeds or fails leaving its target untouched.

use chrono::{DateTime, FixedOffset, Utc};
use std::fmt;
use std::path::Path;

use sysconf_shared::parsers::{PasswdEntry, ShadowEntry};
use sysconf_shared::{OsError, PlatformInfo};

/// Ownership and permission bits applied to created files and directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAttrs {
    pub mode: u32,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl FileAttrs {
    pub fn mode(mode: u32) -> Self {
        Self {
            mode,
            uid: None,
            gid: None,
        }
    }

    pub fn owned(mode: u32, uid: u32, gid: u32) -> Self {
        Self {
            mode,
            uid: Some(uid),
            gid: Some(gid),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Enable,
    Disable,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
            ServiceAction::Enable => "enable",
            ServiceAction::Disable => "disable",
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait HostnameOps {
    fn hostname(&self) -> Result<String, OsError>;
    /// Set the live hostname and persist it for the next boot.
    fn set_hostname(&self, name: &str) -> Result<(), OsError>;
}

/// The accounts database (`/etc/passwd`).
pub trait AccountsDb {
    fn passwd_entries(&self) -> Result<Vec<PasswdEntry>, OsError>;

    fn passwd_entry(&self, name: &str) -> Result<PasswdEntry, OsError> {
        self.passwd_entries()?
            .into_iter()
            .find(|e| e.name == name)
            .ok_or_else(|| OsError::not_found(format!("passwd entry {}", name)))
    }

    /// Insert a new entry at `index`, or append when `None`.
    fn insert_passwd_entry(&self, entry: &PasswdEntry, index: Option<usize>)
        -> Result<(), OsError>;
    /// Replace the entry with the same name in place.
    fn update_passwd_entry(&self, entry: &PasswdEntry) -> Result<(), OsError>;
    fn delete_passwd_entry(&self, name: &str) -> Result<(), OsError>;
}

/// The shadow-password database (`/etc/shadow`).
pub trait ShadowDb {
    fn shadow_entries(&self) -> Result<Vec<ShadowEntry>, OsError>;

    fn shadow_entry(&self, name: &str) -> Result<ShadowEntry, OsError> {
        self.shadow_entries()?
            .into_iter()
            .find(|e| e.name == name)
            .ok_or_else(|| OsError::not_found(format!("shadow entry {}", name)))
    }

    fn insert_shadow_entry(&self, entry: &ShadowEntry, index: Option<usize>)
        -> Result<(), OsError>;
    fn update_shadow_entry(&self, entry: &ShadowEntry) -> Result<(), OsError>;
    fn delete_shadow_entry(&self, name: &str) -> Result<(), OsError>;
}

pub trait FileSystem {
    fn exists(&self, path: &Path) -> bool;
    /// File content, `None` when nothing exists at `path` or it is a
    /// directory.
    fn read_file(&self, path: &Path) -> Result<Option<String>, OsError>;
    /// Replace `path` atomically with `content`.
    fn write_file(&self, path: &Path, content: &str, attrs: FileAttrs) -> Result<(), OsError>;
    fn remove_file(&self, path: &Path) -> Result<(), OsError>;
    /// Create one directory. The parent must exist.
    fn create_dir(&self, path: &Path, attrs: FileAttrs) -> Result<(), OsError>;
    /// Remove one empty directory.
    fn remove_dir(&self, path: &Path) -> Result<(), OsError>;
    /// Move a file or tree. Fails if `to` exists.
    fn rename(&self, from: &Path, to: &Path) -> Result<(), OsError>;
    /// Remove a tree recursively.
    fn remove_tree(&self, path: &Path) -> Result<(), OsError>;
    /// Names of the entries of a directory, sorted.
    fn list_dir(&self, path: &Path) -> Result<Vec<String>, OsError>;
}

pub trait NtpConfigFile {
    /// Current daemon config, empty when the file does not exist.
    fn read_ntp_config(&self) -> Result<String, OsError>;
    fn write_ntp_config(&self, content: &str) -> Result<(), OsError>;
}

pub trait ServiceControl {
    /// Blocks until the service manager reports or the timeout elapses.
    fn service_action(&self, unit: &str, action: ServiceAction) -> Result<(), OsError>;
    fn is_active(&self, unit: &str) -> Result<bool, OsError>;
    fn is_enabled(&self, unit: &str) -> Result<bool, OsError>;
}

pub trait ClockOps {
    fn current_datetime(&self) -> Result<DateTime<FixedOffset>, OsError>;
    fn set_current_datetime(&self, at: DateTime<Utc>) -> Result<(), OsError>;
    fn boot_datetime(&self) -> Result<DateTime<FixedOffset>, OsError>;
    /// Configured zone name (relative to the zoneinfo dir), an absolute link
    /// target for foreign zones, or `None` when no zone is configured.
    fn timezone(&self) -> Result<Option<String>, OsError>;
    fn set_timezone(&self, zone: Option<&str>) -> Result<(), OsError>;
}

pub trait PlatformOps {
    fn platform_info(&self) -> Result<PlatformInfo, OsError>;
}

pub trait PowerOps {
    fn restart(&self) -> Result<(), OsError>;
    fn shutdown(&self) -> Result<(), OsError>;
}

/// Every capability the daemon needs from its host.
pub trait Host:
    HostnameOps
    + AccountsDb
    + ShadowDb
    + FileSystem
    + NtpConfigFile
    + ServiceControl
    + ClockOps
    + PlatformOps
    + PowerOps
    + Send
    + Sync
{
}

impl<T> Host for T where
    T: HostnameOps
        + AccountsDb
        + ShadowDb
        + FileSystem
        + NtpConfigFile
        + ServiceControl
        + ClockOps
        + PlatformOps
        + PowerOps
        + Send
        + Sync
{
}
