//! Real host implementation backed by files, syscalls and systemctl.

mod accounts;
mod clock;
mod files;
mod service;

use std::ffi::OsStr;
use std::path::PathBuf;
use std::time::Duration;

use nix::sys::utsname::uname;
use nix::unistd::{gethostname, sethostname};
use tracing::{debug, warn};

use sysconf_shared::{OsError, OsErrorKind, PlatformInfo};

use crate::adapter::{HostnameOps, NtpConfigFile, PlatformOps};

pub use files::atomic_write;

/// Locations of the host files the adapter edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    pub passwd: PathBuf,
    pub shadow: PathBuf,
    pub hostname_file: PathBuf,
    pub ntp_conf: PathBuf,
    pub localtime: PathBuf,
    pub zoneinfo: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            passwd: PathBuf::from("/etc/passwd"),
            shadow: PathBuf::from("/etc/shadow"),
            hostname_file: PathBuf::from("/etc/hostname"),
            ntp_conf: PathBuf::from("/etc/ntp.conf"),
            localtime: PathBuf::from("/etc/localtime"),
            zoneinfo: PathBuf::from("/usr/share/zoneinfo"),
        }
    }
}

/// Adapter for the running Linux system.
#[derive(Debug, Clone)]
pub struct LinuxHost {
    paths: HostPaths,
    service_timeout: Duration,
}

impl LinuxHost {
    pub fn new(paths: HostPaths, service_timeout: Duration) -> Self {
        Self {
            paths,
            service_timeout,
        }
    }

    pub fn paths(&self) -> &HostPaths {
        &self.paths
    }
}

fn nix_err(resource: &str, err: nix::Error) -> OsError {
    OsError::from_io(resource, &std::io::Error::from(err))
}

fn os_string(resource: &str, value: &OsStr) -> Result<String, OsError> {
    value
        .to_str()
        .map(str::to_string)
        .ok_or_else(|| OsError::invalid(resource, "not valid UTF-8"))
}

impl HostnameOps for LinuxHost {
    fn hostname(&self) -> Result<String, OsError> {
        let name = gethostname().map_err(|e| nix_err("hostname", e))?;
        os_string("hostname", &name)
    }

    fn set_hostname(&self, name: &str) -> Result<(), OsError> {
        let file = &self.paths.hostname_file;
        let previous = files::read_optional(file)?;
        atomic_write(file, &format!("{}\n", name), None)?;

        if let Err(e) = sethostname(name) {
            let err = nix_err("hostname", e);
            // Put the file back so the failed call leaves nothing behind.
            let restored = match &previous {
                Some(content) => atomic_write(file, content, None),
                None => std::fs::remove_file(file)
                    .map_err(|io| OsError::from_io(file.display().to_string(), &io)),
            };
            if let Err(restore_err) = restored {
                warn!("Failed to restore {}: {}", file.display(), restore_err);
            }
            return Err(err);
        }
        debug!("Hostname set to {}", name);
        Ok(())
    }
}

impl NtpConfigFile for LinuxHost {
    fn read_ntp_config(&self) -> Result<String, OsError> {
        Ok(files::read_optional(&self.paths.ntp_conf)?.unwrap_or_default())
    }

    fn write_ntp_config(&self, content: &str) -> Result<(), OsError> {
        atomic_write(&self.paths.ntp_conf, content, None)
    }
}

impl PlatformOps for LinuxHost {
    fn platform_info(&self) -> Result<PlatformInfo, OsError> {
        let uts = uname().map_err(|e| nix_err("uname", e))?;
        Ok(PlatformInfo {
            os_name: os_string("uname", uts.sysname())?,
            os_release: os_string("uname", uts.release())?,
            os_version: os_string("uname", uts.version())?,
            machine: os_string("uname", uts.machine())?,
        })
    }
}

/// Map a failed systemctl call onto the adapter taxonomy from its stderr.
fn classify_systemctl(stderr: &str) -> OsErrorKind {
    let lower = stderr.to_lowercase();
    if lower.contains("not found") || lower.contains("not loaded") || lower.contains("does not exist")
    {
        OsErrorKind::NotFound
    } else if lower.contains("access denied") || lower.contains("authentication required") {
        OsErrorKind::PermissionDenied
    } else if lower.contains("timeout") || lower.contains("timed out") {
        OsErrorKind::Timeout
    } else {
        OsErrorKind::Io
    }
}
