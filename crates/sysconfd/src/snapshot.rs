//! Observed state of the host resources a transaction touches.
//!
//! Captured before the first step and again after a rollback; any difference
//! is an integrity violation.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use sysconf_common::{
    AccountsDb, ClockOps, FileSystem, Host, HostnameOps, NtpConfigFile, ServiceControl, ShadowDb,
};
use sysconf_shared::parsers::{PasswdEntry, ShadowEntry};
use sysconf_shared::{Domain, OsError};

use crate::reconcile::{Plan, Step};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Resource {
    Hostname,
    Passwd,
    Shadow,
    Path(PathBuf),
    NtpConfig,
    Service(String),
    Timezone,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Hostname => write!(f, "hostname"),
            Resource::Passwd => write!(f, "passwd"),
            Resource::Shadow => write!(f, "shadow"),
            Resource::Path(path) => write!(f, "{}", path.display()),
            Resource::NtpConfig => write!(f, "ntp config"),
            Resource::Service(unit) => write!(f, "service {}", unit),
            Resource::Timezone => write!(f, "timezone"),
        }
    }
}

/// Resources a step may change, forward or inverse.
pub fn touched_by(step: &Step) -> Vec<Resource> {
    match step {
        Step::SetHostname(_) => vec![Resource::Hostname],
        Step::InsertPasswd { .. } | Step::UpdatePasswd(_) | Step::DeletePasswd(_) => {
            vec![Resource::Passwd]
        }
        Step::InsertShadow { .. } | Step::UpdateShadow(_) | Step::DeleteShadow(_) => {
            vec![Resource::Shadow]
        }
        Step::WriteFile { path, .. }
        | Step::RemoveFile(path)
        | Step::CreateDir { path, .. }
        | Step::RemoveDir(path)
        | Step::RemoveTree(path) => vec![Resource::Path(path.clone())],
        Step::Rename { from, to } => {
            vec![Resource::Path(from.clone()), Resource::Path(to.clone())]
        }
        Step::WriteNtpConfig { restart, .. } => {
            let mut out = vec![Resource::NtpConfig];
            out.extend(restart.iter().map(|u| Resource::Service(u.clone())));
            out
        }
        Step::Service { unit, .. } => vec![Resource::Service(unit.clone())],
        Step::SetTimezone(_) => vec![Resource::Timezone],
    }
}

/// Every resource the plans touch, with the domain that first touches it.
pub fn resources_of(plans: &[Plan]) -> BTreeMap<Resource, Domain> {
    let mut out = BTreeMap::new();
    for plan in plans {
        for step in &plan.steps {
            for resource in touched_by(&step.forward)
                .into_iter()
                .chain(touched_by(&step.inverse))
            {
                out.entry(resource).or_insert(plan.domain);
            }
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSnapshot {
    values: BTreeMap<Resource, String>,
}

impl HostSnapshot {
    /// Read every resource. On failure returns the resource that could not
    /// be read along with the error.
    pub fn capture<'a>(
        host: &dyn Host,
        resources: impl IntoIterator<Item = &'a Resource>,
    ) -> Result<Self, (Resource, OsError)> {
        let mut values = BTreeMap::new();
        for resource in resources {
            let value = observe(host, resource).map_err(|e| (resource.clone(), e))?;
            values.insert(resource.clone(), value);
        }
        Ok(Self { values })
    }

    /// Resources whose observed value differs from `other`.
    pub fn diff(&self, other: &HostSnapshot) -> Vec<Resource> {
        self.values
            .iter()
            .filter(|(resource, value)| other.values.get(*resource) != Some(*value))
            .map(|(resource, _)| resource.clone())
            .collect()
    }
}

fn observe(host: &dyn Host, resource: &Resource) -> Result<String, OsError> {
    Ok(match resource {
        Resource::Hostname => host.hostname()?,
        Resource::Passwd => PasswdEntry::render_all(&host.passwd_entries()?),
        Resource::Shadow => ShadowEntry::render_all(&host.shadow_entries()?),
        Resource::Path(path) => {
            if !host.exists(path) {
                "missing".to_string()
            } else {
                match host.read_file(path)? {
                    Some(content) => format!("file:{}", content),
                    None => match host.list_dir(path) {
                        Ok(entries) => format!("dir:{}", entries.join("/")),
                        Err(_) => "present".to_string(),
                    },
                }
            }
        }
        Resource::NtpConfig => host.read_ntp_config()?,
        Resource::Service(unit) => format!(
            "active={} enabled={}",
            host.is_active(unit)?,
            host.is_enabled(unit)?
        ),
        Resource::Timezone => format!("{:?}", host.timezone()?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sysconf_common::{FileAttrs, MemoryHost};
    use std::path::Path;

    #[test]
    fn test_diff_reports_changed_path() {
        let host = MemoryHost::new();
        let resources = vec![
            Resource::Hostname,
            Resource::Path(PathBuf::from("/var/lib/sysconf/location_info")),
        ];
        let before = HostSnapshot::capture(&host, &resources).unwrap();
        host.write_file(
            Path::new("/var/lib/sysconf/location_info"),
            "lab\n",
            FileAttrs::mode(0o644),
        )
        .unwrap();
        let after = HostSnapshot::capture(&host, &resources).unwrap();
        assert_eq!(
            before.diff(&after),
            [Resource::Path(PathBuf::from("/var/lib/sysconf/location_info"))]
        );
    }

    #[test]
    fn test_directory_observed_by_entries() {
        let host = MemoryHost::new();
        let home = PathBuf::from("/home/test_user");
        host.create_dir(&home, FileAttrs::mode(0o700)).unwrap();
        let resources = vec![Resource::Path(home.clone())];

        let before = HostSnapshot::capture(&host, &resources).unwrap();
        assert_eq!(before.values[&resources[0]], "dir:");
        host.create_dir(&home.join(".ssh"), FileAttrs::mode(0o700)).unwrap();
        let after = HostSnapshot::capture(&host, &resources).unwrap();
        assert_eq!(after.values[&resources[0]], "dir:.ssh");
        assert_eq!(before.diff(&after), resources);
    }

    #[test]
    fn test_rename_touches_both_ends() {
        let step = Step::Rename {
            from: PathBuf::from("/home/a"),
            to: PathBuf::from("/home/.stash"),
        };
        assert_eq!(touched_by(&step).len(), 2);
    }
}
