//! In-memory host for tests.
//!
//! Mirrors the semantics of [`crate::LinuxHost`] closely enough for
//! reconciler and dispatcher tests: parents must exist, directories must be
//! empty before removal, renames refuse to overwrite. Failures can be injected
//! per operation and target; an injected failure has no effect on state.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use sysconf_shared::parsers::{PasswdEntry, ShadowEntry};
use sysconf_shared::{OsError, OsErrorKind, PlatformInfo};

use crate::adapter::{
    AccountsDb, ClockOps, FileAttrs, FileSystem, HostnameOps, NtpConfigFile, PlatformOps,
    PowerOps, ServiceAction, ServiceControl, ShadowDb,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceState {
    pub active: bool,
    pub enabled: bool,
}

/// Everything the daemon can observe about the fake host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub hostname: String,
    pub passwd: Vec<PasswdEntry>,
    pub shadow: Vec<ShadowEntry>,
    pub files: BTreeMap<PathBuf, (String, FileAttrs)>,
    pub dirs: BTreeMap<PathBuf, FileAttrs>,
    pub ntp_config: String,
    pub services: BTreeMap<String, ServiceState>,
    pub timezone: Option<String>,
}

/// An injected failure. Fires once, on the first matching call after `skip`
/// matching calls have gone through.
#[derive(Debug, Clone)]
pub struct Failure {
    pub op: &'static str,
    pub target: Option<String>,
    pub kind: OsErrorKind,
    pub skip: usize,
}

impl Failure {
    pub fn on(op: &'static str) -> Self {
        Self {
            op,
            target: None,
            kind: OsErrorKind::Busy,
            skip: 0,
        }
    }

    /// Only calls whose target contains `target`.
    pub fn matching(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn kind(mut self, kind: OsErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn after(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }
}

#[derive(Debug)]
struct Inner {
    state: MemorySnapshot,
    zones: BTreeSet<String>,
    platform: PlatformInfo,
    clock_skew: Duration,
    boot: DateTime<Utc>,
    failures: Vec<Failure>,
    journal: Vec<String>,
    power: Vec<&'static str>,
}

#[derive(Debug)]
pub struct MemoryHost {
    inner: Mutex<Inner>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    /// A host with a root account, `/home`, `/root`, `/var/lib/sysconf` and
    /// the usual zoneinfo names.
    pub fn new() -> Self {
        let mut state = MemorySnapshot {
            hostname: "localhost".to_string(),
            passwd: vec![PasswdEntry {
                name: "root".to_string(),
                password: "x".to_string(),
                uid: 0,
                gid: 0,
                gecos: "root".to_string(),
                home: "/root".to_string(),
                shell: "/bin/bash".to_string(),
            }],
            shadow: vec![ShadowEntry {
                hash: "*".to_string(),
                ..ShadowEntry::new("root", None, 19000)
            }],
            ntp_config: "driftfile /var/lib/ntp/drift\n".to_string(),
            ..Default::default()
        };
        for dir in ["/", "/etc", "/home", "/root", "/var", "/var/lib", "/var/lib/sysconf"] {
            state.dirs.insert(PathBuf::from(dir), FileAttrs::owned(0o755, 0, 0));
        }
        state
            .services
            .insert("ntpd".to_string(), ServiceState::default());

        let mut zones: BTreeSet<String> = ["Etc/UTC", "Etc/GMT", "Europe/Stockholm", "Europe/Zagreb"]
            .into_iter()
            .map(str::to_string)
            .collect();
        for h in 1..=14 {
            zones.insert(format!("Etc/GMT-{}", h));
            if h <= 12 {
                zones.insert(format!("Etc/GMT+{}", h));
            }
        }

        Self {
            inner: Mutex::new(Inner {
                state,
                zones,
                platform: PlatformInfo {
                    os_name: "Linux".to_string(),
                    os_release: "6.1.0".to_string(),
                    os_version: "#1 SMP".to_string(),
                    machine: "x86_64".to_string(),
                },
                clock_skew: Duration::zero(),
                boot: Utc::now() - Duration::hours(1),
                failures: Vec::new(),
                journal: Vec::new(),
                power: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not hide the state from other asserts.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn inject(&self, failure: Failure) {
        self.lock().failures.push(failure);
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        self.lock().state.clone()
    }

    /// Successful mutations in call order, e.g. `service_action start ntpd`.
    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }

    pub fn power_requests(&self) -> Vec<&'static str> {
        self.lock().power.clone()
    }

    /// Simulate a change made outside the daemon.
    pub fn set_platform(&self, platform: PlatformInfo) {
        self.lock().platform = platform;
    }

    pub fn add_zone(&self, zone: &str) {
        self.lock().zones.insert(zone.to_string());
    }

    pub fn set_service(&self, unit: &str, state: ServiceState) {
        self.lock().state.services.insert(unit.to_string(), state);
    }

    /// Run `f` on the state unless an injected failure matches `op`/`target`.
    fn mutate<T>(
        &self,
        op: &'static str,
        target: &str,
        f: impl FnOnce(&mut Inner) -> Result<T, OsError>,
    ) -> Result<T, OsError> {
        let mut inner = self.lock();
        Self::check_failure(&mut inner, op, target)?;
        let out = f(&mut inner)?;
        inner.journal.push(format!("{} {}", op, target));
        Ok(out)
    }

    fn check_failure(inner: &mut Inner, op: &str, target: &str) -> Result<(), OsError> {
        let hit = inner.failures.iter_mut().position(|f| {
            f.op == op && f.target.as_deref().map_or(true, |t| target.contains(t))
        });
        if let Some(idx) = hit {
            if inner.failures[idx].skip > 0 {
                inner.failures[idx].skip -= 1;
                return Ok(());
            }
            let failure = inner.failures.remove(idx);
            return Err(OsError::new(failure.kind, target, "injected failure"));
        }
        Ok(())
    }

    fn read<T>(&self, op: &'static str, target: &str, f: impl FnOnce(&Inner) -> T) -> Result<T, OsError> {
        let mut inner = self.lock();
        Self::check_failure(&mut inner, op, target)?;
        Ok(f(&inner))
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn parent_exists(state: &MemorySnapshot, path: &Path) -> Result<(), OsError> {
    match path.parent() {
        Some(parent) if state.dirs.contains_key(parent) => Ok(()),
        _ => Err(OsError::new(
            OsErrorKind::NotFound,
            display(path),
            "parent directory missing",
        )),
    }
}

fn node_exists(state: &MemorySnapshot, path: &Path) -> bool {
    state.files.contains_key(path) || state.dirs.contains_key(path)
}

trait Named {
    fn key(&self) -> &str;
}

impl Named for PasswdEntry {
    fn key(&self) -> &str {
        &self.name
    }
}

impl Named for ShadowEntry {
    fn key(&self) -> &str {
        &self.name
    }
}

fn db_insert<T: Named + Clone>(db: &mut Vec<T>, entry: &T, index: Option<usize>) -> Result<(), OsError> {
    if db.iter().any(|e| e.key() == entry.key()) {
        return Err(OsError::invalid(entry.key(), "entry already exists"));
    }
    let at = index.unwrap_or(db.len()).min(db.len());
    db.insert(at, entry.clone());
    Ok(())
}

fn db_update<T: Named + Clone>(db: &mut [T], entry: &T) -> Result<(), OsError> {
    let slot = db
        .iter_mut()
        .find(|e| e.key() == entry.key())
        .ok_or_else(|| OsError::not_found(entry.key()))?;
    *slot = entry.clone();
    Ok(())
}

fn db_delete<T: Named>(db: &mut Vec<T>, name: &str) -> Result<(), OsError> {
    let idx = db
        .iter()
        .position(|e| e.key() == name)
        .ok_or_else(|| OsError::not_found(name))?;
    db.remove(idx);
    Ok(())
}

impl HostnameOps for MemoryHost {
    fn hostname(&self) -> Result<String, OsError> {
        self.read("hostname", "hostname", |i| i.state.hostname.clone())
    }

    fn set_hostname(&self, name: &str) -> Result<(), OsError> {
        self.mutate("set_hostname", name, |i| {
            i.state.hostname = name.to_string();
            Ok(())
        })
    }
}

impl AccountsDb for MemoryHost {
    fn passwd_entries(&self) -> Result<Vec<PasswdEntry>, OsError> {
        self.read("passwd_entries", "passwd", |i| i.state.passwd.clone())
    }

    fn insert_passwd_entry(&self, entry: &PasswdEntry, index: Option<usize>) -> Result<(), OsError> {
        self.mutate("insert_passwd_entry", &entry.name, |i| {
            db_insert(&mut i.state.passwd, entry, index)
        })
    }

    fn update_passwd_entry(&self, entry: &PasswdEntry) -> Result<(), OsError> {
        self.mutate("update_passwd_entry", &entry.name, |i| {
            db_update(&mut i.state.passwd, entry)
        })
    }

    fn delete_passwd_entry(&self, name: &str) -> Result<(), OsError> {
        self.mutate("delete_passwd_entry", name, |i| db_delete(&mut i.state.passwd, name))
    }
}

impl ShadowDb for MemoryHost {
    fn shadow_entries(&self) -> Result<Vec<ShadowEntry>, OsError> {
        self.read("shadow_entries", "shadow", |i| i.state.shadow.clone())
    }

    fn insert_shadow_entry(&self, entry: &ShadowEntry, index: Option<usize>) -> Result<(), OsError> {
        self.mutate("insert_shadow_entry", &entry.name, |i| {
            db_insert(&mut i.state.shadow, entry, index)
        })
    }

    fn update_shadow_entry(&self, entry: &ShadowEntry) -> Result<(), OsError> {
        self.mutate("update_shadow_entry", &entry.name, |i| {
            db_update(&mut i.state.shadow, entry)
        })
    }

    fn delete_shadow_entry(&self, name: &str) -> Result<(), OsError> {
        self.mutate("delete_shadow_entry", name, |i| db_delete(&mut i.state.shadow, name))
    }
}

impl FileSystem for MemoryHost {
    fn exists(&self, path: &Path) -> bool {
        node_exists(&self.lock().state, path)
    }

    fn read_file(&self, path: &Path) -> Result<Option<String>, OsError> {
        self.read("read_file", &display(path), |i| {
            i.state.files.get(path).map(|(content, _)| content.clone())
        })
    }

    fn write_file(&self, path: &Path, content: &str, attrs: FileAttrs) -> Result<(), OsError> {
        self.mutate("write_file", &display(path), |i| {
            parent_exists(&i.state, path)?;
            if i.state.dirs.contains_key(path) {
                return Err(OsError::invalid(display(path), "is a directory"));
            }
            i.state
                .files
                .insert(path.to_path_buf(), (content.to_string(), attrs));
            Ok(())
        })
    }

    fn remove_file(&self, path: &Path) -> Result<(), OsError> {
        self.mutate("remove_file", &display(path), |i| {
            i.state
                .files
                .remove(path)
                .map(|_| ())
                .ok_or_else(|| OsError::not_found(display(path)))
        })
    }

    fn create_dir(&self, path: &Path, attrs: FileAttrs) -> Result<(), OsError> {
        self.mutate("create_dir", &display(path), |i| {
            parent_exists(&i.state, path)?;
            if node_exists(&i.state, path) {
                return Err(OsError::invalid(display(path), "already exists"));
            }
            i.state.dirs.insert(path.to_path_buf(), attrs);
            Ok(())
        })
    }

    fn remove_dir(&self, path: &Path) -> Result<(), OsError> {
        self.mutate("remove_dir", &display(path), |i| {
            if !i.state.dirs.contains_key(path) {
                return Err(OsError::not_found(display(path)));
            }
            let busy = i.state.files.keys().any(|p| p.starts_with(path))
                || i.state.dirs.keys().any(|p| p != path && p.starts_with(path));
            if busy {
                return Err(OsError::new(OsErrorKind::Busy, display(path), "directory not empty"));
            }
            i.state.dirs.remove(path);
            Ok(())
        })
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), OsError> {
        self.mutate("rename", &display(from), |i| {
            if !node_exists(&i.state, from) {
                return Err(OsError::not_found(display(from)));
            }
            if node_exists(&i.state, to) {
                return Err(OsError::invalid(display(to), "destination exists"));
            }
            parent_exists(&i.state, to)?;
            let moved = |p: &Path| -> Option<PathBuf> {
                p.strip_prefix(from).ok().map(|rest| {
                    if rest.as_os_str().is_empty() {
                        to.to_path_buf()
                    } else {
                        to.join(rest)
                    }
                })
            };
            let files = std::mem::take(&mut i.state.files);
            i.state.files = files
                .into_iter()
                .map(|(p, v)| (moved(&p).unwrap_or(p), v))
                .collect();
            let dirs = std::mem::take(&mut i.state.dirs);
            i.state.dirs = dirs
                .into_iter()
                .map(|(p, v)| (moved(&p).unwrap_or(p), v))
                .collect();
            Ok(())
        })
    }

    fn remove_tree(&self, path: &Path) -> Result<(), OsError> {
        self.mutate("remove_tree", &display(path), |i| {
            if !node_exists(&i.state, path) {
                return Err(OsError::not_found(display(path)));
            }
            i.state.files.retain(|p, _| !p.starts_with(path));
            i.state.dirs.retain(|p, _| !p.starts_with(path));
            Ok(())
        })
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<String>, OsError> {
        let inner = self.lock();
        if !inner.state.dirs.contains_key(path) {
            return Err(OsError::not_found(display(path)));
        }
        let children = inner
            .state
            .files
            .keys()
            .chain(inner.state.dirs.keys())
            .filter(|p| p.parent() == Some(path))
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect::<BTreeSet<_>>();
        Ok(children.into_iter().collect())
    }
}

impl NtpConfigFile for MemoryHost {
    fn read_ntp_config(&self) -> Result<String, OsError> {
        self.read("read_ntp_config", "ntp.conf", |i| i.state.ntp_config.clone())
    }

    fn write_ntp_config(&self, content: &str) -> Result<(), OsError> {
        self.mutate("write_ntp_config", "ntp.conf", |i| {
            i.state.ntp_config = content.to_string();
            Ok(())
        })
    }
}

impl ServiceControl for MemoryHost {
    fn service_action(&self, unit: &str, action: ServiceAction) -> Result<(), OsError> {
        let op = match action {
            ServiceAction::Start => "service_start",
            ServiceAction::Stop => "service_stop",
            ServiceAction::Restart => "service_restart",
            ServiceAction::Enable => "service_enable",
            ServiceAction::Disable => "service_disable",
        };
        self.mutate(op, unit, |i| {
            let service = i
                .state
                .services
                .get_mut(unit)
                .ok_or_else(|| OsError::not_found(unit))?;
            match action {
                ServiceAction::Start | ServiceAction::Restart => service.active = true,
                ServiceAction::Stop => service.active = false,
                ServiceAction::Enable => service.enabled = true,
                ServiceAction::Disable => service.enabled = false,
            }
            Ok(())
        })
    }

    fn is_active(&self, unit: &str) -> Result<bool, OsError> {
        self.read("is_active", unit, |i| {
            i.state.services.get(unit).map_or(false, |s| s.active)
        })
    }

    fn is_enabled(&self, unit: &str) -> Result<bool, OsError> {
        self.read("is_enabled", unit, |i| {
            i.state.services.get(unit).map_or(false, |s| s.enabled)
        })
    }
}

impl ClockOps for MemoryHost {
    fn current_datetime(&self) -> Result<DateTime<FixedOffset>, OsError> {
        self.read("current_datetime", "clock", |i| {
            (Utc::now() + i.clock_skew).fixed_offset()
        })
    }

    fn set_current_datetime(&self, at: DateTime<Utc>) -> Result<(), OsError> {
        self.mutate("set_current_datetime", "clock", |i| {
            i.clock_skew = at - Utc::now();
            Ok(())
        })
    }

    fn boot_datetime(&self) -> Result<DateTime<FixedOffset>, OsError> {
        self.read("boot_datetime", "clock", |i| i.boot.fixed_offset())
    }

    fn timezone(&self) -> Result<Option<String>, OsError> {
        self.read("timezone", "localtime", |i| i.state.timezone.clone())
    }

    fn set_timezone(&self, zone: Option<&str>) -> Result<(), OsError> {
        self.mutate("set_timezone", zone.unwrap_or("none"), |i| {
            if let Some(zone) = zone {
                if !i.zones.contains(zone) {
                    return Err(OsError::invalid(zone, "unknown timezone"));
                }
            }
            i.state.timezone = zone.map(str::to_string);
            Ok(())
        })
    }
}

impl PlatformOps for MemoryHost {
    fn platform_info(&self) -> Result<PlatformInfo, OsError> {
        self.read("platform_info", "uname", |i| i.platform.clone())
    }
}

impl PowerOps for MemoryHost {
    fn restart(&self) -> Result<(), OsError> {
        self.mutate("restart", "system", |i| {
            i.power.push("restart");
            Ok(())
        })
    }

    fn shutdown(&self) -> Result<(), OsError> {
        self.mutate("shutdown", "system", |i| {
            i.power.push("shutdown");
            Ok(())
        })
    }
}
