//! passwd and shadow databases. Each mutation rewrites the whole file
//! atomically, keeping its mode and owner.

use std::path::Path;

use sysconf_shared::parsers::{PasswdEntry, ShadowEntry};
use sysconf_shared::OsError;

use super::files::{atomic_write, read_optional};
use super::LinuxHost;
use crate::adapter::{AccountsDb, ShadowDb};

trait DbEntry: Clone {
    fn name(&self) -> &str;
    fn parse_all(content: &str) -> Result<Vec<Self>, String>;
    fn render_all(entries: &[Self]) -> String;
}

impl DbEntry for PasswdEntry {
    fn name(&self) -> &str {
        &self.name
    }
    fn parse_all(content: &str) -> Result<Vec<Self>, String> {
        PasswdEntry::parse_all(content)
    }
    fn render_all(entries: &[Self]) -> String {
        PasswdEntry::render_all(entries)
    }
}

impl DbEntry for ShadowEntry {
    fn name(&self) -> &str {
        &self.name
    }
    fn parse_all(content: &str) -> Result<Vec<Self>, String> {
        ShadowEntry::parse_all(content)
    }
    fn render_all(entries: &[Self]) -> String {
        ShadowEntry::render_all(entries)
    }
}

fn load<T: DbEntry>(path: &Path) -> Result<Vec<T>, OsError> {
    let content = read_optional(path)?
        .ok_or_else(|| OsError::not_found(path.display().to_string()))?;
    T::parse_all(&content).map_err(|e| OsError::invalid(path.display().to_string(), e))
}

fn store<T: DbEntry>(path: &Path, entries: &[T]) -> Result<(), OsError> {
    atomic_write(path, &T::render_all(entries), None)
}

fn insert<T: DbEntry>(path: &Path, entry: &T, index: Option<usize>) -> Result<(), OsError> {
    let mut entries: Vec<T> = load(path)?;
    if entries.iter().any(|e| e.name() == entry.name()) {
        return Err(OsError::invalid(
            path.display().to_string(),
            format!("entry {} already exists", entry.name()),
        ));
    }
    let at = index.unwrap_or(entries.len()).min(entries.len());
    entries.insert(at, entry.clone());
    store(path, &entries)
}

fn update<T: DbEntry>(path: &Path, entry: &T) -> Result<(), OsError> {
    let mut entries: Vec<T> = load(path)?;
    let slot = entries
        .iter_mut()
        .find(|e| e.name() == entry.name())
        .ok_or_else(|| OsError::not_found(format!("{} entry {}", path.display(), entry.name())))?;
    *slot = entry.clone();
    store(path, &entries)
}

fn delete<T: DbEntry>(path: &Path, name: &str) -> Result<(), OsError> {
    let mut entries: Vec<T> = load(path)?;
    let before = entries.len();
    entries.retain(|e| e.name() != name);
    if entries.len() == before {
        return Err(OsError::not_found(format!("{} entry {}", path.display(), name)));
    }
    store(path, &entries)
}

impl AccountsDb for LinuxHost {
    fn passwd_entries(&self) -> Result<Vec<PasswdEntry>, OsError> {
        load(&self.paths.passwd)
    }

    fn insert_passwd_entry(&self, entry: &PasswdEntry, index: Option<usize>) -> Result<(), OsError> {
        insert(&self.paths.passwd, entry, index)
    }

    fn update_passwd_entry(&self, entry: &PasswdEntry) -> Result<(), OsError> {
        update(&self.paths.passwd, entry)
    }

    fn delete_passwd_entry(&self, name: &str) -> Result<(), OsError> {
        delete::<PasswdEntry>(&self.paths.passwd, name)
    }
}

impl ShadowDb for LinuxHost {
    fn shadow_entries(&self) -> Result<Vec<ShadowEntry>, OsError> {
        load(&self.paths.shadow)
    }

    fn insert_shadow_entry(&self, entry: &ShadowEntry, index: Option<usize>) -> Result<(), OsError> {
        insert(&self.paths.shadow, entry, index)
    }

    fn update_shadow_entry(&self, entry: &ShadowEntry) -> Result<(), OsError> {
        update(&self.paths.shadow, entry)
    }

    fn delete_shadow_entry(&self, name: &str) -> Result<(), OsError> {
        delete::<ShadowEntry>(&self.paths.shadow, name)
    }
}
