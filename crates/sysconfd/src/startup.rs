//! Startup synchronizer.
//!
//! Accounts created by an earlier run are read back into the running view so
//! they are seen as already configured. Nothing on the host is changed.

use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

use sysconf_common::{AccountsDb, FileSystem, Host, ShadowDb};
use sysconf_shared::model::{validate_key, validate_username};
use sysconf_shared::{AuthorizedKey, LocalUser, OsError, SystemConfig};

use crate::reconcile::auth::SSH_DIR;
use crate::reconcile::ReconcileSettings;

/// Running view reflecting the daemon-managed accounts found on the host.
pub fn synchronize(host: &dyn Host, settings: &ReconcileSettings) -> Result<SystemConfig, OsError> {
    let shadow = host.shadow_entries()?;
    let mut config = SystemConfig::default();

    for entry in host.passwd_entries()? {
        let managed = (settings.uid_min..=settings.uid_max).contains(&entry.uid)
            && Path::new(&entry.home) == settings.home_base.join(&entry.name);
        if !managed {
            continue;
        }
        if let Err(e) = validate_username(&entry.name, &entry.name) {
            warn!("Skipping account {}: {}", entry.name, e);
            continue;
        }

        let mut user = LocalUser::new(&entry.name);
        user.password = shadow
            .iter()
            .find(|s| s.name == entry.name)
            .and_then(|s| s.password())
            .map(str::to_string);
        user.authorized_keys = read_keys(host, &Path::new(&entry.home).join(SSH_DIR))?;
        debug!(
            "Found managed account {} with {} keys",
            user.name,
            user.authorized_keys.len()
        );
        config.authentication.insert(user.name.clone(), user);
    }

    info!(
        "Startup sync: {} managed accounts",
        config.authentication.len()
    );
    Ok(config)
}

fn read_keys(host: &dyn Host, dir: &Path) -> Result<BTreeMap<String, AuthorizedKey>, OsError> {
    let mut keys = BTreeMap::new();
    if !host.exists(dir) {
        return Ok(keys);
    }
    for name in host.list_dir(dir)? {
        let path = dir.join(&name);
        let Some(content) = host.read_file(&path)? else {
            continue;
        };
        let mut lines = content.lines();
        let (Some(algorithm), Some(data)) = (lines.next(), lines.next()) else {
            debug!("Ignoring {}: not a key file", path.display());
            continue;
        };
        let key = AuthorizedKey::new(&name, algorithm.trim(), data.trim());
        match validate_key(&name, &key) {
            Ok(()) => {
                keys.insert(name, key);
            }
            Err(e) => debug!("Ignoring {}: {}", path.display(), e),
        }
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sysconf_common::{FileAttrs, MemoryHost};
    use sysconf_shared::parsers::{PasswdEntry, ShadowEntry};

    fn add_account(host: &MemoryHost, name: &str, uid: u32, home: &str) {
        host.insert_passwd_entry(
            &PasswdEntry {
                name: name.to_string(),
                password: "x".to_string(),
                uid,
                gid: uid,
                gecos: String::new(),
                home: home.to_string(),
                shell: "/bin/sh".to_string(),
            },
            None,
        )
        .unwrap();
        host.insert_shadow_entry(&ShadowEntry::new(name, Some("$6$abc$def"), 19000), None)
            .unwrap();
    }

    #[test]
    fn test_seeds_managed_accounts_only() {
        let host = MemoryHost::new();
        add_account(&host, "alice", 1000, "/home/alice");
        add_account(&host, "svc", 1001, "/srv/svc");
        add_account(&host, "daemon", 2, "/home/daemon");

        let attrs = FileAttrs::owned(0o700, 1000, 1000);
        host.create_dir(Path::new("/home/alice"), attrs).unwrap();
        host.create_dir(Path::new("/home/alice/.ssh"), attrs).unwrap();
        host.write_file(
            Path::new("/home/alice/.ssh/laptop"),
            "ssh-ed25519\nAAAAC3NzaC1lZDI1NTE5\n",
            FileAttrs::owned(0o600, 1000, 1000),
        )
        .unwrap();
        host.write_file(
            Path::new("/home/alice/.ssh/known_hosts"),
            "github.com ssh-ed25519 AAAA\n",
            FileAttrs::owned(0o600, 1000, 1000),
        )
        .unwrap();

        host.clear_journal();
        let config = synchronize(&host, &ReconcileSettings::default()).unwrap();
        assert!(host.journal().is_empty());
        let names: Vec<&String> = config.authentication.keys().collect();
        assert_eq!(names, ["alice"]);

        let alice = &config.authentication["alice"];
        assert_eq!(alice.password.as_deref(), Some("$6$abc$def"));
        assert_eq!(alice.authorized_keys.len(), 1);
        assert_eq!(alice.authorized_keys["laptop"].algorithm, "ssh-ed25519");
        assert!(config.validate().is_ok());
    }
}
