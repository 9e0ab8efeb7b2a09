//! Local users, their password hashes and SSH authorized keys.
//!
//! Planning works on a copy of the passwd and shadow databases so that the
//! insert positions recorded in inverse steps stay correct when several users
//! change in one transaction. Removals are planned first, then users that are
//! new to the config, then edits.
//!
//! A removed user's home is not deleted in place. It is moved aside to a
//! stash directory and only purged once the transaction has committed, so a
//! rollback can move it back untouched.

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use sysconf_common::{AccountsDb, FileAttrs, FileSystem, ShadowDb};
use sysconf_shared::parsers::shadow::LOCKED_HASH;
use sysconf_shared::parsers::{PasswdEntry, ShadowEntry};
use sysconf_shared::{AuthorizedKey, Domain, LocalUser, OsError, SysconfError, SystemConfig};

use super::{plan_error, Plan, PlanContext, ReconcileSettings, Reconciler, Step};

pub const SSH_DIR: &str = ".ssh";
pub const STASH_PREFIX: &str = ".sysconf-stash-";

const DIR_MODE: u32 = 0o700;
const KEY_MODE: u32 = 0o600;

#[derive(Debug, Clone)]
pub struct AuthReconciler {
    settings: ReconcileSettings,
}

/// Databases as they will look after the steps planned so far.
struct Accounts {
    passwd: Vec<PasswdEntry>,
    shadow: Vec<ShadowEntry>,
    allocated: BTreeSet<u32>,
}

impl Accounts {
    fn passwd(&self, name: &str) -> Option<(usize, &PasswdEntry)> {
        self.passwd.iter().enumerate().find(|(_, e)| e.name == name)
    }

    fn shadow(&self, name: &str) -> Option<(usize, &ShadowEntry)> {
        self.shadow.iter().enumerate().find(|(_, e)| e.name == name)
    }
}

fn days_since_epoch() -> i64 {
    Utc::now().timestamp() / 86_400
}

impl AuthReconciler {
    pub fn new(settings: ReconcileSettings) -> Self {
        Self { settings }
    }

    fn is_managed(&self, uid: u32) -> bool {
        (self.settings.uid_min..=self.settings.uid_max).contains(&uid)
    }

    /// Lowest id in the managed range not used as a uid or gid.
    fn allocate_id(&self, accounts: &mut Accounts, name: &str) -> Result<u32, SysconfError> {
        let used: BTreeSet<u32> = accounts
            .passwd
            .iter()
            .flat_map(|e| [e.uid, e.gid])
            .chain(accounts.allocated.iter().copied())
            .collect();
        let id = (self.settings.uid_min..=self.settings.uid_max)
            .find(|id| !used.contains(id))
            .ok_or_else(|| {
                SysconfError::validation(
                    format!("/ietf-system:system/authentication/user[name='{}']", name),
                    format!(
                        "no free uid in {}..={}",
                        self.settings.uid_min, self.settings.uid_max
                    ),
                )
            })?;
        accounts.allocated.insert(id);
        Ok(id)
    }

    fn plan_removal(
        &self,
        plan: &mut Plan,
        accounts: &mut Accounts,
        user: &LocalUser,
        ctx: &PlanContext<'_>,
    ) -> Result<(), OsError> {
        let Some((_, entry)) = accounts.passwd(&user.name) else {
            tracing::warn!("User {} already absent from passwd", user.name);
            return Ok(());
        };
        let entry = entry.clone();
        let home = PathBuf::from(&entry.home);
        let ssh = home.join(SSH_DIR);
        let key_attrs = FileAttrs::owned(KEY_MODE, entry.uid, entry.gid);

        for key in user.authorized_keys.values() {
            let path = ssh.join(&key.name);
            if let Some(content) = ctx.host.read_file(&path)? {
                plan.push(
                    Step::RemoveFile(path.clone()),
                    Step::WriteFile {
                        path,
                        content,
                        attrs: key_attrs,
                    },
                );
            }
        }

        // Accounts outside the managed range only lose their keys.
        if !self.is_managed(entry.uid) {
            return Ok(());
        }

        if ctx.host.exists(&home) {
            let short: String = ctx.tx_id.chars().take(8).collect();
            let stash = home.with_file_name(format!("{}{}-{}", STASH_PREFIX, user.name, short));
            plan.push(
                Step::Rename {
                    from: home.clone(),
                    to: stash.clone(),
                },
                Step::Rename {
                    from: stash.clone(),
                    to: home,
                },
            );
            plan.finalizers.push(Step::RemoveTree(stash));
        }

        if let Some((index, shadow)) = accounts.shadow(&user.name) {
            let shadow = shadow.clone();
            accounts.shadow.remove(index);
            plan.push(
                Step::DeleteShadow(user.name.clone()),
                Step::InsertShadow {
                    entry: shadow,
                    index: Some(index),
                },
            );
        }

        if let Some((index, _)) = accounts.passwd(&user.name) {
            accounts.passwd.remove(index);
            plan.push(
                Step::DeletePasswd(user.name.clone()),
                Step::InsertPasswd {
                    entry,
                    index: Some(index),
                },
            );
        }
        Ok(())
    }

    fn plan_creation(
        &self,
        plan: &mut Plan,
        accounts: &mut Accounts,
        user: &LocalUser,
        ctx: &PlanContext<'_>,
    ) -> Result<(), SysconfError> {
        let id = self.allocate_id(accounts, &user.name)?;
        let home = self.settings.home_base.join(&user.name);
        let entry = PasswdEntry {
            name: user.name.clone(),
            password: "x".to_string(),
            uid: id,
            gid: id,
            gecos: String::new(),
            home: home.display().to_string(),
            shell: self.settings.shell.clone(),
        };
        accounts.passwd.push(entry.clone());
        plan.push(
            Step::InsertPasswd { entry, index: None },
            Step::DeletePasswd(user.name.clone()),
        );

        let shadow = ShadowEntry::new(&user.name, user.password.as_deref(), days_since_epoch());
        accounts.shadow.push(shadow.clone());
        plan.push(
            Step::InsertShadow {
                entry: shadow,
                index: None,
            },
            Step::DeleteShadow(user.name.clone()),
        );

        let err = |e| plan_error(Self::DOMAIN, e);
        let dir_attrs = FileAttrs::owned(DIR_MODE, id, id);
        let home_exists = ctx.host.exists(&home);
        if !home_exists {
            plan.push(
                Step::CreateDir {
                    path: home.clone(),
                    attrs: dir_attrs,
                },
                Step::RemoveDir(home.clone()),
            );
        }
        if user.authorized_keys.is_empty() {
            return Ok(());
        }

        let ssh = home.join(SSH_DIR);
        if !home_exists || !ctx.host.exists(&ssh) {
            plan.push(
                Step::CreateDir {
                    path: ssh.clone(),
                    attrs: dir_attrs,
                },
                Step::RemoveDir(ssh.clone()),
            );
        }
        let key_attrs = FileAttrs::owned(KEY_MODE, id, id);
        for key in user.authorized_keys.values() {
            let path = ssh.join(&key.name);
            let current = if home_exists {
                ctx.host.read_file(&path).map_err(err)?
            } else {
                None
            };
            push_key_write(plan, path, key, current, key_attrs);
        }
        Ok(())
    }

    /// Password and keys of an account that already exists on the host.
    /// Keys absent from `old_keys` and from the new config are left alone.
    fn plan_update(
        &self,
        plan: &mut Plan,
        accounts: &mut Accounts,
        old_keys: &BTreeMap<String, AuthorizedKey>,
        user: &LocalUser,
        entry: &PasswdEntry,
        ctx: &PlanContext<'_>,
    ) -> Result<(), OsError> {
        match accounts.shadow(&user.name) {
            Some((index, current)) => {
                if current.password() != user.password.as_deref() {
                    let current = current.clone();
                    let mut updated = current.clone();
                    updated.hash = user
                        .password
                        .clone()
                        .unwrap_or_else(|| LOCKED_HASH.to_string());
                    updated.last_change = days_since_epoch().to_string();
                    accounts.shadow[index] = updated.clone();
                    plan.push(Step::UpdateShadow(updated), Step::UpdateShadow(current));
                }
            }
            None => {
                let shadow =
                    ShadowEntry::new(&user.name, user.password.as_deref(), days_since_epoch());
                accounts.shadow.push(shadow.clone());
                plan.push(
                    Step::InsertShadow {
                        entry: shadow,
                        index: None,
                    },
                    Step::DeleteShadow(user.name.clone()),
                );
            }
        }

        let home = PathBuf::from(&entry.home);
        let ssh = home.join(SSH_DIR);
        let dir_attrs = FileAttrs::owned(DIR_MODE, entry.uid, entry.gid);
        let key_attrs = FileAttrs::owned(KEY_MODE, entry.uid, entry.gid);

        for (name, key) in old_keys {
            if user.authorized_keys.contains_key(name) {
                continue;
            }
            let path = ssh.join(&key.name);
            if let Some(content) = ctx.host.read_file(&path)? {
                plan.push(
                    Step::RemoveFile(path.clone()),
                    Step::WriteFile {
                        path,
                        content,
                        attrs: key_attrs,
                    },
                );
            }
        }

        let mut dirs_ready = false;
        for key in user.authorized_keys.values() {
            let path = ssh.join(&key.name);
            let current = ctx.host.read_file(&path)?;
            if current.as_deref() == Some(key.file_content().as_str()) {
                continue;
            }
            if !dirs_ready {
                ensure_dir(plan, ctx, &home, dir_attrs);
                ensure_dir(plan, ctx, &ssh, dir_attrs);
                dirs_ready = true;
            }
            push_key_write(plan, path, key, current, key_attrs);
        }
        Ok(())
    }
}

fn ensure_dir(plan: &mut Plan, ctx: &PlanContext<'_>, path: &Path, attrs: FileAttrs) {
    if !ctx.host.exists(path) {
        plan.push(
            Step::CreateDir {
                path: path.to_path_buf(),
                attrs,
            },
            Step::RemoveDir(path.to_path_buf()),
        );
    }
}

fn push_key_write(
    plan: &mut Plan,
    path: PathBuf,
    key: &AuthorizedKey,
    current: Option<String>,
    attrs: FileAttrs,
) {
    let inverse = match current {
        Some(content) => Step::WriteFile {
            path: path.clone(),
            content,
            attrs,
        },
        None => Step::RemoveFile(path.clone()),
    };
    plan.push(
        Step::WriteFile {
            path,
            content: key.file_content(),
            attrs,
        },
        inverse,
    );
}

impl Reconciler for AuthReconciler {
    const DOMAIN: Domain = Domain::Authentication;
    type Subtree = BTreeMap<String, LocalUser>;

    fn select(config: &SystemConfig) -> Self::Subtree {
        config.authentication.clone()
    }

    fn plan_changes(
        &self,
        old: &Self::Subtree,
        new: &Self::Subtree,
        ctx: &PlanContext<'_>,
    ) -> Result<Plan, SysconfError> {
        let err = |e| plan_error(Self::DOMAIN, e);
        let mut plan = Plan::empty(Self::DOMAIN);
        let mut accounts = Accounts {
            passwd: ctx.host.passwd_entries().map_err(err)?,
            shadow: ctx.host.shadow_entries().map_err(err)?,
            allocated: BTreeSet::new(),
        };

        for (name, user) in old {
            if !new.contains_key(name) {
                self.plan_removal(&mut plan, &mut accounts, user, ctx)
                    .map_err(err)?;
            }
        }

        let empty = BTreeMap::new();
        let added = new.iter().filter(|(name, _)| !old.contains_key(*name));
        let changed = new
            .iter()
            .filter(|(name, user)| old.get(*name).map_or(false, |o| o != *user));
        for (name, user) in added.chain(changed) {
            let old_keys = old.get(name).map_or(&empty, |o| &o.authorized_keys);
            match accounts.passwd(name).map(|(_, e)| e.clone()) {
                Some(entry) => self
                    .plan_update(&mut plan, &mut accounts, old_keys, user, &entry, ctx)
                    .map_err(err)?,
                None => self.plan_creation(&mut plan, &mut accounts, user, ctx)?,
            }
        }
        Ok(plan)
    }
}
