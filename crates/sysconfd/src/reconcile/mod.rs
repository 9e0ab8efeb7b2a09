//! Subtree reconcilers.
//!
//! A reconciler turns the old and new value of its subtree into an ordered
//! list of [`PlannedStep`]s, each a forward OS mutation paired with the
//! mutation that undoes it. Planning reads the host but never writes to it.

pub mod auth;
pub mod clock;
pub mod contact;
pub mod hostname;
pub mod location;
pub mod ntp;

use std::fmt;
use std::path::PathBuf;

use tracing::warn;

use sysconf_common::{
    AccountsDb, ClockOps, FileAttrs, FileSystem, Host, HostnameOps, NtpConfigFile, ServiceAction,
    ServiceControl, ShadowDb,
};
use sysconf_shared::parsers::{PasswdEntry, ShadowEntry};
use sysconf_shared::{Domain, OsError, SysconfError, SystemConfig};

pub use auth::AuthReconciler;
pub use clock::ClockReconciler;
pub use contact::ContactReconciler;
pub use hostname::HostnameReconciler;
pub use location::LocationReconciler;
pub use ntp::NtpReconciler;

/// One OS mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    SetHostname(String),
    InsertPasswd {
        entry: PasswdEntry,
        index: Option<usize>,
    },
    UpdatePasswd(PasswdEntry),
    DeletePasswd(String),
    InsertShadow {
        entry: ShadowEntry,
        index: Option<usize>,
    },
    UpdateShadow(ShadowEntry),
    DeleteShadow(String),
    WriteFile {
        path: PathBuf,
        content: String,
        attrs: FileAttrs,
    },
    RemoveFile(PathBuf),
    CreateDir {
        path: PathBuf,
        attrs: FileAttrs,
    },
    RemoveDir(PathBuf),
    Rename {
        from: PathBuf,
        to: PathBuf,
    },
    RemoveTree(PathBuf),
    /// Rewrite the NTP daemon config, then restart `restart` if set.
    WriteNtpConfig {
        content: String,
        restart: Option<String>,
    },
    Service {
        unit: String,
        action: ServiceAction,
    },
    SetTimezone(Option<String>),
}

impl Step {
    pub fn apply(&self, host: &dyn Host) -> Result<(), OsError> {
        match self {
            Step::SetHostname(name) => host.set_hostname(name),
            Step::InsertPasswd { entry, index } => host.insert_passwd_entry(entry, *index),
            Step::UpdatePasswd(entry) => host.update_passwd_entry(entry),
            Step::DeletePasswd(name) => host.delete_passwd_entry(name),
            Step::InsertShadow { entry, index } => host.insert_shadow_entry(entry, *index),
            Step::UpdateShadow(entry) => host.update_shadow_entry(entry),
            Step::DeleteShadow(name) => host.delete_shadow_entry(name),
            Step::WriteFile {
                path,
                content,
                attrs,
            } => host.write_file(path, content, *attrs),
            Step::RemoveFile(path) => host.remove_file(path),
            Step::CreateDir { path, attrs } => host.create_dir(path, *attrs),
            Step::RemoveDir(path) => host.remove_dir(path),
            Step::Rename { from, to } => host.rename(from, to),
            Step::RemoveTree(path) => host.remove_tree(path),
            Step::WriteNtpConfig { content, restart } => {
                let previous = host.read_ntp_config()?;
                host.write_ntp_config(content)?;
                if let Some(unit) = restart {
                    if let Err(e) = host.service_action(unit, ServiceAction::Restart) {
                        if let Err(restore) = host.write_ntp_config(&previous) {
                            warn!("Failed to restore NTP config after restart failure: {}", restore);
                        }
                        return Err(e);
                    }
                }
                Ok(())
            }
            Step::Service { unit, action } => host.service_action(unit, *action),
            Step::SetTimezone(zone) => host.set_timezone(zone.as_deref()),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::SetHostname(name) => write!(f, "set hostname {}", name),
            Step::InsertPasswd { entry, .. } => write!(f, "add passwd entry {}", entry.name),
            Step::UpdatePasswd(entry) => write!(f, "update passwd entry {}", entry.name),
            Step::DeletePasswd(name) => write!(f, "delete passwd entry {}", name),
            Step::InsertShadow { entry, .. } => write!(f, "add shadow entry {}", entry.name),
            Step::UpdateShadow(entry) => write!(f, "update shadow entry {}", entry.name),
            Step::DeleteShadow(name) => write!(f, "delete shadow entry {}", name),
            Step::WriteFile { path, attrs, .. } => {
                write!(f, "write {} ({:o})", path.display(), attrs.mode)
            }
            Step::RemoveFile(path) => write!(f, "remove {}", path.display()),
            Step::CreateDir { path, attrs } => {
                write!(f, "create dir {} ({:o})", path.display(), attrs.mode)
            }
            Step::RemoveDir(path) => write!(f, "remove dir {}", path.display()),
            Step::Rename { from, to } => write!(f, "move {} to {}", from.display(), to.display()),
            Step::RemoveTree(path) => write!(f, "purge {}", path.display()),
            Step::WriteNtpConfig { restart, .. } => match restart {
                Some(unit) => write!(f, "rewrite ntp config and restart {}", unit),
                None => write!(f, "rewrite ntp config"),
            },
            Step::Service { unit, action } => write!(f, "{} {}", action, unit),
            Step::SetTimezone(Some(zone)) => write!(f, "set timezone {}", zone),
            Step::SetTimezone(None) => write!(f, "clear timezone"),
        }
    }
}

/// A forward mutation and the mutation that undoes it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub forward: Step,
    pub inverse: Step,
}

impl PlannedStep {
    pub fn new(forward: Step, inverse: Step) -> Self {
        Self { forward, inverse }
    }
}

/// Ordered steps of one domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub domain: Domain,
    pub steps: Vec<PlannedStep>,
    /// Run only after the whole transaction commits. Failures are logged.
    pub finalizers: Vec<Step>,
}

impl Plan {
    pub fn empty(domain: Domain) -> Self {
        Self {
            domain,
            steps: Vec::new(),
            finalizers: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.finalizers.is_empty()
    }

    pub fn push(&mut self, forward: Step, inverse: Step) {
        self.steps.push(PlannedStep::new(forward, inverse));
    }
}

/// Host policy for reconcilers.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileSettings {
    pub default_hostname: String,
    pub state_dir: PathBuf,
    pub home_base: PathBuf,
    pub shell: String,
    pub uid_min: u32,
    pub uid_max: u32,
    pub ntp_unit: String,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            default_hostname: "localhost".to_string(),
            state_dir: PathBuf::from("/var/lib/sysconf"),
            home_base: PathBuf::from("/home"),
            shell: "/bin/sh".to_string(),
            uid_min: 1000,
            uid_max: 60000,
            ntp_unit: "ntpd".to_string(),
        }
    }
}

/// What a reconciler can see while planning.
pub struct PlanContext<'a> {
    pub host: &'a dyn Host,
    pub tx_id: &'a str,
}

pub trait Reconciler {
    const DOMAIN: Domain;
    type Subtree: PartialEq;

    fn select(config: &SystemConfig) -> Self::Subtree;

    /// Steps taking the host from `old` to `new`. Only called when they differ.
    fn plan_changes(
        &self,
        old: &Self::Subtree,
        new: &Self::Subtree,
        ctx: &PlanContext<'_>,
    ) -> Result<Plan, SysconfError>;

    fn plan(
        &self,
        old: &SystemConfig,
        new: &SystemConfig,
        ctx: &PlanContext<'_>,
    ) -> Result<Plan, SysconfError> {
        let (old, new) = (Self::select(old), Self::select(new));
        if old == new {
            return Ok(Plan::empty(Self::DOMAIN));
        }
        self.plan_changes(&old, &new, ctx)
    }
}

/// Wrap an OS read failure during planning.
pub(crate) fn plan_error(domain: Domain, source: OsError) -> SysconfError {
    SysconfError::Resource {
        domain,
        step: 0,
        source,
    }
}

/// Every reconciler, configured once.
#[derive(Debug, Clone)]
pub struct Reconcilers {
    pub hostname: HostnameReconciler,
    pub contact: ContactReconciler,
    pub location: LocationReconciler,
    pub clock: ClockReconciler,
    pub ntp: NtpReconciler,
    pub auth: AuthReconciler,
}

impl Reconcilers {
    pub fn new(settings: &ReconcileSettings) -> Self {
        Self {
            hostname: HostnameReconciler::new(&settings.default_hostname),
            contact: ContactReconciler,
            location: LocationReconciler::new(settings.state_dir.clone()),
            clock: ClockReconciler,
            ntp: NtpReconciler::new(&settings.ntp_unit),
            auth: AuthReconciler::new(settings.clone()),
        }
    }

    pub fn plan(
        &self,
        domain: Domain,
        old: &SystemConfig,
        new: &SystemConfig,
        ctx: &PlanContext<'_>,
    ) -> Result<Plan, SysconfError> {
        match domain {
            Domain::Hostname => self.hostname.plan(old, new, ctx),
            Domain::Contact => self.contact.plan(old, new, ctx),
            Domain::Location => self.location.plan(old, new, ctx),
            Domain::Clock => self.clock.plan(old, new, ctx),
            Domain::Ntp => self.ntp.plan(old, new, ctx),
            Domain::Authentication => self.auth.plan(old, new, ctx),
        }
    }
}
