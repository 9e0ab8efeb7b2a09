//! Location marker file owned by the daemon.

use std::path::PathBuf;

use sysconf_common::{FileAttrs, FileSystem};
use sysconf_shared::{Domain, SysconfError, SystemConfig};

use super::{plan_error, Plan, PlanContext, Reconciler, Step};

pub const LOCATION_FILE: &str = "location_info";

#[derive(Debug, Clone)]
pub struct LocationReconciler {
    path: PathBuf,
}

impl LocationReconciler {
    pub fn new(state_dir: PathBuf) -> Self {
        Self {
            path: state_dir.join(LOCATION_FILE),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl Reconciler for LocationReconciler {
    const DOMAIN: Domain = Domain::Location;
    type Subtree = Option<String>;

    fn select(config: &SystemConfig) -> Self::Subtree {
        config.location.clone()
    }

    fn plan_changes(
        &self,
        _old: &Option<String>,
        new: &Option<String>,
        ctx: &PlanContext<'_>,
    ) -> Result<Plan, SysconfError> {
        let mut plan = Plan::empty(Self::DOMAIN);
        let current = ctx
            .host
            .read_file(&self.path)
            .map_err(|e| plan_error(Self::DOMAIN, e))?;
        let attrs = FileAttrs::mode(0o644);
        let restore = match &current {
            Some(content) => Step::WriteFile {
                path: self.path.clone(),
                content: content.clone(),
                attrs,
            },
            None => Step::RemoveFile(self.path.clone()),
        };

        match new {
            Some(location) => {
                let content = format!("{}\n", location);
                if current.as_deref() != Some(content.as_str()) {
                    let write = Step::WriteFile {
                        path: self.path.clone(),
                        content,
                        attrs,
                    };
                    plan.push(write, restore);
                }
            }
            None => {
                if current.is_some() {
                    plan.push(Step::RemoveFile(self.path.clone()), restore);
                }
            }
        }
        Ok(plan)
    }
}
