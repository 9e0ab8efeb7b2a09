//! Live hostname.

use sysconf_common::HostnameOps;
use sysconf_shared::{Domain, SysconfError, SystemConfig};

use super::{plan_error, Plan, PlanContext, Reconciler, Step};

#[derive(Debug, Clone)]
pub struct HostnameReconciler {
    default: String,
}

impl HostnameReconciler {
    /// `default` is applied when the hostname is removed from configuration.
    pub fn new(default: &str) -> Self {
        Self {
            default: default.to_string(),
        }
    }
}

impl Reconciler for HostnameReconciler {
    const DOMAIN: Domain = Domain::Hostname;
    type Subtree = Option<String>;

    fn select(config: &SystemConfig) -> Self::Subtree {
        config.hostname.clone()
    }

    fn plan_changes(
        &self,
        _old: &Option<String>,
        new: &Option<String>,
        ctx: &PlanContext<'_>,
    ) -> Result<Plan, SysconfError> {
        let mut plan = Plan::empty(Self::DOMAIN);
        let target = new.as_deref().unwrap_or(&self.default);
        let live = ctx
            .host
            .hostname()
            .map_err(|e| plan_error(Self::DOMAIN, e))?;
        if live != target {
            plan.push(Step::SetHostname(target.to_string()), Step::SetHostname(live));
        }
        Ok(plan)
    }
}
