//! NTP server set and service activation.
//!
//! The config file is rewritten before any service action so a fresh start
//! never reads a stale file. Undo runs in the opposite order: service state
//! first, then the file, restarting the daemon if it was running before.

use sysconf_common::{NtpConfigFile, ServiceAction, ServiceControl};
use sysconf_shared::parsers::render_ntp_conf;
use sysconf_shared::{Domain, NtpConfig, SysconfError, SystemConfig};

use super::{plan_error, Plan, PlanContext, Reconciler, Step};

#[derive(Debug, Clone)]
pub struct NtpReconciler {
    unit: String,
}

impl NtpReconciler {
    pub fn new(unit: &str) -> Self {
        Self {
            unit: unit.to_string(),
        }
    }

    fn service(&self, action: ServiceAction) -> Step {
        Step::Service {
            unit: self.unit.clone(),
            action,
        }
    }
}

impl Reconciler for NtpReconciler {
    const DOMAIN: Domain = Domain::Ntp;
    type Subtree = NtpConfig;

    fn select(config: &SystemConfig) -> Self::Subtree {
        config.ntp.clone()
    }

    fn plan_changes(
        &self,
        old: &NtpConfig,
        new: &NtpConfig,
        ctx: &PlanContext<'_>,
    ) -> Result<Plan, SysconfError> {
        let err = |e| plan_error(Self::DOMAIN, e);
        let mut plan = Plan::empty(Self::DOMAIN);
        let current = ctx.host.read_ntp_config().map_err(err)?;
        let was_active = ctx.host.is_active(&self.unit).map_err(err)?;
        let was_enabled = ctx.host.is_enabled(&self.unit).map_err(err)?;

        let content = render_ntp_conf(&current, &new.servers);
        if content != current {
            let restart_after = (was_active && new.enabled).then(|| self.unit.clone());
            let restart_undo = was_active.then(|| self.unit.clone());
            plan.push(
                Step::WriteNtpConfig {
                    content,
                    restart: restart_after,
                },
                Step::WriteNtpConfig {
                    content: current,
                    restart: restart_undo,
                },
            );
        }

        if new.enabled != old.enabled {
            if new.enabled {
                if !was_enabled {
                    plan.push(
                        self.service(ServiceAction::Enable),
                        self.service(ServiceAction::Disable),
                    );
                }
                if !was_active {
                    plan.push(
                        self.service(ServiceAction::Start),
                        self.service(ServiceAction::Stop),
                    );
                }
            } else {
                if was_active {
                    plan.push(
                        self.service(ServiceAction::Stop),
                        self.service(ServiceAction::Start),
                    );
                }
                if was_enabled {
                    plan.push(
                        self.service(ServiceAction::Disable),
                        self.service(ServiceAction::Enable),
                    );
                }
            }
        }
        Ok(plan)
    }
}
