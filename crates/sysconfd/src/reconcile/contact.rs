//! Contact string, stored in the comment field of the uid 0 account.

use sysconf_common::AccountsDb;
use sysconf_shared::{Domain, OsError, SysconfError, SystemConfig};

use super::{plan_error, Plan, PlanContext, Reconciler, Step};

#[derive(Debug, Clone, Copy, Default)]
pub struct ContactReconciler;

impl Reconciler for ContactReconciler {
    const DOMAIN: Domain = Domain::Contact;
    type Subtree = Option<String>;

    fn select(config: &SystemConfig) -> Self::Subtree {
        config.contact.clone()
    }

    fn plan_changes(
        &self,
        _old: &Option<String>,
        new: &Option<String>,
        ctx: &PlanContext<'_>,
    ) -> Result<Plan, SysconfError> {
        let mut plan = Plan::empty(Self::DOMAIN);
        let superuser = ctx
            .host
            .passwd_entries()
            .map_err(|e| plan_error(Self::DOMAIN, e))?
            .into_iter()
            .find(|e| e.uid == 0)
            .ok_or_else(|| plan_error(Self::DOMAIN, OsError::not_found("uid 0 account")))?;

        let gecos = new.clone().unwrap_or_default();
        if superuser.gecos != gecos {
            let mut updated = superuser.clone();
            updated.gecos = gecos;
            plan.push(Step::UpdatePasswd(updated), Step::UpdatePasswd(superuser));
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sysconf_common::MemoryHost;

    #[test]
    fn test_contact_updates_root_gecos() {
        let host = MemoryHost::new();
        let ctx = PlanContext {
            host: &host,
            tx_id: "t",
        };
        let new = SystemConfig {
            contact: Some("test_contact".to_string()),
            ..Default::default()
        };
        let plan = ContactReconciler
            .plan(&SystemConfig::default(), &new, &ctx)
            .unwrap();
        assert_eq!(plan.steps.len(), 1);
        match (&plan.steps[0].forward, &plan.steps[0].inverse) {
            (Step::UpdatePasswd(fwd), Step::UpdatePasswd(inv)) => {
                assert_eq!(fwd.name, "root");
                assert_eq!(fwd.gecos, "test_contact");
                assert_eq!(inv.gecos, "root");
            }
            other => panic!("unexpected steps {:?}", other),
        }
    }
}
