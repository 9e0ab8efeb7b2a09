//! Change dispatcher.
//!
//! Runs one transaction at a time through
//! Received -> Planned -> Applying -> Committed, or Rejected when planning
//! fails, or RolledBack when a step fails. Only the dispatcher decides between
//! rollback and forward progress; reconcilers just report errors.

use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use sysconf_common::Host;
use sysconf_shared::change::{apply_changes, touched_domains};
use sysconf_shared::rpc::{FailureSummary, TransactionResult, TransactionState};
use sysconf_shared::{Domain, SysconfError, SystemConfig, Transaction};

use crate::reconcile::{Plan, PlanContext, ReconcileSettings, Reconcilers};
use crate::snapshot::{resources_of, HostSnapshot};

/// One transaction at a time. Held across the whole apply.
pub type SharedDispatcher = Arc<tokio::sync::Mutex<Dispatcher>>;

#[derive(Debug, Clone, Default)]
pub struct TransactionStats {
    pub committed: u64,
    pub failed: u64,
    pub last_failure: Option<FailureSummary>,
}

pub struct Dispatcher {
    host: Arc<dyn Host>,
    reconcilers: Reconcilers,
    running: SystemConfig,
    stats: TransactionStats,
}

impl Dispatcher {
    /// `running` is the configuration the host already reflects, usually the
    /// output of the startup synchronizer.
    pub fn new(host: Arc<dyn Host>, settings: &ReconcileSettings, running: SystemConfig) -> Self {
        Self {
            host,
            reconcilers: Reconcilers::new(settings),
            running,
            stats: TransactionStats::default(),
        }
    }

    pub fn into_shared(self) -> SharedDispatcher {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn running(&self) -> &SystemConfig {
        &self.running
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    pub fn stats(&self) -> &TransactionStats {
        &self.stats
    }

    /// Apply a batch of change nodes on top of the running configuration.
    pub fn apply_transaction(&mut self, tx: &Transaction) -> Result<TransactionResult, SysconfError> {
        info!(
            "Transaction {} {} ({} changes)",
            tx.id,
            TransactionState::Received,
            tx.changes.len()
        );
        let target = match apply_changes(&self.running, &tx.changes) {
            Ok(target) => target,
            Err(e) => {
                warn!("Transaction {} {}: {}", tx.id, TransactionState::Rejected, e);
                self.record_failure(&tx.id, TransactionState::Rejected, &e);
                return Err(e);
            }
        };
        let domains = touched_domains(&tx.changes);
        self.commit_config(&tx.id, target, &domains)
    }

    /// Converge on a complete configuration.
    pub fn replace_config(&mut self, config: SystemConfig) -> Result<TransactionResult, SysconfError> {
        let id = uuid::Uuid::new_v4().to_string();
        info!("Transaction {} {} (full replace)", id, TransactionState::Received);
        if let Err(e) = config.validate() {
            warn!("Transaction {} {}: {}", id, TransactionState::Rejected, e);
            self.record_failure(&id, TransactionState::Rejected, &e);
            return Err(e);
        }
        self.commit_config(&id, config, &Domain::ORDER)
    }

    fn commit_config(
        &mut self,
        id: &str,
        target: SystemConfig,
        domains: &[Domain],
    ) -> Result<TransactionResult, SysconfError> {
        let plans = match self.plan_all(id, &target, domains) {
            Ok(plans) => plans,
            Err(e) => {
                warn!("Transaction {} {}: {}", id, TransactionState::Rejected, e);
                self.record_failure(id, TransactionState::Rejected, &e);
                return Err(e);
            }
        };
        let total: usize = plans.iter().map(|p| p.steps.len()).sum();
        info!(
            "Transaction {} {}: {} steps across {} domains",
            id,
            TransactionState::Planned,
            total,
            plans.len()
        );

        let resources = resources_of(&plans);
        let before = match HostSnapshot::capture(self.host.as_ref(), resources.keys()) {
            Ok(snapshot) => snapshot,
            Err((resource, source)) => {
                let domain = resources.get(&resource).copied().unwrap_or(Domain::Hostname);
                let e = SysconfError::Resource {
                    domain,
                    step: 0,
                    source,
                };
                warn!("Transaction {} {}: {}", id, TransactionState::Rejected, e);
                self.record_failure(id, TransactionState::Rejected, &e);
                return Err(e);
            }
        };

        info!("Transaction {} {}", id, TransactionState::Applying);
        let host = Arc::clone(&self.host);
        for (pi, plan) in plans.iter().enumerate() {
            for (si, step) in plan.steps.iter().enumerate() {
                info!("Transaction {} {} step {}: {}", id, plan.domain, si + 1, step.forward);
                if let Err(source) = step.forward.apply(host.as_ref()) {
                    error!(
                        "Transaction {} {} step {} failed: {}",
                        id,
                        plan.domain,
                        si + 1,
                        source
                    );
                    let failure = SysconfError::Resource {
                        domain: plan.domain,
                        step: si + 1,
                        source,
                    };
                    let e = self.roll_back(id, &plans[..=pi], si, &before, failure);
                    self.record_failure(id, TransactionState::RolledBack, &e);
                    return Err(e);
                }
            }
        }

        self.running = target;
        self.stats.committed += 1;
        info!("Transaction {} {}", id, TransactionState::Committed);

        for plan in &plans {
            for step in &plan.finalizers {
                if let Err(e) = step.apply(host.as_ref()) {
                    warn!("Transaction {} cleanup '{}' failed: {}", id, step, e);
                }
            }
        }

        Ok(TransactionResult {
            id: id.to_string(),
            state: TransactionState::Committed,
            domains: plans.iter().map(|p| p.domain).collect(),
            steps_applied: total,
        })
    }

    /// Plans with at least one step or finalizer, in apply order.
    fn plan_all(
        &self,
        id: &str,
        target: &SystemConfig,
        domains: &[Domain],
    ) -> Result<Vec<Plan>, SysconfError> {
        let ctx = PlanContext {
            host: self.host.as_ref(),
            tx_id: id,
        };
        let mut plans = Vec::new();
        for &domain in domains {
            let plan = self.reconcilers.plan(domain, &self.running, target, &ctx)?;
            if !plan.is_empty() {
                plans.push(plan);
            }
        }
        Ok(plans)
    }

    /// Undo the first `failed_at` steps of the last plan, then every earlier
    /// plan in full, newest first. Returns the error to report.
    fn roll_back(
        &self,
        id: &str,
        plans: &[Plan],
        failed_at: usize,
        before: &HostSnapshot,
        failure: SysconfError,
    ) -> SysconfError {
        let Some(domain) = failure.domain() else {
            return failure;
        };
        let last = plans.len().saturating_sub(1);
        let mut problems = Vec::new();

        for (pi, plan) in plans.iter().enumerate().rev() {
            let done = if pi == last { failed_at } else { plan.steps.len() };
            for (si, step) in plan.steps[..done].iter().enumerate().rev() {
                info!(
                    "Transaction {} undo {} step {}: {}",
                    id,
                    plan.domain,
                    si + 1,
                    step.inverse
                );
                if let Err(e) = step.inverse.apply(self.host.as_ref()) {
                    error!("Transaction {} undo '{}' failed: {}", id, step.inverse, e);
                    problems.push(format!("undo '{}' failed: {}", step.inverse, e));
                }
            }
        }

        let resources = resources_of(plans);
        match HostSnapshot::capture(self.host.as_ref(), resources.keys()) {
            Ok(after) => {
                for resource in before.diff(&after) {
                    problems.push(format!("{} differs from its pre-transaction state", resource));
                }
            }
            Err((resource, e)) => problems.push(format!("cannot re-read {}: {}", resource, e)),
        }

        if problems.is_empty() {
            info!("Transaction {} {}", id, TransactionState::RolledBack);
            return failure;
        }
        error!(
            "Transaction {} rollback left the host inconsistent: {}",
            id,
            problems.join("; ")
        );
        SysconfError::Integrity {
            domain,
            detail: format!("{} ({})", failure, problems.join("; ")),
        }
    }

    fn record_failure(&mut self, id: &str, state: TransactionState, err: &SysconfError) {
        self.stats.failed += 1;
        self.stats.last_failure = Some(FailureSummary {
            id: id.to_string(),
            state,
            message: err.to_string(),
            domain: err.domain(),
            at: Utc::now(),
        });
    }
}
