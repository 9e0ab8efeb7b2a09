//! Daemon state management.

use std::sync::Arc;
use std::time::Instant;

use sysconf_common::Host;
use sysconf_shared::rpc::StatusResult;
use sysconf_shared::{SystemConfig, VERSION};
use tokio::sync::RwLock;

use crate::dispatcher::{Dispatcher, SharedDispatcher, TransactionStats};

/// Committed configuration and counters, published after every transaction
/// so queries never wait on an in-flight apply.
#[derive(Debug, Clone, Default)]
pub struct RunningView {
    pub config: SystemConfig,
    pub stats: TransactionStats,
}

impl RunningView {
    pub fn of(dispatcher: &Dispatcher) -> Self {
        Self {
            config: dispatcher.running().clone(),
            stats: dispatcher.stats().clone(),
        }
    }
}

/// Shared daemon state
pub struct DaemonState {
    pub started_at: Instant,
    pub host: Arc<dyn Host>,
    pub dispatcher: SharedDispatcher,
    pub view: RwLock<RunningView>,
}

pub type SharedState = Arc<DaemonState>;

impl DaemonState {
    pub fn new(host: Arc<dyn Host>, dispatcher: Dispatcher) -> Self {
        let view = RunningView::of(&dispatcher);
        Self {
            started_at: Instant::now(),
            host,
            dispatcher: dispatcher.into_shared(),
            view: RwLock::new(view),
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(self)
    }

    pub async fn to_status(&self) -> StatusResult {
        let view = self.view.read().await;
        StatusResult {
            version: VERSION.to_string(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            committed: view.stats.committed,
            failed: view.stats.failed,
            last_failure: view.stats.last_failure.clone(),
        }
    }
}
