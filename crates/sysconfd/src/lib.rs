//! sysconfd - applies ietf-system configuration to the local host.
//!
//! A transaction of change nodes is turned into per-subtree plans of
//! reversible OS steps, applied in a fixed domain order and rolled back as a
//! whole on the first failure.

pub mod config;
pub mod dispatcher;
pub mod oper;
pub mod reconcile;
pub mod rpc_handler;
pub mod rpc_server;
pub mod snapshot;
pub mod startup;
pub mod state;

pub use config::Config;
pub use dispatcher::{Dispatcher, SharedDispatcher};
pub use state::{DaemonState, SharedState};
