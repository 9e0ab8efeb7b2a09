//! Shared types and utilities for sysconf components.
//!
//! The daemon and any datastore-side client agree on these types: the typed
//! configuration model, change nodes, the JSON-RPC envelope and the error
//! taxonomy.

pub mod change;
pub mod error;
pub mod model;
pub mod parsers;
pub mod rpc;
pub mod state;
pub mod xml;

pub use change::{ChangeNode, ChangeOperation, ConfigPath, Domain, Transaction};
pub use error::{OsError, OsErrorKind, SysconfError};
pub use model::{
    AssociationType, AuthorizedKey, ClockConfig, LocalUser, NtpConfig, NtpServer, SystemConfig,
};
pub use state::{ClockState, PlatformInfo, SystemState};

/// Version of the sysconf suite.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// YANG namespace used for configuration and state documents.
pub const SYSTEM_NAMESPACE: &str = "urn:ietf:params:xml:ns:yang:ietf-system";

/// Root of every configuration path handled by the daemon.
pub const SYSTEM_ROOT: &str = "/ietf-system:system";
