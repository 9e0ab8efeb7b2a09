//! OS adapter for sysconf.
//!
//! Every OS resource the daemon touches is reached through one of the
//! capability traits in [`adapter`]. [`LinuxHost`] talks to the running
//! system; [`MemoryHost`] keeps everything in memory and can be told to fail
//! specific operations.

pub mod adapter;
pub mod linux;
pub mod memory;

pub use adapter::{
    AccountsDb, ClockOps, FileAttrs, FileSystem, Host, HostnameOps, NtpConfigFile, PlatformOps,
    PowerOps, ServiceAction, ServiceControl, ShadowDb,
};
pub use linux::{HostPaths, LinuxHost};
pub use memory::{Failure, MemoryHost, MemorySnapshot, ServiceState};
