//! Operational state documents. Always produced from live reads.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Root of every state query path.
pub const STATE_ROOT: &str = "/ietf-system:system-state";

/// Platform identification as reported by the running kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PlatformInfo {
    pub os_name: String,
    pub os_release: String,
    pub os_version: String,
    pub machine: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClockState {
    pub current_datetime: DateTime<FixedOffset>,
    pub boot_datetime: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SystemState {
    pub platform: PlatformInfo,
    pub clock: ClockState,
    pub hostname: String,
}
