//! Operational data provider. Everything is read from the host on each
//! query; nothing is cached.

use sysconf_common::{ClockOps, Host, HostnameOps, PlatformOps};
use sysconf_shared::rpc::DocumentFormat;
use sysconf_shared::xml::render_state;
use sysconf_shared::{ClockState, OsError, SysconfError, SystemState};

pub fn system_state(host: &dyn Host) -> Result<SystemState, OsError> {
    Ok(SystemState {
        platform: host.platform_info()?,
        clock: ClockState {
            current_datetime: host.current_datetime()?,
            boot_datetime: host.boot_datetime()?,
        },
        hostname: host.hostname()?,
    })
}

/// State document in the requested format, optionally narrowed to `path`.
pub fn state_document(
    host: &dyn Host,
    path: Option<&str>,
    format: DocumentFormat,
) -> Result<serde_json::Value, SysconfError> {
    let state = system_state(host).map_err(|e| SysconfError::Internal(e.to_string()))?;
    match format {
        DocumentFormat::Json => Ok(serde_json::to_value(state)?),
        DocumentFormat::Xml => Ok(serde_json::Value::String(render_state(&state, path)?)),
    }
}
