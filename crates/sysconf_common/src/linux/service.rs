//! systemctl-backed service control and power management.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use sysconf_shared::{OsError, OsErrorKind};

use super::{classify_systemctl, LinuxHost};
use crate::adapter::{PowerOps, ServiceAction, ServiceControl};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

struct SystemctlOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl LinuxHost {
    fn systemctl(&self, args: &[&str]) -> Result<SystemctlOutput, OsError> {
        let resource = format!("systemctl {}", args.join(" "));
        let mut child = Command::new("systemctl")
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| OsError::from_io(&resource, &e))?;

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(e) => return Err(OsError::from_io(&resource, &e)),
            }
            if started.elapsed() > self.service_timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(OsError::new(
                    OsErrorKind::Timeout,
                    resource,
                    format!("no answer within {}s", self.service_timeout.as_secs()),
                ));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let mut stdout = String::new();
        let mut stderr = String::new();
        if let Some(mut out) = child.stdout.take() {
            let _ = out.read_to_string(&mut stdout);
        }
        if let Some(mut err) = child.stderr.take() {
            let _ = err.read_to_string(&mut stderr);
        }
        Ok(SystemctlOutput {
            success: status.success(),
            stdout: stdout.trim().to_string(),
            stderr: stderr.trim().to_string(),
        })
    }

    fn checked_systemctl(&self, args: &[&str]) -> Result<(), OsError> {
        let output = self.systemctl(args)?;
        if !output.success {
            return Err(OsError::new(
                classify_systemctl(&output.stderr),
                format!("systemctl {}", args.join(" ")),
                output.stderr,
            ));
        }
        Ok(())
    }
}

impl ServiceControl for LinuxHost {
    fn service_action(&self, unit: &str, action: ServiceAction) -> Result<(), OsError> {
        debug!("systemctl {} {}", action, unit);
        self.checked_systemctl(&[action.as_str(), unit])
    }

    fn is_active(&self, unit: &str) -> Result<bool, OsError> {
        Ok(self.systemctl(&["is-active", unit])?.stdout == "active")
    }

    fn is_enabled(&self, unit: &str) -> Result<bool, OsError> {
        Ok(self
            .systemctl(&["is-enabled", unit])?
            .stdout
            .starts_with("enabled"))
    }
}

impl PowerOps for LinuxHost {
    fn restart(&self) -> Result<(), OsError> {
        info!("Requesting system restart");
        self.checked_systemctl(&["reboot"])
    }

    fn shutdown(&self) -> Result<(), OsError> {
        info!("Requesting system shutdown");
        self.checked_systemctl(&["poweroff"])
    }
}
