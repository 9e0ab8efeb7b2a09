//! Error types for sysconf.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

use crate::change::Domain;

/// Why an OS adapter call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsErrorKind {
    Busy,
    PermissionDenied,
    NotFound,
    InvalidValue,
    Timeout,
    Io,
}

impl OsErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OsErrorKind::Busy => "resource-busy",
            OsErrorKind::PermissionDenied => "permission-denied",
            OsErrorKind::NotFound => "not-found",
            OsErrorKind::InvalidValue => "invalid-value",
            OsErrorKind::Timeout => "timeout",
            OsErrorKind::Io => "io",
        }
    }
}

impl fmt::Display for OsErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single OS adapter operation. The target resource is left
/// untouched when this is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{kind} on {resource}: {message}")]
pub struct OsError {
    pub kind: OsErrorKind,
    pub resource: String,
    pub message: String,
}

impl OsError {
    pub fn new(kind: OsErrorKind, resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new(OsErrorKind::NotFound, resource, "no such entry")
    }

    pub fn invalid(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(OsErrorKind::InvalidValue, resource, message)
    }

    /// Map an io::Error onto the adapter taxonomy.
    pub fn from_io(resource: impl Into<String>, err: &io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::NotFound => OsErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => OsErrorKind::PermissionDenied,
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => OsErrorKind::InvalidValue,
            io::ErrorKind::TimedOut => OsErrorKind::Timeout,
            io::ErrorKind::WouldBlock => OsErrorKind::Busy,
            _ => match err.raw_os_error() {
                // EBUSY, ETXTBSY
                Some(16) | Some(26) => OsErrorKind::Busy,
                Some(1) => OsErrorKind::PermissionDenied,
                _ => OsErrorKind::Io,
            },
        };
        Self::new(kind, resource, err.to_string())
    }

    /// Busy and timed-out resources may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, OsErrorKind::Busy | OsErrorKind::Timeout)
    }
}

#[derive(Error, Debug)]
pub enum SysconfError {
    #[error("invalid value at {path}: {reason}")]
    Validation { path: String, reason: String },

    #[error("{domain} step {step} failed: {source}")]
    Resource {
        domain: Domain,
        step: usize,
        #[source]
        source: OsError,
    },

    #[error("integrity violation in {domain}: {detail}")]
    Integrity { domain: Domain, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SysconfError {
    pub fn validation(path: impl Into<String>, reason: impl Into<String>) -> Self {
        SysconfError::Validation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            SysconfError::Validation { .. } => -32602,
            SysconfError::Resource { .. } => -32010,
            SysconfError::Integrity { .. } => -32011,
            SysconfError::Io(_) => -32006,
            SysconfError::Json(_) => -32700,
            SysconfError::Internal(_) => -32603,
        }
    }

    /// Failing subtree, when the error is tied to one.
    pub fn domain(&self) -> Option<Domain> {
        match self {
            SysconfError::Resource { domain, .. } | SysconfError::Integrity { domain, .. } => {
                Some(*domain)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_mapping() {
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(OsError::from_io("/etc/x", &err).kind, OsErrorKind::NotFound);

        let busy = io::Error::from_raw_os_error(16);
        let mapped = OsError::from_io("/etc/x", &busy);
        assert_eq!(mapped.kind, OsErrorKind::Busy);
        assert!(mapped.is_retryable());
    }

    #[test]
    fn test_codes_are_distinct() {
        let v = SysconfError::validation("/a", "bad");
        let r = SysconfError::Resource {
            domain: Domain::Ntp,
            step: 1,
            source: OsError::not_found("ntpd"),
        };
        assert_ne!(v.code(), r.code());
        assert_eq!(r.domain(), Some(Domain::Ntp));
        assert!(v.domain().is_none());
    }
}
