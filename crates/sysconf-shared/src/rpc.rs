//! JSON-RPC 2.0 types for sysconfd communication.

use serde::{Deserialize, Serialize};

use crate::change::{Domain, Transaction};
use crate::error::SysconfError;
use crate::model::SystemConfig;

/// RPC methods supported by sysconfd
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RpcMethod {
    ApplyTransaction,
    ReplaceConfig,
    GetRunning,
    GetState,
    SetCurrentDatetime,
    SystemRestart,
    SystemShutdown,
    Status,
}

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: RpcMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    pub id: String,
}

impl RpcRequest {
    pub fn new(method: RpcMethod, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method,
            params,
            id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: String,
}

impl RpcResponse {
    pub fn success(id: String, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: String, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }

    /// Error response carrying the failing domain and step, when known.
    pub fn from_error(id: String, err: &SysconfError) -> Self {
        let data = match err {
            SysconfError::Validation { path, .. } => Some(serde_json::json!({ "path": path })),
            SysconfError::Resource {
                domain,
                step,
                source,
            } => Some(serde_json::json!({
                "domain": domain,
                "step": step,
                "reason": source.kind.as_str(),
                "retryable": source.is_retryable(),
            })),
            SysconfError::Integrity { domain, .. } => {
                Some(serde_json::json!({ "domain": domain }))
            }
            _ => None,
        };
        let mut resp = Self::error(id, err.code(), err.to_string());
        if let Some(e) = resp.error.as_mut() {
            e.data = data;
        }
        resp
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Parameters for apply_transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyTransactionParams {
    pub transaction: Transaction,
}

/// Parameters for replace_config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceConfigParams {
    pub config: SystemConfig,
}

/// Document encoding for running and state queries
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    #[default]
    Json,
    Xml,
}

/// Parameters for get_running and get_state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryParams {
    /// Restrict the document to this path; whole tree when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub format: DocumentFormat,
}

/// Parameters for set_current_datetime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetDatetimeParams {
    /// RFC 3339 timestamp, e.g. `2024-05-01T12:30:00+02:00`.
    pub current_datetime: String,
}

/// Transaction lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Received,
    Planned,
    Rejected,
    Applying,
    Committed,
    RolledBack,
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::Planned => write!(f, "planned"),
            Self::Rejected => write!(f, "rejected"),
            Self::Applying => write!(f, "applying"),
            Self::Committed => write!(f, "committed"),
            Self::RolledBack => write!(f, "rolled-back"),
        }
    }
}

/// Result of a committed transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResult {
    pub id: String,
    pub state: TransactionState,
    /// Domains that had a non-empty plan, in apply order.
    pub domains: Vec<Domain>,
    pub steps_applied: usize,
}

/// Summary of the last failed transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureSummary {
    pub id: String,
    pub state: TransactionState,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,
    pub at: chrono::DateTime<chrono::Utc>,
}

/// Result of the status method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResult {
    pub version: String,
    pub uptime_secs: u64,
    pub committed: u64,
    pub failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<FailureSummary>,
}
