//! RPC request handlers.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{error, info, warn};

use sysconf_common::{ClockOps, PowerOps};
use sysconf_shared::rpc::{
    ApplyTransactionParams, DocumentFormat, QueryParams, ReplaceConfigParams, RpcMethod,
    RpcRequest, RpcResponse, SetDatetimeParams, TransactionResult,
};
use sysconf_shared::xml::render_config;
use sysconf_shared::SysconfError;

use crate::dispatcher::Dispatcher;
use crate::oper;
use crate::state::{RunningView, SharedState};

/// Handle an RPC request
pub async fn handle_request(state: SharedState, request: RpcRequest) -> RpcResponse {
    let id = request.id.clone();

    match request.method {
        RpcMethod::ApplyTransaction => handle_apply(state, id, request.params).await,
        RpcMethod::ReplaceConfig => handle_replace(state, id, request.params).await,
        RpcMethod::GetRunning => handle_get_running(state, id, request.params).await,
        RpcMethod::GetState => handle_get_state(state, id, request.params).await,
        RpcMethod::SetCurrentDatetime => handle_set_datetime(state, id, request.params).await,
        RpcMethod::SystemRestart => handle_power(state, id, Power::Restart).await,
        RpcMethod::SystemShutdown => handle_power(state, id, Power::Shutdown).await,
        RpcMethod::Status => handle_status(state, id).await,
    }
}

fn parse_params<T: DeserializeOwned>(id: &str, params: Option<serde_json::Value>) -> Result<T, RpcResponse> {
    let Some(params) = params else {
        return Err(RpcResponse::error(
            id.to_string(),
            -32602,
            "Missing params".to_string(),
        ));
    };
    serde_json::from_value(params).map_err(|e| {
        RpcResponse::error(id.to_string(), -32602, format!("Invalid params: {}", e))
    })
}

fn to_response<T: serde::Serialize>(id: String, result: Result<T, SysconfError>) -> RpcResponse {
    match result.and_then(|value| Ok(serde_json::to_value(value)?)) {
        Ok(value) => RpcResponse::success(id, value),
        Err(e) => RpcResponse::from_error(id, &e),
    }
}

/// Run `f` on the dispatcher off the async runtime, then publish the new
/// running view.
async fn with_dispatcher<F>(state: &SharedState, f: F) -> Result<TransactionResult, SysconfError>
where
    F: FnOnce(&mut Dispatcher) -> Result<TransactionResult, SysconfError> + Send + 'static,
{
    let mut guard = state.dispatcher.clone().lock_owned().await;
    let joined = tokio::task::spawn_blocking(move || {
        let result = f(&mut guard);
        (result, RunningView::of(&guard))
    })
    .await;
    match joined {
        Ok((result, view)) => {
            *state.view.write().await = view;
            result
        }
        Err(e) => {
            error!("Transaction task failed: {}", e);
            Err(SysconfError::Internal(format!("transaction task failed: {}", e)))
        }
    }
}

async fn handle_apply(state: SharedState, id: String, params: Option<serde_json::Value>) -> RpcResponse {
    let params: ApplyTransactionParams = match parse_params(&id, params) {
        Ok(p) => p,
        Err(response) => return response,
    };
    let result = with_dispatcher(&state, move |d| d.apply_transaction(&params.transaction)).await;
    to_response(id, result)
}

async fn handle_replace(state: SharedState, id: String, params: Option<serde_json::Value>) -> RpcResponse {
    let params: ReplaceConfigParams = match parse_params(&id, params) {
        Ok(p) => p,
        Err(response) => return response,
    };
    let result = with_dispatcher(&state, move |d| d.replace_config(params.config)).await;
    to_response(id, result)
}

async fn handle_get_running(
    state: SharedState,
    id: String,
    params: Option<serde_json::Value>,
) -> RpcResponse {
    let query: QueryParams = match params {
        Some(_) => match parse_params(&id, params) {
            Ok(q) => q,
            Err(response) => return response,
        },
        None => QueryParams::default(),
    };
    let view = state.view.read().await;
    let result = match query.format {
        DocumentFormat::Json => serde_json::to_value(&view.config).map_err(SysconfError::from),
        DocumentFormat::Xml => {
            render_config(&view.config, query.path.as_deref()).map(serde_json::Value::String)
        }
    };
    to_response(id, result)
}

async fn handle_get_state(state: SharedState, id: String, params: Option<serde_json::Value>) -> RpcResponse {
    let query: QueryParams = match params {
        Some(_) => match parse_params(&id, params) {
            Ok(q) => q,
            Err(response) => return response,
        },
        None => QueryParams::default(),
    };
    let host = state.host.clone();
    let joined = tokio::task::spawn_blocking(move || {
        oper::state_document(host.as_ref(), query.path.as_deref(), query.format)
    })
    .await;
    match joined {
        Ok(result) => to_response(id, result),
        Err(e) => RpcResponse::error(id, -32603, format!("State query failed: {}", e)),
    }
}

/// Sets the wall clock only; the timezone belongs to the clock subtree.
async fn handle_set_datetime(
    state: SharedState,
    id: String,
    params: Option<serde_json::Value>,
) -> RpcResponse {
    let params: SetDatetimeParams = match parse_params(&id, params) {
        Ok(p) => p,
        Err(response) => return response,
    };
    let at = match DateTime::parse_from_rfc3339(params.current_datetime.trim()) {
        Ok(at) => at.with_timezone(&Utc),
        Err(e) => {
            warn!("Rejected datetime '{}': {}", params.current_datetime, e);
            return RpcResponse::error(
                id,
                -32602,
                format!(
                    "Invalid current-datetime '{}': {}",
                    params.current_datetime, e
                ),
            );
        }
    };

    let host = state.host.clone();
    match tokio::task::spawn_blocking(move || host.set_current_datetime(at)).await {
        Ok(Ok(())) => {
            info!("Wall clock set to {}", at.to_rfc3339());
            RpcResponse::success(id, json!({}))
        }
        Ok(Err(e)) => {
            error!("Failed to set wall clock: {}", e);
            RpcResponse::error(id, -32010, format!("Failed to set clock: {}", e))
        }
        Err(e) => RpcResponse::error(id, -32603, format!("Clock task failed: {}", e)),
    }
}

#[derive(Debug, Clone, Copy)]
enum Power {
    Restart,
    Shutdown,
}

/// Waits for any in-flight transaction before asking for the power change.
async fn handle_power(state: SharedState, id: String, power: Power) -> RpcResponse {
    let _guard = state.dispatcher.lock().await;
    info!("Requesting system {:?}", power);
    let host = state.host.clone();
    let joined = tokio::task::spawn_blocking(move || match power {
        Power::Restart => host.restart(),
        Power::Shutdown => host.shutdown(),
    })
    .await;
    match joined {
        Ok(Ok(())) => RpcResponse::success(id, json!({})),
        Ok(Err(e)) => {
            error!("System {:?} request failed: {}", power, e);
            RpcResponse::error(id, -32010, format!("Power request failed: {}", e))
        }
        Err(e) => RpcResponse::error(id, -32603, format!("Power task failed: {}", e)),
    }
}

async fn handle_status(state: SharedState, id: String) -> RpcResponse {
    let status = state.to_status().await;
    to_response(id, Ok(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::ReconcileSettings;
    use crate::state::DaemonState;
    use std::sync::Arc;
    use sysconf_common::{Failure, Host, MemoryHost};
    use sysconf_shared::{OsErrorKind, SystemConfig};

    fn state() -> (Arc<MemoryHost>, SharedState) {
        let host = Arc::new(MemoryHost::new());
        let dyn_host: Arc<dyn Host> = host.clone();
        let dispatcher = Dispatcher::new(
            dyn_host.clone(),
            &ReconcileSettings::default(),
            SystemConfig::default(),
        );
        (host, DaemonState::new(dyn_host, dispatcher).shared())
    }

    #[tokio::test]
    async fn test_set_datetime_acknowledges() {
        let (host, state) = state();
        let request = RpcRequest::new(
            RpcMethod::SetCurrentDatetime,
            Some(json!({ "current_datetime": "2031-03-04T05:06:07+01:00" })),
        );
        let response = handle_request(state, request).await;
        assert!(response.error.is_none());
        assert_eq!(response.result, Some(json!({})));

        let now = host.current_datetime().unwrap();
        let expected = DateTime::parse_from_rfc3339("2031-03-04T05:06:07+01:00").unwrap();
        assert!((now.timestamp() - expected.timestamp()).abs() < 60);
    }

    #[tokio::test]
    async fn test_set_datetime_rejects_garbage() {
        let (_host, state) = state();
        let request = RpcRequest::new(
            RpcMethod::SetCurrentDatetime,
            Some(json!({ "current_datetime": "yesterday" })),
        );
        let response = handle_request(state, request).await;
        assert_eq!(response.error.map(|e| e.code), Some(-32602));
    }

    #[tokio::test]
    async fn test_missing_params() {
        let (_host, state) = state();
        let response = handle_request(state, RpcRequest::new(RpcMethod::ApplyTransaction, None)).await;
        assert_eq!(response.error.map(|e| e.code), Some(-32602));
    }

    #[tokio::test]
    async fn test_power_requests_reach_host() {
        let (host, state) = state();
        let response =
            handle_request(state.clone(), RpcRequest::new(RpcMethod::SystemRestart, None)).await;
        assert_eq!(response.result, Some(json!({})));
        handle_request(state, RpcRequest::new(RpcMethod::SystemShutdown, None)).await;
        assert_eq!(host.power_requests(), ["restart", "shutdown"]);
    }

    #[tokio::test]
    async fn test_host_failures_map_to_os_error_code() {
        let (host, state) = state();
        host.inject(Failure::on("restart").kind(OsErrorKind::Timeout));
        let response =
            handle_request(state.clone(), RpcRequest::new(RpcMethod::SystemRestart, None)).await;
        assert_eq!(response.error.map(|e| e.code), Some(-32010));
        assert!(host.power_requests().is_empty());

        host.inject(Failure::on("set_current_datetime").kind(OsErrorKind::PermissionDenied));
        let request = RpcRequest::new(
            RpcMethod::SetCurrentDatetime,
            Some(json!({ "current_datetime": "2031-03-04T05:06:07Z" })),
        );
        let response = handle_request(state, request).await;
        assert_eq!(response.error.map(|e| e.code), Some(-32010));
    }

    #[tokio::test]
    async fn test_status_counts_transactions() {
        let (_host, state) = state();
        let request = RpcRequest::new(
            RpcMethod::ReplaceConfig,
            Some(json!({ "config": { "hostname": "node-7" } })),
        );
        let response = handle_request(state.clone(), request).await;
        assert!(response.error.is_none(), "{:?}", response.error);

        let status = handle_request(state, RpcRequest::new(RpcMethod::Status, None)).await;
        let result = status.result.unwrap();
        assert_eq!(result["committed"], 1);
        assert_eq!(result["failed"], 0);
    }
}
