//! RPC Server - Unix socket server for datastore-daemon communication.
//!
//! One JSON-RPC request per line, one response per line.

use anyhow::{Context, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use sysconf_shared::rpc::{RpcRequest, RpcResponse};

use crate::rpc_handler::handle_request;
use crate::state::SharedState;

/// Bind the socket and serve until `shutdown` resolves. Any in-flight
/// transaction finishes before this returns.
pub async fn serve<F>(state: SharedState, socket_path: &Path, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    if let Some(dir) = socket_path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .context("Failed to create socket directory")?;
    }

    // Remove old socket if it exists
    let _ = tokio::fs::remove_file(socket_path).await;

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind Unix socket {}", socket_path.display()))?;

    // Root only: every method can change the host.
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
            .context("Failed to set socket permissions")?;
    }

    info!("RPC server listening on {}", socket_path.display());

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let state = state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, state).await {
                            error!("Connection handler error: {:#}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            _ = &mut shutdown => break,
        }
    }

    info!("Shutting down, waiting for in-flight transaction");
    let _idle = state.dispatcher.lock().await;
    cleanup(socket_path.to_path_buf()).await;
    Ok(())
}

async fn cleanup(socket_path: PathBuf) {
    if let Err(e) = tokio::fs::remove_file(&socket_path).await {
        warn!("Failed to remove {}: {}", socket_path.display(), e);
    }
}

/// Handle a single client connection
async fn handle_connection(stream: UnixStream, state: SharedState) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .context("Failed to read from socket")?;

        if bytes_read == 0 {
            // Connection closed
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => {
                debug!("Request {} {:?}", request.id, request.method);
                handle_request(state.clone(), request).await
            }
            Err(e) => {
                warn!("Invalid request JSON: {}", e);
                RpcResponse::error(String::new(), -32700, format!("Parse error: {}", e))
            }
        };

        let response_json = serde_json::to_string(&response)? + "\n";
        writer
            .write_all(response_json.as_bytes())
            .await
            .context("Failed to write response")?;
    }

    Ok(())
}
