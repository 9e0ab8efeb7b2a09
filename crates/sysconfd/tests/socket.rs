//! JSON-RPC over the Unix socket.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::oneshot;

use sysconf_common::{AccountsDb, Host, MemoryHost};
use sysconf_shared::rpc::{RpcMethod, RpcRequest, RpcResponse};
use sysconf_shared::{ChangeNode, SystemConfig, Transaction};
use sysconfd::reconcile::ReconcileSettings;
use sysconfd::{rpc_server, DaemonState, Dispatcher};

async fn wait_for_socket(path: &Path) {
    for _ in 0..100 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("socket {} never appeared", path.display());
}

struct Client {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl Client {
    async fn connect(path: &Path) -> Self {
        let stream = UnixStream::connect(path).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send_raw(&mut self, line: &str) -> RpcResponse {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        let mut response = String::new();
        self.reader.read_line(&mut response).await.unwrap();
        serde_json::from_str(&response).unwrap()
    }

    async fn call(&mut self, method: RpcMethod, params: Option<serde_json::Value>) -> RpcResponse {
        let request = RpcRequest::new(method, params);
        let response = self.send_raw(&serde_json::to_string(&request).unwrap()).await;
        assert_eq!(response.id, request.id);
        response
    }
}

#[tokio::test]
async fn test_socket_round_trip() {
    let dir = TempDir::new().unwrap();
    let socket = dir.path().join("run").join("sysconfd.sock");

    let host = Arc::new(MemoryHost::new());
    let dyn_host: Arc<dyn Host> = host.clone();
    let dispatcher = Dispatcher::new(
        dyn_host.clone(),
        &ReconcileSettings::default(),
        SystemConfig::default(),
    );
    let state = DaemonState::new(dyn_host, dispatcher).shared();

    let (stop, stopped) = oneshot::channel::<()>();
    let server_socket = socket.clone();
    let server = tokio::spawn(async move {
        rpc_server::serve(state, &server_socket, async move {
            let _ = stopped.await;
        })
        .await
    });
    wait_for_socket(&socket).await;

    let mut client = Client::connect(&socket).await;

    let tx = Transaction::new(vec![ChangeNode::created(
        "/ietf-system:system/contact",
        "test_contact",
    )]);
    let response = client
        .call(
            RpcMethod::ApplyTransaction,
            Some(json!({ "transaction": tx })),
        )
        .await;
    assert!(response.error.is_none(), "{:?}", response.error);
    assert_eq!(response.result.unwrap()["state"], "committed");
    assert_eq!(host.passwd_entry("root").unwrap().gecos, "test_contact");

    let response = client
        .call(
            RpcMethod::GetRunning,
            Some(json!({ "path": "/ietf-system:system/contact", "format": "xml" })),
        )
        .await;
    assert_eq!(
        response.result,
        Some(json!(
            "<system xmlns=\"urn:ietf:params:xml:ns:yang:ietf-system\"><contact>test_contact</contact></system>"
        ))
    );

    let response = client.call(RpcMethod::GetState, None).await;
    let result = response.result.unwrap();
    assert_eq!(result["platform"]["os-name"], "Linux");

    let response = client.send_raw("{not json").await;
    assert_eq!(response.error.map(|e| e.code), Some(-32700));

    // A rejected transaction carries the failing path.
    let bad = Transaction::new(vec![ChangeNode::created(
        "/ietf-system:system/hostname",
        "-bad-",
    )]);
    let response = client
        .call(
            RpcMethod::ApplyTransaction,
            Some(json!({ "transaction": bad })),
        )
        .await;
    let error = response.error.unwrap();
    assert_eq!(error.code, -32602);
    assert_eq!(
        error.data.unwrap()["path"],
        "/ietf-system:system/hostname"
    );

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
    assert!(!socket.exists());
}
