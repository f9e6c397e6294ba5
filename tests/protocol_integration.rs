//! Integration tests for the protocol server over TCP.
//!
//! These tests run a real listener on an ephemeral port and talk to it both
//! with raw JSON lines and with [`RspClient`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

use rsp_server::bus::Notification;
use rsp_server::client::RspClient;
use rsp_server::model::{CreateServerParams, DiscoveryPath, ServerState};
use rsp_server::protocol::RspServer;
use rsp_server::session::Session;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn start_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<std::io::Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = RspServer::new(Arc::new(Session::with_defaults()));
    let serving = tokio::spawn(async move { server.serve(listener).await });
    (addr, serving)
}

fn wildfly_home() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("bin")).unwrap();
    std::fs::write(dir.path().join("jboss-modules.jar"), b"").unwrap();
    std::fs::write(dir.path().join("bin/standalone.sh"), b"#!/bin/sh\n").unwrap();
    std::fs::write(dir.path().join("version.txt"), "WildFly Full 18.0.1.Final\n").unwrap();
    dir
}

/// A raw line-level connection.
struct RawClient {
    lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl RawClient {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let (reader, writer) = TcpStream::connect(addr).await.unwrap().into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn next(&mut self) -> Value {
        let line = tokio::time::timeout(TIMEOUT, self.lines.next_line())
            .await
            .expect("timed out waiting for a line")
            .unwrap()
            .expect("connection closed");
        serde_json::from_str(&line).unwrap()
    }
}

// =============================================================================
// Wire format
// =============================================================================

#[tokio::test]
async fn test_malformed_lines_get_jsonrpc_errors() {
    let (addr, _serving) = start_server().await;
    let mut raw = RawClient::connect(addr).await;

    raw.send("this is not json").await;
    let reply = raw.next().await;
    assert_eq!(reply["error"]["code"], -32700);
    assert!(reply["id"].is_null());

    raw.send(r#"{"jsonrpc":"2.0","id":9,"method":"server/nope"}"#)
        .await;
    let reply = raw.next().await;
    assert_eq!(reply["id"], 9);
    assert_eq!(reply["error"]["code"], -32601);

    // The connection survives errors
    raw.send(r#"{"jsonrpc":"2.0","id":"p","method":"ping"}"#).await;
    let reply = raw.next().await;
    assert_eq!(reply["id"], "p");
    assert_eq!(reply["result"], json!({}));
}

#[tokio::test]
async fn test_client_notifications_get_no_reply() {
    let (addr, _serving) = start_server().await;
    let mut raw = RawClient::connect(addr).await;

    raw.send(r#"{"jsonrpc":"2.0","method":"client/ready"}"#).await;
    raw.send(r#"{"jsonrpc":"2.0","id":1,"method":"server/getServerHandles"}"#)
        .await;

    let reply = raw.next().await;
    assert_eq!(reply["id"], 1);
    assert_eq!(reply["result"], json!([]));
}

#[tokio::test]
async fn test_invalid_params_fail_softly() {
    let (addr, _serving) = start_server().await;
    let mut raw = RawClient::connect(addr).await;

    raw.send(r#"{"jsonrpc":"2.0","id":1,"method":"server/addDiscoveryPath","params":{"nope":1}}"#)
        .await;
    let reply = raw.next().await;
    assert!(reply.get("error").is_none());
    assert!(reply["result"]["severity"].as_u64().unwrap() > 0);

    raw.send(r#"{"jsonrpc":"2.0","id":2,"method":"server/getServerState","params":{"id":"ghost"}}"#)
        .await;
    let reply = raw.next().await;
    assert!(reply["result"].is_null());
}

// =============================================================================
// Notification fan-out
// =============================================================================

#[tokio::test]
async fn test_every_client_sees_every_event() {
    let (addr, _serving) = start_server().await;
    let first = RspClient::connect(addr).await.unwrap();
    let second = RspClient::connect(addr).await.unwrap();
    // Both connections are registered once they have answered a request
    first.ping().await.unwrap();
    second.ping().await.unwrap();

    let mut seen_by_second = second.subscribe();
    let dir = tempfile::tempdir().unwrap();
    let path = DiscoveryPath::new(dir.path().to_string_lossy());
    assert!(first.add_discovery_path(&path).await.unwrap().is_ok());

    let event = seen_by_second
        .wait_for(
            |event| match event {
                Notification::DiscoveryPathAdded(added) => Some(added.clone()),
                _ => None,
            },
            TIMEOUT,
        )
        .await
        .unwrap();
    assert_eq!(event, path);
    assert_eq!(second.discovery_paths().await.unwrap(), vec![path.clone()]);

    // Removing twice: the second removal is reported, not raised
    assert!(second.remove_discovery_path(&path).await.unwrap().is_ok());
    assert!(!second.remove_discovery_path(&path).await.unwrap().is_ok());
}

#[tokio::test]
async fn test_create_and_delete_server_round_trip() {
    let (addr, _serving) = start_server().await;
    let client = RspClient::connect(addr).await.unwrap();
    let home = wildfly_home();

    let beans = client
        .find_server_beans(&DiscoveryPath::new(home.path().to_string_lossy()))
        .await
        .unwrap();
    assert_eq!(beans.len(), 1);
    assert_eq!(beans[0].server_adapter_type_id, "wildfly");

    let handle = client
        .create_server_and_wait(
            &CreateServerParams::new(home.path().to_string_lossy(), "wf"),
            TIMEOUT,
        )
        .await
        .unwrap();
    assert_eq!(client.server_handles().await.unwrap(), vec![handle.clone()]);

    let state = client.server_state(&handle).await.unwrap().unwrap();
    assert_eq!(state.state, ServerState::Stopped);

    let duplicate = client
        .create_server(&CreateServerParams::new(home.path().to_string_lossy(), "wf"))
        .await
        .unwrap();
    assert_eq!(duplicate.status.message, "Server with id wf already exists");

    client.delete_server_and_wait(&handle, TIMEOUT).await.unwrap();
    assert!(client.server_handles().await.unwrap().is_empty());
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_shutdown_request_stops_the_server() {
    let (addr, serving) = start_server().await;
    let client = RspClient::connect(addr).await.unwrap();

    assert!(client.shutdown().await.unwrap().is_ok());
    tokio::time::timeout(TIMEOUT, serving)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();

    assert!(TcpStream::connect(addr).await.is_err());
}
