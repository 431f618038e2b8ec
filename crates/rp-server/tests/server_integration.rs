//! End-to-end protocol tests
//!
//! Each test boots the real listener on a unique localhost port and drives
//! it over TCP with a plain buffered-line client.

use std::path::Path;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use rp_core::config::ServerConfig;
use rp_server::{RendezvousServer, ServerState};

/// Base port for test servers - each test gets a unique offset
static PORT_COUNTER: AtomicU16 = AtomicU16::new(0);

/// Get a unique port for this test
fn get_test_port() -> u16 {
    let offset = PORT_COUNTER.fetch_add(1, Ordering::SeqCst);
    47100 + offset
}

struct TestServer {
    address: String,
    state: Arc<ServerState>,
    cancel: CancellationToken,
}

impl TestServer {
    /// Boot a server with the given heartbeat timeout and counter file
    async fn start(heartbeat_timeout: Duration, counter_path: &Path) -> Self {
        let address = format!("127.0.0.1:{}", get_test_port());

        let mut config = ServerConfig::default();
        config.bind_address = address.clone();
        config.heartbeat_timeout = heartbeat_timeout;
        config.counter_path = counter_path.to_path_buf();

        let state = Arc::new(ServerState::new(config));
        let cancel = CancellationToken::new();

        let server = RendezvousServer::new(Arc::clone(&state), cancel.clone());
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        // Wait for the listener to come up
        tokio::time::sleep(Duration::from_millis(50)).await;

        Self {
            address,
            state,
            cancel,
        }
    }

    fn stop(&self) {
        self.cancel.cancel();
    }
}

struct TestClient {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: BufWriter<tokio::net::tcp::OwnedWriteHalf>,
}

impl TestClient {
    async fn connect(address: &str) -> Self {
        // Retry connection a few times in case the server isn't ready
        let mut last_err = None;
        for _ in 0..10 {
            match TcpStream::connect(address).await {
                Ok(stream) => {
                    let (reader, writer) = stream.into_split();
                    return Self {
                        reader: BufReader::new(reader),
                        writer: BufWriter::new(writer),
                    };
                }
                Err(e) => {
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
        panic!("Failed to connect to server at {}: {:?}", address, last_err);
    }

    async fn send_line(&mut self, line: &str) {
        self.writer
            .write_all(line.as_bytes())
            .await
            .expect("Failed to write line");
        self.writer.write_all(b"\n").await.expect("Failed to write newline");
        self.writer.flush().await.expect("Failed to flush");
    }

    /// Read one reply line, without its newline. Empty string means the
    /// server closed the connection.
    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("Timed out reading from server")
            .expect("Failed to read from server");
        line.trim_end_matches(['\r', '\n']).to_string()
    }

    /// Consume the two handshake lines, returning (client id, token)
    async fn handshake(&mut self) -> (u64, String) {
        let id_line = self.read_line().await;
        let id = id_line
            .strip_prefix("CLIENT_ID ")
            .unwrap_or_else(|| panic!("Expected CLIENT_ID line, got {:?}", id_line))
            .parse::<u64>()
            .expect("CLIENT_ID was not an integer");

        let token_line = self.read_line().await;
        let token = token_line
            .strip_prefix("AUTH_TOKEN ")
            .unwrap_or_else(|| panic!("Expected AUTH_TOKEN line, got {:?}", token_line))
            .to_string();

        (id, token)
    }

    /// Handshake and authenticate with the issued token
    async fn connect_authenticated(address: &str) -> (Self, u64) {
        let mut client = Self::connect(address).await;
        let (id, token) = client.handshake().await;
        client.send_line(&format!("AUTH {}", token)).await;
        assert_eq!(client.read_line().await, "AUTH_SUCCESS");
        (client, id)
    }
}

#[tokio::test]
async fn test_first_connection_gets_identity_one() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::start(Duration::from_secs(60), &dir.path().join("counter")).await;

    let mut client = TestClient::connect(&server.address).await;
    let (id, token) = client.handshake().await;

    assert_eq!(id, 1);
    assert_eq!(token, "TOKEN-1");

    server.stop();
}

#[tokio::test]
async fn test_auth_retry_then_success() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::start(Duration::from_secs(60), &dir.path().join("counter")).await;

    let mut client = TestClient::connect(&server.address).await;
    let (_, token) = client.handshake().await;

    client.send_line("AUTH wrong-token").await;
    assert_eq!(client.read_line().await, "AUTH_FAIL");

    client.send_line("AUTH still-wrong").await;
    assert_eq!(client.read_line().await, "AUTH_FAIL");

    // A wrong token never terminates the session
    client.send_line(&format!("AUTH {}", token)).await;
    assert_eq!(client.read_line().await, "AUTH_SUCCESS");

    client.send_line("PING").await;
    assert_eq!(client.read_line().await, "PONG");

    server.stop();
}

#[tokio::test]
async fn test_cmd_echo_and_exit() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::start(Duration::from_secs(60), &dir.path().join("counter")).await;

    let (mut client, id) = TestClient::connect_authenticated(&server.address).await;

    client.send_line("CMD whoami").await;
    assert_eq!(client.read_line().await, "EXECUTED: whoami");

    client.send_line("EXIT").await;
    assert_eq!(client.read_line().await, "GOODBYE");

    // Server closes the transport after GOODBYE
    assert_eq!(client.read_line().await, "");

    // And the registry no longer contains the session
    for _ in 0..50 {
        if server.state.registry.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(server.state.registry.get(id.into()).is_none());

    server.stop();
}

#[tokio::test]
async fn test_identities_persist_across_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let counter_path = dir.path().join("counter");

    let server = TestServer::start(Duration::from_secs(60), &counter_path).await;
    let (mut client, id) = TestClient::connect_authenticated(&server.address).await;
    assert_eq!(id, 1);
    client.send_line("EXIT").await;
    assert_eq!(client.read_line().await, "GOODBYE");
    server.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Same counter file, fresh process state
    let server = TestServer::start(Duration::from_secs(60), &counter_path).await;

    let mut second = TestClient::connect(&server.address).await;
    let mut third = TestClient::connect(&server.address).await;
    let (second_id, _) = second.handshake().await;
    let (third_id, _) = third.handshake().await;

    let mut ids = vec![second_id, third_id];
    ids.sort_unstable();
    assert_eq!(ids, vec![2, 3]);

    server.stop();
}

#[tokio::test]
async fn test_unknown_command_never_terminates_session() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::start(Duration::from_secs(60), &dir.path().join("counter")).await;

    let mut client = TestClient::connect(&server.address).await;
    let (_, token) = client.handshake().await;

    // Before auth
    client.send_line("FROBNICATE").await;
    assert_eq!(client.read_line().await, "ERROR: UNKNOWN_COMMAND");

    client.send_line(&format!("AUTH {}", token)).await;
    assert_eq!(client.read_line().await, "AUTH_SUCCESS");

    // After auth
    client.send_line("FROBNICATE the widget").await;
    assert_eq!(client.read_line().await, "ERROR: UNKNOWN_COMMAND");

    client.send_line("PING").await;
    assert_eq!(client.read_line().await, "PONG");

    server.stop();
}

#[tokio::test]
async fn test_commands_require_authentication() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::start(Duration::from_secs(60), &dir.path().join("counter")).await;

    let mut client = TestClient::connect(&server.address).await;
    let (_, token) = client.handshake().await;

    client.send_line("PING").await;
    assert_eq!(client.read_line().await, "ERROR: UNKNOWN_COMMAND");

    client.send_line("CMD whoami").await;
    assert_eq!(client.read_line().await, "ERROR: UNKNOWN_COMMAND");

    client.send_line(&format!("AUTH {}", token)).await;
    assert_eq!(client.read_line().await, "AUTH_SUCCESS");

    client.send_line("PING").await;
    assert_eq!(client.read_line().await, "PONG");

    server.stop();
}

#[tokio::test]
async fn test_stale_session_is_evicted_while_live_one_survives() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::start(Duration::from_millis(300), &dir.path().join("counter")).await;

    let (mut silent, silent_id) = TestClient::connect_authenticated(&server.address).await;
    let (mut lively, lively_id) = TestClient::connect_authenticated(&server.address).await;

    // The lively session heartbeats past the silent one's eviction
    for _ in 0..12 {
        lively.send_line("HEARTBEAT").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // The silent session was evicted and its transport closed
    assert!(server.state.registry.get(silent_id.into()).is_none());
    assert_eq!(silent.read_line().await, "");

    // The lively session is unaffected
    assert!(server.state.registry.get(lively_id.into()).is_some());
    lively.send_line("PING").await;
    assert_eq!(lively.read_line().await, "PONG");

    server.stop();
}

#[tokio::test]
async fn test_operator_list_and_status() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::start(Duration::from_secs(60), &dir.path().join("counter")).await;

    let (_agent, agent_id) = TestClient::connect_authenticated(&server.address).await;
    let (mut operator, operator_id) = TestClient::connect_authenticated(&server.address).await;

    operator.send_line("LIST").await;
    let list = operator.read_line().await;
    assert!(list.starts_with("SESSIONS 2 "), "unexpected LIST reply: {}", list);
    assert!(list.contains(&format!("{}:AUTHENTICATED:", agent_id)));
    assert!(list.contains(&format!("{}:AUTHENTICATED:", operator_id)));

    operator.send_line(&format!("STATUS {}", agent_id)).await;
    let status = operator.read_line().await;
    assert!(
        status.starts_with(&format!("SESSION {} AUTHENTICATED ", agent_id)),
        "unexpected STATUS reply: {}",
        status
    );

    operator.send_line("STATUS 999").await;
    assert_eq!(operator.read_line().await, "ERROR: UNKNOWN_SESSION");

    server.stop();
}

#[tokio::test]
async fn test_broadcast_reaches_every_authenticated_session() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::start(Duration::from_secs(60), &dir.path().join("counter")).await;

    let (mut agent_a, _) = TestClient::connect_authenticated(&server.address).await;
    let (mut agent_b, _) = TestClient::connect_authenticated(&server.address).await;
    let (mut operator, _) = TestClient::connect_authenticated(&server.address).await;

    operator.send_line("COMMAND all uptime").await;

    // Operator session is itself an authenticated target
    assert_eq!(operator.read_line().await, "DISPATCHED 3 0");
    assert_eq!(operator.read_line().await, "CMD uptime");

    assert_eq!(agent_a.read_line().await, "CMD uptime");
    assert_eq!(agent_b.read_line().await, "CMD uptime");

    server.stop();
}

#[tokio::test]
async fn test_relay_to_single_target() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::start(Duration::from_secs(60), &dir.path().join("counter")).await;

    let (mut agent, agent_id) = TestClient::connect_authenticated(&server.address).await;
    let (mut operator, _) = TestClient::connect_authenticated(&server.address).await;

    operator.send_line(&format!("COMMAND {} whoami", agent_id)).await;
    assert_eq!(operator.read_line().await, "DISPATCHED 1 0");
    assert_eq!(agent.read_line().await, "CMD whoami");

    operator.send_line("COMMAND 999 whoami").await;
    assert_eq!(operator.read_line().await, "ERROR: UNKNOWN_SESSION");

    server.stop();
}

#[tokio::test]
async fn test_multiple_commands_in_one_write() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::start(Duration::from_secs(60), &dir.path().join("counter")).await;

    let mut client = TestClient::connect(&server.address).await;
    let (_, token) = client.handshake().await;

    // One write carrying several messages; the server must split them
    client
        .send_line(&format!("AUTH {}\nPING\nCMD id", token))
        .await;

    assert_eq!(client.read_line().await, "AUTH_SUCCESS");
    assert_eq!(client.read_line().await, "PONG");
    assert_eq!(client.read_line().await, "EXECUTED: id");

    server.stop();
}

#[tokio::test]
async fn test_abrupt_disconnect_unregisters_session() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = TestServer::start(Duration::from_secs(60), &dir.path().join("counter")).await;

    let (client, id) = TestClient::connect_authenticated(&server.address).await;
    assert!(server.state.registry.get(id.into()).is_some());

    drop(client);

    for _ in 0..50 {
        if server.state.registry.get(id.into()).is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(server.state.registry.get(id.into()).is_none());

    server.stop();
}
