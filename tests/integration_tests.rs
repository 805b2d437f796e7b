//! Integration tests for the LAN sync stack.
//!
//! Each test boots a real server on an ephemeral port and drives it through
//! blocking [`ClientSession`] handles, the same way the game loop does.

use client::reconnect::ReconnectPolicy;
use client::session::{ClientSession, ConnectError, SessionEvent};
use server::config::{ConfigStore, ServerConfig};
use server::network::Server;
use shared::{Message, DEFAULT_SPAWN, HOST_PLAYER_ID};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::watch;

struct TestServer {
    port: u16,
    shutdown: Arc<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    fn start() -> TestServer {
        Self::start_with(ServerConfig::default())
    }

    fn start_with(config: ServerConfig) -> TestServer {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let server = runtime
            .block_on(Server::bind("127.0.0.1:0", ConfigStore::in_memory(config)))
            .unwrap();
        let port = server.local_addr().unwrap().port();
        let shutdown = server.shutdown_handle();
        let handle = std::thread::spawn(move || {
            runtime.block_on(server.run()).unwrap();
        });
        TestServer {
            port,
            shutdown,
            handle: Some(handle),
        }
    }

    fn connect(&self) -> ClientSession {
        ClientSession::connect_with("127.0.0.1", self.port, fast_policy()).unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy::new(Duration::from_millis(50), 3)
}

fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

/// CONNECTION LIFECYCLE

/// A fresh client is welcomed with an id and the default spawn, and the
/// first snapshots already carry the synthetic host entry.
#[test]
fn welcome_handshake_and_host_in_snapshot() {
    let server = TestServer::start();
    let session = server.connect();

    assert!(wait_until(Duration::from_secs(3), || session.is_connected()));
    assert_eq!(session.player_id().as_deref(), Some("player_1"));
    assert_eq!(session.spawn_pos(), Some(DEFAULT_SPAWN));

    assert!(wait_until(Duration::from_secs(3), || {
        session.remote_players().contains_key(HOST_PLAYER_ID)
    }));
    let host = &session.remote_players()[HOST_PLAYER_ID];
    assert!(host.state.is_host);
    assert_eq!(host.state.pos, DEFAULT_SPAWN);

    session.stop();
}

/// Exhausting the reconnect policy against a dead port fails with the final
/// error after sitting through the backoff delays (50 ms then 100 ms).
#[test]
fn connect_retries_then_gives_up() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let start = Instant::now();
    let result = ClientSession::connect_with("127.0.0.1", port, fast_policy());

    assert!(matches!(result, Err(ConnectError::Failed { .. })));
    assert!(start.elapsed() >= Duration::from_millis(150));
}

/// PLAYER VISIBILITY

/// Two clients see each other through snapshots, movement propagates, and a
/// departure reaches the survivor as both an event and a pruned cache.
#[test]
fn join_move_and_leave_are_visible_to_peers() {
    let server = TestServer::start();

    let first = server.connect();
    assert!(wait_until(Duration::from_secs(3), || first.is_connected()));
    let second = server.connect();
    assert!(wait_until(Duration::from_secs(3), || second.is_connected()));
    assert_eq!(second.player_id().as_deref(), Some("player_2"));

    assert!(wait_until(Duration::from_secs(3), || {
        first.remote_players().contains_key("player_2")
    }));

    second.enqueue_state([3.0, 4.0, 5.0], 180.0);
    assert!(wait_until(Duration::from_secs(3), || {
        first
            .remote_players()
            .get("player_2")
            .map(|remote| remote.state.pos == [3.0, 4.0, 5.0] && remote.state.rot_y == 180.0)
            .unwrap_or(false)
    }));

    second.stop();

    assert!(wait_until(Duration::from_secs(3), || {
        !first.remote_players().contains_key("player_2")
    }));
    let saw_leave = first.poll_events().into_iter().any(|event| {
        matches!(
            event,
            SessionEvent::Message(Message::PlayerLeave { ref player_id })
                if player_id == "player_2"
        )
    });
    assert!(saw_leave);

    first.stop();
}

/// ADMIN COMMANDS

/// `/list` reports every player including the tagged host, and the response
/// goes only to the issuer.
#[test]
fn list_reaches_only_the_issuer() {
    let server = TestServer::start();
    let first = server.connect();
    assert!(wait_until(Duration::from_secs(3), || first.is_connected()));
    let second = server.connect();
    assert!(wait_until(Duration::from_secs(3), || second.is_connected()));

    first.send_admin_command("/list");
    assert!(wait_until(Duration::from_secs(3), || {
        !first.admin_log().is_empty()
    }));

    let log = first.admin_log().join("\n");
    assert!(log.contains("host_player (host)"));
    assert!(log.contains("player_1"));
    assert!(log.contains("player_2"));

    std::thread::sleep(Duration::from_millis(100));
    assert!(second.admin_log().is_empty());

    first.stop();
    second.stop();
}

/// Moving the host via `/hostpos` is acknowledged and shows up in the next
/// snapshots.
#[test]
fn hostpos_moves_the_host_entry() {
    let server = TestServer::start();
    let session = server.connect();
    assert!(wait_until(Duration::from_secs(3), || session.is_connected()));

    session.send_admin_command("/hostpos 5 5 5");

    assert!(wait_until(Duration::from_secs(3), || {
        session
            .admin_log()
            .contains(&"Host moved to (5, 5, 5).".to_string())
    }));
    assert!(wait_until(Duration::from_secs(3), || {
        session
            .remote_players()
            .get(HOST_PLAYER_ID)
            .map(|remote| remote.state.pos == [5.0, 5.0, 5.0])
            .unwrap_or(false)
    }));

    session.stop();
}

/// `/kick` disconnects the target and cleans it out of everyone's snapshots;
/// the host entry is not kickable.
#[test]
fn kick_disconnects_target_and_spares_host() {
    let server = TestServer::start();
    let first = server.connect();
    assert!(wait_until(Duration::from_secs(3), || first.is_connected()));
    let second = server.connect();
    assert!(wait_until(Duration::from_secs(3), || second.is_connected()));

    first.send_admin_command("/kick player_2");

    assert!(wait_until(Duration::from_secs(3), || {
        first
            .admin_log()
            .contains(&"Kicked player_2.".to_string())
    }));
    assert!(wait_until(Duration::from_secs(3), || {
        second
            .poll_events()
            .contains(&SessionEvent::Disconnected)
    }));
    assert!(wait_until(Duration::from_secs(3), || {
        !first.remote_players().contains_key("player_2")
    }));

    first.send_admin_command("/kick host_player");
    assert!(wait_until(Duration::from_secs(3), || {
        first
            .admin_log()
            .contains(&"Cannot kick the host player.".to_string())
    }));

    first.stop();
    second.stop();
}

/// CONFIGURATION

/// Live `/set` changes take effect without a restart and stay clamped to the
/// documented ranges.
#[test]
fn set_clamps_and_applies_live() {
    let server = TestServer::start();
    let session = server.connect();
    assert!(wait_until(Duration::from_secs(3), || session.is_connected()));

    session.send_admin_command("/set tick_rate 500");
    assert!(wait_until(Duration::from_secs(3), || {
        session
            .admin_log()
            .iter()
            .any(|line| line.contains("tick_rate = 120"))
    }));

    // The broadcaster keeps running at the clamped rate.
    let before = session.remote_players();
    assert!(wait_until(Duration::from_secs(3), || {
        session
            .remote_players()
            .get(HOST_PLAYER_ID)
            .map(|remote| {
                before
                    .get(HOST_PLAYER_ID)
                    .map(|old| remote.received_at > old.received_at)
                    .unwrap_or(true)
            })
            .unwrap_or(false)
    }));

    session.stop();
}

/// CAPACITY

/// A server at max_players drops excess connections without a welcome: the
/// TCP dial succeeds, but the session never becomes connected and observes
/// the hangup.
#[test]
fn full_server_refuses_new_connections() {
    let config = ServerConfig {
        max_players: 1,
        ..ServerConfig::default()
    };
    let server = TestServer::start_with(config);

    let first = server.connect();
    assert!(wait_until(Duration::from_secs(3), || first.is_connected()));

    let second = server.connect();
    assert!(wait_until(Duration::from_secs(3), || {
        second.poll_events().contains(&SessionEvent::Disconnected)
    }));
    assert!(second.player_id().is_none());
    assert!(!second.is_connected());

    second.stop();
    first.stop();
}
