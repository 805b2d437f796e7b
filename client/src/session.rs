//! Client-side session actor.
//!
//! A [`ClientSession`] owns a background worker thread running a
//! current-thread tokio runtime. All network I/O — dialing, backoff sleeps,
//! reads and writes — happens on that worker. The game loop talks to the
//! session through bounded channels and cloned snapshots, and never blocks:
//! [`ClientSession::enqueue_state`] drops on a full queue,
//! [`ClientSession::poll_events`] drains whatever is ready.
//!
//! The session moves through `Idle → Connecting → Connected → Disconnected`.
//! Connect retries follow the [`ReconnectPolicy`]; once connected, a send
//! loop and a receive loop run as separate tasks, and a failure in either
//! tears the session down with exactly one `Disconnected` event.

use crate::reconnect::ReconnectPolicy;
use log::{debug, error, info, warn};
use shared::connection::{Connection, ConnectionReader, ConnectionWriter};
use shared::{unix_now, Message, PlayerState, CONNECT_TIMEOUT};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, timeout};

const OUTBOUND_CAPACITY: usize = 256;
const INBOX_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum ConnectError {
    /// Every attempt permitted by the reconnect policy failed.
    #[error("failed to connect to {addr}: {reason}")]
    Failed { addr: String, reason: String },
    /// The worker thread died before reporting a connect outcome.
    #[error("client worker exited before reporting a connection result")]
    WorkerExited,
}

/// Lifecycle transitions and decoded messages, polled by the game loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    Message(Message),
}

/// Last-known state of one remote player plus when we learned it.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePlayer {
    pub state: PlayerState,
    /// UNIX seconds at which the snapshot carrying this state arrived.
    pub received_at: f64,
}

/// State shared between the worker and the game-loop-facing handle.
struct SessionShared {
    connected: AtomicBool,
    player_id: Mutex<Option<String>>,
    spawn_pos: Mutex<Option<[f32; 3]>>,
    remote_players: Mutex<HashMap<String, RemotePlayer>>,
    admin_log: Mutex<Vec<String>>,
}

impl SessionShared {
    fn new() -> Self {
        SessionShared {
            connected: AtomicBool::new(false),
            player_id: Mutex::new(None),
            spawn_pos: Mutex::new(None),
            remote_players: Mutex::new(HashMap::new()),
            admin_log: Mutex::new(Vec::new()),
        }
    }
}

/// Handle to a running client session. Explicitly owned; dropping it stops
/// the worker.
pub struct ClientSession {
    shared: Arc<SessionShared>,
    outbound: mpsc::Sender<Message>,
    inbox: Mutex<mpsc::Receiver<SessionEvent>>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ClientSession {
    /// Connects with the default reconnect policy (3 attempts, 1 s base
    /// backoff). Blocks the caller until the outcome is known.
    pub fn connect(host: &str, port: u16) -> Result<ClientSession, ConnectError> {
        Self::connect_with(host, port, ReconnectPolicy::default())
    }

    /// Connects with an explicit policy. Spawns the worker thread, waits for
    /// it to either establish a connection or exhaust its attempts, and
    /// returns the session handle or the final error.
    pub fn connect_with(
        host: &str,
        port: u16,
        policy: ReconnectPolicy,
    ) -> Result<ClientSession, ConnectError> {
        let addr = format!("{}:{}", host, port);
        let shared = Arc::new(SessionShared::new());
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (result_tx, result_rx) = oneshot::channel::<Result<(), String>>();

        let worker_shared = Arc::clone(&shared);
        let worker_addr = addr.clone();
        let worker = std::thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    error!("Failed to build client runtime: {}", err);
                    let _ = result_tx.send(Err(err.to_string()));
                    return;
                }
            };

            runtime.block_on(worker_main(
                worker_addr,
                policy,
                worker_shared,
                outbound_rx,
                inbox_tx,
                shutdown_rx,
                result_tx,
            ));
        });

        let session = ClientSession {
            shared,
            outbound: outbound_tx,
            inbox: Mutex::new(inbox_rx),
            shutdown: shutdown_tx,
            worker: Mutex::new(Some(worker)),
        };

        match result_rx.blocking_recv() {
            Ok(Ok(())) => Ok(session),
            Ok(Err(reason)) => {
                session.stop();
                Err(ConnectError::Failed { addr, reason })
            }
            Err(_) => {
                session.stop();
                Err(ConnectError::WorkerExited)
            }
        }
    }

    /// True once connected and welcomed by the server.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst) && self.player_id().is_some()
    }

    /// The server-assigned id, available after the welcome message.
    pub fn player_id(&self) -> Option<String> {
        self.shared.player_id.lock().unwrap().clone()
    }

    /// Spawn position assigned by the server's welcome message.
    pub fn spawn_pos(&self) -> Option<[f32; 3]> {
        *self.shared.spawn_pos.lock().unwrap()
    }

    /// A copy of the remote player cache, safe to read while the worker
    /// keeps mutating the live one.
    pub fn remote_players(&self) -> HashMap<String, RemotePlayer> {
        self.shared.remote_players.lock().unwrap().clone()
    }

    /// Accumulated admin console output lines.
    pub fn admin_log(&self) -> Vec<String> {
        self.shared.admin_log.lock().unwrap().clone()
    }

    /// Queues this frame's position and yaw for transmission. Never blocks;
    /// drops silently when disconnected or when the queue is full.
    pub fn enqueue_state(&self, pos: [f32; 3], rot_y: f32) {
        self.send_message(Message::StateUpdate { pos, rot_y });
    }

    pub fn send_chat(&self, username: &str, message: &str) {
        self.send_message(Message::Chat {
            username: username.to_string(),
            message: message.to_string(),
        });
    }

    pub fn send_block_update(&self, pos: [i32; 3], block_type: &str) {
        self.send_message(Message::BlockUpdate {
            pos,
            block_type: block_type.to_string(),
        });
    }

    /// Sends a slash command to the server. The response arrives as an
    /// `admin_response` message and is mirrored into [`Self::admin_log`].
    pub fn send_admin_command(&self, command: &str) {
        let command = command.trim();
        if command.is_empty() {
            return;
        }
        self.send_message(Message::AdminCommand {
            command: command.to_string(),
        });
    }

    /// Drains everything the worker has posted since the last poll.
    pub fn poll_events(&self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        let mut inbox = self.inbox.lock().unwrap();
        while let Ok(event) = inbox.try_recv() {
            events.push(event);
        }
        events
    }

    /// Stops the worker and waits for it to exit. Idempotent and safe to
    /// call concurrently; the worker reacts to the shutdown signal at its
    /// next await point, so the join is bounded.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.shared.connected.store(false, Ordering::SeqCst);
    }

    fn send_message(&self, message: Message) {
        if !self.shared.connected.load(Ordering::SeqCst) {
            return;
        }
        if self.outbound.try_send(message).is_err() {
            debug!("Outbound queue full or closed; dropping message");
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Resolves when the shutdown flag flips (or the handle side went away).
async fn shut_down(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

fn post_event(inbox: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    if inbox.try_send(event).is_err() {
        debug!("Inbox full; dropping session event");
    }
}

async fn worker_main(
    addr: String,
    policy: ReconnectPolicy,
    shared: Arc<SessionShared>,
    outbound_rx: mpsc::Receiver<Message>,
    inbox_tx: mpsc::Sender<SessionEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
    result_tx: oneshot::Sender<Result<(), String>>,
) {
    let connection = match connect_with_retry(&addr, policy, &mut shutdown_rx).await {
        Ok(Some(connection)) => connection,
        Ok(None) => {
            // Stopped while still connecting.
            let _ = result_tx.send(Err("connect cancelled".to_string()));
            return;
        }
        Err(reason) => {
            let _ = result_tx.send(Err(reason));
            return;
        }
    };

    shared.connected.store(true, Ordering::SeqCst);
    let _ = result_tx.send(Ok(()));
    post_event(&inbox_tx, SessionEvent::Connected);
    info!("Connected to server at {}", addr);

    run_connected(connection, &shared, outbound_rx, &inbox_tx, shutdown_rx).await;

    shared.connected.store(false, Ordering::SeqCst);
    post_event(&inbox_tx, SessionEvent::Disconnected);
    info!("Disconnected from {}", addr);
}

/// Dials until connected, the policy gives up, or shutdown is requested.
/// `Ok(None)` means shutdown interrupted the sequence.
async fn connect_with_retry(
    addr: &str,
    policy: ReconnectPolicy,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> Result<Option<Connection>, String> {
    let mut last_error = "no connection attempts were made".to_string();

    for attempt in 1..=policy.max_attempts() {
        info!(
            "Connecting to {} (attempt {}/{})",
            addr,
            attempt,
            policy.max_attempts()
        );

        tokio::select! {
            _ = shut_down(shutdown_rx) => return Ok(None),
            dialed = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)) => match dialed {
                Ok(Ok(stream)) => return Ok(Some(Connection::new(stream))),
                Ok(Err(err)) => last_error = err.to_string(),
                Err(_) => last_error = format!("timed out after {:?}", CONNECT_TIMEOUT),
            },
        }

        if let Some(delay) = policy.delay_after(attempt) {
            warn!(
                "Connection attempt {} failed: {}. Retrying in {:?}",
                attempt, last_error, delay
            );
            tokio::select! {
                _ = shut_down(shutdown_rx) => return Ok(None),
                _ = sleep(delay) => {}
            }
        }
    }

    error!(
        "Giving up on {} after {} attempts: {}",
        addr,
        policy.max_attempts(),
        last_error
    );
    Err(last_error)
}

/// Runs the two connected-state duties until either fails or shutdown is
/// requested. Send and receive own separate halves of the connection, so a
/// slow write can never corrupt an in-progress read.
async fn run_connected(
    connection: Connection,
    shared: &Arc<SessionShared>,
    outbound_rx: mpsc::Receiver<Message>,
    inbox_tx: &mpsc::Sender<SessionEvent>,
    shutdown_rx: watch::Receiver<bool>,
) {
    let (reader, writer) = connection.into_split();

    let mut send_task = tokio::spawn(send_loop(writer, outbound_rx, shutdown_rx.clone()));
    let mut receive_task = tokio::spawn(receive_loop(
        reader,
        Arc::clone(shared),
        inbox_tx.clone(),
        shutdown_rx,
    ));

    // Whichever duty finishes first takes the whole session down with it.
    tokio::select! {
        _ = &mut send_task => receive_task.abort(),
        _ = &mut receive_task => send_task.abort(),
    }
}

async fn send_loop(
    mut writer: ConnectionWriter,
    mut outbound_rx: mpsc::Receiver<Message>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shut_down(&mut shutdown_rx) => {
                writer.shutdown().await;
                return;
            }
            outgoing = outbound_rx.recv() => match outgoing {
                Some(message) => {
                    if let Err(err) = writer.send(&message).await {
                        warn!("Send failed: {}", err);
                        return;
                    }
                }
                None => return,
            },
        }
    }
}

async fn receive_loop(
    mut reader: ConnectionReader,
    shared: Arc<SessionShared>,
    inbox_tx: mpsc::Sender<SessionEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shut_down(&mut shutdown_rx) => return,
            incoming = reader.receive() => match incoming {
                Ok(Some(message)) => handle_message(&shared, &inbox_tx, message),
                Ok(None) => {
                    info!("Server closed the connection");
                    return;
                }
                Err(err) => {
                    warn!("Receive failed: {}", err);
                    return;
                }
            },
        }
    }
}

/// Updates the session caches for recognized message types, then forwards
/// the raw message to the inbox for the game loop. Runs on the worker, so it
/// must stay cheap and never block.
fn handle_message(
    shared: &SessionShared,
    inbox_tx: &mpsc::Sender<SessionEvent>,
    message: Message,
) {
    match &message {
        Message::Welcome {
            player_id,
            spawn_pos,
        } => {
            info!("Welcome as {}, spawn_pos={:?}", player_id, spawn_pos);
            *shared.player_id.lock().unwrap() = Some(player_id.clone());
            *shared.spawn_pos.lock().unwrap() = Some(*spawn_pos);
            // A snapshot that raced ahead of the welcome cached our own id;
            // now that we know it, purge it.
            shared.remote_players.lock().unwrap().remove(player_id);
        }
        Message::StateSnapshot { players, .. } => {
            apply_snapshot(shared, players);
        }
        Message::PlayerJoin { player_id } => {
            info!("Player {} joined the game", player_id);
        }
        Message::PlayerLeave { player_id } => {
            info!("Player {} left the game", player_id);
            shared.remote_players.lock().unwrap().remove(player_id);
        }
        Message::AdminResponse { lines } => {
            let mut log = shared.admin_log.lock().unwrap();
            for line in lines {
                info!("ADMIN: {}", line);
                log.push(line.clone());
            }
        }
        _ => {}
    }

    post_event(inbox_tx, SessionEvent::Message(message));
}

/// Replaces the remote cache with the snapshot contents: own id excluded,
/// ids absent from the snapshot pruned.
fn apply_snapshot(shared: &SessionShared, players: &HashMap<String, PlayerState>) {
    let own_id = shared.player_id.lock().unwrap().clone();
    let received_at = unix_now();

    let mut cache = shared.remote_players.lock().unwrap();
    for (player_id, state) in players {
        if own_id.as_deref() == Some(player_id.as_str()) {
            continue;
        }
        cache.insert(
            player_id.clone(),
            RemotePlayer {
                state: state.clone(),
                received_at,
            },
        );
    }
    cache.retain(|player_id, _| {
        own_id.as_deref() != Some(player_id.as_str()) && players.contains_key(player_id)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{decode, encode, DEFAULT_SPAWN, HOST_PLAYER_ID};
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::time::{Duration, Instant};

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

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy::new(Duration::from_millis(10), 3)
    }

    #[test]
    fn test_connect_refused_reports_permanent_failure() {
        // Bind then drop to find a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = ClientSession::connect_with("127.0.0.1", port, fast_policy());
        match result {
            Err(ConnectError::Failed { addr, .. }) => {
                assert!(addr.contains(&port.to_string()));
            }
            other => panic!("Expected connect failure, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn test_backoff_delays_elapse_before_giving_up() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let policy = ReconnectPolicy::new(Duration::from_millis(50), 3);
        let start = Instant::now();
        let result = ClientSession::connect_with("127.0.0.1", port, policy);

        assert!(result.is_err());
        // Delays of 50 ms and 100 ms separate the three attempts.
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn test_session_lifecycle_against_scripted_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;

            let welcome = encode(&Message::Welcome {
                player_id: "player_1".to_string(),
                spawn_pos: DEFAULT_SPAWN,
            })
            .unwrap();
            writer.write_all(welcome.as_bytes()).unwrap();

            let mut players = HashMap::new();
            players.insert(HOST_PLAYER_ID.to_string(), PlayerState::host());
            players.insert("player_1".to_string(), PlayerState::at_spawn());
            players.insert("player_2".to_string(), PlayerState::at_spawn());
            let snapshot = encode(&Message::StateSnapshot {
                players,
                timestamp: unix_now(),
            })
            .unwrap();
            writer.write_all(snapshot.as_bytes()).unwrap();

            // Wait for one state update from the client, then hang up.
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            line
        });

        let session = ClientSession::connect_with("127.0.0.1", port, fast_policy()).unwrap();

        assert!(wait_until(Duration::from_secs(2), || session.is_connected()));
        assert_eq!(session.player_id().as_deref(), Some("player_1"));
        assert_eq!(session.spawn_pos(), Some(DEFAULT_SPAWN));

        // The cache holds the host and the other player, never ourselves.
        assert!(wait_until(Duration::from_secs(2), || {
            session.remote_players().len() == 2
        }));
        let remote = session.remote_players();
        assert!(remote.contains_key(HOST_PLAYER_ID));
        assert!(remote.contains_key("player_2"));
        assert!(!remote.contains_key("player_1"));

        session.enqueue_state([1.0, 2.0, 3.0], 45.0);

        let line = server.join().unwrap();
        match decode(&line).unwrap() {
            Message::StateUpdate { pos, rot_y } => {
                assert_eq!(pos, [1.0, 2.0, 3.0]);
                assert_eq!(rot_y, 45.0);
            }
            other => panic!("Expected state_update, got {:?}", other),
        }

        // Server hung up: exactly one Disconnected event, no duplicates from
        // the send loop racing the receive loop.
        let mut events = Vec::new();
        assert!(wait_until(Duration::from_secs(2), || {
            events.extend(session.poll_events());
            events.contains(&SessionEvent::Disconnected)
        }));
        std::thread::sleep(Duration::from_millis(50));
        events.extend(session.poll_events());

        let disconnects = events
            .iter()
            .filter(|event| **event == SessionEvent::Disconnected)
            .count();
        assert_eq!(disconnects, 1);
        assert!(events.contains(&SessionEvent::Connected));

        session.stop();
        session.stop(); // idempotent
    }

    #[test]
    fn test_snapshot_prunes_departed_players() {
        let shared = SessionShared::new();
        *shared.player_id.lock().unwrap() = Some("player_1".to_string());
        let (inbox_tx, _inbox_rx) = mpsc::channel(16);

        let mut players = HashMap::new();
        players.insert(HOST_PLAYER_ID.to_string(), PlayerState::host());
        players.insert("player_2".to_string(), PlayerState::at_spawn());
        handle_message(
            &shared,
            &inbox_tx,
            Message::StateSnapshot {
                players,
                timestamp: unix_now(),
            },
        );
        assert_eq!(shared.remote_players.lock().unwrap().len(), 2);

        // Next snapshot omits player_2, so the cache drops it.
        let mut players = HashMap::new();
        players.insert(HOST_PLAYER_ID.to_string(), PlayerState::host());
        handle_message(
            &shared,
            &inbox_tx,
            Message::StateSnapshot {
                players,
                timestamp: unix_now(),
            },
        );

        let cache = shared.remote_players.lock().unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.contains_key(HOST_PLAYER_ID));
    }

    #[test]
    fn test_snapshot_racing_ahead_of_welcome_never_caches_self() {
        let shared = SessionShared::new();
        let (inbox_tx, _inbox_rx) = mpsc::channel(16);

        // The broadcaster can tick between the server registering us and the
        // welcome reaching the wire, so the first snapshot may arrive while
        // our own id is still unknown.
        let mut players = HashMap::new();
        players.insert("player_1".to_string(), PlayerState::at_spawn());
        handle_message(
            &shared,
            &inbox_tx,
            Message::StateSnapshot {
                players: players.clone(),
                timestamp: unix_now(),
            },
        );
        assert!(shared.remote_players.lock().unwrap().contains_key("player_1"));

        handle_message(
            &shared,
            &inbox_tx,
            Message::Welcome {
                player_id: "player_1".to_string(),
                spawn_pos: DEFAULT_SPAWN,
            },
        );
        assert!(!shared.remote_players.lock().unwrap().contains_key("player_1"));

        // Later snapshots keep carrying our id; it must stay out.
        handle_message(
            &shared,
            &inbox_tx,
            Message::StateSnapshot {
                players,
                timestamp: unix_now(),
            },
        );
        assert!(!shared.remote_players.lock().unwrap().contains_key("player_1"));
    }

    #[test]
    fn test_player_leave_removes_cache_entry() {
        let shared = SessionShared::new();
        let (inbox_tx, _inbox_rx) = mpsc::channel(16);

        shared.remote_players.lock().unwrap().insert(
            "player_9".to_string(),
            RemotePlayer {
                state: PlayerState::at_spawn(),
                received_at: unix_now(),
            },
        );

        handle_message(
            &shared,
            &inbox_tx,
            Message::PlayerLeave {
                player_id: "player_9".to_string(),
            },
        );

        assert!(shared.remote_players.lock().unwrap().is_empty());
    }

    #[test]
    fn test_admin_response_accumulates_log() {
        let shared = SessionShared::new();
        let (inbox_tx, _inbox_rx) = mpsc::channel(16);

        handle_message(
            &shared,
            &inbox_tx,
            Message::AdminResponse {
                lines: vec!["a".to_string(), "b".to_string()],
            },
        );

        assert_eq!(
            *shared.admin_log.lock().unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
    }
}
