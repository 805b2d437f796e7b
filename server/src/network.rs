//! Server network layer: accept loop, per-connection receive loops, and the
//! state broadcaster.
//!
//! One task per concern. The accept loop assigns player identities and spawns
//! a receive loop plus a writer task for every connection; the broadcaster
//! pushes full player-table snapshots on a fixed tick; an inactivity monitor
//! kicks silent clients. All of them observe one shutdown signal, and every
//! way a connection can end — end-of-stream, transport error, kick, server
//! shutdown — funnels into the same disconnect cleanup, which runs exactly
//! once per connection.

use crate::commands::CommandProcessor;
use crate::config::ConfigStore;
use crate::players::PlayerTable;
use crate::registry::ClientRegistry;
use log::{debug, error, info, warn};
use shared::connection::{Connection, ConnectionWriter};
use shared::{unix_now, Message};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Notify, RwLock};
use tokio::time::sleep;

/// Per-connection outbound queue depth. A client that cannot drain this many
/// snapshots is considered dead.
const OUTBOUND_CAPACITY: usize = 64;

/// Authoritative game server for one LAN session.
pub struct Server {
    listener: TcpListener,
    players: Arc<RwLock<PlayerTable>>,
    registry: Arc<ClientRegistry>,
    config: Arc<RwLock<ConfigStore>>,
    commands: Arc<CommandProcessor>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Server {
    /// Binds the listen socket and assembles the shared state. The server
    /// does not accept connections until [`Server::run`] is called.
    pub async fn bind(addr: &str, config: ConfigStore) -> io::Result<Server> {
        let listener = TcpListener::bind(addr).await?;

        let players = Arc::new(RwLock::new(PlayerTable::new()));
        let registry = Arc::new(ClientRegistry::new());
        let config = Arc::new(RwLock::new(config));
        let (shutdown_tx, _) = watch::channel(false);
        let shutdown = Arc::new(shutdown_tx);

        let commands = Arc::new(CommandProcessor::new(
            Arc::clone(&players),
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&shutdown),
        ));

        Ok(Server {
            listener,
            players,
            registry,
            config,
            commands,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Processor handle for driving commands from outside a connection,
    /// e.g. the server console.
    pub fn command_processor(&self) -> Arc<CommandProcessor> {
        Arc::clone(&self.commands)
    }

    /// Handle that triggers the same orderly shutdown as `/quit`.
    pub fn shutdown_handle(&self) -> Arc<watch::Sender<bool>> {
        Arc::clone(&self.shutdown)
    }

    /// Runs until shutdown is requested. Spawns the broadcaster and the
    /// inactivity monitor, then accepts connections.
    pub async fn run(self) -> io::Result<()> {
        let addr = self.listener.local_addr()?;
        info!("Server listening on {}", addr);
        info!(
            "Config: rate={}Hz, max_players={}",
            self.config.read().await.values().tick_rate,
            self.config.read().await.values().max_players
        );

        tokio::spawn(broadcast_loop(
            Arc::clone(&self.players),
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
            self.shutdown.subscribe(),
        ));
        tokio::spawn(inactivity_loop(
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
            self.shutdown.subscribe(),
        ));

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            tokio::select! {
                _ = shut_down(&mut shutdown_rx) => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.accept_client(stream, peer),
                    Err(err) => {
                        error!("Accept failed: {}", err);
                        sleep(Duration::from_millis(10)).await;
                    }
                },
            }
        }

        info!("Server shutting down");
        self.registry.kick_all();
        Ok(())
    }

    fn accept_client(&self, stream: TcpStream, peer: SocketAddr) {
        tokio::spawn(handle_client(
            stream,
            peer,
            Arc::clone(&self.players),
            Arc::clone(&self.registry),
            Arc::clone(&self.commands),
            Arc::clone(&self.config),
            self.shutdown.subscribe(),
        ));
    }
}

/// Resolves when the shutdown flag flips (or the sender went away).
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

/// Owns one client connection from welcome to cleanup.
async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    players: Arc<RwLock<PlayerTable>>,
    registry: Arc<ClientRegistry>,
    commands: Arc<CommandProcessor>,
    config: Arc<RwLock<ConfigStore>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (mut reader, writer) = Connection::new(stream).into_split();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let max_players = config.read().await.values().max_players;

    // The broadcaster can only reach this queue through the registry, and
    // the welcome is queued before the registry entry exists, so the welcome
    // is always the first frame on the wire. Holding the table lock across
    // the insert keeps the capacity check atomic and keeps half-admitted
    // players out of snapshots.
    let (player_id, kick) = {
        let mut table = players.write().await;
        let (player_id, state) = table.register();
        let _ = outbound_tx.try_send(Message::Welcome {
            player_id: player_id.clone(),
            spawn_pos: state.pos,
        });
        match registry.insert(player_id.clone(), outbound_tx.clone(), max_players) {
            Some(kick) => (player_id, kick),
            None => {
                table.remove(&player_id);
                warn!(
                    "Refusing connection from {}: server full ({} clients)",
                    peer, max_players
                );
                return;
            }
        }
    };

    let writer_task = tokio::spawn(write_loop(writer, outbound_rx, Arc::clone(&kick)));

    registry.broadcast(
        &Message::PlayerJoin {
            player_id: player_id.clone(),
        },
        Some(&player_id),
    );
    info!(
        "Player {} connected from {} | total_clients={}",
        player_id,
        peer,
        registry.len()
    );

    loop {
        tokio::select! {
            _ = kick.notified() => {
                info!("Player {} kicked", player_id);
                break;
            }
            _ = shut_down(&mut shutdown_rx) => break,
            incoming = reader.receive() => match incoming {
                Ok(Some(message)) => {
                    handle_message(&player_id, message, &players, &registry, &commands).await;
                }
                Ok(None) => break,
                Err(err) => {
                    warn!("Receive error from {}: {}", player_id, err);
                    break;
                }
            },
        }
    }

    writer_task.abort();
    handle_disconnect(&player_id, &players, &registry).await;
}

/// Drains one connection's outbound queue onto the socket. A write failure
/// signals the kick token so the receive loop tears the connection down.
async fn write_loop(
    mut writer: ConnectionWriter,
    mut outbound_rx: mpsc::Receiver<Message>,
    kick: Arc<Notify>,
) {
    while let Some(message) = outbound_rx.recv().await {
        if let Err(err) = writer.send(&message).await {
            debug!("Write failed: {}", err);
            kick.notify_one();
            break;
        }
    }
    writer.shutdown().await;
}

/// Dispatches one decoded message from a connected client.
async fn handle_message(
    player_id: &str,
    message: Message,
    players: &Arc<RwLock<PlayerTable>>,
    registry: &Arc<ClientRegistry>,
    commands: &Arc<CommandProcessor>,
) {
    registry.touch(player_id);

    match message {
        Message::StateUpdate { pos, rot_y } => {
            players.write().await.apply_state_update(player_id, pos, rot_y);
        }
        Message::AdminCommand { command } => {
            info!("Admin command from {}: {}", player_id, command);
            let lines = commands.execute(player_id, &command).await;
            if !lines.is_empty() {
                registry.send_to(player_id, Message::AdminResponse { lines });
            }
        }
        Message::Chat { .. } => {
            registry.broadcast(&message, None);
        }
        Message::BlockUpdate { .. } => {
            registry.broadcast(&message, Some(player_id));
        }
        other => {
            warn!("Unexpected message type from {}: {:?}", player_id, other);
        }
    }
}

/// Removes the connection's routing entry and player state, then announces
/// the departure. The registry removal gates the whole path, so a kick that
/// races an organic disconnect still cleans up exactly once. The host id
/// never reaches this path because it has no registry entry.
async fn handle_disconnect(
    player_id: &str,
    players: &Arc<RwLock<PlayerTable>>,
    registry: &Arc<ClientRegistry>,
) {
    if !registry.remove(player_id) {
        return;
    }
    players.write().await.remove(player_id);
    info!(
        "Player {} disconnected | total_clients={}",
        player_id,
        registry.len()
    );

    let failed = registry.broadcast(
        &Message::PlayerLeave {
            player_id: player_id.to_string(),
        },
        None,
    );
    for id in failed {
        registry.kick(&id);
    }
}

/// Pushes a full player-table snapshot to every connection on a fixed tick.
/// The rate is re-read each tick so `/set tick_rate` takes effect without a
/// restart. Exits after finishing the tick during which shutdown arrived.
async fn broadcast_loop(
    players: Arc<RwLock<PlayerTable>>,
    registry: Arc<ClientRegistry>,
    config: Arc<RwLock<ConfigStore>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("State broadcaster started");
    loop {
        let tick_rate = config.read().await.values().tick_rate.max(1);
        let tick = Duration::from_secs_f64(1.0 / tick_rate as f64);

        tokio::select! {
            _ = shut_down(&mut shutdown_rx) => break,
            _ = sleep(tick) => {}
        }

        let snapshot = players.read().await.snapshot();
        if snapshot.is_empty() {
            continue;
        }

        let message = Message::StateSnapshot {
            players: snapshot,
            timestamp: unix_now(),
        };
        let failed = registry.broadcast(&message, None);
        for id in failed {
            warn!("Client {} is not draining snapshots; dropping it", id);
            registry.kick(&id);
        }
    }
    info!("State broadcaster stopped");
}

/// Kicks clients that have been silent longer than the configured timeout.
async fn inactivity_loop(
    registry: Arc<ClientRegistry>,
    config: Arc<RwLock<ConfigStore>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shut_down(&mut shutdown_rx) => return,
            _ = sleep(Duration::from_secs(5)) => {}
        }

        let timeout = Duration::from_secs(config.read().await.values().client_timeout_secs);
        for player_id in registry.idle_clients(timeout) {
            warn!(
                "Client {} timed out (no activity for {:?})",
                player_id, timeout
            );
            registry.kick(&player_id);
        }
    }
}
