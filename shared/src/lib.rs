//! # Shared Protocol Library
//!
//! Wire protocol and connection plumbing common to the server and client.
//!
//! The protocol is deliberately simple: every message is one JSON object on
//! one newline-terminated line, tagged by a `type` field. Text framing keeps
//! sessions debuggable with `nc` and lets peers skip message types they do
//! not understand instead of desynchronizing a binary stream.
//!
//! This crate defines:
//! - the protocol constants (port, tick rates, spawn position, host id)
//! - [`Message`], the tagged envelope for every frame on the wire
//! - [`PlayerState`], the per-player record carried in snapshots
//! - [`connection`], buffered framed reader/writer halves over TCP

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub mod connection;

/// Default TCP port for LAN games.
pub const DEFAULT_PORT: u16 = 5420;
/// How often the server broadcasts state snapshots (Hz).
pub const SERVER_TICK_RATE: u32 = 20;
/// How often a client sends its own state to the server (Hz).
pub const CLIENT_SEND_RATE: u32 = 10;
/// Per-attempt timeout when dialing the server.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Reserved id for the synthetic host player. Never assigned to a connection.
pub const HOST_PLAYER_ID: &str = "host_player";
/// Spawn position given to every newly connected player.
pub const DEFAULT_SPAWN: [f32; 3] = [10.0, 2.0, 10.0];

/// Wall-clock time as fractional UNIX seconds, the timestamp unit used on the wire.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64()
}

/// Authoritative per-player record held by the server and mirrored by clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerState {
    pub pos: [f32; 3],
    /// Yaw in degrees.
    pub rot_y: f32,
    /// UNIX seconds of the last update applied to this record.
    pub last_update: f64,
    #[serde(default)]
    pub is_host: bool,
}

impl PlayerState {
    /// A freshly spawned client player at the default spawn position.
    pub fn at_spawn() -> Self {
        PlayerState {
            pos: DEFAULT_SPAWN,
            rot_y: 0.0,
            last_update: unix_now(),
            is_host: false,
        }
    }

    /// The synthetic host entry. It has no network connection and is exempt
    /// from disconnect cleanup.
    pub fn host() -> Self {
        PlayerState {
            is_host: true,
            ..PlayerState::at_spawn()
        }
    }

    pub fn apply_update(&mut self, pos: [f32; 3], rot_y: f32) {
        self.pos = pos;
        self.rot_y = rot_y;
        self.last_update = unix_now();
    }
}

/// Wire message envelope. One JSON record per newline-terminated line, tagged
/// by a `type` field. Unrecognized type strings decode to [`Message::Unknown`]
/// so peers running a newer protocol never break the connection.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Server assigns an id and spawn position to a newly connected client.
    Welcome {
        player_id: String,
        spawn_pos: [f32; 3],
    },
    /// Client reports its own position and yaw.
    StateUpdate { pos: [f32; 3], rot_y: f32 },
    /// Server broadcasts the complete player table. Never a partial diff.
    StateSnapshot {
        players: HashMap<String, PlayerState>,
        timestamp: f64,
    },
    PlayerJoin {
        player_id: String,
    },
    PlayerLeave {
        player_id: String,
    },
    Chat {
        username: String,
        message: String,
    },
    BlockUpdate {
        pos: [i32; 3],
        block_type: String,
    },
    /// Client submits a slash command for the server to execute.
    AdminCommand { command: String },
    /// Server returns command output to the issuing client only.
    AdminResponse { lines: Vec<String> },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("malformed message frame: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Serializes one message as a newline-terminated JSON record.
pub fn encode(message: &Message) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(message).map_err(ProtocolError::Encode)?;
    line.push('\n');
    Ok(line)
}

/// Parses exactly one frame. Fails closed: malformed input yields an error,
/// never a partial message.
pub fn decode(frame: &str) -> Result<Message, ProtocolError> {
    serde_json::from_str(frame.trim()).map_err(ProtocolError::Decode)
}
