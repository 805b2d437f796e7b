//! Canonical player table.
//!
//! The server holds exactly one [`PlayerState`] per connected client plus one
//! synthetic host entry that has no network connection. The host entry is
//! created when the table is created and can never be removed; disconnect
//! cleanup and kicks refuse to touch it. Snapshots always contain the whole
//! table, never a diff.

use log::info;
use shared::{PlayerState, DEFAULT_SPAWN, HOST_PLAYER_ID};
use std::collections::HashMap;

pub struct PlayerTable {
    players: HashMap<String, PlayerState>,
    /// Monotonic; ids are never reused even after a player leaves.
    next_player_id: u64,
}

impl Default for PlayerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerTable {
    /// Creates a table seeded with the synthetic host player.
    pub fn new() -> Self {
        let mut players = HashMap::new();
        players.insert(HOST_PLAYER_ID.to_string(), PlayerState::host());
        PlayerTable {
            players,
            next_player_id: 1,
        }
    }

    /// Assigns a fresh id and inserts a default-spawn state for it.
    pub fn register(&mut self) -> (String, PlayerState) {
        let player_id = format!("player_{}", self.next_player_id);
        self.next_player_id += 1;

        let state = PlayerState::at_spawn();
        self.players.insert(player_id.clone(), state.clone());
        (player_id, state)
    }

    /// Removes a player's state. Refuses the host id; returns whether an
    /// entry was actually removed.
    pub fn remove(&mut self, player_id: &str) -> bool {
        if player_id == HOST_PLAYER_ID {
            info!("Refusing to remove the host player");
            return false;
        }
        self.players.remove(player_id).is_some()
    }

    /// Applies a client's `state_update`, refreshing `last_update`.
    pub fn apply_state_update(&mut self, player_id: &str, pos: [f32; 3], rot_y: f32) -> bool {
        match self.players.get_mut(player_id) {
            Some(state) => {
                state.apply_update(pos, rot_y);
                true
            }
            None => false,
        }
    }

    /// Moves the host's synthetic player directly; no connection involved.
    pub fn set_host_position(&mut self, x: f32, y: f32, z: f32) {
        if let Some(state) = self.players.get_mut(HOST_PLAYER_ID) {
            let rot_y = state.rot_y;
            state.apply_update([x, y, z], rot_y);
        }
    }

    pub fn set_host_rotation(&mut self, rot_y: f32) {
        if let Some(state) = self.players.get_mut(HOST_PLAYER_ID) {
            let pos = state.pos;
            state.apply_update(pos, rot_y);
        }
    }

    pub fn get(&self, player_id: &str) -> Option<&PlayerState> {
        self.players.get(player_id)
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.players.contains_key(player_id)
    }

    /// Full copy of the table for a `state_snapshot`. Always complete,
    /// including the host.
    pub fn snapshot(&self) -> HashMap<String, PlayerState> {
        self.players.clone()
    }

    /// Number of entries including the host.
    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
