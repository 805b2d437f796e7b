//! Routing table for live client connections.
//!
//! Each accepted connection registers an outbound message queue and a kick
//! token here under its player id. Broadcasts clone the message into every
//! queue; a queue that is full or closed marks that client as failed so the
//! caller can route it into the disconnect path. Kicking only signals the
//! token — the connection's own receive loop observes it and runs the same
//! cleanup as an organic disconnect, so state is never removed twice.

use log::debug;
use shared::Message;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};

struct ClientEntry {
    sender: mpsc::Sender<Message>,
    kick: Arc<Notify>,
    last_seen: Instant,
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<String, ClientEntry>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection's outbound queue, refusing when `capacity`
    /// entries already exist. The check and the insert happen under one
    /// lock, so concurrent accepts cannot both squeeze past the limit.
    /// Returns the kick token the connection's receive loop must watch.
    pub fn insert(
        &self,
        player_id: String,
        sender: mpsc::Sender<Message>,
        capacity: usize,
    ) -> Option<Arc<Notify>> {
        let mut clients = self.clients.lock().unwrap();
        if clients.len() >= capacity {
            return None;
        }
        let kick = Arc::new(Notify::new());
        let entry = ClientEntry {
            sender,
            kick: Arc::clone(&kick),
            last_seen: Instant::now(),
        };
        clients.insert(player_id, entry);
        Some(kick)
    }

    /// Removes a connection's routing entry. Returns false if it was already
    /// gone, which callers use to make disconnect cleanup run exactly once.
    pub fn remove(&self, player_id: &str) -> bool {
        self.clients.lock().unwrap().remove(player_id).is_some()
    }

    pub fn contains(&self, player_id: &str) -> bool {
        self.clients.lock().unwrap().contains_key(player_id)
    }

    /// Number of connected clients (the host has no entry here).
    pub fn len(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().unwrap().is_empty()
    }

    /// Records activity from a client, for the inactivity monitor.
    pub fn touch(&self, player_id: &str) {
        if let Some(entry) = self.clients.lock().unwrap().get_mut(player_id) {
            entry.last_seen = Instant::now();
        }
    }

    /// Ids that have been silent for longer than `timeout`.
    pub fn idle_clients(&self, timeout: Duration) -> Vec<String> {
        self.clients
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, entry)| entry.last_seen.elapsed() > timeout)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Signals a connection to close. Returns false if no such client.
    pub fn kick(&self, player_id: &str) -> bool {
        match self.clients.lock().unwrap().get(player_id) {
            Some(entry) => {
                entry.kick.notify_one();
                true
            }
            None => false,
        }
    }

    pub fn kick_all(&self) {
        for entry in self.clients.lock().unwrap().values() {
            entry.kick.notify_one();
        }
    }

    /// Queues a message for one client. Returns false if the client is gone
    /// or its queue is full.
    pub fn send_to(&self, player_id: &str, message: Message) -> bool {
        match self.clients.lock().unwrap().get(player_id) {
            Some(entry) => entry.sender.try_send(message).is_ok(),
            None => false,
        }
    }

    /// Queues a message for every client except `exclude`. Returns the ids
    /// whose queues rejected the message; a failure for one client never
    /// stops delivery to the rest.
    pub fn broadcast(&self, message: &Message, exclude: Option<&str>) -> Vec<String> {
        let clients = self.clients.lock().unwrap();
        let mut failed = Vec::new();

        for (player_id, entry) in clients.iter() {
            if exclude == Some(player_id.as_str()) {
                continue;
            }
            if entry.sender.try_send(message.clone()).is_err() {
                debug!("Broadcast to {} failed; marking for disconnect", player_id);
                failed.push(player_id.clone());
            }
        }
        failed
    }
}
