//! Slash-command processing for server administration.
//!
//! Commands arrive either as `admin_command` messages from a connected
//! client or as lines typed into the server console (issued as the host).
//! Execution always produces response lines for the issuer and never panics;
//! protocol misuse (unknown commands, kicking the host, bad arguments) comes
//! back as text, not as an error that could take down a connection loop.

use crate::config::ConfigStore;
use crate::players::PlayerTable;
use crate::registry::ClientRegistry;
use log::{debug, info};
use shared::HOST_PLAYER_ID;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Command table: name with arguments, description. Drives `/help` and keeps
/// the dispatch below honest when a command is added.
const COMMANDS: &[(&str, &str)] = &[
    ("/help", "Show this help"),
    ("/list", "List players (including host)"),
    ("/kick <player_id>", "Disconnect a player"),
    ("/hostpos <x> <y> <z>", "Move the host player"),
    ("/hostrot <yaw>", "Set host Y rotation in degrees"),
    ("/set <param> <value>", "Change a config value"),
    ("/get <param>", "Show a config value"),
    ("/config", "Show all config values"),
    ("/reload", "Re-read the config file"),
    ("/quit", "Shut down the server"),
];

pub struct CommandProcessor {
    players: Arc<RwLock<PlayerTable>>,
    config: Arc<RwLock<ConfigStore>>,
    registry: Arc<ClientRegistry>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl CommandProcessor {
    pub fn new(
        players: Arc<RwLock<PlayerTable>>,
        config: Arc<RwLock<ConfigStore>>,
        registry: Arc<ClientRegistry>,
        shutdown: Arc<watch::Sender<bool>>,
    ) -> Self {
        CommandProcessor {
            players,
            config,
            registry,
            shutdown,
        }
    }

    /// Executes one command line on behalf of `issuer_id` and returns the
    /// output lines to route back to that issuer.
    pub async fn execute(&self, issuer_id: &str, command: &str) -> Vec<String> {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        if !trimmed.starts_with('/') {
            return vec!["Commands must start with '/'. Try /help".to_string()];
        }

        debug!("Command from {}: {}", issuer_id, trimmed);

        let mut parts = trimmed.split_whitespace();
        let name = parts.next().unwrap_or("").to_ascii_lowercase();
        let args: Vec<&str> = parts.collect();

        match name.as_str() {
            "/help" | "/?" => Self::help(),
            "/list" => self.list().await,
            "/kick" => self.kick(&args),
            "/hostpos" => self.hostpos(&args).await,
            "/hostrot" => self.hostrot(&args).await,
            "/set" => self.set(&args).await,
            "/get" => self.get(&args).await,
            "/config" => self.config.read().await.dump(),
            "/reload" => match self.config.write().await.reload() {
                Ok(line) | Err(line) => vec![line],
            },
            "/quit" | "/exit" | "/shutdown" => {
                info!("Shutdown requested by {}", issuer_id);
                let _ = self.shutdown.send(true);
                vec!["Shutting down server...".to_string()]
            }
            other => vec![format!("Unknown command: {}. Try /help", other)],
        }
    }

    fn help() -> Vec<String> {
        let mut lines = vec!["Available commands:".to_string()];
        for (name, description) in COMMANDS {
            lines.push(format!("  {:<22} {}", name, description));
        }
        lines
    }

    async fn list(&self) -> Vec<String> {
        let players = self.players.read().await.snapshot();
        if players.is_empty() {
            return vec!["No players.".to_string()];
        }

        let mut ids: Vec<&String> = players.keys().collect();
        ids.sort();

        ids.iter()
            .map(|id| {
                let state = &players[*id];
                let tag = if state.is_host { " (host)" } else { "" };
                format!(
                    "- {}{} pos=[{:.1}, {:.1}, {:.1}] rot_y={:.1}",
                    id, tag, state.pos[0], state.pos[1], state.pos[2], state.rot_y
                )
            })
            .collect()
    }

    /// Kicking only signals the connection's kick token; the receive loop
    /// owns the actual cleanup, exactly as for an organic disconnect.
    fn kick(&self, args: &[&str]) -> Vec<String> {
        let Some(player_id) = args.first() else {
            return vec!["Usage: /kick <player_id>".to_string()];
        };
        if *player_id == HOST_PLAYER_ID {
            return vec!["Cannot kick the host player.".to_string()];
        }
        if self.registry.kick(player_id) {
            vec![format!("Kicked {}.", player_id)]
        } else {
            vec![format!("No such player: {}", player_id)]
        }
    }

    async fn hostpos(&self, args: &[&str]) -> Vec<String> {
        if args.len() != 3 {
            return vec!["Usage: /hostpos <x> <y> <z>".to_string()];
        }
        let parsed: Result<Vec<f32>, _> = args.iter().map(|arg| arg.parse()).collect();
        match parsed {
            Ok(coords) => {
                self.players
                    .write()
                    .await
                    .set_host_position(coords[0], coords[1], coords[2]);
                vec![format!(
                    "Host moved to ({}, {}, {}).",
                    coords[0], coords[1], coords[2]
                )]
            }
            Err(_) => vec!["Coordinates must be numbers.".to_string()],
        }
    }

    async fn hostrot(&self, args: &[&str]) -> Vec<String> {
        let Some(raw) = args.first() else {
            return vec!["Usage: /hostrot <yaw>".to_string()];
        };
        match raw.parse::<f32>() {
            Ok(yaw) => {
                self.players.write().await.set_host_rotation(yaw);
                vec![format!("Host rotation set to {}.", yaw)]
            }
            Err(_) => vec!["Yaw must be a number.".to_string()],
        }
    }

    async fn set(&self, args: &[&str]) -> Vec<String> {
        if args.len() != 2 {
            return vec!["Usage: /set <param> <value>".to_string()];
        }
        match self.config.write().await.set(args[0], args[1]) {
            Ok(line) | Err(line) => vec![line],
        }
    }

    async fn get(&self, args: &[&str]) -> Vec<String> {
        let Some(key) = args.first() else {
            return vec!["Usage: /get <param>".to_string()];
        };
        match self.config.read().await.get(key) {
            Ok(line) | Err(line) => vec![line],
        }
    }
}
