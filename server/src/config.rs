//! Typed server configuration with per-key clamping and JSON persistence.
//!
//! Backs the `/set`, `/get`, `/config`, and `/reload` admin commands. Every
//! key has a parse rule and a clamp range, so a bad value from the console or
//! the config file can degrade to a warning line but never crash a loop.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;

pub const TICK_RATE_RANGE: (u32, u32) = (5, 120);
pub const MAX_PLAYERS_RANGE: (usize, usize) = (1, 64);
pub const CLIENT_TIMEOUT_RANGE: (u64, u64) = (5, 300);

const KNOWN_KEYS: &str = "tick_rate, max_players, client_timeout_secs, debug";

/// Effective server settings. Hot-reloadable fields only; the bind address
/// and port require a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Snapshot broadcast rate in Hz.
    pub tick_rate: u32,
    /// Maximum concurrent client connections.
    pub max_players: usize,
    /// Seconds of silence before a client is kicked.
    pub client_timeout_secs: u64,
    /// Verbose logging.
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            tick_rate: 20,
            max_players: 16,
            client_timeout_secs: 30,
            debug: false,
        }
    }
}

impl ServerConfig {
    /// Forces every field into its allowed range. Applied after every load
    /// so a hand-edited file cannot push the server outside safe bounds.
    fn clamp(&mut self) {
        self.tick_rate = self.tick_rate.clamp(TICK_RATE_RANGE.0, TICK_RATE_RANGE.1);
        self.max_players = self
            .max_players
            .clamp(MAX_PLAYERS_RANGE.0, MAX_PLAYERS_RANGE.1);
        self.client_timeout_secs = self
            .client_timeout_secs
            .clamp(CLIENT_TIMEOUT_RANGE.0, CLIENT_TIMEOUT_RANGE.1);
    }
}

/// Key-value view over [`ServerConfig`] plus its backing file.
pub struct ConfigStore {
    path: Option<PathBuf>,
    values: ServerConfig,
}

impl ConfigStore {
    /// A store with no backing file; `/reload` reports an error.
    pub fn in_memory(values: ServerConfig) -> Self {
        let mut values = values;
        values.clamp();
        ConfigStore { path: None, values }
    }

    /// Opens (or creates with defaults) the config file at `path`.
    pub fn open(path: PathBuf) -> Self {
        let mut store = ConfigStore {
            path: Some(path),
            values: ServerConfig::default(),
        };

        match store.read_file() {
            Ok(Some(values)) => {
                store.values = values;
                info!("Loaded config from {:?}", store.path.as_deref());
            }
            Ok(None) => {
                info!("No config file yet; writing defaults");
                if let Err(err) = store.save() {
                    warn!("Could not write default config: {}", err);
                }
            }
            Err(err) => {
                warn!("Failed to load config, using defaults: {}", err);
            }
        }
        store
    }

    pub fn values(&self) -> &ServerConfig {
        &self.values
    }

    /// Looks up one key for the `/get` command.
    pub fn get(&self, key: &str) -> Result<String, String> {
        let value: &dyn fmt::Display = match key {
            "tick_rate" => &self.values.tick_rate,
            "max_players" => &self.values.max_players,
            "client_timeout_secs" => &self.values.client_timeout_secs,
            "debug" => &self.values.debug,
            _ => return Err(format!("Unknown config key: {} (known: {})", key, KNOWN_KEYS)),
        };
        Ok(format!("{} = {}", key, value))
    }

    /// Parses and applies one key for the `/set` command, clamping into the
    /// key's range. Returns the confirmation line with the effective value.
    pub fn set(&mut self, key: &str, raw: &str) -> Result<String, String> {
        match key {
            "tick_rate" => {
                let parsed: u32 = raw
                    .parse()
                    .map_err(|_| format!("tick_rate must be an integer, got '{}'", raw))?;
                self.values.tick_rate = parsed.clamp(TICK_RATE_RANGE.0, TICK_RATE_RANGE.1);
            }
            "max_players" => {
                let parsed: usize = raw
                    .parse()
                    .map_err(|_| format!("max_players must be an integer, got '{}'", raw))?;
                self.values.max_players = parsed.clamp(MAX_PLAYERS_RANGE.0, MAX_PLAYERS_RANGE.1);
            }
            "client_timeout_secs" => {
                let parsed: u64 = raw
                    .parse()
                    .map_err(|_| format!("client_timeout_secs must be an integer, got '{}'", raw))?;
                self.values.client_timeout_secs =
                    parsed.clamp(CLIENT_TIMEOUT_RANGE.0, CLIENT_TIMEOUT_RANGE.1);
            }
            "debug" => {
                self.values.debug = raw
                    .parse()
                    .map_err(|_| format!("debug must be true or false, got '{}'", raw))?;
            }
            _ => return Err(format!("Unknown config key: {} (known: {})", key, KNOWN_KEYS)),
        }

        let line = self.get(key)?;
        info!("Config change: {}", line);
        Ok(line)
    }

    /// All keys with their ranges, for the `/config` command.
    pub fn dump(&self) -> Vec<String> {
        vec![
            format!(
                "tick_rate = {} (range {}-{})",
                self.values.tick_rate, TICK_RATE_RANGE.0, TICK_RATE_RANGE.1
            ),
            format!(
                "max_players = {} (range {}-{})",
                self.values.max_players, MAX_PLAYERS_RANGE.0, MAX_PLAYERS_RANGE.1
            ),
            format!(
                "client_timeout_secs = {} (range {}-{})",
                self.values.client_timeout_secs, CLIENT_TIMEOUT_RANGE.0, CLIENT_TIMEOUT_RANGE.1
            ),
            format!("debug = {}", self.values.debug),
        ]
    }

    /// Re-reads the backing file for the `/reload` command.
    pub fn reload(&mut self) -> Result<String, String> {
        match self.read_file() {
            Ok(Some(values)) => {
                self.values = values;
                info!("Reloaded config from disk");
                Ok("Config reloaded.".to_string())
            }
            Ok(None) => Err(match &self.path {
                Some(path) => format!("Config file {:?} does not exist", path),
                None => "No config file configured".to_string(),
            }),
            Err(err) => Err(format!("Reload failed: {}", err)),
        }
    }

    /// Writes the current values back to the backing file.
    pub fn save(&self) -> Result<(), String> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| "No config file configured".to_string())?;
        let json = serde_json::to_string_pretty(&self.values)
            .map_err(|err| format!("Serialize failed: {}", err))?;
        fs::write(path, json).map_err(|err| format!("Write failed: {}", err))
    }

    fn read_file(&self) -> Result<Option<ServerConfig>, String> {
        let path = match &self.path {
            Some(path) if path.exists() => path,
            _ => return Ok(None),
        };
        let text = fs::read_to_string(path).map_err(|err| err.to_string())?;
        let mut values: ServerConfig =
            serde_json::from_str(&text).map_err(|err| err.to_string())?;
        values.clamp();
        Ok(Some(values))
    }
}
