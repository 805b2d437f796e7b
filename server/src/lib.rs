//! # LAN Game Server Library
//!
//! This library provides the authoritative server implementation for the LAN
//! multiplayer session. It owns the canonical player table, relays chat and
//! world edits between clients, and broadcasts full state snapshots so every
//! client converges on the same view of the world.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Player Table
//! The server holds the definitive position and rotation of every player,
//! including a synthetic entry for the hosting player who is not connected
//! over a socket. Clients report their own movement; everyone else's movement
//! arrives only via server snapshots.
//!
//! ### Client Lifecycle
//! Handles the complete lifecycle of client connections including:
//! - Connection acceptance, capacity checks, and player ID assignment
//! - Welcome handshake and join/leave announcements
//! - Inactivity timeouts and kicks
//! - Disconnection cleanup that runs exactly once per connection
//!
//! ### State Broadcasting
//! Transmits a snapshot of the full player table to every connection at a
//! configurable tick rate, timestamped so clients can measure staleness.
//!
//! ### Administration
//! A slash-command processor serves both the local console and remote
//! `admin_command` messages, covering player listing, kicks, host movement,
//! live config changes, and orderly shutdown.
//!
//! ## Module Organization
//!
//! - [`players`] — the authoritative player table and host entry
//! - [`registry`] — per-connection routing: outbound queues, kick tokens,
//!   activity tracking
//! - [`network`] — accept loop, per-connection tasks, broadcaster, and
//!   inactivity monitor
//! - [`commands`] — the slash-command processor
//! - [`config`] — clamped runtime configuration with JSON file persistence
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::{ConfigStore, ServerConfig};
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigStore::in_memory(ServerConfig::default());
//!     let server = Server::bind("0.0.0.0:5420", config).await?;
//!
//!     // Runs the accept loop, the snapshot broadcaster, and the
//!     // inactivity monitor until shutdown is requested.
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod config;
pub mod network;
pub mod players;
pub mod registry;
