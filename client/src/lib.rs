//! # LAN Game Client Library
//!
//! Client-side half of the LAN multiplayer synchronization layer. The crate
//! connects to an authoritative server, mirrors the remote player table, and
//! bridges the asynchronous network worker into a synchronous per-frame game
//! loop.
//!
//! ## Architecture
//!
//! All network I/O runs on a dedicated worker thread with its own tokio
//! runtime. The game loop owns a [`session::ClientSession`] handle and talks
//! to the worker exclusively through bounded channels:
//!
//! - outgoing state is enqueued without blocking and sent as `state_update`
//!   messages at whatever pace the connection allows;
//! - incoming messages and lifecycle transitions are polled as
//!   [`session::SessionEvent`] values once per frame;
//! - the remote player cache is read as a cloned snapshot, so rendering can
//!   never race the worker.
//!
//! Connection failures are never thrown into game code. Failed connects are
//! retried per [`reconnect::ReconnectPolicy`] and surfaced once as an error
//! from `connect`; a drop mid-session surfaces as a single `Disconnected`
//! event.
//!
//! ## Module Organization
//!
//! ### Reconnect Module (`reconnect`)
//! The pure exponential-backoff policy governing connect retries.
//!
//! ### Session Module (`session`)
//! The session actor: connect/retry state machine, send and receive loops,
//! remote snapshot cache, and the polled event inbox.

pub mod reconnect;
pub mod session;
