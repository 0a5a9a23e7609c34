//! # Room Session Client Library
//!
//! This library is the replica side of a two-seat turn-based room: every
//! participant runs one, and all of them stay in agreement through a shared
//! key-tree store instead of talking to each other.
//!
//! ## Architecture Overview
//!
//! Each room is one subtree of the store (`rooms/<ID>`). Replicas subscribe
//! to it and rebuild their view from every push. Writes go back through a
//! small set of components, each owning one part of the record:
//!
//! ### Authoritative Pushes
//! The store is the only source of truth. A replica may keep a scratch copy
//! of a move it just made, but the next push replaces it unconditionally.
//!
//! ### Transactions For Contended Fields
//! Seats and rematch votes can be raced by two participants, so they are only
//! ever changed through the store's atomic transaction. The game record has a
//! single legitimate writer at any time (the side to move).
//!
//! ### Lazy Expiry
//! Rooms carry their creation time. Any replica that reads an expired room
//! deletes it; there is no background sweeper.
//!
//! ## Module Organization
//!
//! ### Lifecycle (`lifecycle`)
//! Room creation with collision detection, expiry checks and teardown.
//!
//! ### Seats (`seats`)
//! Resolves a participant to white, black or spectator. Re-entry is free;
//! claiming an empty seat is transactional.
//!
//! ### Arbiter (`arbiter`)
//! Validates moves in a fixed order (spectator, turn, opponent present,
//! legality) and publishes the next game record.
//!
//! ### Rematch (`rematch`)
//! Two-phase vote; the second vote resets the game in the same commit.
//!
//! ### Status and View (`status`, `view`)
//! Pure projections: the room status derived from the position, and the
//! local piece selection with its candidate destinations.
//!
//! ### Session (`session`)
//! Ties the above together for one participant in one room.
//!
//! ### Network (`network`)
//! `RemoteStore`, the store capability spoken over UDP to a store host.
//!
//! ### Input (`input`)
//! Line commands for the terminal client.
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::config::EngineConfig;
//! use client::network::RemoteStore;
//! use client::session::Engine;
//! use shared::{ChessRules, SystemClock};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default();
//! let store = Arc::new(RemoteStore::connect("127.0.0.1:8080", &config).await?);
//! let engine = Engine::new(store, Arc::new(ChessRules::new()), Arc::new(SystemClock), config);
//!
//! let mut session = engine.join("ABC123", "device-1", "Ada").await?;
//! let mut pushes = session.subscribe().await?;
//! while let Some(snapshot) = pushes.recv().await {
//!     if let Some(status) = session.apply_snapshot(snapshot).await? {
//!         println!("{}", status);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod arbiter;
pub mod config;
pub mod error;
pub mod input;
pub mod lifecycle;
pub mod network;
pub mod rematch;
pub mod seats;
pub mod session;
pub mod status;
pub mod view;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use error::{SessionError, SessionResult};
pub use session::{ClientSession, Engine};
