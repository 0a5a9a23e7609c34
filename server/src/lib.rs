//! # Store Host Library
//!
//! This library hosts the shared key-tree store that room replicas use to
//! agree with each other. It holds no room or chess logic: validation,
//! seating and rematch decisions all happen in the replicas, and the host
//! only commits what they send.
//!
//! ## Core Responsibilities
//!
//! ### Serving The Tree
//! One `MemoryStore` holds every room under `rooms/<ID>`. Replicas read it
//! (`Fetch`), overwrite it (`Write`) and race on it (`CompareAndSet`). Every
//! committed mutation bumps a store-wide revision.
//!
//! ### Push Subscriptions
//! A `Subscribe` request is acknowledged and then followed by the current
//! value and one `Changed` push per change at or below the subscribed path.
//!
//! ### Replica Management
//! Handles the lifecycle of replica connections:
//! - Connection establishment with a protocol version check
//! - Heartbeat tracking and timeout detection
//! - Disconnection and cleanup of the replica's subscriptions
//!
//! Dropping a replica never touches the tree. Seats stay taken until the
//! participant gives them up.
//!
//! ## Architecture Design
//!
//! ### Single Event Loop
//! All requests are handled sequentially by one loop, so compare-and-set
//! decisions are serialized without any extra locking.
//!
//! ### UDP-Based Communication
//! Requests carry an id and are answered exactly once; a lost packet shows
//! up on the replica as a timeout. Values travel as JSON text inside
//! bincode-encoded packets.
//!
//! ## Module Organization
//!
//! ### Client Manager Module (`client_manager`)
//! Connected replicas, their last heartbeat and their subscription tasks.
//!
//! ### Network Module (`network`)
//! Socket tasks, request dispatch and push forwarding.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use shared::MemoryStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(
//!         "127.0.0.1:8080",
//!         Arc::new(MemoryStore::new()),
//!         64,                      // max replicas
//!         Duration::from_secs(5),  // heartbeat timeout
//!     )
//!     .await?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! The server runs internal async tasks that handle:
//! - **Network Receiver**: Continuously listens for incoming packets
//! - **Network Sender**: Writes responses and pushes in queue order
//! - **Timeout Checker**: Removes replicas that stopped sending heartbeats
//! - **Subscription Forwarders**: One per subscription, turning store pushes into packets

pub mod client_manager;
pub mod network;
