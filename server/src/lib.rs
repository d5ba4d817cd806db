//! # Game Server Library
//!
//! This library provides the authoritative server for the multiplayer world
//! simulation. It owns every player's canonical position, integrates movement
//! commands against the shared world geometry, and broadcasts the consolidated
//! world state so predicting clients can reconcile.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Each `move` is integrated with the exact function the clients use for
//! prediction (`shared::integrate_move`): clamp to the world bounds first, then
//! reject the move if the clamped position overlaps a building. Because both
//! sides consult the same `World`, a client replaying its unacknowledged inputs
//! on top of a server position lands on the same result the server would.
//!
//! ### Session Management
//! Sessions are keyed by a client-chosen id rather than by address:
//! - Created lazily on the first `ping` or `move` from an unseen id
//! - Address refreshed on every packet to survive NAT rebinding
//! - Removed on `leave` or after a period of silence
//!
//! ### State Broadcasting
//! Every processed `ping` or `move` triggers one `all_players_state` packet,
//! sent to every session. The header carries the triggering session's id and
//! its highest integrated input sequence as `ack`.
//!
//! ## Architecture Design
//!
//! ### Single Receive Loop
//! One task receives datagrams and applies them one at a time, so session state
//! needs no locking. A housekeeping tick on the same loop evicts silent
//! sessions and bounds how long shutdown takes to notice the running flag.
//!
//! ### Persistence Off The Hot Path
//! Final positions go to a worker thread through a lock-free SPSC ring. The
//! network loop only ever produces into it and never waits: a full ring drops
//! the request.
//!
//! ## Module Organization
//!
//! - `session_manager`: session registry and timeout detection
//! - `game`: the authoritative simulation, independent of sockets
//! - `network`: UDP socket, receive loop, configuration, shutdown
//! - `persistence`: store trait, in-memory store, queue and worker
//! - `spsc`: the bounded single-producer/single-consumer ring
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//! use server::persistence::MemoryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let mut server = Server::new("127.0.0.1:8080", ServerConfig::default(), store).await?;
//!
//!     // Clearing this flag stops the loop within one housekeeping interval.
//!     let running = server.running_flag();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         running.store(false, std::sync::atomic::Ordering::Release);
//!     });
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod network;
pub mod persistence;
pub mod session_manager;
pub mod spsc;
