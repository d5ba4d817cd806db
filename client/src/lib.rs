//! # Game Client Library
//!
//! Client side of the netcode stack: input capture, prediction, server
//! reconciliation, snapshot interpolation of other players, the UDP session
//! with the server, and a small macroquad renderer.
//!
//! ## Architecture Overview
//!
//! Two threads share one [`game::SharedState`]. The render thread samples the
//! keyboard each frame, predicts the local player and hands move packets to
//! the network thread over a channel. The network thread owns the UDP socket,
//! sends those moves plus heartbeat pings, and applies every server message
//! to the shared state.
//!
//! ### Client-Side Prediction
//! Inputs move the local player immediately, using the same integration
//! function and world geometry as the server. Every input is kept, with its
//! sequence number, until the server acknowledges it.
//!
//! ### Server Reconciliation
//! Authoritative positions for the local player arrive with the sequence of
//! the last input the server integrated. The client drops the acknowledged
//! inputs and replays the rest on top of the server's answer. Messages with
//! an older acknowledgement than one already applied are ignored, so loss and
//! reordering never roll the player back.
//!
//! ### Interpolation
//! Other players are drawn slightly in the past, blended between the two
//! broadcasts that bracket the render time.
//!
//! ## Module Organization
//!
//! - `prediction`: pending input history and the local predictor
//! - `reconciliation`: replay of unacknowledged inputs onto server state
//! - `interpolation`: per-player snapshot buffers
//! - `game`: the state shared by both threads and the feature toggles
//! - `network`: socket loop, heartbeat and shutdown
//! - `input`: keyboard sampling
//! - `rendering`: drawing the world, the players and the HUD
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::game::{ClientGameState, SharedState};
//! use shared::{Direction, World};
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! let shared = Arc::new(SharedState::new(ClientGameState::new(42, World::standard())));
//! let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
//! let network = client::network::spawn("127.0.0.1:8080".to_string(), Arc::clone(&shared), rx)?;
//!
//! // One frame of the render loop
//! if let Some(packet) = shared.game().apply_local_input(Some(Direction::Right), 1.0 / 60.0) {
//!     tx.send(packet)?;
//! }
//! let view = shared.game().render_view(Instant::now());
//! println!("local player at ({}, {})", view.local.x, view.local.y);
//!
//! shared.stop();
//! network.join().ok();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod game;
pub mod input;
pub mod interpolation;
pub mod network;
pub mod prediction;
pub mod reconciliation;
pub mod rendering;
