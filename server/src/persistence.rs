//! Player position persistence
//!
//! The network loop is the only producer into a lock-free SPSC ring; a
//! dedicated worker thread drains it into a [`PlayerStore`]. Queueing never
//! blocks: when the ring is full the newest request is dropped and counted.
//! Loading happens synchronously, once per session creation.

use crate::spsc::{self, Consumer, Producer};
use log::{debug, info, warn};
use shared::PlayerState;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long the worker sleeps when the ring is empty.
const IDLE_BACKOFF: Duration = Duration::from_millis(5);

/// Backing storage for player positions.
pub trait PlayerStore: Send + Sync + 'static {
    fn load_player_state(&self, session_id: u32) -> Option<PlayerState>;
    fn save_player_state(&self, session_id: u32, state: PlayerState);
}

/// What the simulation needs from persistence.
pub trait Persistence: Send {
    /// Returns the last stored position for a returning session.
    fn load_player_state(&self, session_id: u32) -> Option<PlayerState>;

    /// Fire-and-forget save. Returns false if the request was dropped.
    fn queue_persist(&mut self, session_id: u32, state: PlayerState) -> bool;
}

/// In-process store used by the server binary and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    states: Mutex<HashMap<u32, PlayerState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PlayerStore for MemoryStore {
    fn load_player_state(&self, session_id: u32) -> Option<PlayerState> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&session_id)
            .copied()
    }

    fn save_player_state(&self, session_id: u32, state: PlayerState) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id, state);
    }
}

#[derive(Debug, Clone, Copy)]
struct PersistRequest {
    session_id: u32,
    state: PlayerState,
}

/// Producer side of the persistence pipeline plus its worker thread.
pub struct PersistenceQueue {
    producer: Producer<PersistRequest>,
    store: Arc<dyn PlayerStore>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    dropped: u64,
}

impl PersistenceQueue {
    /// Starts the worker thread. `capacity` is the ring's slot count.
    pub fn spawn(store: Arc<dyn PlayerStore>, capacity: usize) -> io::Result<Self> {
        let (producer, consumer) = spsc::channel(capacity);
        let running = Arc::new(AtomicBool::new(true));

        // The ring and the flag already live behind `Arc`s before the thread starts.
        let worker = {
            let store = Arc::clone(&store);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("persistence".to_string())
                .spawn(move || run_worker(consumer, store, running))?
        };

        info!("Persistence worker started (queue capacity {})", capacity);

        Ok(Self {
            producer,
            store,
            running,
            worker: Some(worker),
            dropped: 0,
        })
    }

    /// Requests dropped because the ring was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Requests queued but not yet written.
    pub fn pending(&self) -> usize {
        self.producer.len()
    }

    /// Stops the worker after it has drained every queued request.
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Persistence worker panicked");
            }
        }
    }
}

impl Persistence for PersistenceQueue {
    fn load_player_state(&self, session_id: u32) -> Option<PlayerState> {
        self.store.load_player_state(session_id)
    }

    fn queue_persist(&mut self, session_id: u32, state: PlayerState) -> bool {
        match self.producer.push(PersistRequest { session_id, state }) {
            Ok(()) => true,
            Err(_) => {
                self.dropped += 1;
                warn!(
                    "Persistence queue full, dropping state for session {} ({} dropped)",
                    session_id, self.dropped
                );
                false
            }
        }
    }
}

impl Drop for PersistenceQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    mut consumer: Consumer<PersistRequest>,
    store: Arc<dyn PlayerStore>,
    running: Arc<AtomicBool>,
) {
    loop {
        // Read the flag before draining: anything pushed before `shutdown`
        // cleared it is visible to the pops below.
        let stopping = !running.load(Ordering::Acquire);

        while let Some(request) = consumer.pop() {
            debug!(
                "Persisting session {} at ({}, {})",
                request.session_id, request.state.x, request.state.y
            );
            store.save_player_state(request.session_id, request.state);
        }

        if stopping {
            break;
        }
        thread::sleep(IDLE_BACKOFF);
    }
}
