//! Client-side game state shared between the render loop and the network thread

use crate::interpolation::SnapshotBuffer;
use crate::prediction::{PendingInputs, Predictor};
use crate::reconciliation::Reconciler;
use log::{debug, info, warn};
use shared::protocol::{Packet, Payload, LEAVE_REASON_QUIT};
use shared::{
    timestamp_millis, Direction, PlayerState, World, PENDING_INPUT_CAPACITY, RENDER_DELAY,
    SNAPSHOT_CAPACITY,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Debug switches toggled at runtime with the 1/2/3 keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureToggles {
    pub prediction: bool,
    pub reconciliation: bool,
    pub interpolation: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            prediction: true,
            reconciliation: true,
            interpolation: true,
        }
    }
}

/// Key presses detected during one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TogglePresses {
    pub prediction: bool,
    pub reconciliation: bool,
    pub interpolation: bool,
}

/// Everything the renderer needs for one frame
#[derive(Debug, Clone)]
pub struct RenderView {
    pub session_id: u32,
    pub local: PlayerState,
    pub remotes: Vec<(u32, PlayerState)>,
    pub toggles: FeatureToggles,
    pub pending_inputs: usize,
    pub last_ack: Option<u32>,
    pub connected: bool,
}

pub struct ClientGameState {
    session_id: u32,
    world: World,
    predictor: Predictor,
    pending: PendingInputs,
    reconciler: Reconciler,
    own_snapshots: SnapshotBuffer,
    remotes: BTreeMap<u32, SnapshotBuffer>,
    toggles: FeatureToggles,
    render_delay: Duration,
    connected: bool,
}

impl ClientGameState {
    pub fn new(session_id: u32, world: World) -> Self {
        Self {
            session_id,
            world,
            predictor: Predictor::new(session_id, PlayerState::default()),
            pending: PendingInputs::new(PENDING_INPUT_CAPACITY),
            reconciler: Reconciler::new(),
            own_snapshots: SnapshotBuffer::new(SNAPSHOT_CAPACITY),
            remotes: BTreeMap::new(),
            toggles: FeatureToggles::default(),
            render_delay: RENDER_DELAY,
            connected: false,
        }
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn toggles(&self) -> FeatureToggles {
        self.toggles
    }

    pub fn predicted_position(&self) -> PlayerState {
        self.predictor.position()
    }

    pub fn pending_inputs(&self) -> &PendingInputs {
        &self.pending
    }

    pub fn last_ack(&self) -> Option<u32> {
        self.reconciler.last_ack()
    }

    /// True once any server message addressed to this session has arrived
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn remote_ids(&self) -> Vec<u32> {
        self.remotes.keys().copied().collect()
    }

    pub fn handle_toggles(&mut self, presses: TogglePresses) {
        if presses.prediction {
            self.toggles.prediction = !self.toggles.prediction;
            info!("Client-side prediction: {}", self.toggles.prediction);
        }
        if presses.reconciliation {
            self.toggles.reconciliation = !self.toggles.reconciliation;
            info!("Server reconciliation: {}", self.toggles.reconciliation);
        }
        if presses.interpolation {
            self.toggles.interpolation = !self.toggles.interpolation;
            info!("Interpolation: {}", self.toggles.interpolation);
        }
    }

    /// Turns this frame's input into a move packet. Returns `None` when idle.
    pub fn apply_local_input(
        &mut self,
        direction: Option<Direction>,
        frame_delta: f32,
    ) -> Option<Packet> {
        let direction = direction?;
        if !(frame_delta.is_finite() && frame_delta > 0.0) {
            return None;
        }

        Some(self.predictor.apply(
            &self.world,
            &mut self.pending,
            direction,
            frame_delta,
            self.toggles.prediction,
        ))
    }

    pub fn heartbeat_packet(&self) -> Packet {
        Packet::ping(self.session_id, self.predictor.last_sequence(), timestamp_millis())
    }

    pub fn leave_packet(&self) -> Packet {
        Packet::leave(self.session_id, self.predictor.last_sequence(), LEAVE_REASON_QUIT)
    }

    /// Applies one decoded server message received at `now`.
    pub fn apply_server_packet(&mut self, packet: &Packet, now: Instant) {
        let header = &packet.header;

        match &packet.payload {
            Payload::StateUpdate(state) => {
                if header.session_id != self.session_id {
                    warn!(
                        "State update for session {} ignored (we are {})",
                        header.session_id, self.session_id
                    );
                    return;
                }
                self.apply_own_state(PlayerState::new(state.x, state.y), header.ack, now);
            }
            Payload::AllPlayersState(all) => {
                let mut seen = Vec::with_capacity(all.players.len());
                for entry in &all.players {
                    if entry.session_id == self.session_id {
                        continue;
                    }
                    seen.push(entry.session_id);
                    self.remotes
                        .entry(entry.session_id)
                        .or_insert_with(|| {
                            debug!("Player {} appeared", entry.session_id);
                            SnapshotBuffer::new(SNAPSHOT_CAPACITY)
                        })
                        .push(PlayerState::new(entry.x, entry.y), now);
                }
                self.remotes.retain(|id, _| {
                    let keep = seen.contains(id);
                    if !keep {
                        debug!("Player {} left", id);
                    }
                    keep
                });

                // Only the broadcast triggered by our own packet carries our ack.
                if header.session_id == self.session_id {
                    if let Some(own) = all.find(self.session_id) {
                        self.apply_own_state(PlayerState::new(own.x, own.y), header.ack, now);
                    }
                }
            }
            other => {
                warn!("Unexpected {:?} from server", other.message_type());
            }
        }
    }

    fn apply_own_state(&mut self, authoritative: PlayerState, ack: u32, now: Instant) {
        if !self.connected {
            info!(
                "Session {} established at ({}, {})",
                self.session_id, authoritative.x, authoritative.y
            );
            self.connected = true;
        }

        let corrected = match self.reconciler.apply(
            &self.world,
            authoritative,
            ack,
            &mut self.pending,
            self.predictor.position(),
            self.toggles.reconciliation,
        ) {
            Some(corrected) => corrected,
            None => return,
        };

        self.predictor.set_position(corrected);
        self.own_snapshots.push(corrected, now);
    }

    /// Where the local player is drawn
    pub fn local_render_position(&self, now: Instant) -> PlayerState {
        if self.toggles.prediction {
            return self.predictor.position();
        }

        let sampled = if self.toggles.interpolation {
            self.own_snapshots.render_position(now, self.render_delay)
        } else {
            self.own_snapshots.latest().map(|snapshot| snapshot.position)
        };
        sampled.unwrap_or_else(|| self.predictor.position())
    }

    /// Where every remote player is drawn, ordered by session id
    pub fn remote_render_positions(&self, now: Instant) -> Vec<(u32, PlayerState)> {
        self.remotes
            .iter()
            .filter_map(|(id, buffer)| {
                let position = if self.toggles.interpolation {
                    buffer.render_position(now, self.render_delay)
                } else {
                    buffer.latest().map(|snapshot| snapshot.position)
                };
                position.map(|position| (*id, position))
            })
            .collect()
    }

    pub fn render_view(&self, now: Instant) -> RenderView {
        RenderView {
            session_id: self.session_id,
            local: self.local_render_position(now),
            remotes: self.remote_render_positions(now),
            toggles: self.toggles,
            pending_inputs: self.pending.len(),
            last_ack: self.reconciler.last_ack(),
            connected: self.connected,
        }
    }
}

/// State shared between the render thread and the network thread.
///
/// Created and wrapped in an `Arc` before either thread starts.
pub struct SharedState {
    game: Mutex<ClientGameState>,
    running: AtomicBool,
}

impl SharedState {
    pub fn new(game: ClientGameState) -> Self {
        Self {
            game: Mutex::new(game),
            running: AtomicBool::new(true),
        }
    }

    pub fn game(&self) -> MutexGuard<'_, ClientGameState> {
        self.game.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}
