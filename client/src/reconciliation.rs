//! Server reconciliation: rebase the predicted position onto authoritative state

use crate::prediction::{PendingInput, PendingInputs};
use log::debug;
use shared::{integrate_move, PlayerState, World};

/// Corrections smaller than this are not worth a log line.
const CORRECTION_LOG_THRESHOLD: f32 = 0.5;

/// Replays `inputs` in order on top of `start`.
pub fn replay<'a, I>(world: &World, start: PlayerState, inputs: I) -> PlayerState
where
    I: IntoIterator<Item = &'a PendingInput>,
{
    inputs.into_iter().fold(start, |state, pending| {
        integrate_move(world, state, &pending.command)
    })
}

/// Drops every input the server confirmed with `ack`, then replays the rest
/// on top of the authoritative position.
pub fn reconcile(
    world: &World,
    authoritative: PlayerState,
    ack: u32,
    pending: &mut PendingInputs,
) -> PlayerState {
    pending.acknowledge(ack);
    replay(world, authoritative, pending.iter())
}

/// Tracks the newest acknowledgement so reordered server messages cannot roll
/// the local player back.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    last_ack: Option<u32>,
    corrections: u64,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_ack(&self) -> Option<u32> {
        self.last_ack
    }

    /// Number of reconciliations that moved the predicted position noticeably
    pub fn corrections(&self) -> u64 {
        self.corrections
    }

    /// Returns true if `ack` is older than one already applied.
    pub fn is_stale(&self, ack: u32) -> bool {
        matches!(self.last_ack, Some(last) if ack < last)
    }

    /// Applies an authoritative update for the local player.
    ///
    /// Returns `None` for stale updates. With `replay_pending` off the
    /// confirmed inputs are still dropped but the remaining ones are not
    /// replayed, so the result is the authoritative position itself.
    pub fn apply(
        &mut self,
        world: &World,
        authoritative: PlayerState,
        ack: u32,
        pending: &mut PendingInputs,
        predicted: PlayerState,
        replay_pending: bool,
    ) -> Option<PlayerState> {
        if self.is_stale(ack) {
            debug!(
                "Ignoring stale update (ack {} < {:?})",
                ack, self.last_ack
            );
            return None;
        }
        self.last_ack = Some(ack);

        let corrected = if replay_pending {
            reconcile(world, authoritative, ack, pending)
        } else {
            pending.acknowledge(ack);
            authoritative
        };

        let dx = corrected.x - predicted.x;
        let dy = corrected.y - predicted.y;
        let distance = (dx * dx + dy * dy).sqrt();
        if distance > CORRECTION_LOG_THRESHOLD {
            self.corrections += 1;
            debug!("Rollback needed! Distance: {:.2}", distance);
        }

        Some(corrected)
    }
}
