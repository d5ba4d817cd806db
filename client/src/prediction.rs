//! Client-side prediction
//!
//! Every local input is applied to the predicted position immediately and
//! remembered in [`PendingInputs`] until the server acknowledges it.

use log::debug;
use shared::protocol::Packet;
use shared::{integrate_move, Direction, MovementCommand, PlayerState, World, PLAYER_SPEED};
use std::collections::VecDeque;

/// An input that has been sent but not yet acknowledged
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingInput {
    pub sequence: u32,
    pub command: MovementCommand,
}

/// Bounded, sequence-ordered history of unacknowledged inputs.
///
/// Holds at most `capacity - 1` entries; pushing into a full history evicts
/// the oldest entry.
#[derive(Debug, Clone)]
pub struct PendingInputs {
    inputs: VecDeque<PendingInput>,
    capacity: usize,
}

impl PendingInputs {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            inputs: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Records an input, returning the entry evicted to make room, if any.
    pub fn push(&mut self, input: PendingInput) -> Option<PendingInput> {
        let evicted = if self.inputs.len() + 1 >= self.capacity {
            self.inputs.pop_front()
        } else {
            None
        };

        let position = self
            .inputs
            .partition_point(|pending| pending.sequence < input.sequence);
        self.inputs.insert(position, input);
        evicted
    }

    /// Drops every entry with `sequence <= ack`. Returns how many were dropped.
    pub fn acknowledge(&mut self, ack: u32) -> usize {
        let confirmed = self.inputs.partition_point(|pending| pending.sequence <= ack);
        self.inputs.drain(..confirmed);
        confirmed
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingInput> {
        self.inputs.iter()
    }

    pub fn oldest_sequence(&self) -> Option<u32> {
        self.inputs.front().map(|pending| pending.sequence)
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Owns the predicted local position and the outgoing sequence counter
#[derive(Debug, Clone)]
pub struct Predictor {
    session_id: u32,
    position: PlayerState,
    next_sequence: u32,
    speed: f32,
}

impl Predictor {
    pub fn new(session_id: u32, start: PlayerState) -> Self {
        Self {
            session_id,
            position: start,
            next_sequence: 1,
            speed: PLAYER_SPEED,
        }
    }

    pub fn position(&self) -> PlayerState {
        self.position
    }

    pub fn set_position(&mut self, position: PlayerState) {
        self.position = position;
    }

    /// Sequence number the next input will carry
    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    /// Sequence of the most recently issued input, 0 before the first one
    pub fn last_sequence(&self) -> u32 {
        self.next_sequence.wrapping_sub(1)
    }

    /// Turns one frame of input into a sequenced move.
    ///
    /// The move is recorded in `pending` and, when `apply_locally` is set,
    /// integrated into the predicted position right away. The returned packet
    /// is ready to send.
    pub fn apply(
        &mut self,
        world: &World,
        pending: &mut PendingInputs,
        direction: Direction,
        frame_delta: f32,
        apply_locally: bool,
    ) -> Packet {
        let command = MovementCommand::new(direction, self.speed, frame_delta);
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        if apply_locally {
            self.position = integrate_move(world, self.position, &command);
        }

        if let Some(evicted) = pending.push(PendingInput { sequence, command }) {
            debug!(
                "Pending input history full, evicted sequence {}",
                evicted.sequence
            );
        }

        Packet::movement(self.session_id, sequence, command)
    }
}
