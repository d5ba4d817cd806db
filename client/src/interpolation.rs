//! Snapshot interpolation for rendering positions slightly in the past

use shared::PlayerState;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Snapshots older than this (relative to the newest) are pruned.
pub const SNAPSHOT_MAX_AGE: Duration = Duration::from_secs(1);

/// A position as received at a point in time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub position: PlayerState,
    pub timestamp: Instant,
}

/// Time-ordered positions for one player, bounded by count and by age.
#[derive(Debug, Clone)]
pub struct SnapshotBuffer {
    snapshots: VecDeque<Snapshot>,
    capacity: usize,
    max_age: Duration,
}

impl SnapshotBuffer {
    pub fn new(capacity: usize) -> Self {
        Self::with_max_age(capacity, SNAPSHOT_MAX_AGE)
    }

    pub fn with_max_age(capacity: usize, max_age: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            snapshots: VecDeque::with_capacity(capacity),
            capacity,
            max_age,
        }
    }

    /// Inserts a snapshot, keeping the buffer ordered by timestamp.
    pub fn push(&mut self, position: PlayerState, timestamp: Instant) {
        let index = self
            .snapshots
            .partition_point(|snapshot| snapshot.timestamp <= timestamp);
        self.snapshots.insert(index, Snapshot { position, timestamp });

        while self.snapshots.len() > self.capacity {
            self.snapshots.pop_front();
        }
        self.prune();
    }

    fn prune(&mut self) {
        let newest = match self.snapshots.back() {
            Some(snapshot) => snapshot.timestamp,
            None => return,
        };

        while self.snapshots.len() > 1 {
            match self.snapshots.front() {
                Some(oldest) if newest.saturating_duration_since(oldest.timestamp) > self.max_age => {
                    self.snapshots.pop_front();
                }
                _ => break,
            }
        }
    }

    /// Position at `at`.
    ///
    /// Interpolates linearly between the two snapshots bracketing `at` and
    /// returns the nearest boundary snapshot outside the buffered range.
    /// Never extrapolates.
    pub fn sample(&self, at: Instant) -> Option<PlayerState> {
        let first = self.snapshots.front()?;
        let last = self.snapshots.back()?;

        if at <= first.timestamp {
            return Some(first.position);
        }
        if at >= last.timestamp {
            return Some(last.position);
        }

        let index = self
            .snapshots
            .partition_point(|snapshot| snapshot.timestamp <= at);
        let from = &self.snapshots[index - 1];
        let to = &self.snapshots[index];

        let span = to.timestamp.duration_since(from.timestamp).as_secs_f64();
        if span <= 0.0 {
            return Some(to.position);
        }
        let alpha = (at.duration_since(from.timestamp).as_secs_f64() / span) as f32;

        Some(from.position.lerp(&to.position, alpha.clamp(0.0, 1.0)))
    }

    /// Samples at `now - delay`, or at `now` if that would precede the clock's origin.
    pub fn render_position(&self, now: Instant, delay: Duration) -> Option<PlayerState> {
        let target = now.checked_sub(delay).unwrap_or(now);
        self.sample(target)
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
