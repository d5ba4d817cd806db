use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod protocol;

pub const PLAYER_SPEED: f32 = 300.0;
pub const WORLD_WIDTH: f32 = 800.0;
pub const WORLD_HEIGHT: f32 = 600.0;
pub const PLAYER_SIZE: f32 = 32.0;

/// Largest number of players carried by one `all_players_state` payload.
pub const MAX_PLAYERS: usize = 32;

/// Client sends a ping when nothing else went out for this long.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);
/// Server evicts a session after this long without traffic.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(5);
/// How far behind real time the interpolator samples.
pub const RENDER_DELAY: Duration = Duration::from_millis(50);

/// Slot count of the client pending-input ring; one slot stays free.
pub const PENDING_INPUT_CAPACITY: usize = 128;
/// Snapshots kept per interpolated entity.
pub const SNAPSHOT_CAPACITY: usize = 64;

/// The four movement directions a command can carry.
///
/// Screen coordinates: `y` grows downwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn vector(self) -> (f32, f32) {
        match self {
            Direction::Up => (0.0, -1.0),
            Direction::Down => (0.0, 1.0),
            Direction::Left => (-1.0, 0.0),
            Direction::Right => (1.0, 0.0),
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Direction::Up => 0,
            Direction::Down => 1,
            Direction::Left => 2,
            Direction::Right => 3,
        }
    }

    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Direction::Up),
            1 => Some(Direction::Down),
            2 => Some(Direction::Left),
            3 => Some(Direction::Right),
            _ => None,
        }
    }
}

/// Canonical position of one player. `(x, y)` is the top-left corner of the hitbox.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerState {
    pub x: f32,
    pub y: f32,
}

impl PlayerState {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Linear blend towards `other`; `alpha` is expected in `[0, 1]`.
    pub fn lerp(&self, other: &PlayerState, alpha: f32) -> PlayerState {
        PlayerState {
            x: self.x + (other.x - self.x) * alpha,
            y: self.y + (other.y - self.y) * alpha,
        }
    }
}

/// A single movement input: direction, speed in units per second, and elapsed seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovementCommand {
    pub direction: Direction,
    pub speed: f32,
    pub delta: f32,
}

impl MovementCommand {
    pub fn new(direction: Direction, speed: f32, delta: f32) -> Self {
        Self {
            direction,
            speed,
            delta,
        }
    }
}

/// Axis-aligned building footprint that players cannot enter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Building {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Building {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn get_bounds(&self) -> (f32, f32, f32, f32) {
        (self.x, self.y, self.x + self.width, self.y + self.height)
    }
}

/// Immutable world geometry shared by the server simulation and client prediction.
///
/// Both sides must integrate against the same `World` value; reconciliation is
/// only exact when the server and the predictor clamp and collide identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct World {
    pub width: f32,
    pub height: f32,
    pub buildings: Vec<Building>,
}

impl World {
    /// A world with bounds and no buildings.
    pub fn empty(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            buildings: Vec::new(),
        }
    }

    /// The map every server and client uses unless told otherwise.
    pub fn standard() -> Self {
        Self {
            width: WORLD_WIDTH,
            height: WORLD_HEIGHT,
            buildings: vec![
                Building::new(160.0, 120.0, 120.0, 80.0),
                Building::new(520.0, 100.0, 96.0, 160.0),
                Building::new(300.0, 380.0, 200.0, 64.0),
            ],
        }
    }

    /// True when a `w`×`h` box at `(x, y)` overlaps any building footprint.
    ///
    /// Touching edges do not count as a collision.
    pub fn check_collision(&self, x: f32, y: f32, w: f32, h: f32) -> bool {
        let (x1, y1, x2, y2) = (x, y, x + w, y + h);

        self.buildings.iter().any(|building| {
            let (x3, y3, x4, y4) = building.get_bounds();
            !(x2 <= x3 || x4 <= x1 || y2 <= y3 || y4 <= y1)
        })
    }

    pub fn clamp(&self, x: f32, y: f32) -> (f32, f32) {
        (x.clamp(0.0, self.width), y.clamp(0.0, self.height))
    }
}

impl Default for World {
    fn default() -> Self {
        Self::standard()
    }
}

/// Integrates one movement command against `world`.
///
/// The tentative position is clamped to the world bounds first and only then
/// tested against building footprints; a colliding move leaves the state
/// unchanged. Server and client both call exactly this function.
pub fn integrate_move(world: &World, state: PlayerState, command: &MovementCommand) -> PlayerState {
    if !command.speed.is_finite() || !command.delta.is_finite() {
        return state;
    }

    let (dx, dy) = command.direction.vector();
    let distance = command.speed * command.delta;

    let (x, y) = world.clamp(state.x + dx * distance, state.y + dy * distance);

    if world.check_collision(x, y, PLAYER_SIZE, PLAYER_SIZE) {
        return state;
    }

    PlayerState { x, y }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

/// Current wall-clock time in nanoseconds since the Unix epoch, saturating at `i64::MAX`.
pub fn timestamp_nanos() -> i64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_nanos();
    nanos.min(i64::MAX as u128) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn walled_world() -> World {
        World {
            width: 200.0,
            height: 200.0,
            buildings: vec![Building::new(100.0, 0.0, 20.0, 200.0)],
        }
    }

    #[test]
    fn test_direction_vectors() {
        assert_eq!(Direction::Up.vector(), (0.0, -1.0));
        assert_eq!(Direction::Down.vector(), (0.0, 1.0));
        assert_eq!(Direction::Left.vector(), (-1.0, 0.0));
        assert_eq!(Direction::Right.vector(), (1.0, 0.0));
    }

    #[test]
    fn test_direction_wire_values() {
        for direction in [
            Direction::Up,
            Direction::Down,
            Direction::Left,
            Direction::Right,
        ] {
            assert_eq!(Direction::from_wire(direction.to_wire()), Some(direction));
        }
        assert_eq!(Direction::from_wire(4), None);
        assert_eq!(Direction::from_wire(255), None);
    }

    #[test]
    fn test_move_in_empty_world() {
        let world = World::empty(WORLD_WIDTH, WORLD_HEIGHT);
        let command = MovementCommand::new(Direction::Right, 3.0, 0.5);

        let state = integrate_move(&world, PlayerState::default(), &command);

        assert_eq!(state, PlayerState::new(1.5, 0.0));
    }

    #[test]
    fn test_move_clamps_to_bounds() {
        let world = World::empty(100.0, 100.0);

        let left = integrate_move(
            &world,
            PlayerState::new(5.0, 50.0),
            &MovementCommand::new(Direction::Left, 100.0, 1.0),
        );
        assert_eq!(left, PlayerState::new(0.0, 50.0));

        let down = integrate_move(
            &world,
            PlayerState::new(50.0, 90.0),
            &MovementCommand::new(Direction::Down, 100.0, 1.0),
        );
        assert_eq!(down, PlayerState::new(50.0, 100.0));
    }

    #[test]
    fn test_move_into_building_is_rejected() {
        let world = walled_world();
        let start = PlayerState::new(60.0, 50.0);
        let command = MovementCommand::new(Direction::Right, 20.0, 1.0);

        assert_eq!(integrate_move(&world, start, &command), start);
    }

    #[test]
    fn test_repeated_rejected_moves_do_not_drift() {
        let world = walled_world();
        let start = PlayerState::new(60.0, 50.0);
        let command = MovementCommand::new(Direction::Right, 20.0, 1.0);

        let mut state = start;
        for _ in 0..100 {
            state = integrate_move(&world, state, &command);
        }

        assert_eq!(state, start);
    }

    #[test]
    fn test_clamp_happens_before_collision() {
        // The unclamped target lies inside the building, the clamped one does not.
        let world = World {
            width: 100.0,
            height: 100.0,
            buildings: vec![Building::new(150.0, 0.0, 50.0, 100.0)],
        };
        let start = PlayerState::new(90.0, 10.0);
        let command = MovementCommand::new(Direction::Right, 100.0, 1.0);

        assert_eq!(
            integrate_move(&world, start, &command),
            PlayerState::new(100.0, 10.0)
        );
    }

    #[test]
    fn test_touching_building_edge_is_allowed() {
        let world = walled_world();
        let start = PlayerState::new(60.0, 50.0);
        let command = MovementCommand::new(Direction::Right, 8.0, 1.0);

        let state = integrate_move(&world, start, &command);

        assert_eq!(state.x + PLAYER_SIZE, 100.0);
    }

    #[test]
    fn test_non_finite_command_is_ignored() {
        let world = World::standard();
        let start = PlayerState::new(10.0, 10.0);

        let nan_speed = MovementCommand::new(Direction::Down, f32::NAN, 0.1);
        let inf_delta = MovementCommand::new(Direction::Down, 10.0, f32::INFINITY);

        assert_eq!(integrate_move(&world, start, &nan_speed), start);
        assert_eq!(integrate_move(&world, start, &inf_delta), start);
    }

    #[test]
    fn test_standard_world_spawn_is_free() {
        let world = World::standard();
        assert!(!world.check_collision(0.0, 0.0, PLAYER_SIZE, PLAYER_SIZE));
    }

    #[test]
    fn test_player_state_lerp() {
        let a = PlayerState::new(0.0, 10.0);
        let b = PlayerState::new(10.0, 30.0);

        let mid = a.lerp(&b, 0.5);
        assert_approx_eq!(mid.x, 5.0);
        assert_approx_eq!(mid.y, 20.0);
        assert_eq!(a.lerp(&b, 0.0), a);
    }

    #[test]
    fn test_timestamps_advance() {
        let first = timestamp_millis();
        std::thread::sleep(Duration::from_millis(2));
        assert!(timestamp_millis() > first);
        assert!(timestamp_nanos() > 0);
    }
}
