//! Keyboard sampling: one movement direction per frame plus edge-detected toggles

use crate::game::TogglePresses;
use macroquad::prelude::*;
use shared::Direction;

/// Input gathered during one frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameInput {
    pub direction: Option<Direction>,
    pub toggles: TogglePresses,
    pub quit: bool,
}

/// Picks a single direction from the held keys. Up wins over Down, Down over
/// Left, Left over Right.
pub fn pick_direction(up: bool, down: bool, left: bool, right: bool) -> Option<Direction> {
    if up {
        Some(Direction::Up)
    } else if down {
        Some(Direction::Down)
    } else if left {
        Some(Direction::Left)
    } else if right {
        Some(Direction::Right)
    } else {
        None
    }
}

pub struct InputManager {
    // Previous frame key states for edge detection
    prev_key_1: bool,
    prev_key_2: bool,
    prev_key_3: bool,
}

impl InputManager {
    pub fn new() -> Self {
        Self {
            prev_key_1: false,
            prev_key_2: false,
            prev_key_3: false,
        }
    }

    /// Samples the keyboard for this frame
    pub fn update(&mut self) -> FrameInput {
        // WASD and arrow keys both move
        let up = is_key_down(KeyCode::W) || is_key_down(KeyCode::Up);
        let down = is_key_down(KeyCode::S) || is_key_down(KeyCode::Down);
        let left = is_key_down(KeyCode::A) || is_key_down(KeyCode::Left);
        let right = is_key_down(KeyCode::D) || is_key_down(KeyCode::Right);

        let toggles = self.detect_toggles(
            is_key_down(KeyCode::Key1),
            is_key_down(KeyCode::Key2),
            is_key_down(KeyCode::Key3),
        );

        FrameInput {
            direction: pick_direction(up, down, left, right),
            toggles,
            quit: is_key_pressed(KeyCode::Escape),
        }
    }

    /// Reports keys that went down since the previous call
    pub fn detect_toggles(&mut self, key_1: bool, key_2: bool, key_3: bool) -> TogglePresses {
        let presses = TogglePresses {
            prediction: key_1 && !self.prev_key_1,
            reconciliation: key_2 && !self.prev_key_2,
            interpolation: key_3 && !self.prev_key_3,
        };

        self.prev_key_1 = key_1;
        self.prev_key_2 = key_2;
        self.prev_key_3 = key_3;

        presses
    }
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new()
    }
}
