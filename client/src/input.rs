//! Held keys and the touch joystick, resolved to a single cardinal direction

use crate::config::ControllerConfig;
use shared::{Direction, Position, TargetRef};

/// Commands the viewer (or any other front end) feeds into the session loop.
#[derive(Debug, Clone, PartialEq)]
pub enum InputCommand {
    /// Current held-key state, sent whenever it changes.
    Held(HeldKeys),
    /// Joystick knob offset from its center, in pixels. `(0, 0)` releases it.
    Joystick { dx: f32, dy: f32 },
    Interact(TargetRef),
    /// Interact with whatever occupies a clicked cell.
    InteractAt(Position),
    DismissToast,
    MarkInboxRead,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeldKeys {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

pub struct InputManager {
    keys: HeldKeys,
    joystick: (f32, f32),
    dead_zone: f32,
    clamp: f32,
}

impl InputManager {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            keys: HeldKeys::default(),
            joystick: (0.0, 0.0),
            dead_zone: config.joystick_dead_zone,
            clamp: config.joystick_clamp,
        }
    }

    pub fn set_keys(&mut self, keys: HeldKeys) {
        self.keys = keys;
    }

    /// Stores the knob offset, clamped to the joystick radius on each axis.
    pub fn set_joystick(&mut self, dx: f32, dy: f32) {
        self.joystick = (dx.clamp(-self.clamp, self.clamp), dy.clamp(-self.clamp, self.clamp));
    }

    pub fn joystick(&self) -> (f32, f32) {
        self.joystick
    }

    pub fn release(&mut self) {
        self.keys = HeldKeys::default();
        self.joystick = (0.0, 0.0);
    }

    /// Keys win over the joystick, checked up, down, left, right.
    /// The joystick follows its dominant axis once past the dead zone.
    pub fn direction(&self) -> Option<Direction> {
        let keys = self.keys;
        if keys.up {
            return Some(Direction::Up);
        }
        if keys.down {
            return Some(Direction::Down);
        }
        if keys.left {
            return Some(Direction::Left);
        }
        if keys.right {
            return Some(Direction::Right);
        }

        let (dx, dy) = self.joystick;
        if dx.abs() > dy.abs() {
            if dx > self.dead_zone {
                Some(Direction::Right)
            } else if dx < -self.dead_zone {
                Some(Direction::Left)
            } else {
                None
            }
        } else if dy > self.dead_zone {
            Some(Direction::Down)
        } else if dy < -self.dead_zone {
            Some(Direction::Up)
        } else {
            None
        }
    }
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new(&ControllerConfig::default())
    }
}
