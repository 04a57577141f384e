//! Local movement and interaction: throttled grid steps, collision, camera and
//! the cosmetic outcome shown when the player touches something.

use crate::config::ControllerConfig;
use crate::notices::{Notices, ToastLevel};
use crate::store::SessionState;
use log::{debug, trace};
use shared::{
    camera_offset, Direction, Npc, PlayerInteract, PlayerMove, Position, TargetRef, WorldObject,
    WorldObjectKind,
};
use tokio::time::Instant;

const FARM_EMPTY_SPRITE: &str = "🟫";
const FARM_SEEDED_SPRITE: &str = "🌱";

#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    Moved(PlayerMove),
    Throttled,
    Blocked,
    NoPlayer,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InteractOutcome {
    Sent(PlayerInteract),
    TooFar { distance: u32 },
    UnknownTarget,
    NoPlayer,
}

/// Top-left corner of the viewport, in tiles.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Camera {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FarmStage {
    Empty,
    Seeded,
    Mature,
}

impl FarmStage {
    /// `data.stage` wins over the sprite.
    pub fn of(plot: &WorldObject) -> FarmStage {
        if let Some(stage) = plot.data.get("stage").and_then(|stage| stage.as_str()) {
            return match stage {
                "empty" => FarmStage::Empty,
                "seeded" | "growing" => FarmStage::Seeded,
                _ => FarmStage::Mature,
            };
        }

        match plot.sprite.as_deref() {
            Some(FARM_EMPTY_SPRITE) => FarmStage::Empty,
            Some(FARM_SEEDED_SPRITE) => FarmStage::Seeded,
            _ => FarmStage::Mature,
        }
    }
}

pub struct MovementController {
    config: ControllerConfig,
    last_move_at: Option<Instant>,
    moving_until: Option<Instant>,
    camera: Camera,
}

impl MovementController {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            last_move_at: None,
            moving_until: None,
            camera: Camera::default(),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn camera(&self) -> Camera {
        self.camera
    }

    pub fn recenter(&mut self, focus: Position) {
        let (x, y) = camera_offset(focus, self.config.map_size, self.config.viewport);
        self.camera = Camera { x, y };
    }

    /// One grid step for the local player, applied optimistically.
    ///
    /// The step is clamped to the map, and dropped when it lands on an object
    /// or NPC or comes within the throttle window of the last accepted move.
    pub fn try_move(
        &mut self,
        state: &mut SessionState,
        direction: Direction,
        now: Instant,
    ) -> MoveOutcome {
        let (width, height) = state.world.map_size();
        let Some(player) = state.world.local_player() else {
            return MoveOutcome::NoPlayer;
        };

        if let Some(last) = self.last_move_at {
            if now.saturating_duration_since(last) < self.config.move_throttle {
                return MoveOutcome::Throttled;
            }
        }

        let candidate = player.position.step(direction).clamped(width, height);
        if state.world.is_blocked(candidate) {
            trace!("Move {} blocked at {:?}", direction.as_str(), candidate);
            return MoveOutcome::Blocked;
        }

        let Some(player) = state.world.local_player_mut() else {
            return MoveOutcome::NoPlayer;
        };
        player.position = candidate;
        player.direction = direction;
        player.is_moving = true;

        self.last_move_at = Some(now);
        self.moving_until = Some(now + self.config.moving_flag_duration);
        self.recenter(candidate);

        MoveOutcome::Moved(PlayerMove {
            pos_x: candidate.x,
            pos_y: candidate.y,
            direction,
            is_moving: true,
        })
    }

    /// Clears the moving flag once its delay has passed.
    pub fn settle(&mut self, state: &mut SessionState, now: Instant) -> bool {
        match self.moving_until {
            Some(until) if now >= until => {
                self.moving_until = None;
                if let Some(player) = state.world.local_player_mut() {
                    player.is_moving = false;
                }
                true
            }
            _ => false,
        }
    }

    /// Range-checks an interaction and shows its local outcome.
    ///
    /// Out of range only raises a "Too Far" toast and sends nothing.
    pub fn interact(&mut self, state: &mut SessionState, target: &TargetRef) -> InteractOutcome {
        let Some(origin) = state.world.local_player().map(|p| p.position) else {
            return InteractOutcome::NoPlayer;
        };

        let target_position = match target {
            TargetRef::Npc(id) => state.world.npc(id).map(|npc| npc.position),
            TargetRef::Object(id) => state.world.object(id).map(|object| object.position),
        };
        let Some(target_position) = target_position else {
            debug!("Interaction with unknown target {}", target.id());
            return InteractOutcome::UnknownTarget;
        };

        let distance = origin.manhattan_distance(&target_position);
        if distance > self.config.interaction_range {
            state.notices.push_toast(
                ToastLevel::Warning,
                "Too Far",
                "Move closer to interact with this object.",
            );
            return InteractOutcome::TooFar { distance };
        }

        match target {
            TargetRef::Npc(id) => {
                if let Some(npc) = state.world.npc(id) {
                    greet(&mut state.notices, npc);
                }
            }
            TargetRef::Object(id) => {
                if let Some(object) = state.world.object(id) {
                    touch(&mut state.notices, object);
                }
            }
        }

        InteractOutcome::Sent(PlayerInteract {
            target_id: target.id().to_string(),
            target_type: target.kind(),
            pos_x: target_position.x,
            pos_y: target_position.y,
        })
    }
}

fn greet(notices: &mut Notices, npc: &Npc) {
    let line = npc.dialogue.as_deref().unwrap_or("Hello there!");
    notices.push_toast(ToastLevel::Info, npc.name.clone(), line);
}

fn touch(notices: &mut Notices, object: &WorldObject) {
    let (level, title, message) = match object.kind {
        WorldObjectKind::Chest => (
            ToastLevel::Success,
            "Chest Opened",
            "You found some coins and items!",
        ),
        WorldObjectKind::Tree => (
            ToastLevel::Success,
            "Tree Chopped",
            "You collected wood and gained experience!",
        ),
        WorldObjectKind::FarmPlot => match FarmStage::of(object) {
            FarmStage::Empty => (ToastLevel::Info, "Planting", "You planted algorithm seeds!"),
            FarmStage::Seeded => (ToastLevel::Info, "Watering", "Your code is growing nicely!"),
            FarmStage::Mature => (
                ToastLevel::Success,
                "Harvest",
                "You harvested mature code libraries!",
            ),
        },
        WorldObjectKind::Sign
        | WorldObjectKind::Rock
        | WorldObjectKind::Building
        | WorldObjectKind::Unknown => return,
    };
    notices.push_toast(level, title, message);
}
