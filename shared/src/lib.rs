use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod protocol;

pub use protocol::*;

pub const MAP_WIDTH: i32 = 50;
pub const MAP_HEIGHT: i32 = 30;
pub const VIEWPORT_WIDTH: i32 = 25;
pub const VIEWPORT_HEIGHT: i32 = 15;
pub const TILE_SIZE: f32 = 32.0;

/// Close code sent by a client that is leaving on purpose.
pub const CLEAN_CLOSE_CODE: u16 = 1000;

/// Integer grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn manhattan_distance(&self, other: &Position) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    /// One cell in `direction`, unbounded.
    pub fn step(&self, direction: Direction) -> Position {
        let (dx, dy) = direction.delta();
        Position::new(self.x + dx, self.y + dy)
    }

    pub fn clamped(&self, width: i32, height: i32) -> Position {
        Position::new(self.x.max(0).min(width - 1), self.y.max(0).min(height - 1))
    }

    pub fn is_within(&self, width: i32, height: i32) -> bool {
        (0..width).contains(&self.x) && (0..height).contains(&self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

impl Direction {
    /// Grid delta, with y growing downwards.
    pub fn delta(&self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -1),
            Direction::Down => (0, 1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    #[default]
    Spring,
    Summer,
    #[serde(alias = "autumn")]
    Fall,
    Winter,
}

/// Server-authoritative in-game calendar. Never advanced locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameClock {
    #[serde(rename = "game_year", alias = "year")]
    pub year: u32,
    #[serde(rename = "game_season", alias = "season")]
    pub season: Season,
    #[serde(rename = "game_day", alias = "day")]
    pub day: u32,
    #[serde(rename = "game_hour", alias = "hour")]
    pub hour: u32,
    #[serde(rename = "game_minute", alias = "minute")]
    pub minute: u32,
}

impl GameClock {
    /// `HH:MM` as shown in the HUD.
    pub fn formatted_time(&self) -> String {
        format!("{:02}:{:02}", self.hour, self.minute)
    }
}

impl Default for GameClock {
    fn default() -> Self {
        Self {
            year: 1,
            season: Season::Spring,
            day: 1,
            hour: 6,
            minute: 0,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default, alias = "isMoving")]
    pub is_moving: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl Player {
    pub fn new(id: impl Into<String>, username: impl Into<String>, position: Position) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            position,
            direction: Direction::Down,
            is_moving: false,
            avatar_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Npc {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sprite: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialogue: Option<String>,
    #[serde(default = "default_true", alias = "canInteract")]
    pub can_interact: bool,
}

impl Npc {
    pub fn new(id: impl Into<String>, name: impl Into<String>, position: Position) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            position,
            sprite: None,
            dialogue: None,
            can_interact: true,
        }
    }

    pub fn with_dialogue(mut self, dialogue: impl Into<String>) -> Self {
        self.dialogue = Some(dialogue.into());
        self
    }

    pub fn with_sprite(mut self, sprite: impl Into<String>) -> Self {
        self.sprite = Some(sprite.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorldObjectKind {
    Tree,
    Rock,
    Chest,
    Building,
    FarmPlot,
    Sign,
    /// Any type this client does not draw or interact with specially.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldObject {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: WorldObjectKind,
    #[serde(default)]
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sprite: Option<String>,
    #[serde(default = "default_true", alias = "canInteract")]
    pub can_interact: bool,
    #[serde(
        default,
        alias = "interactionText",
        skip_serializing_if = "Option::is_none"
    )]
    pub interaction_text: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl WorldObject {
    pub fn new(id: impl Into<String>, kind: WorldObjectKind, position: Position) -> Self {
        Self {
            id: id.into(),
            kind,
            position,
            sprite: None,
            can_interact: true,
            interaction_text: None,
            data: Value::Null,
        }
    }

    pub fn with_sprite(mut self, sprite: impl Into<String>) -> Self {
        self.sprite = Some(sprite.into());
        self
    }

    pub fn with_interaction_text(mut self, text: impl Into<String>) -> Self {
        self.interaction_text = Some(text.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Shallow-merges a partial change set onto this object.
    ///
    /// Keys absent from `changes` keep their current value. `pos_x`/`pos_y`
    /// are folded into `position`. On error the object is left untouched.
    pub fn apply_changes(&mut self, changes: &Map<String, Value>) -> Result<(), serde_json::Error> {
        let mut fields = match serde_json::to_value(&*self)? {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };

        for (key, value) in changes {
            match key.as_str() {
                "pos_x" | "pos_y" => {
                    let axis = if key == "pos_x" { "x" } else { "y" };
                    let position = fields
                        .entry("position")
                        .or_insert_with(|| Value::Object(Map::new()));
                    if let Value::Object(position) = position {
                        position.insert(axis.to_string(), value.clone());
                    }
                }
                other => {
                    fields.insert(canonical_field(other).to_string(), value.clone());
                }
            }
        }

        *self = serde_json::from_value(Value::Object(fields))?;
        Ok(())
    }
}

fn canonical_field(key: &str) -> &str {
    match key {
        "canInteract" => "can_interact",
        "interactionText" => "interaction_text",
        other => other,
    }
}

/// Reference to something the local player can interact with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetRef {
    Npc(String),
    Object(String),
}

impl TargetRef {
    pub fn id(&self) -> &str {
        match self {
            TargetRef::Npc(id) | TargetRef::Object(id) => id,
        }
    }

    pub fn kind(&self) -> TargetKind {
        match self {
            TargetRef::Npc(_) => TargetKind::Npc,
            TargetRef::Object(_) => TargetKind::Object,
        }
    }
}

/// Camera offset for a viewport centered on `focus`, clamped to the map.
pub fn camera_offset(focus: Position, map: (i32, i32), viewport: (i32, i32)) -> (f32, f32) {
    let axis = |focus: i32, map: i32, view: i32| {
        let max = (map - view).max(0) as f32;
        (focus as f32 - view as f32 / 2.0).clamp(0.0, max)
    };

    (axis(focus.x, map.0, viewport.0), axis(focus.y, map.1, viewport.1))
}
