//! REST snapshot used to seed the world before the socket takes over

use crate::config::ClientConfig;
use crate::error::ApiError;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use shared::{GameClock, Npc, Player, Position, WorldObject, WorldObjectKind, WorldSnapshot};
use std::time::Duration;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SPAWN: Position = Position::new(25, 15);

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Zone contents. Missing lists fall back to the offline village.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MapState {
    #[serde(default)]
    pub players: Option<Vec<Player>>,
    #[serde(default)]
    pub npcs: Option<Vec<Npc>>,
    #[serde(default)]
    pub objects: Option<Vec<WorldObject>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitialWorld {
    pub position: Position,
    pub snapshot: WorldSnapshot,
}

impl InitialWorld {
    pub fn from_parts(position: Option<Position>, map: MapState, clock: Option<GameClock>) -> Self {
        let village = offline_village();
        Self {
            position: position.unwrap_or(DEFAULT_SPAWN),
            snapshot: WorldSnapshot {
                players: map.players.unwrap_or_default(),
                npcs: map.npcs.unwrap_or(village.npcs),
                objects: map.objects.unwrap_or(village.objects),
                time: Some(clock.unwrap_or_default()),
            },
        }
    }

    pub fn offline() -> Self {
        Self {
            position: DEFAULT_SPAWN,
            snapshot: offline_village(),
        }
    }
}

pub struct WorldApi {
    http: reqwest::Client,
    config: ClientConfig,
}

impl WorldApi {
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { http, config })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ApiError> {
        let url = self.config.api_url(path)?;
        debug!("GET {}", url);

        let mut request = self.http.get(url);
        if let Some(token) = &self.config.access_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status));
        }

        let body: ApiResponse<T> = response.json().await?;
        if !body.success {
            return Err(ApiError::Unsuccessful(
                body.message.unwrap_or_else(|| path.to_string()),
            ));
        }
        Ok(body.data)
    }

    pub async fn position(&self) -> Result<Option<Position>, ApiError> {
        self.get("world/position").await
    }

    pub async fn map_state(&self, zone: &str) -> Result<MapState, ApiError> {
        Ok(self
            .get(&format!("world/map-state/{zone}"))
            .await?
            .unwrap_or_default())
    }

    pub async fn time(&self) -> Result<Option<GameClock>, ApiError> {
        self.get("world/time").await
    }

    /// Position, zone contents and clock, in that order.
    pub async fn initial_world(&self) -> Result<InitialWorld, ApiError> {
        let position = self.position().await?;
        let map = self.map_state(&self.config.zone).await?;
        let clock = self.time().await?;
        Ok(InitialWorld::from_parts(position, map, clock))
    }
}

/// Built-in village used when the backend cannot be reached.
pub fn offline_village() -> WorldSnapshot {
    let npcs = vec![
        Npc::new("1", "Code Mentor Alice", Position::new(20, 10))
            .with_sprite("👩‍🏫")
            .with_dialogue("Welcome to Code Valley! Ready to learn some programming?"),
        Npc::new("2", "Debug Dave", Position::new(30, 20))
            .with_sprite("👨‍💻")
            .with_dialogue("I can help you fix those pesky bugs!"),
        Npc::new("3", "API Annie", Position::new(15, 25))
            .with_sprite("👩‍💼")
            .with_dialogue("Need help connecting to external services?"),
    ];

    let object = |id: &str, kind: WorldObjectKind, x: i32, y: i32, sprite: &str, text: &str| {
        WorldObject::new(id, kind, Position::new(x, y))
            .with_sprite(sprite)
            .with_interaction_text(text)
    };

    let objects = vec![
        object("1", WorldObjectKind::Tree, 10, 8, "🌳", "Chop"),
        object("2", WorldObjectKind::Tree, 12, 8, "🌲", "Chop"),
        object("3", WorldObjectKind::Tree, 35, 12, "🌳", "Chop"),
        object("4", WorldObjectKind::Building, 5, 5, "🏠", "Enter"),
        object("5", WorldObjectKind::Building, 40, 8, "🏢", "Enter"),
        object("6", WorldObjectKind::Chest, 18, 18, "📦", "Open"),
        object("7", WorldObjectKind::Chest, 32, 25, "🎁", "Open"),
        object("8", WorldObjectKind::FarmPlot, 8, 20, "🟫", "Plant"),
        object("9", WorldObjectKind::FarmPlot, 10, 20, "🌱", "Water"),
        object("10", WorldObjectKind::FarmPlot, 12, 20, "🌿", "Harvest"),
        object("11", WorldObjectKind::Sign, 25, 5, "🪧", "Read"),
    ];

    WorldSnapshot {
        players: Vec::new(),
        npcs,
        objects,
        time: Some(GameClock::default()),
    }
}
