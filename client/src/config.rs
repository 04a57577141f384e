//! Client configuration: connection endpoints, reconnect policy and movement tuning

use crate::error::ConfigError;
use shared::{MAP_HEIGHT, MAP_WIDTH, VIEWPORT_HEIGHT, VIEWPORT_WIDTH};
use std::time::Duration;
use url::Url;

pub const DEFAULT_WS_BASE_URL: &str = "ws://localhost:8000";
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_ZONE: &str = "village";

/// Heartbeat and reconnect policy for the realtime socket.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportConfig {
    pub heartbeat_interval: Duration,
    pub reconnect_base_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub connect_timeout: Duration,
}

impl TransportConfig {
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay = delay;
        self
    }

    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Delay before reconnect number `attempt + 1`: `base * 2^attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.reconnect_base_delay.saturating_mul(factor)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            reconnect_base_delay: Duration::from_secs(1),
            max_reconnect_attempts: 5,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Local movement and input tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub move_throttle: Duration,
    pub moving_flag_duration: Duration,
    pub joystick_dead_zone: f32,
    pub joystick_clamp: f32,
    pub interaction_range: u32,
    pub map_size: (i32, i32),
    pub viewport: (i32, i32),
    pub input_tick: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            move_throttle: Duration::from_millis(200),
            moving_flag_duration: Duration::from_millis(200),
            joystick_dead_zone: 20.0,
            joystick_clamp: 40.0,
            interaction_range: 1,
            map_size: (MAP_WIDTH, MAP_HEIGHT),
            viewport: (VIEWPORT_WIDTH, VIEWPORT_HEIGHT),
            input_tick: Duration::from_millis(16),
        }
    }
}

/// Everything a session needs to reach the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub ws_base_url: String,
    pub api_base_url: String,
    pub access_token: Option<String>,
    pub zone: String,
    pub player_id: String,
    pub username: String,
    pub transport: TransportConfig,
    pub controller: ControllerConfig,
}

impl ClientConfig {
    /// Reads `WS_BASE_URL`, `API_BASE_URL`, `ACCESS_TOKEN`, `ZONE`,
    /// `PLAYER_ID` and `USERNAME` from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        Self {
            ws_base_url: get("WS_BASE_URL").unwrap_or(defaults.ws_base_url),
            api_base_url: get("API_BASE_URL").unwrap_or(defaults.api_base_url),
            access_token: get("ACCESS_TOKEN"),
            zone: get("ZONE").unwrap_or(defaults.zone),
            player_id: get("PLAYER_ID").unwrap_or(defaults.player_id),
            username: get("USERNAME").unwrap_or(defaults.username),
            ..defaults
        }
    }

    #[must_use]
    pub fn with_ws_base_url(mut self, url: impl Into<String>) -> Self {
        self.ws_base_url = url.into();
        self
    }

    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = zone.into();
        self
    }

    #[must_use]
    pub fn with_player(mut self, id: impl Into<String>, username: impl Into<String>) -> Self {
        self.player_id = id.into();
        self.username = username.into();
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    #[must_use]
    pub fn with_controller(mut self, controller: ControllerConfig) -> Self {
        self.controller = controller;
        self
    }

    /// REST URL under the `/api/v1` prefix.
    pub fn api_url(&self, path: &str) -> Result<Url, ConfigError> {
        let base = self.api_base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Ok(Url::parse(&format!("{base}/api/v1/{path}"))?)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_base_url: DEFAULT_WS_BASE_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            access_token: None,
            zone: DEFAULT_ZONE.to_string(),
            player_id: "local".to_string(),
            username: "Player".to_string(),
            transport: TransportConfig::default(),
            controller: ControllerConfig::default(),
        }
    }
}

/// `{base}/ws?token=<token>`, with the token percent-encoded.
pub fn endpoint_for(base: &str, token: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(&format!("{}/ws", base.trim_end_matches('/')))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(ConfigError::InvalidScheme(other.to_string())),
    }
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}
