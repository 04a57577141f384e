use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed")]
    Closed,
    #[error("connect timed out")]
    Timeout,
    #[error("invalid endpoint: {0}")]
    Config(#[from] ConfigError),
}

/// Failure raised by an event handler. Logged, never propagated past dispatch.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
    #[error("handler panicked: {0}")]
    Panicked(String),
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("server returned {0}")]
    Status(reqwest::StatusCode),
    #[error("request unsuccessful: {0}")]
    Unsuccessful(String),
    #[error("invalid api url: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("unsupported scheme `{0}`, expected ws or wss")]
    InvalidScheme(String),
}
