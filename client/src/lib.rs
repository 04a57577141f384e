//! # Code Valley Client Library
//!
//! Client side of the Code Valley realtime world: one WebSocket session per
//! logged-in player, a typed event table feeding a local mirror of the world,
//! and the optimistic movement layer that writes the local player's steps into
//! that mirror before telling the server about them.
//!
//! ## Architecture Overview
//!
//! ### Transport
//! [`transport::ConnectionManager`] owns the socket. It connects with the
//! access token in the query string, pings every 30 seconds while open and
//! reconnects after abnormal closes with a doubling delay (1 s, 2 s, 4 s, ...)
//! for at most five attempts. A close with code 1000 is final. Sockets come
//! from a [`transport::Connector`], so tests swap in a scripted one and
//! production uses [`ws::WsConnector`].
//!
//! ### Dispatch
//! Every inbound frame is a `{type, data, timestamp}` envelope. The
//! [`dispatcher::Dispatcher`] decodes `data` into the payload type registered
//! for `type` and hands it to each handler in registration order. Unknown
//! types are logged and dropped. A failing or panicking handler does not stop
//! the others.
//!
//! ### World State
//! [`store::WorldStore`] holds remote players, NPCs, objects and the game
//! clock. Position updates merge into existing entries, object updates merge
//! field by field, and a `world_snapshot` replaces the lot while keeping the
//! local player. [`notices::Notices`] sits next to it with toasts, the inbox
//! and the quest popup.
//!
//! ### Movement & Interaction
//! [`game::MovementController`] applies one grid step at a time, at most every
//! 200 ms, refusing cells held by objects or NPCs. Interactions are checked
//! against a Manhattan range of one cell before anything is sent.
//!
//! ## Module Organization
//!
//! - `api`: REST snapshot used to seed the world, plus the offline village
//! - `config`: endpoints, reconnect policy and movement tuning
//! - `dispatcher`: typed handler table
//! - `error`: error enums
//! - `game`: movement, collision, interaction and camera
//! - `input`: held keys and joystick resolved to a direction
//! - `network`: the [`network::Session`] loop tying everything together
//! - `notices`: toasts, inbox, quest popup and profile
//! - `rendering`: macroquad viewer
//! - `store`: world mirror
//! - `transport`: connection manager and the socket seam
//! - `ws`: tokio-tungstenite connector
//!
//! ## Usage Example
//!
//! ```no_run
//! use client::api::WorldApi;
//! use client::config::ClientConfig;
//! use client::network::Session;
//! use client::ws::WsConnector;
//! use tokio::sync::mpsc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::from_env().with_access_token("token");
//! let api = WorldApi::new(config.clone())?;
//!
//! let mut session = Session::new(WsConnector::new(config.transport.connect_timeout), config);
//! session.bootstrap(&api).await;
//! session.connect("token");
//!
//! let (_commands, receiver) = mpsc::channel(64);
//! session.run(receiver, None).await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod game;
pub mod input;
pub mod network;
pub mod notices;
pub mod rendering;
pub mod store;
pub mod transport;
pub mod ws;
