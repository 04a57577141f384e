//! Realtime connection manager: one socket per session, heartbeat, bounded
//! exponential reconnect and the handler table inbound envelopes are routed to.

use crate::config::{endpoint_for, TransportConfig};
use crate::dispatcher::{DispatchOutcome, Dispatcher, HandlerId, HandlerResult};
use crate::error::TransportError;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use log::{debug, error, info, warn};
use serde_json::Value;
use shared::{ClientIntent, Envelope, EventKind, EventPayload, CLEAN_CLOSE_CODE};
use std::future::pending;
use std::time::Duration;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use url::Url;

/// A frame as seen by the connection manager. Control frames are handled below this layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Close(Option<u16>),
}

/// An open duplex text socket.
#[async_trait]
pub trait Socket: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// `None` once the stream has ended.
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>>;

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// Opens sockets. The returned future must not borrow the connector.
pub trait Connector: Send {
    type Socket: Socket + 'static;

    fn connect(&self, endpoint: Url) -> BoxFuture<'static, Result<Self::Socket, TransportError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// What the run loop needs to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened { reconnected: bool },
    Message(Envelope),
    Closed {
        code: Option<u16>,
        reconnect_in: Option<Duration>,
    },
}

enum Step<T> {
    Connected(Result<T, TransportError>),
    Frame(Option<Result<Frame, TransportError>>),
    Heartbeat,
    Reconnect,
}

pub struct ConnectionManager<C: Connector, S> {
    connector: C,
    config: TransportConfig,
    ws_base_url: String,
    state: ConnectionState,
    token: Option<String>,
    pending: Option<BoxFuture<'static, Result<C::Socket, TransportError>>>,
    socket: Option<C::Socket>,
    reconnect_attempts: u32,
    reconnect_at: Option<Instant>,
    heartbeat: Option<Interval>,
    recovering: bool,
    opened_before: bool,
    dispatcher: Dispatcher<S>,
}

impl<C: Connector, S> ConnectionManager<C, S> {
    pub fn new(connector: C, ws_base_url: impl Into<String>, config: TransportConfig) -> Self {
        Self {
            connector,
            config,
            ws_base_url: ws_base_url.into(),
            state: ConnectionState::Idle,
            token: None,
            pending: None,
            socket: None,
            reconnect_attempts: 0,
            reconnect_at: None,
            heartbeat: None,
            recovering: false,
            opened_before: false,
            dispatcher: Dispatcher::new(),
        }
    }

    /// Starts connecting with `token`. No-op while connecting or open.
    ///
    /// The attempt itself is driven by [`ConnectionManager::next_event`].
    pub fn connect(&mut self, token: impl Into<String>) {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            debug!("connect ignored, connection is {:?}", self.state);
            return;
        }

        self.token = Some(token.into());
        if self.reconnect_at.take().is_none() {
            self.reconnect_attempts = 0;
        }
        self.start_attempt();
    }

    fn start_attempt(&mut self) {
        let Some(token) = self.token.as_deref() else {
            return;
        };

        match endpoint_for(&self.ws_base_url, token) {
            Ok(endpoint) => {
                info!(
                    "Connecting to {}://{}{}",
                    endpoint.scheme(),
                    endpoint.host_str().unwrap_or_default(),
                    endpoint.path()
                );
                self.state = ConnectionState::Connecting;
                self.pending = Some(self.connector.connect(endpoint));
            }
            Err(e) => {
                error!("Cannot connect: {}", e);
                self.state = ConnectionState::Closed;
            }
        }
    }

    /// Sends one envelope. Dropped with a warning if the socket is not open.
    pub async fn send(&mut self, kind: &str, data: Value) -> bool {
        let socket = match (self.state, self.socket.as_mut()) {
            (ConnectionState::Open, Some(socket)) => socket,
            _ => {
                warn!("Dropping {} message, socket is not open", kind);
                return false;
            }
        };

        let text = match Envelope::new(kind, data).to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode {} message: {}", kind, e);
                return false;
            }
        };

        match socket.send_text(text).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to send {} message: {}", kind, e);
                false
            }
        }
    }

    pub async fn send_intent(&mut self, intent: &ClientIntent) -> bool {
        match intent.data() {
            Ok(data) => self.send(intent.kind(), data).await,
            Err(e) => {
                error!("Failed to encode {} intent: {}", intent.kind(), e);
                false
            }
        }
    }

    /// Clean client close. Cancels timers and clears every registered handler.
    pub async fn disconnect(&mut self) {
        self.pending = None;
        self.reconnect_at = None;
        self.heartbeat = None;

        if let Some(mut socket) = self.socket.take() {
            self.state = ConnectionState::Closing;
            if let Err(e) = socket.close(CLEAN_CLOSE_CODE, "Client disconnect").await {
                debug!("Close handshake failed: {}", e);
            }
        }

        self.state = ConnectionState::Closed;
        self.dispatcher.clear();
        self.reconnect_attempts = 0;
        self.token = None;
        self.recovering = false;
        self.opened_before = false;
        info!("Disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Open && self.socket.is_some()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn reconnect_scheduled(&self) -> bool {
        self.reconnect_at.is_some()
    }

    pub fn on<P, F>(&mut self, handler: F) -> HandlerId
    where
        P: EventPayload + 'static,
        F: FnMut(&mut S, &P) -> HandlerResult + Send + 'static,
    {
        self.dispatcher.on(handler)
    }

    pub fn off(&mut self, kind: EventKind, id: HandlerId) -> bool {
        self.dispatcher.off(kind, id)
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher<S> {
        &mut self.dispatcher
    }

    pub fn dispatch(&mut self, envelope: &Envelope, state: &mut S) -> DispatchOutcome {
        self.dispatcher.dispatch(envelope, state)
    }

    /// Drives the connection until something happens the caller should see.
    ///
    /// Cancel safe. Pends forever while idle with nothing scheduled.
    pub async fn next_event(&mut self) -> TransportEvent {
        loop {
            if let Some(event) = self.poll_once().await {
                return event;
            }
        }
    }

    async fn poll_once(&mut self) -> Option<TransportEvent> {
        let step = {
            let Self {
                pending,
                socket,
                heartbeat,
                reconnect_at,
                ..
            } = self;

            tokio::select! {
                result = poll_pending(pending) => Step::Connected(result),
                frame = recv_frame(socket) => Step::Frame(frame),
                _ = tick(heartbeat) => Step::Heartbeat,
                _ = wait_until(*reconnect_at) => Step::Reconnect,
            }
        };

        match step {
            Step::Connected(Ok(socket)) => {
                self.pending = None;
                Some(self.on_open(socket))
            }
            Step::Connected(Err(e)) => {
                self.pending = None;
                warn!("Connection attempt failed: {}", e);
                Some(self.on_close(None))
            }
            Step::Frame(Some(Ok(Frame::Text(text)))) => match Envelope::parse(&text) {
                Ok(envelope) => Some(TransportEvent::Message(envelope)),
                Err(e) => {
                    warn!("Discarding malformed frame: {}", e);
                    None
                }
            },
            Step::Frame(Some(Ok(Frame::Close(code)))) => Some(self.on_close(code)),
            Step::Frame(Some(Err(e))) => {
                warn!("Socket error: {}", e);
                Some(self.on_close(None))
            }
            Step::Frame(None) => Some(self.on_close(None)),
            Step::Heartbeat => {
                if self.is_connected() {
                    self.send("ping", Value::Object(Default::default())).await;
                }
                None
            }
            Step::Reconnect => {
                self.reconnect_at = None;
                info!(
                    "Reconnect attempt {}/{}",
                    self.reconnect_attempts, self.config.max_reconnect_attempts
                );
                self.start_attempt();
                None
            }
        }
    }

    fn on_open(&mut self, socket: C::Socket) -> TransportEvent {
        info!("Connected");
        self.socket = Some(socket);
        self.state = ConnectionState::Open;
        self.reconnect_attempts = 0;
        self.reconnect_at = None;

        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(heartbeat);

        // Only a socket that replaces an earlier open one has state to resync.
        let reconnected = std::mem::take(&mut self.recovering) && self.opened_before;
        self.opened_before = true;
        TransportEvent::Opened { reconnected }
    }

    fn on_close(&mut self, code: Option<u16>) -> TransportEvent {
        self.socket = None;
        self.heartbeat = None;
        self.state = ConnectionState::Closed;

        let reconnect_in = if code == Some(CLEAN_CLOSE_CODE) {
            info!("Connection closed cleanly");
            None
        } else if self.token.is_none() {
            None
        } else if self.reconnect_attempts < self.config.max_reconnect_attempts {
            let delay = self.config.backoff_delay(self.reconnect_attempts);
            self.reconnect_attempts += 1;
            self.reconnect_at = Some(Instant::now() + delay);
            self.recovering = true;
            info!(
                "Connection lost (code {:?}), reconnecting in {:?}",
                code, delay
            );
            Some(delay)
        } else {
            warn!(
                "Connection lost (code {:?}), giving up after {} reconnect attempts",
                code, self.reconnect_attempts
            );
            None
        };

        TransportEvent::Closed { code, reconnect_in }
    }
}

async fn poll_pending<T>(
    pending: &mut Option<BoxFuture<'static, Result<T, TransportError>>>,
) -> Result<T, TransportError> {
    match pending.as_mut() {
        Some(attempt) => attempt.await,
        None => pending_forever().await,
    }
}

async fn recv_frame<T: Socket>(socket: &mut Option<T>) -> Option<Result<Frame, TransportError>> {
    match socket.as_mut() {
        Some(socket) => socket.recv().await,
        None => pending_forever().await,
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat.as_mut() {
        Some(heartbeat) => {
            heartbeat.tick().await;
        }
        None => pending_forever().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending_forever().await,
    }
}

async fn pending_forever<T>() -> T {
    pending().await
}


#[cfg(test)]
mod tests {
    use super::mock::{Outcome, ScriptedConnector};
    use super::*;
    use serde_json::json;
    use shared::PlayerLeft;
    use tokio::time::timeout;

    type Manager = ConnectionManager<ScriptedConnector, Vec<String>>;

    fn manager(connector: &ScriptedConnector) -> Manager {
        ConnectionManager::new(
            connector.clone(),
            "ws://valley.test",
            TransportConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_manager_stays_pending() {
        let connector = ScriptedConnector::default();
        let mut manager = manager(&connector);

        let mut next = tokio_test::task::spawn(manager.next_event());
        tokio_test::assert_pending!(next.poll());
        drop(next);

        assert_eq!(manager.state(), ConnectionState::Idle);
        assert!(connector.attempts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_twice_opens_one_socket() {
        let connector = ScriptedConnector::default();
        let mut manager = manager(&connector);

        manager.connect("token");
        manager.connect("token");
        assert_eq!(manager.state(), ConnectionState::Connecting);

        let event = manager.next_event().await;
        assert_eq!(event, TransportEvent::Opened { reconnected: false });
        manager.connect("token");

        assert!(manager.is_connected());
        assert_eq!(connector.attempts().len(), 1);
        assert_eq!(connector.endpoints()[0].as_str(), "ws://valley.test/ws?token=token");
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_then_gives_up() {
        let connector = ScriptedConnector::new([Outcome::Fail; 6]);
        let mut manager = manager(&connector);
        manager.connect("token");

        let mut delays = Vec::new();
        loop {
            match manager.next_event().await {
                TransportEvent::Closed {
                    reconnect_in: Some(delay),
                    ..
                } => delays.push(delay),
                TransportEvent::Closed {
                    reconnect_in: None, ..
                } => break,
                other => panic!("unexpected event {other:?}"),
            }
        }

        let secs: Vec<u64> = delays.iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16]);

        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 6);
        for (n, pair) in attempts.windows(2).enumerate() {
            let expected = Duration::from_secs(1) * 2u32.pow(n as u32);
            assert!(pair[1] - pair[0] >= expected);
        }

        assert!(timeout(Duration::from_secs(600), manager.next_event())
            .await
            .is_err());
        assert_eq!(connector.attempts().len(), 6);
        assert!(!manager.is_connected());
        assert!(!manager.reconnect_scheduled());

        manager.connect("token");
        assert_eq!(manager.reconnect_attempts(), 0);
        assert_eq!(
            manager.next_event().await,
            TransportEvent::Opened { reconnected: false }
        );
        assert_eq!(connector.attempts().len(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_open_after_failed_attempt_is_not_a_reconnect() {
        let connector = ScriptedConnector::new([Outcome::Fail]);
        let mut manager = manager(&connector);
        manager.connect("token");

        assert!(matches!(
            manager.next_event().await,
            TransportEvent::Closed {
                reconnect_in: Some(_),
                ..
            }
        ));
        assert_eq!(
            manager.next_event().await,
            TransportEvent::Opened { reconnected: false }
        );

        connector.take_peer().close(Some(1006));
        manager.next_event().await;
        assert_eq!(
            manager.next_event().await,
            TransportEvent::Opened { reconnected: true }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_during_backoff_cancels_reconnect() {
        let connector = ScriptedConnector::new([Outcome::Fail]);
        let mut manager = manager(&connector);
        manager.connect("token");

        assert_eq!(
            manager.next_event().await,
            TransportEvent::Closed {
                code: None,
                reconnect_in: Some(Duration::from_secs(1))
            }
        );
        assert!(manager.reconnect_scheduled());

        manager.disconnect().await;
        assert!(!manager.reconnect_scheduled());
        assert!(timeout(Duration::from_secs(60), manager.next_event())
            .await
            .is_err());
        assert_eq!(connector.attempts().len(), 1);
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abnormal_close_reconnects_and_resets_counter() {
        let connector = ScriptedConnector::default();
        let mut manager = manager(&connector);
        manager.connect("token");
        manager.next_event().await;

        let peer = connector.take_peer();
        peer.close(Some(1006));
        assert_eq!(
            manager.next_event().await,
            TransportEvent::Closed {
                code: Some(1006),
                reconnect_in: Some(Duration::from_secs(1))
            }
        );
        assert_eq!(manager.reconnect_attempts(), 1);

        assert_eq!(
            manager.next_event().await,
            TransportEvent::Opened { reconnected: true }
        );
        assert_eq!(manager.reconnect_attempts(), 0);
        assert_eq!(connector.attempts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_clean_close_does_not_reconnect() {
        let connector = ScriptedConnector::default();
        let mut manager = manager(&connector);
        manager.connect("token");
        manager.next_event().await;

        connector.take_peer().close(Some(1000));
        assert_eq!(
            manager.next_event().await,
            TransportEvent::Closed {
                code: Some(1000),
                reconnect_in: None
            }
        );
        assert!(timeout(Duration::from_secs(60), manager.next_event())
            .await
            .is_err());
        assert_eq!(connector.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_clean_and_final() {
        let connector = ScriptedConnector::default();
        let mut manager = manager(&connector);
        manager.on::<PlayerLeft, _>(|log, payload| {
            log.push(payload.player_id.clone());
            Ok(())
        });
        manager.connect("token");
        manager.next_event().await;
        let peer = connector.take_peer();

        manager.disconnect().await;

        assert_eq!(peer.close_code(), Some(1000));
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(manager.dispatcher_mut().is_empty());
        assert!(timeout(Duration::from_secs(120), manager.next_event())
            .await
            .is_err());
        assert_eq!(connector.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_pings_while_open() {
        let connector = ScriptedConnector::default();
        let mut manager = manager(&connector);
        manager.connect("token");
        manager.next_event().await;
        let peer = connector.take_peer();

        assert!(timeout(Duration::from_secs(29), manager.next_event())
            .await
            .is_err());
        assert!(peer.sent().is_empty());

        assert!(timeout(Duration::from_secs(2), manager.next_event())
            .await
            .is_err());
        let sent = peer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, "ping");
        assert_eq!(sent[0].data, json!({}));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_heartbeat_send_keeps_connection() {
        let connector = ScriptedConnector::default();
        let mut manager = manager(&connector);
        manager.connect("token");
        manager.next_event().await;
        let peer = connector.take_peer();
        peer.break_sends();

        assert!(timeout(Duration::from_secs(61), manager.next_event())
            .await
            .is_err());
        assert!(peer.sent().is_empty());
        assert!(manager.is_connected());
        assert!(!manager.reconnect_scheduled());
        assert_eq!(connector.attempts().len(), 1);

        peer.push_envelope("pong", json!({}));
        assert!(matches!(
            manager.next_event().await,
            TransportEvent::Message(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frame_is_skipped() {
        let connector = ScriptedConnector::default();
        let mut manager = manager(&connector);
        manager.connect("token");
        manager.next_event().await;
        let peer = connector.take_peer();

        peer.push_text("{not json");
        peer.push_text(r#"{"type":"","data":{}}"#);
        peer.push_envelope("player_left", json!({"player_id": "p2"}));

        match manager.next_event().await {
            TransportEvent::Message(envelope) => {
                assert_eq!(envelope.kind, "player_left");
                let mut log = Vec::new();
                manager.dispatch(&envelope, &mut log);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_closed_is_dropped() {
        let connector = ScriptedConnector::default();
        let mut manager = manager(&connector);
        assert!(!manager.send("player_move", json!({})).await);
        assert!(!manager.send_intent(&ClientIntent::Ping).await);

        manager.connect("token");
        manager.next_event().await;
        assert!(manager.send_intent(&ClientIntent::Ping).await);
        assert_eq!(connector.take_peer().sent()[0].kind, "ping");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_end_counts_as_abnormal_close() {
        let connector = ScriptedConnector::default();
        let mut manager = manager(&connector);
        manager.connect("token");
        manager.next_event().await;
        drop(connector.take_peer());

        match manager.next_event().await {
            TransportEvent::Closed { code, reconnect_in } => {
                assert_eq!(code, None);
                assert!(reconnect_in.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
