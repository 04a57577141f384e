//! Integration tests for the realtime session
//!
//! These run a real `Session` against an in-process WebSocket server.

use client::api::InitialWorld;
use client::config::{ClientConfig, TransportConfig};
use client::input::{HeldKeys, InputCommand};
use client::network::Session;
use client::transport::TransportEvent;
use client::ws::WsConnector;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use shared::{Direction, Envelope, Position};
use std::borrow::Cow;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const WAIT: Duration = Duration::from_secs(5);

/// One accepted server-side connection and the request URI it arrived on.
struct ServerConn {
    uri: String,
    ws: WebSocketStream<TcpStream>,
}

impl ServerConn {
    async fn push(&mut self, kind: &str, data: serde_json::Value) {
        let text = Envelope::new(kind, data).to_json().unwrap();
        self.ws.send(Message::Text(text)).await.unwrap();
    }

    /// Next text envelope, skipping control frames.
    async fn next_envelope(&mut self) -> Envelope {
        loop {
            let message = timeout(WAIT, self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .expect("socket error");
            if let Message::Text(text) = message {
                return Envelope::parse(&text).unwrap();
            }
        }
    }

    async fn close_with(&mut self, code: CloseCode) {
        let frame = CloseFrame {
            code,
            reason: Cow::Borrowed("test"),
        };
        let _ = self.ws.close(Some(frame)).await;
    }
}

async fn start_server() -> (String, mpsc::UnboundedReceiver<ServerConn>) {
    let _ = env_logger::builder().is_test(true).try_init();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("ws://{}", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let seen = Arc::new(Mutex::new(String::new()));
            let record = seen.clone();
            let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                *record.lock().unwrap() = request.uri().to_string();
                Ok(response)
            };

            let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                continue;
            };
            let uri = seen.lock().unwrap().clone();
            if tx.send(ServerConn { uri, ws }).is_err() {
                break;
            }
        }
    });

    (base, rx)
}

fn session(base: &str) -> Session<WsConnector> {
    let config = ClientConfig::default()
        .with_ws_base_url(base)
        .with_player("me", "Me")
        .with_transport(
            TransportConfig::default().with_reconnect_base_delay(Duration::from_millis(50)),
        );
    let mut session = Session::new(WsConnector::new(WAIT), config);
    session.seed(InitialWorld::offline());
    session
}

async fn pump(session: &mut Session<WsConnector>) -> TransportEvent {
    timeout(WAIT, session.pump())
        .await
        .expect("timed out waiting for a transport event")
}

async fn accept(server: &mut mpsc::UnboundedReceiver<ServerConn>) -> ServerConn {
    timeout(WAIT, server.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("server stopped")
}

/// CONNECTION AND DISPATCH
mod session_tests {
    use super::*;

    #[tokio::test]
    async fn connects_with_encoded_token_and_applies_server_events() {
        let (base, mut server) = start_server().await;
        let mut session = session(&base);

        session.connect("abc def");
        assert_eq!(pump(&mut session).await, TransportEvent::Opened { reconnected: false });
        let mut conn = accept(&mut server).await;
        assert!(conn.uri.starts_with("/ws?token=abc"));
        assert!(!conn.uri.contains(' '));

        conn.push(
            "player_position_update",
            json!({"player_id": "p2", "username": "Ada", "pos_x": 4, "pos_y": 6, "direction": "left"}),
        )
        .await;
        conn.push("time_update", json!({"game_year": 2, "game_season": "fall", "game_day": 3, "game_hour": 18, "game_minute": 5}))
            .await;
        pump(&mut session).await;
        pump(&mut session).await;

        let world = &session.state().world;
        let ada = world.player("p2").unwrap();
        assert_eq!(ada.position, Position::new(4, 6));
        assert_eq!(ada.direction, Direction::Left);
        assert_eq!(world.clock().formatted_time(), "18:05");
    }

    #[tokio::test]
    async fn local_move_reaches_server() {
        let (base, mut server) = start_server().await;
        let mut session = session(&base);
        session.connect("token");
        pump(&mut session).await;
        let mut conn = accept(&mut server).await;

        session.move_player(Direction::Down).await;

        let envelope = conn.next_envelope().await;
        assert_eq!(envelope.kind, "player_move");
        assert_eq!(
            envelope.data,
            json!({"pos_x": 25, "pos_y": 16, "direction": "down", "is_moving": true})
        );
        assert!(envelope.timestamp.is_some());
    }

    #[tokio::test]
    async fn unknown_and_malformed_frames_are_survived() {
        let (base, mut server) = start_server().await;
        let mut session = session(&base);
        session.connect("token");
        pump(&mut session).await;
        let mut conn = accept(&mut server).await;

        conn.ws.send(Message::Text("not json".into())).await.unwrap();
        conn.push("mystery_event", json!({"anything": true})).await;
        conn.push("player_left", json!({"player_id": "nobody"})).await;

        match pump(&mut session).await {
            TransportEvent::Message(envelope) => assert_eq!(envelope.kind, "mystery_event"),
            other => panic!("unexpected {other:?}"),
        }
        match pump(&mut session).await {
            TransportEvent::Message(envelope) => assert_eq!(envelope.kind, "player_left"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(session.is_connected());
    }
}

/// RECONNECT BEHAVIOUR
mod reconnect_tests {
    use super::*;

    #[tokio::test]
    async fn abnormal_close_reconnects_and_resyncs() {
        let (base, mut server) = start_server().await;
        let mut session = session(&base);
        session.connect("token");
        pump(&mut session).await;
        let mut first = accept(&mut server).await;

        first.push("player_position_update", json!({"player_id": "p2", "pos_x": 1, "pos_y": 1}))
            .await;
        pump(&mut session).await;
        assert!(session.state().world.player("p2").is_some());

        first.close_with(CloseCode::Error).await;
        match pump(&mut session).await {
            TransportEvent::Closed { code, reconnect_in } => {
                assert_eq!(code, Some(1011));
                assert_eq!(reconnect_in, Some(Duration::from_millis(50)));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(session.state().world.player("p2").is_none());

        assert_eq!(pump(&mut session).await, TransportEvent::Opened { reconnected: true });
        let mut second = accept(&mut server).await;

        let resync = second.next_envelope().await;
        assert_eq!(resync.kind, "resync_request");
        assert_eq!(resync.data["zone"], json!("village"));
        assert!(resync.data["since"].is_string());

        second
            .push(
                "world_snapshot",
                json!({
                    "players": [{"id": "p2", "username": "Ada", "position": {"x": 2, "y": 2}}],
                    "npcs": [{"id": "1", "name": "Code Mentor Alice", "position": {"x": 20, "y": 10}}],
                    "objects": []
                }),
            )
            .await;
        pump(&mut session).await;

        let world = &session.state().world;
        assert_eq!(world.player("p2").unwrap().position, Position::new(2, 2));
        assert_eq!(world.npcs().count(), 1);
        assert_eq!(world.objects().count(), 0);
        assert_eq!(world.local_player().unwrap().position, Position::new(25, 15));
    }

    #[tokio::test]
    async fn clean_server_close_is_final() {
        let (base, mut server) = start_server().await;
        let mut session = session(&base);
        session.connect("token");
        pump(&mut session).await;
        let mut conn = accept(&mut server).await;

        conn.close_with(CloseCode::Normal).await;
        assert_eq!(
            pump(&mut session).await,
            TransportEvent::Closed {
                code: Some(1000),
                reconnect_in: None
            }
        );

        assert!(timeout(Duration::from_millis(500), session.pump()).await.is_err());
        assert!(timeout(Duration::from_millis(100), server.recv()).await.is_err());
    }
}

/// FULL RUN LOOP
mod run_loop_tests {
    use super::*;

    #[tokio::test]
    async fn held_key_moves_and_quit_closes_cleanly() {
        let (base, mut server) = start_server().await;
        let mut session = session(&base);
        session.connect("token");
        assert_eq!(pump(&mut session).await, TransportEvent::Opened { reconnected: false });
        let mut conn = accept(&mut server).await;

        let (commands, receiver) = mpsc::channel(8);
        let runner = tokio::spawn(async move {
            session.run(receiver, None).await;
            session
        });

        commands
            .send(InputCommand::Held(HeldKeys {
                left: true,
                ..HeldKeys::default()
            }))
            .await
            .unwrap();

        let envelope = conn.next_envelope().await;
        assert_eq!(envelope.kind, "player_move");
        assert_eq!(envelope.data["pos_x"], json!(24));
        assert_eq!(envelope.data["direction"], json!("left"));

        commands.send(InputCommand::Quit).await.unwrap();
        let session = timeout(WAIT, runner).await.unwrap().unwrap();
        assert!(!session.is_connected());
        assert!(session.state().world.local_player().is_none());

        let close = loop {
            match timeout(WAIT, conn.ws.next()).await.unwrap() {
                Some(Ok(Message::Close(frame))) => break frame,
                Some(Ok(_)) => continue,
                other => panic!("expected close frame, got {other:?}"),
            }
        };
        assert_eq!(close.map(|frame| frame.code), Some(CloseCode::Normal));
    }
}
