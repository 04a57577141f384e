//! tokio-tungstenite backed socket

use crate::error::TransportError;
use crate::transport::{Connector, Frame, Socket};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use log::{debug, trace};
use std::borrow::Cow;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for WsConnector {
    type Socket = WsSocket;

    fn connect(&self, endpoint: Url) -> BoxFuture<'static, Result<WsSocket, TransportError>> {
        let connect_timeout = self.connect_timeout;
        Box::pin(async move {
            let (stream, response) =
                tokio::time::timeout(connect_timeout, connect_async(endpoint.as_str()))
                    .await
                    .map_err(|_| TransportError::Timeout)??;
            debug!("Handshake completed with status {}", response.status());
            Ok(WsSocket { stream })
        })
    }
}

/// A send on a socket that is already shutting down is reported as [`TransportError::Closed`].
fn send_error(e: WsError) -> TransportError {
    match e {
        WsError::ConnectionClosed
        | WsError::AlreadyClosed
        | WsError::Protocol(ProtocolError::SendAfterClosing) => TransportError::Closed,
        other => other.into(),
    }
}

pub struct WsSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Socket for WsSocket {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(send_error)
    }

    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };

            match message {
                Message::Text(text) => return Some(Ok(Frame::Text(text))),
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(Frame::Text(text))),
                    Err(_) => debug!("Skipping non UTF-8 binary frame"),
                },
                Message::Close(frame) => {
                    return Some(Ok(Frame::Close(frame.map(|frame| u16::from(frame.code)))))
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {
                    trace!("Skipping control frame");
                }
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason.to_string()),
        };
        self.stream.close(Some(frame)).await?;
        Ok(())
    }
}
