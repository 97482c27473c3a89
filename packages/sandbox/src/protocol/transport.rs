// ABOUTME: Message channel abstraction between the session client and the execution service
// ABOUTME: Provides the WebSocket implementation over tokio-tungstenite

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

#[derive(Error, Debug)]
pub enum TransportError {
    /// The peer closed the channel or it was already closed
    #[error("channel closed")]
    Closed,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("transport error: {0}")]
    Other(String),
}

/// What the channel produced on one read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A text payload (binary payloads are decoded lossily)
    Payload(String),
    /// Ping, pong or other control traffic
    Control,
    Closed,
}

/// An open, ordered, message-oriented channel
#[async_trait]
pub trait Channel: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound event; cancel-safe
    async fn next_event(&mut self) -> Result<ChannelEvent, TransportError>;

    /// Liveness probe
    async fn ping(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens channels to an endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Channel>, TransportError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &str) -> Result<Box<dyn Channel>, TransportError> {
        let (stream, response) = connect_async(endpoint).await?;
        debug!("WebSocket handshake with {} returned {}", endpoint, response.status());
        Ok(Box::new(WebSocketChannel { stream }))
    }
}

pub struct WebSocketChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Channel for WebSocketChannel {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(map_ws_error)
    }

    async fn next_event(&mut self) -> Result<ChannelEvent, TransportError> {
        match self.stream.next().await {
            None => Ok(ChannelEvent::Closed),
            Some(Err(e)) => match map_ws_error(e) {
                TransportError::Closed => Ok(ChannelEvent::Closed),
                other => Err(other),
            },
            Some(Ok(Message::Text(text))) => Ok(ChannelEvent::Payload(text)),
            Some(Ok(Message::Binary(bytes))) => {
                Ok(ChannelEvent::Payload(String::from_utf8_lossy(&bytes).into_owned()))
            }
            Some(Ok(Message::Close(frame))) => {
                debug!("Peer closed channel: {:?}", frame);
                Ok(ChannelEvent::Closed)
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                Ok(ChannelEvent::Control)
            }
        }
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.stream
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(map_ws_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stream.close(None).await.map_err(map_ws_error)
    }
}

fn map_ws_error(e: tungstenite::Error) -> TransportError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed
        }
        other => TransportError::WebSocket(other),
    }
}
