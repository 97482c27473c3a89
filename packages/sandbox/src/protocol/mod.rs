// ABOUTME: Session protocol between the client and the sandboxed execution service
// ABOUTME: Frame codec, channel transport, per-request session state and the retrying client

pub mod client;
pub mod frame;
pub mod session;
pub mod transport;

pub use client::{endpoint_for_port, ClientConfig, SessionClient};
pub use frame::{request_frames, Frame, InboundFrame};
pub use session::Session;
pub use transport::{Channel, ChannelEvent, Connector, TransportError, WebSocketConnector};
