//! Signaling channel: transport seam, wire envelope, and the connection
//! state machine with its health-check loop

pub mod channel;
pub mod protocol;
pub mod transport;
pub mod websocket;

pub use channel::{
    ChannelConfig, DisconnectSource, SignalingChannel, SignalingConnectionState,
};
pub use protocol::{HealthCheckInfo, HealthCheckOrigin, HealthCheckPayload};
pub use transport::{SignalingTransport, TransportEvent, TransportSink};
pub use websocket::WebSocketTransport;
