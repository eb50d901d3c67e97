//! Transport seam for the signaling channel
//!
//! The channel owns connection lifecycle and health checking; the bytes on
//! the wire go through these traits so tests (and alternative stacks) can
//! swap the WebSocket implementation out.

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use url::Url;

/// Asynchronous event delivered by an open transport connection
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// An inbound frame
    Message(Bytes),
    /// The connection closed; carries the error description if abnormal
    Closed(Option<String>),
}

/// Write half of an open transport connection
#[async_trait]
pub trait TransportSink: Send {
    /// Send one frame
    async fn send(&mut self, frame: Bytes) -> Result<()>;

    /// Close the connection gracefully
    async fn close(&mut self) -> Result<()>;
}

/// Factory for signaling connections
///
/// `open` resolves once the transport is connected; inbound traffic then
/// arrives on the returned event receiver until a `Closed` event, after
/// which the receiver ends.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Open a connection to `url`
    async fn open(
        &self,
        url: &Url,
    ) -> Result<(Box<dyn TransportSink>, mpsc::Receiver<TransportEvent>)>;
}
