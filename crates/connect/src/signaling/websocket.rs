//! WebSocket implementation of the signaling transport

use super::transport::{SignalingTransport, TransportEvent, TransportSink};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsWrite = futures::stream::SplitSink<WsStream, Message>;
type WsRead = futures::stream::SplitStream<WsStream>;

/// Capacity of the inbound event channel
const EVENT_BUFFER: usize = 64;

/// Signaling transport over `tokio-tungstenite`
///
/// Each [`open`] call establishes one WebSocket connection and spawns a
/// receiver task that forwards inbound frames as [`TransportEvent`]s.
///
/// [`open`]: SignalingTransport::open
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketTransport;

#[async_trait]
impl SignalingTransport for WebSocketTransport {
    async fn open(
        &self,
        url: &Url,
    ) -> Result<(Box<dyn TransportSink>, mpsc::Receiver<TransportEvent>)> {
        debug!("Opening signaling socket: {}", url);

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::Transport(format!("Failed to connect: {}", e)))?;

        let (write, read) = ws_stream.split();
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        tokio::spawn(receiver_task(read, event_tx));

        Ok((Box::new(WebSocketSink { write }), event_rx))
    }
}

struct WebSocketSink {
    write: WsWrite,
}

#[async_trait]
impl TransportSink for WebSocketSink {
    async fn send(&mut self, frame: Bytes) -> Result<()> {
        self.write
            .send(Message::Binary(frame.to_vec()))
            .await
            .map_err(|e| Error::Transport(format!("Failed to send frame: {}", e)))
    }

    async fn close(&mut self) -> Result<()> {
        self.write
            .close()
            .await
            .map_err(|e| Error::Transport(format!("Failed to close socket: {}", e)))
    }
}

/// Receiver task: forwards inbound frames until the socket closes
async fn receiver_task(mut read: WsRead, event_tx: mpsc::Sender<TransportEvent>) {
    while let Some(msg_result) = read.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                if event_tx
                    .send(TransportEvent::Message(Bytes::from(text.into_bytes())))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Ok(Message::Binary(data)) => {
                if event_tx
                    .send(TransportEvent::Message(Bytes::from(data)))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Ok(Message::Close(_)) => {
                debug!("Signaling socket closed by remote");
                let _ = event_tx.send(TransportEvent::Closed(None)).await;
                return;
            }
            Err(e) => {
                error!("Signaling socket error: {}", e);
                let _ = event_tx.send(TransportEvent::Closed(Some(e.to_string()))).await;
                return;
            }
            // Transport-level ping/pong is handled by tungstenite itself;
            // liveness is judged by the application-level health check.
            _ => {}
        }
    }

    debug!("Signaling socket stream ended");
    let _ = event_tx.send(TransportEvent::Closed(None)).await;
}
