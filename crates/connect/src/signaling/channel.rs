//! Signaling channel: connection state machine and health-check loop
//!
//! One channel owns at most one transport connection. A single actor task
//! serializes every command, inbound frame, and timer so the state machine
//! never races with itself; external components observe transitions through
//! a [`watch`] stream.
//!
//! Liveness is judged by an application-level ping/pong: the underlying
//! transport does not reliably report half-open sockets, so a missed pong
//! is the sole trigger for dead-socket detection.

use super::protocol::{HealthCheckInfo, HealthCheckOrigin, HealthCheckPayload};
use super::transport::{SignalingTransport, TransportEvent, TransportSink};
use crate::{Error, Result};
use bytes::Bytes;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// Capacity of the forwarded-message channel
const MESSAGE_BUFFER: usize = 64;

/// Why a channel is (or is being) disconnected
#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectSource {
    /// The user left the call; excluded from auto-reconnect eligibility
    UserInitiated,
    /// The server or transport failed; carries the error description
    ServerInitiated(String),
    /// The SDK disconnected proactively (backgrounded, network lost)
    SystemInitiated,
    /// The health check went unanswered
    NoPongReceived,
}

impl fmt::Display for DisconnectSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserInitiated => write!(f, "user initiated"),
            Self::ServerInitiated(e) => write!(f, "server initiated ({})", e),
            Self::SystemInitiated => write!(f, "system initiated"),
            Self::NoPongReceived => write!(f, "no pong received"),
        }
    }
}

/// Connection state of a signaling channel
///
/// Owned exclusively by the channel actor; transitions are the only way
/// external components observe channel health.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingConnectionState {
    /// Channel constructed, no connect issued yet
    Initialized,
    /// Transport open in progress
    Connecting,
    /// Transport open, awaiting the first health check
    Authenticating,
    /// Live channel; carries the last-seen health-check payloads
    Connected(HealthCheckInfo),
    /// Teardown in progress
    Disconnecting(DisconnectSource),
    /// Torn down
    Disconnected(DisconnectSource),
}

impl SignalingConnectionState {
    /// Whether the channel currently has a healthy connection
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    /// Whether the channel is in a connected/connecting lifecycle
    /// (the states a proactive disconnect applies to)
    pub fn is_connectable(&self) -> bool {
        matches!(self, Self::Connecting | Self::Authenticating | Self::Connected(_))
    }

    /// Whether automatic reconnection is still permitted from this state
    ///
    /// False only once a user-initiated disconnect is in effect.
    pub fn auto_reconnect_eligible(&self) -> bool {
        !matches!(
            self,
            Self::Disconnecting(DisconnectSource::UserInitiated)
                | Self::Disconnected(DisconnectSource::UserInitiated)
        )
    }
}

impl fmt::Display for SignalingConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialized => write!(f, "initialized"),
            Self::Connecting => write!(f, "connecting"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Connected(_) => write!(f, "connected"),
            Self::Disconnecting(src) => write!(f, "disconnecting ({})", src),
            Self::Disconnected(src) => write!(f, "disconnected ({})", src),
        }
    }
}

/// Channel-level configuration, derived from the session config
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Interval between health-check pings while connected
    pub ping_interval: Duration,
    /// How long to wait for a pong before declaring the socket dead
    pub pong_timeout: Duration,
    /// Timeout for opening the transport
    pub connect_timeout: Duration,
    /// Which endpoint this channel talks to (shapes the ping payload)
    pub kind: HealthCheckOrigin,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(5),
            pong_timeout: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(10),
            kind: HealthCheckOrigin::Coordinator,
        }
    }
}

enum Command {
    Connect,
    Disconnect(DisconnectSource),
    Send(Bytes),
}

/// Handle to a signaling channel actor
///
/// Cloneable; the actor exits once every handle is dropped, closing the
/// transport on its way out.
#[derive(Clone)]
pub struct SignalingChannel {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<SignalingConnectionState>,
}

impl SignalingChannel {
    /// Spawn a channel actor for `url`
    ///
    /// Returns the handle and the stream of non-health-check inbound
    /// frames. The channel starts in `Initialized`; call [`connect`].
    ///
    /// [`connect`]: SignalingChannel::connect
    pub fn spawn(
        transport: Arc<dyn SignalingTransport>,
        url: Url,
        config: ChannelConfig,
    ) -> (Self, mpsc::Receiver<Bytes>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SignalingConnectionState::Initialized);
        let (msg_tx, msg_rx) = mpsc::channel(MESSAGE_BUFFER);

        let actor = ChannelActor {
            transport,
            url,
            config,
            state_tx,
            msg_tx,
            sink: None,
            events: None,
            ping: None,
            pong_deadline: None,
            connection_id: Uuid::nil(),
            ping_seq: 0,
            health: HealthCheckInfo::default(),
        };
        tokio::spawn(actor.run(cmd_rx));

        (Self { cmd_tx, state_rx }, msg_rx)
    }

    /// Request a connect; idempotent while connecting or connected
    pub fn connect(&self) {
        let _ = self.cmd_tx.send(Command::Connect);
    }

    /// Request a disconnect with the given source
    pub fn disconnect(&self, source: DisconnectSource) {
        let _ = self.cmd_tx.send(Command::Disconnect(source));
    }

    /// Send an opaque signaling frame; best-effort once connected
    pub fn send(&self, frame: Bytes) -> Result<()> {
        self.cmd_tx
            .send(Command::Send(frame))
            .map_err(|_| Error::Transport("signaling channel task ended".to_string()))
    }

    /// Subscribe to connection state transitions
    pub fn state(&self) -> watch::Receiver<SignalingConnectionState> {
        self.state_rx.clone()
    }

    /// Current connection state
    pub fn current_state(&self) -> SignalingConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Disconnect and wait until teardown is observed
    pub async fn disconnect_and_wait(&self, source: DisconnectSource) {
        self.disconnect(source);
        let mut rx = self.state_rx.clone();
        let _ = rx
            .wait_for(|s| matches!(s, SignalingConnectionState::Disconnected(_)))
            .await;
    }

    /// Wait until the channel is connected with a live health check, or
    /// fail with the disconnect reason / a timeout
    pub async fn wait_until_active(&self, timeout: Duration) -> Result<HealthCheckInfo> {
        let mut rx = self.state_rx.clone();
        let wait = rx.wait_for(|s| {
            matches!(
                s,
                SignalingConnectionState::Connected(_) | SignalingConnectionState::Disconnected(_)
            )
        });

        let state = match tokio::time::timeout(timeout, wait).await {
            Err(_) => {
                return Err(Error::ConnectTimeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            Ok(Err(_)) => {
                return Err(Error::Transport("signaling channel task ended".to_string()))
            }
            Ok(Ok(state)) => state.clone(),
        };

        match state {
            SignalingConnectionState::Connected(info) => Ok(info),
            SignalingConnectionState::Disconnected(source) => Err(Error::Transport(format!(
                "signaling connect failed: {}",
                source
            ))),
            _ => Err(Error::Transport("unexpected signaling state".to_string())),
        }
    }
}

struct ChannelActor {
    transport: Arc<dyn SignalingTransport>,
    url: Url,
    config: ChannelConfig,
    state_tx: watch::Sender<SignalingConnectionState>,
    msg_tx: mpsc::Sender<Bytes>,
    sink: Option<Box<dyn TransportSink>>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    ping: Option<Interval>,
    pong_deadline: Option<Pin<Box<Sleep>>>,
    connection_id: Uuid,
    ping_seq: u64,
    health: HealthCheckInfo,
}

impl ChannelActor {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Connect) => self.handle_connect().await,
                    Some(Command::Disconnect(source)) => self.handle_disconnect(source).await,
                    Some(Command::Send(frame)) => self.handle_send(frame).await,
                    None => {
                        // Every handle dropped: tear down and exit.
                        self.handle_disconnect(DisconnectSource::SystemInitiated).await;
                        break;
                    }
                },
                event = Self::next_event(&mut self.events) => self.handle_event(event).await,
                _ = Self::next_tick(&mut self.ping) => self.send_ping().await,
                _ = Self::deadline(&mut self.pong_deadline) => self.on_pong_timeout().await,
            }
        }
        debug!("Signaling channel task terminated");
    }

    /// Next transport event, or a synthetic close if the event stream ended
    async fn next_event(events: &mut Option<mpsc::Receiver<TransportEvent>>) -> TransportEvent {
        match events {
            Some(rx) => match rx.recv().await {
                Some(event) => event,
                None => TransportEvent::Closed(None),
            },
            None => std::future::pending().await,
        }
    }

    async fn next_tick(ping: &mut Option<Interval>) {
        match ping {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    async fn deadline(pong_deadline: &mut Option<Pin<Box<Sleep>>>) {
        match pong_deadline {
            Some(sleep) => sleep.as_mut().await,
            None => std::future::pending().await,
        }
    }

    async fn handle_connect(&mut self) {
        let current = self.state_tx.borrow().clone();
        if current.is_connectable() {
            debug!("connect() while {}; ignoring", current);
            return;
        }

        self.set_state(SignalingConnectionState::Connecting);
        self.connection_id = Uuid::new_v4();
        self.ping_seq = 0;
        self.health = HealthCheckInfo::default();

        let opened =
            tokio::time::timeout(self.config.connect_timeout, self.transport.open(&self.url)).await;

        match opened {
            Ok(Ok((sink, events))) => {
                self.sink = Some(sink);
                self.events = Some(events);
                self.set_state(SignalingConnectionState::Authenticating);
                info!(
                    connection_id = %self.connection_id,
                    "Signaling transport open, awaiting first health check"
                );
                // Announce this connection so the remote can address its
                // health checks to the right incarnation.
                self.send_health_ping().await;
            }
            Ok(Err(e)) => {
                warn!("Signaling transport open failed: {}", e);
                self.fail(DisconnectSource::ServerInitiated(e.to_string()));
            }
            Err(_) => {
                warn!(
                    "Signaling transport open timed out after {:?}",
                    self.config.connect_timeout
                );
                self.fail(DisconnectSource::ServerInitiated(format!(
                    "transport open timed out after {:?}",
                    self.config.connect_timeout
                )));
            }
        }
    }

    async fn handle_disconnect(&mut self, source: DisconnectSource) {
        let current = self.state_tx.borrow().clone();
        match current {
            SignalingConnectionState::Disconnected(_) => {
                debug!("disconnect() while already disconnected; ignoring");
                return;
            }
            SignalingConnectionState::Initialized => {
                self.set_state(SignalingConnectionState::Disconnected(source));
                return;
            }
            _ => {}
        }

        self.set_state(SignalingConnectionState::Disconnecting(source.clone()));
        self.stop_health_loop();
        self.events = None;

        if let Some(mut sink) = self.sink.take() {
            // Teardown is already intentional; a close error changes nothing.
            if let Err(e) = sink.close().await {
                debug!("Error closing signaling transport: {}", e);
            }
        }

        self.set_state(SignalingConnectionState::Disconnected(source));
    }

    async fn handle_send(&mut self, frame: Bytes) {
        let current = self.state_tx.borrow().clone();
        if !current.is_connectable() || self.sink.is_none() {
            warn!("Dropping outbound frame while {}", current);
            return;
        }
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.send(frame).await {
                warn!("Outbound frame send failed: {}", e);
                self.fail(DisconnectSource::ServerInitiated(e.to_string()));
            }
        }
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(frame) => self.handle_frame(frame).await,
            TransportEvent::Closed(error) => self.handle_closed(error),
        }
    }

    async fn handle_frame(&mut self, frame: Bytes) {
        if let Some(payload) = HealthCheckPayload::parse(&frame) {
            if payload.connection_id != self.connection_id {
                debug!(
                    stale = %payload.connection_id,
                    current = %self.connection_id,
                    "Ignoring health check for a previous connection"
                );
                return;
            }

            self.pong_deadline = None;
            self.health.record(payload);

            let current = self.state_tx.borrow().clone();
            match current {
                SignalingConnectionState::Authenticating => {
                    info!(
                        connection_id = %self.connection_id,
                        "First health check received; channel connected"
                    );
                    self.set_state(SignalingConnectionState::Connected(self.health.clone()));
                    self.start_ping();
                }
                SignalingConnectionState::Connected(_) => {
                    self.set_state(SignalingConnectionState::Connected(self.health.clone()));
                }
                _ => {}
            }
            return;
        }

        if self.msg_tx.send(frame).await.is_err() {
            debug!("Message consumer dropped; discarding inbound frame");
        }
    }

    fn handle_closed(&mut self, error: Option<String>) {
        let current = self.state_tx.borrow().clone();
        if matches!(current, SignalingConnectionState::Disconnected(_)) {
            return;
        }

        self.stop_health_loop();
        self.sink = None;
        self.events = None;

        let source = match current {
            // Teardown was already requested; keep the requested source and
            // suppress the transport error.
            SignalingConnectionState::Disconnecting(source) => source,
            _ => DisconnectSource::ServerInitiated(
                error.unwrap_or_else(|| "connection closed".to_string()),
            ),
        };

        warn!("Signaling transport closed ({})", source);
        self.set_state(SignalingConnectionState::Disconnected(source));
    }

    async fn send_ping(&mut self) {
        if !self.state_tx.borrow().is_connected() {
            return;
        }
        self.send_health_ping().await;
        if self.sink.is_some() && self.pong_deadline.is_none() {
            self.pong_deadline = Some(Box::pin(sleep(self.config.pong_timeout)));
        }
    }

    async fn send_health_ping(&mut self) {
        self.ping_seq += 1;
        let ping = HealthCheckPayload::ping(self.config.kind, self.connection_id, self.ping_seq);
        let frame = match ping.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode health check: {}", e);
                return;
            }
        };
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.send(frame).await {
                warn!("Health-check send failed: {}", e);
                self.fail(DisconnectSource::ServerInitiated(e.to_string()));
            }
        }
    }

    async fn on_pong_timeout(&mut self) {
        warn!(
            connection_id = %self.connection_id,
            "No pong within {:?}; treating socket as dead",
            self.config.pong_timeout
        );
        self.pong_deadline = None;
        self.handle_disconnect(DisconnectSource::NoPongReceived).await;
    }

    /// Abort a connection attempt or live connection after a transport error
    fn fail(&mut self, source: DisconnectSource) {
        self.stop_health_loop();
        self.sink = None;
        self.events = None;
        self.set_state(SignalingConnectionState::Disconnected(source));
    }

    fn start_ping(&mut self) {
        if self.ping.is_none() {
            let mut interval = interval_at(
                Instant::now() + self.config.ping_interval,
                self.config.ping_interval,
            );
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.ping = Some(interval);
        }
    }

    fn stop_health_loop(&mut self) {
        self.ping = None;
        self.pong_deadline = None;
    }

    fn set_state(&self, next: SignalingConnectionState) {
        let previous = self.state_tx.borrow().clone();
        if previous == next {
            return;
        }
        debug!("Signaling state: {} -> {}", previous, next);
        let _ = self.state_tx.send(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_reconnect_eligibility() {
        assert!(SignalingConnectionState::Initialized.auto_reconnect_eligible());
        assert!(SignalingConnectionState::Connecting.auto_reconnect_eligible());
        assert!(SignalingConnectionState::Disconnected(DisconnectSource::NoPongReceived)
            .auto_reconnect_eligible());
        assert!(
            SignalingConnectionState::Disconnected(DisconnectSource::SystemInitiated)
                .auto_reconnect_eligible()
        );
        assert!(
            !SignalingConnectionState::Disconnected(DisconnectSource::UserInitiated)
                .auto_reconnect_eligible()
        );
        assert!(
            !SignalingConnectionState::Disconnecting(DisconnectSource::UserInitiated)
                .auto_reconnect_eligible()
        );
    }

    #[test]
    fn test_connectable_states() {
        assert!(SignalingConnectionState::Connecting.is_connectable());
        assert!(SignalingConnectionState::Authenticating.is_connectable());
        assert!(SignalingConnectionState::Connected(HealthCheckInfo::default()).is_connectable());
        assert!(!SignalingConnectionState::Initialized.is_connectable());
        assert!(
            !SignalingConnectionState::Disconnected(DisconnectSource::SystemInitiated)
                .is_connectable()
        );
    }
}
