//! Session controller: the join sequence and the reconnection window
//!
//! Drives select-edge → open-channel → attach-media, owns the single
//! call-state transition point, and bounds automatic reconnection with a
//! wall-clock window measured from the first observed disconnect. Join,
//! leave, and rejoin commands are processed strictly in order by one actor
//! task, so concurrent requests queue instead of racing.

use crate::config::ConnectConfig;
use crate::edge::{select_edge, EdgeCandidate, EdgeDirectory, LatencyProber};
use crate::reconnect::{OrchestratorSignals, ReconnectRequest, ReconnectionOrchestrator};
use crate::retry::RetryStrategy;
use crate::signaling::{
    ChannelConfig, DisconnectSource, HealthCheckOrigin, SignalingChannel,
    SignalingConnectionState, SignalingTransport,
};
use crate::signals::{AppState, BackgroundGrantProvider, Reachability};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Capacity of the forwarded call-event channel
const EVENT_BUFFER: usize = 64;

/// Identifier of a call: type plus id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId {
    /// Call type (e.g. "default", "livestream")
    pub call_type: String,
    /// Unique id within the type
    pub id: String,
}

impl CallId {
    /// Create a call id
    pub fn new(call_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            call_type: call_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.call_type, self.id)
    }
}

/// Terminal session failure surfaced to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    /// Automatic reconnection exceeded the configured window
    ReconnectWindowExceeded,
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReconnectWindowExceeded => write!(f, "reconnect window exceeded"),
        }
    }
}

/// Observable session lifecycle state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No session
    Idle,
    /// Probing candidate edges
    ConnectingToEdge,
    /// Opening the signaling channel to the selected edge
    JoiningChannel,
    /// Live session
    Joined,
    /// Channel dropped unexpectedly; automatic recovery in progress while
    /// the previously joined media context is kept alive
    Reconnecting,
    /// Terminal failure; a fresh join is required
    Failed(SessionFailure),
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::ConnectingToEdge => write!(f, "connecting"),
            Self::JoiningChannel => write!(f, "joining"),
            Self::Joined => write!(f, "joined"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// Attach point for the media transport; opaque to this core
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Attach the media path to a joined session
    async fn attach(&self, call: &CallId, channel: &SignalingChannel) -> Result<()>;

    /// Detach the media path
    async fn detach(&self);
}

/// External collaborators a session is built from
pub struct SessionDeps {
    /// Directory service listing candidate edges
    pub directory: Arc<dyn EdgeDirectory>,
    /// Latency prober for edge selection
    pub prober: Arc<dyn LatencyProber>,
    /// Signaling transport factory
    pub transport: Arc<dyn SignalingTransport>,
    /// Media transport attach point; held weakly so session teardown
    /// cannot leak the collaborator
    pub media: Weak<dyn MediaTransport>,
    /// App-lifecycle signal subscription
    pub app: watch::Receiver<AppState>,
    /// Network-reachability signal subscription
    pub reachability: watch::Receiver<Reachability>,
    /// Telephony active-session-count subscription
    pub telephony: watch::Receiver<u32>,
    /// Background-execution grant provider
    pub grants: Arc<dyn BackgroundGrantProvider>,
}

enum SessionCmd {
    Join {
        call: CallId,
        reply: oneshot::Sender<Result<()>>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a session controller actor
///
/// The single call-state transition point for the rest of the SDK.
#[derive(Clone)]
pub struct SessionController {
    cmd_tx: mpsc::Sender<SessionCmd>,
    state_rx: watch::Receiver<SessionState>,
    diag_rx: watch::Receiver<SignalingConnectionState>,
}

impl SessionController {
    /// Spawn a session controller
    ///
    /// Returns the handle and the stream of inbound call events (opaque
    /// frames, health checks already filtered out). Fails fast on an
    /// invalid configuration.
    pub fn spawn(
        config: ConnectConfig,
        deps: SessionDeps,
    ) -> Result<(Self, mpsc::Receiver<Bytes>)> {
        config.validate()?;

        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (diag_tx, diag_rx) = watch::channel(SignalingConnectionState::Initialized);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        let actor = SessionActor {
            config,
            deps,
            state_tx,
            diag_tx,
            event_tx,
        };
        tokio::spawn(actor.run(cmd_rx));

        Ok((
            Self {
                cmd_tx,
                state_rx,
                diag_rx,
            },
            event_rx,
        ))
    }

    /// Join a call: select an edge, open the signaling channel, attach
    /// media
    ///
    /// Edge-selection failure on an initial join is fatal and returned
    /// here; it is not retried.
    pub async fn join(&self, call: CallId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCmd::Join { call, reply })
            .await
            .map_err(|_| Error::InvalidState("session task ended".to_string()))?;
        rx.await
            .map_err(|_| Error::InvalidState("session task ended".to_string()))?
    }

    /// Leave the call, cancelling all pending timers and probes
    pub async fn leave(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(SessionCmd::Leave { reply })
            .await
            .map_err(|_| Error::InvalidState("session task ended".to_string()))?;
        rx.await
            .map_err(|_| Error::InvalidState("session task ended".to_string()))
    }

    /// Subscribe to session state transitions
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Current session state
    pub fn current_state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Connectivity mirror of the active signaling channel, for
    /// diagnostics and telemetry
    pub fn connectivity(&self) -> watch::Receiver<SignalingConnectionState> {
        self.diag_rx.clone()
    }
}

/// Everything belonging to one joined (or reconnecting) session
struct ActiveSession {
    call: CallId,
    channel: SignalingChannel,
    messages: mpsc::Receiver<Bytes>,
    chan_state: watch::Receiver<SignalingConnectionState>,
    orchestrator: ReconnectionOrchestrator,
    reconnect_rx: mpsc::Receiver<ReconnectRequest>,
    /// In-flight rejoin bring-up; runs as its own task so leave can
    /// abort it mid-probe instead of queueing behind probe timeouts
    rejoin: Option<JoinHandle<Result<Established>>>,
    /// Set the instant the first unexpected disconnect is observed;
    /// cleared on a successful rejoin
    reconnecting_since: Option<Instant>,
    messages_closed: bool,
    reconnect_closed: bool,
    chan_gone: bool,
}

enum SessionEvent {
    Reconnect(ReconnectRequest),
    RejoinOutcome(Result<Established>),
    ChannelState(SignalingConnectionState),
    Frame(Bytes),
}

struct Established {
    channel: SignalingChannel,
    messages: mpsc::Receiver<Bytes>,
}

struct SessionActor {
    config: ConnectConfig,
    deps: SessionDeps,
    state_tx: watch::Sender<SessionState>,
    diag_tx: watch::Sender<SignalingConnectionState>,
    event_tx: mpsc::Sender<Bytes>,
}

impl SessionActor {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<SessionCmd>) {
        let mut active: Option<ActiveSession> = None;

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(SessionCmd::Join { call, reply }) => {
                        let result = self.handle_join(call, &mut active).await;
                        let _ = reply.send(result);
                    }
                    Some(SessionCmd::Leave { reply }) => {
                        self.handle_leave(&mut active).await;
                        let _ = reply.send(());
                    }
                    None => {
                        self.handle_leave(&mut active).await;
                        break;
                    }
                },
                event = Self::next_session_event(&mut active) => {
                    self.handle_session_event(event, &mut active).await;
                }
            }
        }
        debug!("Session controller task terminated");
    }

    /// Next event from the active session's channel or orchestrator;
    /// pends forever while no session is active
    async fn next_session_event(active: &mut Option<ActiveSession>) -> SessionEvent {
        let Some(session) = active.as_mut() else {
            return std::future::pending().await;
        };

        loop {
            let rejoin_pending = session.rejoin.is_some();
            if session.reconnect_closed
                && session.messages_closed
                && session.chan_gone
                && !rejoin_pending
            {
                return std::future::pending().await;
            }

            tokio::select! {
                req = session.reconnect_rx.recv(), if !session.reconnect_closed => {
                    match req {
                        Some(request) => return SessionEvent::Reconnect(request),
                        None => session.reconnect_closed = true,
                    }
                },
                result = Self::rejoin_done(&mut session.rejoin), if rejoin_pending => {
                    return SessionEvent::RejoinOutcome(result);
                },
                result = session.chan_state.changed(), if !session.chan_gone => {
                    match result {
                        Ok(()) => {
                            let state = session.chan_state.borrow_and_update().clone();
                            return SessionEvent::ChannelState(state);
                        }
                        Err(_) => session.chan_gone = true,
                    }
                },
                frame = session.messages.recv(), if !session.messages_closed => {
                    match frame {
                        Some(frame) => return SessionEvent::Frame(frame),
                        None => session.messages_closed = true,
                    }
                },
            }
        }
    }

    /// Outcome of the spawned rejoin bring-up; pends while none is in
    /// flight (`select!` still constructs the unpolled branch future)
    async fn rejoin_done(
        rejoin: &mut Option<JoinHandle<Result<Established>>>,
    ) -> Result<Established> {
        match rejoin.as_mut() {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(_) => Err(Error::InvalidState("rejoin task aborted".to_string())),
            },
            None => std::future::pending().await,
        }
    }

    async fn handle_session_event(
        &mut self,
        event: SessionEvent,
        active: &mut Option<ActiveSession>,
    ) {
        match event {
            SessionEvent::ChannelState(state) => self.on_channel_state(state, active),
            SessionEvent::Reconnect(request) => self.handle_rejoin(request, active).await,
            SessionEvent::RejoinOutcome(result) => self.complete_rejoin(result, active).await,
            SessionEvent::Frame(frame) => {
                if self.event_tx.try_send(frame).is_err() {
                    warn!("Call-event consumer behind; dropping inbound frame");
                }
            }
        }
    }

    fn on_channel_state(
        &mut self,
        state: SignalingConnectionState,
        active: &mut Option<ActiveSession>,
    ) {
        // Mirror channel health for diagnostics.
        let _ = self.diag_tx.send(state.clone());

        let Some(session) = active.as_mut() else {
            return;
        };

        if let SignalingConnectionState::Disconnected(source) = &state {
            if *source != DisconnectSource::UserInitiated
                && *self.state_tx.borrow() == SessionState::Joined
            {
                info!(
                    call = %session.call,
                    "Signaling channel dropped ({}); entering reconnecting",
                    source
                );
                if session.reconnecting_since.is_none() {
                    session.reconnecting_since = Some(Instant::now());
                }
                self.set_state(SessionState::Reconnecting);
            }
        }
    }

    async fn handle_join(
        &mut self,
        call: CallId,
        active: &mut Option<ActiveSession>,
    ) -> Result<()> {
        if active.is_some() {
            return Err(Error::InvalidState(
                "session already active; leave before joining again".to_string(),
            ));
        }

        info!(call = %call, "Joining call");
        self.set_state(SessionState::ConnectingToEdge);
        let edge = match Self::select_target(
            self.deps.directory.clone(),
            self.deps.prober.clone(),
            self.config.clone(),
            call.clone(),
        )
        .await
        {
            Ok(edge) => edge,
            Err(e) => {
                self.set_state(SessionState::Idle);
                return Err(e);
            }
        };

        self.set_state(SessionState::JoiningChannel);
        let established = match Self::open_channel(
            self.deps.transport.clone(),
            self.config.clone(),
            edge,
        )
        .await
        {
            Ok(established) => established,
            Err(e) => {
                self.set_state(SessionState::Idle);
                return Err(e);
            }
        };

        if let Err(e) = self.attach_media(&call, &established.channel).await {
            established
                .channel
                .disconnect_and_wait(DisconnectSource::SystemInitiated)
                .await;
            self.set_state(SessionState::Idle);
            return Err(e);
        }

        let signals = OrchestratorSignals {
            app: self.deps.app.clone(),
            reachability: self.deps.reachability.clone(),
            telephony: self.deps.telephony.clone(),
        };
        let (orchestrator, reconnect_rx) = ReconnectionOrchestrator::spawn(
            established.channel.clone(),
            signals,
            self.deps.grants.clone(),
            RetryStrategy::new(self.config.retry.clone()),
            self.config.keep_alive_in_background,
        );

        let mut chan_state = established.channel.state();
        chan_state.mark_unchanged();
        let _ = self.diag_tx.send(established.channel.current_state());

        *active = Some(ActiveSession {
            call: call.clone(),
            channel: established.channel,
            messages: established.messages,
            chan_state,
            orchestrator,
            reconnect_rx,
            rejoin: None,
            reconnecting_since: None,
            messages_closed: false,
            reconnect_closed: false,
            chan_gone: false,
        });

        self.set_state(SessionState::Joined);
        info!(call = %call, "Call joined");
        Ok(())
    }

    async fn handle_rejoin(
        &mut self,
        request: ReconnectRequest,
        active: &mut Option<ActiveSession>,
    ) {
        let Some(session) = active.as_mut() else {
            return;
        };
        if *self.state_tx.borrow() != SessionState::Reconnecting {
            let current = self.state_tx.borrow().clone();
            debug!("Reconnect request while {}; ignoring", current);
            return;
        }
        if session.rejoin.is_some() {
            debug!("Rejoin already in flight; ignoring reconnect request");
            return;
        }

        let since = *session
            .reconnecting_since
            .get_or_insert_with(Instant::now);
        let elapsed = since.elapsed();
        if elapsed > self.config.reconnect_window() {
            warn!(
                call = %session.call,
                "Reconnect window exceeded after {:?}; giving up",
                elapsed
            );
            self.fail_session(active, SessionFailure::ReconnectWindowExceeded)
                .await;
            return;
        }

        info!(
            call = %session.call,
            attempt = request.attempt,
            "Reconnect attempt ({}ms into window)",
            elapsed.as_millis()
        );

        // One live channel per session: tear the old one down before
        // constructing its replacement. The edge is re-selected from
        // scratch; the previous relay may no longer be best.
        session
            .channel
            .disconnect_and_wait(DisconnectSource::SystemInitiated)
            .await;

        // The bring-up runs as its own task so a leave issued mid-probe
        // aborts it instead of queueing behind probe timeouts. The actor
        // picks the outcome back up as a RejoinOutcome event.
        session.rejoin = Some(tokio::spawn(Self::bring_up(
            self.deps.directory.clone(),
            self.deps.prober.clone(),
            self.deps.transport.clone(),
            self.config.clone(),
            session.call.clone(),
        )));
    }

    async fn complete_rejoin(
        &mut self,
        result: Result<Established>,
        active: &mut Option<ActiveSession>,
    ) {
        let Some(session) = active.as_mut() else {
            return;
        };
        session.rejoin = None;

        let established = match result {
            Ok(established) => established,
            Err(e) => {
                // One more failed attempt inside the window; the
                // orchestrator re-arms the backoff timer.
                warn!(call = %session.call, "Rejoin attempt failed: {}", e);
                session.orchestrator.schedule_retry();
                return;
            }
        };

        let call = session.call.clone();
        if let Err(e) = self.attach_media(&call, &established.channel).await {
            warn!("Media re-attach failed: {}", e);
            established
                .channel
                .disconnect_and_wait(DisconnectSource::SystemInitiated)
                .await;
            session.orchestrator.schedule_retry();
            return;
        }

        session.orchestrator.rebind(established.channel.clone());
        let mut chan_state = established.channel.state();
        chan_state.mark_unchanged();
        let _ = self.diag_tx.send(established.channel.current_state());

        session.channel = established.channel;
        session.messages = established.messages;
        session.chan_state = chan_state;
        session.messages_closed = false;
        session.chan_gone = false;
        session.reconnecting_since = None;

        self.set_state(SessionState::Joined);
        info!(call = %call, "Rejoined after reconnect");
    }

    /// Pick the best edge for a call by concurrent latency probing
    async fn select_target(
        directory: Arc<dyn EdgeDirectory>,
        prober: Arc<dyn LatencyProber>,
        config: ConnectConfig,
        call: CallId,
    ) -> Result<EdgeCandidate> {
        let descriptors = directory.list_candidate_edges(&call).await?;
        select_edge(
            prober.as_ref(),
            descriptors,
            config.probe_attempts,
            config.probe_timeout(),
        )
        .await
    }

    /// Bring up a healthy signaling channel to a selected edge
    async fn open_channel(
        transport: Arc<dyn SignalingTransport>,
        config: ConnectConfig,
        edge: EdgeCandidate,
    ) -> Result<Established> {
        let channel_config = ChannelConfig {
            ping_interval: config.ping_interval(),
            pong_timeout: config.pong_timeout(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            kind: HealthCheckOrigin::Sfu,
        };
        let (channel, messages) =
            SignalingChannel::spawn(transport, edge.address.clone(), channel_config);

        channel.connect();
        match channel
            .wait_until_active(Duration::from_millis(config.join_timeout_ms))
            .await
        {
            Ok(_health) => Ok(Established { channel, messages }),
            Err(e) => {
                channel
                    .disconnect_and_wait(DisconnectSource::SystemInitiated)
                    .await;
                Err(e)
            }
        }
    }

    /// Full bring-up: edge re-selection from scratch plus channel open
    async fn bring_up(
        directory: Arc<dyn EdgeDirectory>,
        prober: Arc<dyn LatencyProber>,
        transport: Arc<dyn SignalingTransport>,
        config: ConnectConfig,
        call: CallId,
    ) -> Result<Established> {
        let edge = Self::select_target(directory, prober, config.clone(), call).await?;
        Self::open_channel(transport, config, edge).await
    }

    async fn attach_media(&self, call: &CallId, channel: &SignalingChannel) -> Result<()> {
        match self.deps.media.upgrade() {
            Some(media) => media
                .attach(call, channel)
                .await
                .map_err(|e| Error::Media(e.to_string())),
            None => {
                // Collaborator already gone; nothing to attach.
                debug!("Media transport dropped; skipping attach");
                Ok(())
            }
        }
    }

    async fn handle_leave(&mut self, active: &mut Option<ActiveSession>) {
        if let Some(session) = active.take() {
            info!(call = %session.call, "Leaving call");
            // An aborted bring-up drops its channel handle, which tears
            // the half-open channel down on its own.
            if let Some(handle) = &session.rejoin {
                handle.abort();
            }
            // User-initiated teardown flips the reconnect policy to false
            // before the orchestrator handle is dropped.
            session
                .channel
                .disconnect_and_wait(DisconnectSource::UserInitiated)
                .await;
            if let Some(media) = self.deps.media.upgrade() {
                media.detach().await;
            }
        }
        self.set_state(SessionState::Idle);
    }

    async fn fail_session(
        &mut self,
        active: &mut Option<ActiveSession>,
        failure: SessionFailure,
    ) {
        if let Some(session) = active.take() {
            if let Some(handle) = &session.rejoin {
                handle.abort();
            }
            session
                .channel
                .disconnect_and_wait(DisconnectSource::SystemInitiated)
                .await;
            if let Some(media) = self.deps.media.upgrade() {
                media.detach().await;
            }
        }
        self.set_state(SessionState::Failed(failure));
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state_tx.borrow().clone();
        if previous == next {
            return;
        }
        debug!("Session state: {} -> {}", previous, next);
        let _ = self.state_tx.send(next);
    }
}
