//! Reconnection orchestrator
//!
//! Single source of truth for "should we attempt to reconnect right now".
//! The orchestrator watches the signaling channel's state and the external
//! signals (app lifecycle, reachability, telephony), gates decisions
//! through the policy set, and owns the one pending backoff timer. When
//! that timer fires it asks the session controller for a full rejoin; it
//! never reconnects a channel behind the session's back.
//!
//! A blocked policy is a state, not an error: it is logged and the timer
//! is cancelled, nothing is surfaced to the application.

use crate::policy::Policy;
use crate::retry::RetryStrategy;
use crate::signaling::{DisconnectSource, SignalingChannel, SignalingConnectionState};
use crate::signals::{AppState, BackgroundGrantProvider, Reachability};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Capacity of the reconnect-request channel to the session controller
const REQUEST_BUFFER: usize = 4;

/// External signal subscriptions consumed by the orchestrator
pub struct OrchestratorSignals {
    /// App foreground/background transitions
    pub app: watch::Receiver<AppState>,
    /// Network reachability transitions
    pub reachability: watch::Receiver<Reachability>,
    /// Active telephony session count
    pub telephony: watch::Receiver<u32>,
}

/// Request for the session controller to re-run the full join sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectRequest {
    /// Consecutive-failure count at the time of the request
    pub attempt: u32,
}

enum Command {
    /// Swap to a freshly built channel after a rejoin
    Rebind(SignalingChannel),
    /// A rejoin attempt failed without a channel transition
    /// (e.g. edge selection); re-arm the backoff timer
    ScheduleRetry,
}

/// Handle to the orchestrator actor
pub struct ReconnectionOrchestrator {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl ReconnectionOrchestrator {
    /// Spawn the orchestrator bound to `channel`
    ///
    /// Returns the handle and the stream of reconnect requests the
    /// session controller must serve. The actor exits when the handle is
    /// dropped, releasing any background grant it holds.
    pub fn spawn(
        channel: SignalingChannel,
        signals: OrchestratorSignals,
        grants: Arc<dyn BackgroundGrantProvider>,
        retry: RetryStrategy,
        keep_alive_in_background: bool,
    ) -> (Self, mpsc::Receiver<ReconnectRequest>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (request_tx, request_rx) = mpsc::channel(REQUEST_BUFFER);
        let (grant_tx, grant_rx) = mpsc::channel(1);

        let gate = Policy::standard_gate(
            signals.reachability.clone(),
            signals.app.clone(),
            signals.telephony.clone(),
        );

        let actor = OrchestratorActor {
            channel: channel.clone(),
            gate,
            retry,
            grants,
            keep_alive_in_background,
            pending_at: None,
            holding_grant: false,
            request_tx,
            grant_tx,
        };
        tokio::spawn(actor.run(cmd_rx, channel.state(), signals, grant_rx));

        (Self { cmd_tx }, request_rx)
    }

    /// Bind the orchestrator to the channel built by the latest rejoin
    pub fn rebind(&self, channel: SignalingChannel) {
        let _ = self.cmd_tx.send(Command::Rebind(channel));
    }

    /// Report a rejoin attempt that failed before any channel transition
    pub fn schedule_retry(&self) {
        let _ = self.cmd_tx.send(Command::ScheduleRetry);
    }
}

struct OrchestratorActor {
    channel: SignalingChannel,
    gate: Policy,
    retry: RetryStrategy,
    grants: Arc<dyn BackgroundGrantProvider>,
    keep_alive_in_background: bool,
    /// When the pending reconnect attempt fires; at most one at a time
    pending_at: Option<Instant>,
    holding_grant: bool,
    request_tx: mpsc::Sender<ReconnectRequest>,
    grant_tx: mpsc::Sender<()>,
}

impl OrchestratorActor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut chan_state: watch::Receiver<SignalingConnectionState>,
        signals: OrchestratorSignals,
        mut grant_rx: mpsc::Receiver<()>,
    ) {
        let OrchestratorSignals {
            mut app,
            mut reachability,
            mut telephony,
        } = signals;

        loop {
            let fire_at = self.pending_at.unwrap_or_else(Instant::now);

            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Rebind(channel)) => {
                        chan_state = channel.state();
                        chan_state.mark_unchanged();
                        if channel.current_state().is_connected() {
                            self.retry.reset();
                            self.pending_at = None;
                        }
                        self.channel = channel;
                        debug!("Orchestrator rebound to new signaling channel");
                    }
                    Some(Command::ScheduleRetry) => self.schedule(),
                    None => break,
                },
                result = chan_state.changed() => match result {
                    Ok(()) => {
                        let state = chan_state.borrow_and_update().clone();
                        self.on_channel_state(state);
                    }
                    // Channel actor ended; stay parked until a rebind.
                    Err(_) => chan_state.mark_unchanged(),
                },
                result = app.changed() => {
                    if result.is_err() { break; }
                    let state = *app.borrow_and_update();
                    self.on_app_state(state).await;
                },
                result = reachability.changed() => {
                    if result.is_err() { break; }
                    let state = *reachability.borrow_and_update();
                    self.on_reachability(state).await;
                },
                result = telephony.changed() => {
                    if result.is_err() { break; }
                    telephony.mark_unchanged();
                    self.cancel_if_blocked();
                },
                _ = tokio::time::sleep_until(fire_at), if self.pending_at.is_some() => {
                    self.on_reconnect_timer().await;
                },
                Some(()) = grant_rx.recv() => self.on_grant_expired(),
            }
        }

        self.release_grant();
        debug!("Reconnection orchestrator task terminated");
    }

    /// The full automatic-reconnect gate: every registered policy must
    /// pass, and the current channel must not be user-disconnected.
    fn can_reconnect(&self) -> bool {
        self.gate.evaluate() && self.channel.current_state().auto_reconnect_eligible()
    }

    fn on_channel_state(&mut self, state: SignalingConnectionState) {
        match state {
            SignalingConnectionState::Connecting => {
                // A new attempt is already under way; avoid racing it.
                if self.pending_at.take().is_some() {
                    debug!("Connect observed; cancelling pending reconnect timer");
                }
            }
            SignalingConnectionState::Connected(_) => {
                self.retry.reset();
                self.pending_at = None;
            }
            SignalingConnectionState::Disconnected(source) => {
                if self.can_reconnect() {
                    self.schedule();
                } else {
                    debug!("Reconnect policy blocked after disconnect ({})", source);
                    self.pending_at = None;
                }
            }
            _ => {}
        }
    }

    /// Arm the backoff timer for the next attempt; no-op if one is pending
    fn schedule(&mut self) {
        if self.pending_at.is_some() {
            return;
        }
        self.retry.record_failure();
        let delay = self.retry.delay();
        info!(
            "Scheduling reconnect attempt {} in {:?}",
            self.retry.failures(),
            delay
        );
        self.pending_at = Some(Instant::now() + delay);
    }

    async fn on_reconnect_timer(&mut self) {
        self.pending_at = None;
        if !self.can_reconnect() {
            debug!("Reconnect timer fired while policy blocked; skipping");
            return;
        }
        self.request_reconnect().await;
    }

    async fn request_reconnect(&mut self) {
        let request = ReconnectRequest {
            attempt: self.retry.failures(),
        };
        if self.request_tx.send(request).await.is_err() {
            warn!("Session controller gone; dropping reconnect request");
        }
    }

    async fn on_app_state(&mut self, state: AppState) {
        match state {
            AppState::Background => {
                let channel_state = self.channel.current_state();
                if !channel_state.is_connectable() {
                    self.cancel_if_blocked();
                    return;
                }
                if self.keep_alive_in_background {
                    // Single-slot resource: end any outstanding grant first.
                    self.release_grant();
                    let expired = self.grant_tx.clone();
                    let granted = self.grants.begin(Box::new(move || {
                        let _ = expired.try_send(());
                    }));
                    if granted {
                        self.holding_grant = true;
                        info!("App backgrounded; holding channel open under background grant");
                    } else {
                        info!("Background grant denied; disconnecting proactively");
                        self.channel.disconnect(DisconnectSource::SystemInitiated);
                    }
                } else {
                    info!("App backgrounded with keep-alive disabled; disconnecting");
                    self.channel.disconnect(DisconnectSource::SystemInitiated);
                }
            }
            AppState::Foreground => {
                self.release_grant();
                self.resume_if_disconnected("app foregrounded").await;
            }
        }
        self.cancel_if_blocked();
    }

    async fn on_reachability(&mut self, state: Reachability) {
        match state {
            Reachability::Available => {
                self.resume_if_disconnected("network available").await;
            }
            Reachability::Unavailable => {
                if self.channel.current_state().is_connectable() {
                    info!("Network unreachable; disconnecting proactively");
                    self.channel.disconnect(DisconnectSource::SystemInitiated);
                }
            }
        }
        self.cancel_if_blocked();
    }

    fn on_grant_expired(&mut self) {
        self.holding_grant = false;
        if self.channel.current_state().is_connectable() {
            info!("Background grant expired; disconnecting proactively");
            self.channel.disconnect(DisconnectSource::SystemInitiated);
        }
    }

    /// Attempt an immediate reconnect after a favorable signal change
    async fn resume_if_disconnected(&mut self, reason: &str) {
        let state = self.channel.current_state();
        if matches!(state, SignalingConnectionState::Disconnected(_)) && self.can_reconnect() {
            info!("Attempting immediate reconnect ({})", reason);
            self.pending_at = None;
            self.request_reconnect().await;
        }
    }

    fn cancel_if_blocked(&mut self) {
        if self.pending_at.is_some() && !self.can_reconnect() {
            debug!("Reconnect policy now blocked; cancelling pending timer");
            self.pending_at = None;
        }
    }

    fn release_grant(&mut self) {
        if self.holding_grant {
            self.grants.end();
            self.holding_grant = false;
        }
    }
}
