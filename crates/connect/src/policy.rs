//! Reconnection policy predicates
//!
//! Each leaf is an independently evaluable boolean over one external
//! signal; composites combine them with AND/OR. The set is closed on
//! purpose: every decision the orchestrator makes can be reproduced and
//! unit-tested from a [`Policy`] value alone.

use crate::signaling::SignalingConnectionState;
use crate::signals::{AppState, Reachability};
use tokio::sync::watch;

/// A reconnection predicate over current signal values
///
/// Evaluation is synchronous and total: it samples the current value of
/// each underlying watch channel and never blocks.
#[derive(Debug, Clone)]
pub enum Policy {
    /// The signaling channel is in a lifecycle that supports automatic
    /// recovery (false once a user-initiated disconnect is in effect)
    ChannelEligible(watch::Receiver<SignalingConnectionState>),

    /// The network is reachable
    NetworkReachable(watch::Receiver<Reachability>),

    /// The app is foregrounded
    AppActive(watch::Receiver<AppState>),

    /// A telephony/voice session is active (so a live call is not
    /// silently dropped mid-interruption)
    TelephonyActive(watch::Receiver<u32>),

    /// True if any child policy is true
    AnyOf(Vec<Policy>),

    /// True if all child policies are true
    AllOf(Vec<Policy>),
}

impl Policy {
    /// Evaluate against the current signal values
    pub fn evaluate(&self) -> bool {
        match self {
            Policy::ChannelEligible(rx) => rx.borrow().auto_reconnect_eligible(),
            Policy::NetworkReachable(rx) => *rx.borrow() == Reachability::Available,
            Policy::AppActive(rx) => *rx.borrow() == AppState::Foreground,
            Policy::TelephonyActive(rx) => *rx.borrow() > 0,
            Policy::AnyOf(children) => children.iter().any(Policy::evaluate),
            Policy::AllOf(children) => children.iter().all(Policy::evaluate),
        }
    }

    /// The standard gate for automatic reconnection: the network must be
    /// reachable AND the app must be foregrounded or a telephony session
    /// active. Channel eligibility is checked separately by the
    /// orchestrator against whichever channel is current.
    pub fn standard_gate(
        reachability: watch::Receiver<Reachability>,
        app: watch::Receiver<AppState>,
        telephony: watch::Receiver<u32>,
    ) -> Policy {
        Policy::AllOf(vec![
            Policy::NetworkReachable(reachability),
            Policy::AnyOf(vec![
                Policy::AppActive(app),
                Policy::TelephonyActive(telephony),
            ]),
        ])
    }
}
