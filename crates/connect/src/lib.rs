//! RoomLink connectivity core
//!
//! Client-side connection management for real-time calls: edge-relay
//! selection with latency probing, a health-checked signaling channel, a
//! policy-gated reconnection orchestrator, and the session controller
//! that ties them together.
//!
//! # Features
//!
//! - **Edge selection**: concurrent latency probing of candidate relays,
//!   lowest latest sample wins
//! - **Signaling channel**: one actor per connection, application-level
//!   ping/pong liveness, opaque call-event forwarding
//! - **Reconnection**: exponential backoff gated by app lifecycle,
//!   network reachability, and telephony signals
//! - **Session control**: join/leave/rejoin serialized through a single
//!   actor, automatic recovery bounded by a wall-clock window
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Application                                             │
//! │  ↓ join / leave                  ↑ states, call events   │
//! │  SessionController                                       │
//! │  ├─ EdgeDirectory + LatencyProber (select_edge)          │
//! │  ├─ SignalingChannel (state machine + health check)      │
//! │  │   └─ SignalingTransport (WebSocket)                   │
//! │  └─ ReconnectionOrchestrator                             │
//! │      ├─ Policy gate (reachability, app, telephony)       │
//! │      └─ RetryStrategy (exponential backoff)              │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use roomlink_connect::{
//!     CallId, ConnectConfig, SessionController, SessionDeps,
//! };
//!
//! let (controller, mut events) =
//!     SessionController::spawn(ConnectConfig::default(), deps)?;
//!
//! controller.join(CallId::new("default", "standup")).await?;
//!
//! while let Some(frame) = events.recv().await {
//!     // opaque call event
//! }
//!
//! controller.leave().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod edge;
pub mod error;
pub mod policy;
pub mod reconnect;
pub mod retry;
pub mod session;
pub mod signaling;
pub mod signals;

pub use config::{ConnectConfig, RetryConfig};
pub use edge::{EdgeCandidate, EdgeDescriptor, EdgeDirectory, HttpLatencyProber, LatencyProber};
pub use error::{Error, Result};
pub use policy::Policy;
pub use reconnect::{OrchestratorSignals, ReconnectRequest, ReconnectionOrchestrator};
pub use retry::RetryStrategy;
pub use session::{
    CallId, MediaTransport, SessionController, SessionDeps, SessionFailure, SessionState,
};
pub use signaling::{
    ChannelConfig, DisconnectSource, HealthCheckInfo, HealthCheckOrigin, HealthCheckPayload,
    SignalingChannel, SignalingConnectionState, SignalingTransport, TransportEvent,
    TransportSink, WebSocketTransport,
};
pub use signals::{
    AppState, AppStateSource, BackgroundGrantProvider, DeniedGrants, Reachability,
    ReachabilitySource, SignalSource, TelephonySource,
};
