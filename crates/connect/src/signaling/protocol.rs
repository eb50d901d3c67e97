//! Health-check wire envelope
//!
//! Only the liveness protocol is defined here. Call events ride the same
//! socket as opaque frames and are forwarded untouched; any frame that
//! parses as the tagged `health_check` envelope is intercepted by the
//! channel and never reaches general consumers.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message type tag for health-check frames
pub const HEALTH_CHECK_TYPE: &str = "health_check";

/// Which endpoint a health-check payload concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheckOrigin {
    /// The call coordinator
    Coordinator,
    /// The selected media relay (SFU)
    Sfu,
}

/// A single health-check message, sent in both directions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckPayload {
    /// Message type tag (always [`HEALTH_CHECK_TYPE`])
    #[serde(rename = "type")]
    pub message_type: String,

    /// Which endpoint this payload concerns
    pub origin: HealthCheckOrigin,

    /// Connection id of the transport incarnation this ping belongs to.
    /// Pongs carrying a stale id are ignored so a late answer from a
    /// previous socket cannot satisfy the current channel's health check.
    pub connection_id: Uuid,

    /// Monotonic sequence number within one connection
    pub seq: u64,
}

impl HealthCheckPayload {
    /// Build an outbound ping
    pub fn ping(origin: HealthCheckOrigin, connection_id: Uuid, seq: u64) -> Self {
        Self {
            message_type: HEALTH_CHECK_TYPE.to_string(),
            origin,
            connection_id,
            seq,
        }
    }

    /// Serialize to a wire frame
    pub fn to_frame(&self) -> crate::Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Try to parse a frame as a health-check envelope
    ///
    /// Returns `None` for anything that is not a health check, including
    /// frames that are not JSON at all.
    pub fn parse(frame: &[u8]) -> Option<Self> {
        let payload: Self = serde_json::from_slice(frame).ok()?;
        if payload.message_type == HEALTH_CHECK_TYPE {
            Some(payload)
        } else {
            None
        }
    }
}

/// Last-seen health-check payloads, per endpoint
///
/// Carried inside the `Connected` state so observers can confirm a
/// reconnect produced a live channel, not just a live socket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthCheckInfo {
    /// Last payload seen from the coordinator
    pub coordinator: Option<HealthCheckPayload>,

    /// Last payload seen from the media relay
    pub sfu: Option<HealthCheckPayload>,
}

impl HealthCheckInfo {
    /// Record an inbound payload under its origin
    pub fn record(&mut self, payload: HealthCheckPayload) {
        match payload.origin {
            HealthCheckOrigin::Coordinator => self.coordinator = Some(payload),
            HealthCheckOrigin::Sfu => self.sfu = Some(payload),
        }
    }

    /// Whether any health check has been observed at all
    pub fn any_seen(&self) -> bool {
        self.coordinator.is_some() || self.sfu.is_some()
    }
}
