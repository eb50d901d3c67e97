//! Latency probing for edge candidates

use super::EdgeDescriptor;
use crate::{Error, Result};
use async_trait::async_trait;
use tokio::time::Instant;
use tracing::trace;

/// One round-trip latency measurement against an edge candidate
///
/// The per-round-trip timeout is enforced by the caller, not here.
#[async_trait]
pub trait LatencyProber: Send + Sync {
    /// Run a single probe round trip; returns the latency in milliseconds
    async fn probe(&self, edge: &EdgeDescriptor) -> Result<f64>;
}

/// HTTP latency prober
///
/// Times a GET against the candidate's probe URL (falling back to its
/// address). Any response counts as a sample; only a transport failure
/// fails the probe.
#[derive(Debug, Clone, Default)]
pub struct HttpLatencyProber {
    client: reqwest::Client,
}

impl HttpLatencyProber {
    /// Create a prober with a fresh HTTP client
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LatencyProber for HttpLatencyProber {
    async fn probe(&self, edge: &EdgeDescriptor) -> Result<f64> {
        let url = edge.probe_url.clone().unwrap_or_else(|| edge.address.clone());
        let start = Instant::now();

        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("latency probe failed: {}", e)))?;

        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        trace!("Edge {} probe round trip: {:.1}ms", edge.id, latency_ms);
        Ok(latency_ms)
    }
}
