//! Edge selection: probe candidate relay servers and pick the fastest
//!
//! Selection is pure beyond the probes themselves: every candidate is
//! probed concurrently, the winner is the one whose most recent successful
//! sample is lowest, and ties keep directory order (first wins). A
//! candidate is only excluded once all of its probe attempts fail.

pub mod probe;

pub use probe::{HttpLatencyProber, LatencyProber};

use crate::session::CallId;
use crate::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// A candidate relay server as returned by the directory service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeDescriptor {
    /// Stable identifier of the edge
    pub id: String,

    /// Network address a session would join
    pub address: Url,

    /// Pre-computed latency probe URL, if the directory supplies one
    pub probe_url: Option<Url>,
}

/// A probed edge candidate
///
/// Created per join attempt and discarded once selection completes;
/// immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeCandidate {
    /// Stable identifier of the edge
    pub id: String,

    /// Network address a session would join
    pub address: Url,

    /// Round-trip latency samples in milliseconds, in probe order
    pub latencies_ms: Vec<f64>,
}

impl EdgeCandidate {
    /// Most recent successful latency sample, if any
    pub fn latest_latency_ms(&self) -> Option<f64> {
        self.latencies_ms.last().copied()
    }
}

/// Directory service listing candidate edges for a call
#[async_trait]
pub trait EdgeDirectory: Send + Sync {
    /// List candidate relay servers for `call`, in preference order
    async fn list_candidate_edges(&self, call: &CallId) -> Result<Vec<EdgeDescriptor>>;
}

/// Probe all candidates and select the fastest one
///
/// Each candidate runs `attempts` sequential round trips, each bounded by
/// `probe_timeout`; candidates are probed concurrently with each other.
/// Returns [`Error::NoReachableEdge`] if every candidate fails every
/// attempt, fatal to the join attempt and never retried here.
pub async fn select_edge(
    prober: &dyn LatencyProber,
    descriptors: Vec<EdgeDescriptor>,
    attempts: u32,
    probe_timeout: Duration,
) -> Result<EdgeCandidate> {
    let total = descriptors.len();
    if total == 0 {
        return Err(Error::NoReachableEdge { candidates: 0 });
    }

    let probes = descriptors.iter().map(|descriptor| async move {
        let mut samples = Vec::with_capacity(attempts as usize);
        for attempt in 1..=attempts {
            let outcome = tokio::time::timeout(probe_timeout, prober.probe(descriptor))
                .await
                .unwrap_or_else(|_| {
                    Err(Error::Transport(format!(
                        "probe timed out after {:?}",
                        probe_timeout
                    )))
                });
            match outcome {
                Ok(latency_ms) => samples.push(latency_ms),
                Err(e) => {
                    // One failed round trip does not exclude the candidate.
                    debug!(
                        "Edge {} probe attempt {}/{} failed: {}",
                        descriptor.id, attempt, attempts, e
                    );
                }
            }
        }
        samples
    });
    let sampled = futures::future::join_all(probes).await;

    let mut winner: Option<(usize, f64)> = None;
    for (index, samples) in sampled.iter().enumerate() {
        if let Some(&latest) = samples.last() {
            // Strict < keeps directory order on ties: first wins.
            if winner.map_or(true, |(_, best)| latest < best) {
                winner = Some((index, latest));
            }
        }
    }

    let (index, latest) = winner.ok_or(Error::NoReachableEdge { candidates: total })?;
    let descriptor = &descriptors[index];
    info!(
        "Selected edge {} ({:.1}ms latest of {} candidates)",
        descriptor.id, latest, total
    );

    Ok(EdgeCandidate {
        id: descriptor.id.clone(),
        address: descriptor.address.clone(),
        latencies_ms: sampled[index].clone(),
    })
}
