//! Shared test doubles for the connectivity integration tests
//!
//! Everything here is driven from the test body: the mock transport
//! records outbound frames and lets tests inject inbound events, the
//! directory and prober replay scripted answers, and the grant provider
//! records every begin/end so background behavior can be asserted.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use roomlink_connect::{
    AppState, AppStateSource, BackgroundGrantProvider, EdgeDescriptor, EdgeDirectory,
    Error, HealthCheckPayload, LatencyProber, MediaTransport, Reachability,
    ReachabilitySource, Result, SessionDeps, SignalingChannel, SignalingTransport,
    TelephonySource, TransportEvent, TransportSink,
};
use roomlink_connect::CallId;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use url::Url;

/// One opened mock connection, observable from the test
#[derive(Clone)]
pub struct MockConnection {
    /// Frames the channel wrote, in order
    pub sent: Arc<Mutex<Vec<Bytes>>>,
    /// Notified once per recorded frame
    pub sent_notify: Arc<Notify>,
    /// Inject inbound events through here
    pub events: mpsc::Sender<TransportEvent>,
    /// Set once the channel closed its sink
    pub closed: Arc<AtomicBool>,
}

impl MockConnection {
    /// Inject an inbound frame
    pub async fn inject(&self, frame: Bytes) {
        self.events
            .send(TransportEvent::Message(frame))
            .await
            .unwrap();
    }

    /// Inject a connection-closed event
    pub async fn inject_closed(&self, error: Option<&str>) {
        let _ = self
            .events
            .send(TransportEvent::Closed(error.map(str::to_string)))
            .await;
    }

    /// Health-check frames written so far, in order
    pub fn sent_health_checks(&self) -> Vec<HealthCheckPayload> {
        self.sent
            .lock()
            .iter()
            .filter_map(|frame| HealthCheckPayload::parse(frame))
            .collect()
    }
}

/// Echo every outbound health check straight back as a pong
///
/// Runs until the connection's event receiver is dropped.
pub fn spawn_health_echo(conn: &MockConnection) -> tokio::task::JoinHandle<()> {
    spawn_health_echo_limited(conn, u32::MAX)
}

/// Echo the first `limit` outbound health checks, then fall silent
pub fn spawn_health_echo_limited(
    conn: &MockConnection,
    limit: u32,
) -> tokio::task::JoinHandle<()> {
    let sent = conn.sent.clone();
    let notify = conn.sent_notify.clone();
    let events = conn.events.clone();
    tokio::spawn(async move {
        let mut seen = 0usize;
        let mut echoed = 0u32;
        loop {
            notify.notified().await;
            let pending: Vec<Bytes> = {
                let frames = sent.lock();
                frames[seen..].to_vec()
            };
            seen += pending.len();
            for frame in pending {
                let Some(ping) = HealthCheckPayload::parse(&frame) else {
                    continue;
                };
                if echoed >= limit {
                    return;
                }
                echoed += 1;
                let pong = ping.to_frame().unwrap();
                if events.send(TransportEvent::Message(pong)).await.is_err() {
                    return;
                }
            }
        }
    })
}

struct MockSink {
    sent: Arc<Mutex<Vec<Bytes>>>,
    sent_notify: Arc<Notify>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl TransportSink for MockSink {
    async fn send(&mut self, frame: Bytes) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Transport("sink closed".to_string()));
        }
        self.sent.lock().push(frame);
        self.sent_notify.notify_one();
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Transport that opens scriptable in-memory connections
pub struct MockTransport {
    auto_echo: bool,
    opens: AtomicU32,
    fail_opens: AtomicU32,
    connections: Mutex<Vec<MockConnection>>,
}

impl MockTransport {
    /// With `auto_echo`, every opened connection answers its own pings
    pub fn new(auto_echo: bool) -> Arc<Self> {
        Arc::new(Self {
            auto_echo,
            opens: AtomicU32::new(0),
            fail_opens: AtomicU32::new(0),
            connections: Mutex::new(Vec::new()),
        })
    }

    /// Fail the next `count` open attempts
    pub fn fail_next_opens(&self, count: u32) {
        self.fail_opens.store(count, Ordering::SeqCst);
    }

    /// Number of successful opens
    pub fn open_count(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Connection from the `index`-th successful open
    pub fn connection(&self, index: usize) -> MockConnection {
        self.connections.lock()[index].clone()
    }

    /// Most recently opened connection
    pub fn latest_connection(&self) -> MockConnection {
        self.connections.lock().last().unwrap().clone()
    }

    fn take_scripted_failure(&self) -> bool {
        self.fail_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SignalingTransport for MockTransport {
    async fn open(
        &self,
        _url: &Url,
    ) -> Result<(Box<dyn TransportSink>, mpsc::Receiver<TransportEvent>)> {
        if self.take_scripted_failure() {
            return Err(Error::Transport("scripted open failure".to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);

        let (event_tx, event_rx) = mpsc::channel(16);
        let conn = MockConnection {
            sent: Arc::new(Mutex::new(Vec::new())),
            sent_notify: Arc::new(Notify::new()),
            events: event_tx,
            closed: Arc::new(AtomicBool::new(false)),
        };
        if self.auto_echo {
            spawn_health_echo(&conn);
        }
        self.connections.lock().push(conn.clone());

        let sink = MockSink {
            sent: conn.sent.clone(),
            sent_notify: conn.sent_notify.clone(),
            closed: conn.closed.clone(),
        };
        Ok((Box::new(sink), event_rx))
    }
}

/// Directory replaying a fixed candidate list, with scriptable failures
pub struct StaticDirectory {
    edges: Vec<EdgeDescriptor>,
    calls: AtomicU32,
    fail_remaining: AtomicU32,
}

impl StaticDirectory {
    pub fn new(edges: Vec<EdgeDescriptor>) -> Arc<Self> {
        Arc::new(Self {
            edges,
            calls: AtomicU32::new(0),
            fail_remaining: AtomicU32::new(0),
        })
    }

    /// Fail the next `count` listings
    pub fn fail_next(&self, count: u32) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EdgeDirectory for StaticDirectory {
    async fn list_candidate_edges(&self, _call: &CallId) -> Result<Vec<EdgeDescriptor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(Error::Directory("scripted directory failure".to_string()));
        }
        Ok(self.edges.clone())
    }
}

/// Prober answering every round trip with one fixed latency
pub struct FixedProber {
    pub latency_ms: f64,
}

#[async_trait]
impl LatencyProber for FixedProber {
    async fn probe(&self, _edge: &EdgeDescriptor) -> Result<f64> {
        Ok(self.latency_ms)
    }
}

/// Prober where every round trip fails
pub struct UnreachableProber;

#[async_trait]
impl LatencyProber for UnreachableProber {
    async fn probe(&self, edge: &EdgeDescriptor) -> Result<f64> {
        Err(Error::Transport(format!("edge {} unreachable", edge.id)))
    }
}

/// Prober answering the first `budget` round trips instantly, then
/// never resolving again
pub struct HangAfterProber {
    remaining: AtomicU32,
    latency_ms: f64,
}

impl HangAfterProber {
    pub fn new(budget: u32) -> Arc<Self> {
        Arc::new(Self {
            remaining: AtomicU32::new(budget),
            latency_ms: 12.0,
        })
    }
}

#[async_trait]
impl LatencyProber for HangAfterProber {
    async fn probe(&self, _edge: &EdgeDescriptor) -> Result<f64> {
        let budget_left = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if budget_left {
            Ok(self.latency_ms)
        } else {
            std::future::pending().await
        }
    }
}

/// Grant provider recording begin/end calls and holding the expiry hook
pub struct RecordingGrants {
    allow: AtomicBool,
    begins: AtomicU32,
    ends: AtomicU32,
    expired: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl RecordingGrants {
    pub fn new(allow: bool) -> Arc<Self> {
        Arc::new(Self {
            allow: AtomicBool::new(allow),
            begins: AtomicU32::new(0),
            ends: AtomicU32::new(0),
            expired: Mutex::new(None),
        })
    }

    pub fn set_allow(&self, allow: bool) {
        self.allow.store(allow, Ordering::SeqCst);
    }

    pub fn begin_count(&self) -> u32 {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn end_count(&self) -> u32 {
        self.ends.load(Ordering::SeqCst)
    }

    /// Fire the expiry hook of the outstanding grant, as the host would
    pub fn expire(&self) {
        if let Some(hook) = self.expired.lock().take() {
            hook();
        }
    }
}

impl BackgroundGrantProvider for RecordingGrants {
    fn begin(&self, on_expired: Box<dyn FnOnce() + Send>) -> bool {
        if !self.allow.load(Ordering::SeqCst) {
            return false;
        }
        self.begins.fetch_add(1, Ordering::SeqCst);
        *self.expired.lock() = Some(on_expired);
        true
    }

    fn end(&self) {
        self.ends.fetch_add(1, Ordering::SeqCst);
        *self.expired.lock() = None;
    }
}

/// Media transport recording attach/detach calls
#[derive(Default)]
pub struct NullMedia {
    attaches: AtomicU32,
    detaches: AtomicU32,
}

impl NullMedia {
    pub fn attach_count(&self) -> u32 {
        self.attaches.load(Ordering::SeqCst)
    }

    pub fn detach_count(&self) -> u32 {
        self.detaches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaTransport for NullMedia {
    async fn attach(&self, _call: &CallId, _channel: &SignalingChannel) -> Result<()> {
        self.attaches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn detach(&self) {
        self.detaches.fetch_add(1, Ordering::SeqCst);
    }
}

/// All the host-side collaborators a session needs, pre-wired
pub struct TestHost {
    pub app: AppStateSource,
    pub reachability: ReachabilitySource,
    pub telephony: TelephonySource,
    pub transport: Arc<MockTransport>,
    pub directory: Arc<StaticDirectory>,
    pub prober: Arc<dyn LatencyProber>,
    pub grants: Arc<RecordingGrants>,
    pub media: Arc<NullMedia>,
}

impl TestHost {
    /// Host in the foreground on a reachable network, one edge available
    pub fn new(auto_echo: bool) -> Self {
        init_tracing();
        Self {
            app: AppStateSource::new(AppState::Foreground),
            reachability: ReachabilitySource::new(Reachability::Available),
            telephony: TelephonySource::new(0),
            transport: MockTransport::new(auto_echo),
            directory: StaticDirectory::new(vec![edge("edge-a")]),
            prober: Arc::new(FixedProber { latency_ms: 12.0 }),
            grants: RecordingGrants::new(false),
            media: Arc::new(NullMedia::default()),
        }
    }

    pub fn deps(&self) -> SessionDeps {
        let media_arc: Arc<dyn MediaTransport> = self.media.clone();
        let media = Arc::downgrade(&media_arc);
        SessionDeps {
            directory: self.directory.clone(),
            prober: self.prober.clone(),
            transport: self.transport.clone(),
            media,
            app: self.app.subscribe(),
            reachability: self.reachability.subscribe(),
            telephony: self.telephony.subscribe(),
            grants: self.grants.clone(),
        }
    }
}

/// Install a subscriber once so failing tests show the trace timeline
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("roomlink_connect=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Edge descriptor for tests
pub fn edge(id: &str) -> EdgeDescriptor {
    EdgeDescriptor {
        id: id.to_string(),
        address: Url::parse(&format!("wss://{}.example.com/signal", id)).unwrap(),
        probe_url: None,
    }
}
