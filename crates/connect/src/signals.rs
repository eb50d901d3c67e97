//! External signal sources consumed by the reconnection policy
//!
//! The host application owns platform bindings (app lifecycle, network
//! reachability, telephony sessions) and publishes their current values
//! through [`SignalSource`] handles. The core only ever observes the watch
//! side; nothing in here talks to the OS.

use tokio::sync::watch;

/// Application foreground/background state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    /// App is in the foreground
    Foreground,
    /// App is backgrounded
    Background,
}

/// Network reachability state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    /// A usable network path exists
    Available,
    /// No usable network path
    Unavailable,
}

/// Process-wide observable state with an explicit subscribe lifecycle
///
/// Thin wrapper over a [`watch`] channel: the host calls [`set`], consumers
/// hold [`watch::Receiver`] subscriptions. Dropping all receivers is the
/// unsubscribe; dropping the source ends the stream.
///
/// [`set`]: SignalSource::set
#[derive(Debug)]
pub struct SignalSource<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> SignalSource<T> {
    /// Create a source with an initial value
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Publish a new value; subscribers are only woken on actual change
    pub fn set(&self, value: T) {
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Current value
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Subscribe to value changes
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

/// App-lifecycle signal source
pub type AppStateSource = SignalSource<AppState>;

/// Network-reachability signal source
pub type ReachabilitySource = SignalSource<Reachability>;

/// Telephony signal source: number of active voice sessions (>0 means active)
pub type TelephonySource = SignalSource<u32>;

/// Host-provided finite background-execution grant
///
/// A single-slot resource: callers must [`end`] any outstanding grant
/// before requesting a new one, and [`end`] without an outstanding grant
/// must be a no-op.
///
/// [`end`]: BackgroundGrantProvider::end
pub trait BackgroundGrantProvider: Send + Sync {
    /// Request a grant; `on_expired` fires if the host revokes it early.
    /// Returns false if the host refuses.
    fn begin(&self, on_expired: Box<dyn FnOnce() + Send>) -> bool;

    /// End the current grant, if any
    fn end(&self);
}

/// Grant provider that always refuses
///
/// Suits hosts without a background-execution concept (servers, tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct DeniedGrants;

impl BackgroundGrantProvider for DeniedGrants {
    fn begin(&self, _on_expired: Box<dyn FnOnce() + Send>) -> bool {
        false
    }

    fn end(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_source_publishes_changes() {
        let source = AppStateSource::new(AppState::Foreground);
        let mut rx = source.subscribe();

        assert_eq!(*rx.borrow(), AppState::Foreground);

        source.set(AppState::Background);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), AppState::Background);
    }

    #[tokio::test]
    async fn test_signal_source_deduplicates_values() {
        let source = ReachabilitySource::new(Reachability::Available);
        let mut rx = source.subscribe();
        rx.mark_unchanged();

        source.set(Reachability::Available);
        assert!(!rx.has_changed().unwrap());

        source.set(Reachability::Unavailable);
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_denied_grants_refuses_and_end_is_noop() {
        let grants = DeniedGrants;
        assert!(!grants.begin(Box::new(|| {})));
        grants.end();
        grants.end();
    }
}
