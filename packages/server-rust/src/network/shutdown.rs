//! Server lifecycle controller with in-flight request tracking.
//!
//! Uses `ArcSwap` for lock-free lifecycle transitions, `watch` channels to
//! signal a stop request and the drain deadline, and an atomic counter with
//! RAII guards that bounds the drain after stop.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Server lifecycle state.
///
/// State machine: Created -> Started -> Draining -> Stopped.
/// A server stopped before it was started goes straight to Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Composed but not yet accepting connections.
    Created,
    /// Listening and serving requests.
    Started,
    /// Stop requested: no new connections, in-flight requests finishing.
    Draining,
    /// Fully stopped; all owned resources released.
    Stopped,
}

impl LifecycleState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Coordinates the server lifecycle:
/// 1. `set_started()` once the listener is bound and routing is complete
/// 2. Middleware checks `state()` before admitting a request
/// 3. `trigger_shutdown()` moves to Draining and signals all listeners
/// 4. `wait_for_drain()` blocks until in-flight requests complete
/// 5. `force_close()` cancels whatever is still running at the deadline
#[derive(Debug)]
pub struct LifecycleController {
    shutdown_signal: watch::Sender<bool>,
    force_close_signal: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    state: Arc<ArcSwap<LifecycleState>>,
}

impl LifecycleController {
    /// Creates a new controller in the `Created` state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        let (force_tx, _force_rx) = watch::channel(false);
        Self {
            shutdown_signal: tx,
            force_close_signal: force_tx,
            in_flight: Arc::new(AtomicU64::new(0)),
            state: Arc::new(ArcSwap::from_pointee(LifecycleState::Created)),
        }
    }

    /// Transitions to `Started`. Ignored once a stop has been requested.
    pub fn set_started(&self) {
        self.state.rcu(|current| match **current {
            LifecycleState::Created => Arc::new(LifecycleState::Started),
            other => Arc::new(other),
        });
    }

    /// Forces the `Stopped` state once all owned resources are released.
    pub fn mark_stopped(&self) {
        self.state.store(Arc::new(LifecycleState::Stopped));
    }

    /// Resolves once a stop has been requested.
    pub fn stop_requested(&self) -> impl Future<Output = ()> + Send + 'static {
        wait_until_set(&self.shutdown_signal)
    }

    /// Cancels requests and sessions still running once the drain deadline
    /// has passed. Work selecting on [`LifecycleController::force_closed`]
    /// drops its future and releases its in-flight guard.
    pub fn force_close(&self) {
        let _ = self.force_close_signal.send(true);
    }

    /// Resolves once [`LifecycleController::force_close`] has been called.
    pub fn force_closed(&self) -> impl Future<Output = ()> + Send + 'static {
        wait_until_set(&self.force_close_signal)
    }

    /// Initiates graceful shutdown.
    ///
    /// A started server moves to `Draining`; a server that never started
    /// moves straight to `Stopped`. All shutdown receivers are signalled.
    /// Repeated calls are no-ops apart from re-signalling.
    pub fn trigger_shutdown(&self) {
        self.state.rcu(|current| match **current {
            LifecycleState::Created => Arc::new(LifecycleState::Stopped),
            LifecycleState::Started => Arc::new(LifecycleState::Draining),
            other => Arc::new(other),
        });
        // Ignore send errors -- receivers may have been dropped
        let _ = self.shutdown_signal.send(true);
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        *self.shutdown_signal.borrow()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    /// Creates an RAII guard that tracks an in-flight request.
    ///
    /// The in-flight counter is incremented on creation and decremented
    /// when the guard is dropped, even if the handler panics.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    /// Returns the current number of in-flight requests.
    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits for all in-flight requests to complete, up to the given timeout.
    ///
    /// Returns `true` if all requests drained successfully (transitions to
    /// `Stopped` state). Returns `false` if the timeout expired (state
    /// remains `Draining`).
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                self.state.store(Arc::new(LifecycleState::Stopped));
                return true;
            }

            if tokio::time::Instant::now() >= deadline {
                return false;
            }

            // Poll at 10ms intervals to avoid busy-waiting
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

fn wait_until_set(signal: &watch::Sender<bool>) -> impl Future<Output = ()> + Send + 'static {
    let mut rx = signal.subscribe();
    async move {
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for LifecycleController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that decrements the in-flight counter when dropped.
///
/// Ensures accurate in-flight tracking even if request handlers panic,
/// since Drop is called during stack unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_created() {
        let controller = LifecycleController::new();
        assert_eq!(controller.state(), LifecycleState::Created);
        assert_eq!(controller.in_flight_count(), 0);
        assert!(!controller.is_shutdown_requested());
    }

    #[test]
    fn lifecycle_transitions_created_started_draining() {
        let controller = LifecycleController::new();

        controller.set_started();
        assert_eq!(controller.state(), LifecycleState::Started);

        controller.trigger_shutdown();
        assert_eq!(controller.state(), LifecycleState::Draining);
        assert!(controller.is_shutdown_requested());

        // A late set_started must not resurrect a draining server.
        controller.set_started();
        assert_eq!(controller.state(), LifecycleState::Draining);
    }

    #[test]
    fn stop_before_start_goes_straight_to_stopped() {
        let controller = LifecycleController::new();
        controller.trigger_shutdown();
        assert_eq!(controller.state(), LifecycleState::Stopped);

        controller.set_started();
        assert_eq!(controller.state(), LifecycleState::Stopped);
    }

    #[test]
    fn state_names() {
        assert_eq!(LifecycleState::Created.as_str(), "created");
        assert_eq!(LifecycleState::Draining.as_str(), "draining");
    }

    #[test]
    fn in_flight_guard_increments_and_decrements() {
        let controller = LifecycleController::new();

        let guard1 = controller.in_flight_guard();
        let guard2 = controller.in_flight_guard();
        assert_eq!(controller.in_flight_count(), 2);

        drop(guard1);
        assert_eq!(controller.in_flight_count(), 1);
        drop(guard2);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn stop_requested_resolves_after_trigger() {
        let controller = LifecycleController::new();
        let stop = tokio::spawn(controller.stop_requested());
        tokio::task::yield_now().await;
        assert!(!stop.is_finished());

        controller.trigger_shutdown();
        tokio::time::timeout(Duration::from_secs(1), stop).await.unwrap().unwrap();

        // Already requested: a late subscriber resolves immediately.
        controller.stop_requested().await;
    }

    #[tokio::test]
    async fn force_closed_is_separate_from_stop() {
        let controller = LifecycleController::new();
        controller.set_started();
        controller.trigger_shutdown();

        let forced = controller.force_closed();
        tokio::pin!(forced);
        assert!(tokio::time::timeout(Duration::from_millis(20), &mut forced).await.is_err());

        controller.force_close();
        tokio::time::timeout(Duration::from_secs(1), forced).await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_drain_immediate_success() {
        let controller = LifecycleController::new();
        controller.set_started();
        controller.trigger_shutdown();

        let drained = controller.wait_for_drain(Duration::from_secs(1)).await;
        assert!(drained);
        assert_eq!(controller.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn wait_for_drain_with_active_requests() {
        let controller = LifecycleController::new();
        controller.set_started();

        let guard = controller.in_flight_guard();
        controller.trigger_shutdown();

        let guard_handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        let drained = controller.wait_for_drain(Duration::from_secs(2)).await;
        assert!(drained);
        assert_eq!(controller.state(), LifecycleState::Stopped);

        guard_handle.await.unwrap();
    }

    #[tokio::test]
    async fn wait_for_drain_timeout() {
        let controller = LifecycleController::new();
        controller.set_started();

        let _guard = controller.in_flight_guard();
        controller.trigger_shutdown();

        let drained = controller.wait_for_drain(Duration::from_millis(50)).await;
        assert!(!drained);
        assert_eq!(controller.state(), LifecycleState::Draining);
    }
}
