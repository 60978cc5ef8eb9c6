//! Process lifecycle and graceful shutdown.
//!
//! The state lives in an `ArcSwap` so probes read it without locking;
//! in-flight gateway requests hold an RAII guard. Long-lived streams (health
//! watches, bus bridges, socket connections) select on
//! [`ShutdownController::cancelled`] and release their subscriptions when it
//! resolves.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::watch;

/// Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Ready,
    Draining,
    Stopped,
}

impl ProcessState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessState::Starting => "starting",
            ProcessState::Ready => "ready",
            ProcessState::Draining => "draining",
            ProcessState::Stopped => "stopped",
        }
    }
}

#[derive(Debug)]
pub struct ShutdownController {
    signal: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    state: ArcSwap<ProcessState>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (signal, _rx) = watch::channel(false);
        Self {
            signal,
            in_flight: Arc::new(AtomicU64::new(0)),
            state: ArcSwap::from_pointee(ProcessState::Starting),
        }
    }

    pub fn set_ready(&self) {
        self.state.store(Arc::new(ProcessState::Ready));
    }

    /// Receiver flipped to `true` once shutdown starts.
    #[must_use]
    pub fn receiver(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    /// Resolves once shutdown has been triggered.
    pub async fn cancelled(&self) {
        let mut rx = self.signal.subscribe();
        // An error means the controller is gone, which is shutdown too.
        let _ = rx.wait_for(|stopping| *stopping).await;
    }

    /// Moves to `Draining` and wakes every shutdown listener.
    pub fn trigger_shutdown(&self) {
        self.state.store(Arc::new(ProcessState::Draining));
        self.signal.send_replace(true);
    }

    #[must_use]
    pub fn state(&self) -> ProcessState {
        **self.state.load()
    }

    #[must_use]
    pub fn is_stopping(&self) -> bool {
        *self.signal.borrow()
    }

    /// Counts a request as in flight until the guard drops.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits up to `timeout` for in-flight requests to finish. On success
    /// the state becomes `Stopped`.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.in_flight.load(Ordering::Relaxed) == 0 {
                self.state.store(Arc::new(ProcessState::Stopped));
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

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
    fn lifecycle_transitions() {
        let controller = ShutdownController::new();
        assert_eq!(controller.state(), ProcessState::Starting);
        controller.set_ready();
        assert_eq!(controller.state(), ProcessState::Ready);
        controller.trigger_shutdown();
        assert_eq!(controller.state(), ProcessState::Draining);
        assert!(controller.is_stopping());
    }

    #[test]
    fn in_flight_guard_counts() {
        let controller = ShutdownController::new();
        let a = controller.in_flight_guard();
        let b = controller.in_flight_guard();
        assert_eq!(controller.in_flight_count(), 2);
        drop(a);
        drop(b);
        assert_eq!(controller.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_resolves_after_trigger() {
        let controller = Arc::new(ShutdownController::new());
        let waiter = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        controller.trigger_shutdown();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn cancelled_after_trigger_returns_immediately() {
        let controller = ShutdownController::new();
        controller.trigger_shutdown();
        controller.cancelled().await;
    }

    #[tokio::test]
    async fn drain_waits_for_guards() {
        let controller = Arc::new(ShutdownController::new());
        let guard = controller.in_flight_guard();
        assert!(!controller.wait_for_drain(Duration::from_millis(30)).await);
        drop(guard);
        assert!(controller.wait_for_drain(Duration::from_millis(30)).await);
        assert_eq!(controller.state(), ProcessState::Stopped);
    }
}
