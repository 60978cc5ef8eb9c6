//! Background worker for periodic and on-demand tasks.
//!
//! A [`BackgroundWorker`] drives one [`BackgroundRunnable`]: tasks arrive on
//! an mpsc channel, `on_tick` fires on a fixed interval, and `shutdown` runs
//! once when the worker stops. Other components hold a cloneable
//! [`WorkerHandle`] to request work without owning the worker.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

const CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    type Task: Send + 'static;

    /// Process a single task.
    async fn run(&mut self, task: Self::Task);

    /// Called on each tick interval. Default is a no-op.
    async fn on_tick(&mut self) {}

    /// Called once when the worker is shutting down. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// WorkerHandle
// ---------------------------------------------------------------------------

/// Cloneable submission side of a running worker.
#[derive(Debug)]
pub struct WorkerHandle<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for WorkerHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Send + 'static> WorkerHandle<T> {
    /// Queues `task` without waiting. Returns `false` when the worker is
    /// gone or its queue is full; the next tick covers dropped requests.
    pub fn request(&self, task: T) -> bool {
        self.tx.try_send(task).is_ok()
    }
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns the worker loop. The first tick fires one interval after start.
    pub fn start(mut runnable: R, tick_interval_ms: u64) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(CHANNEL_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut ticks =
                tokio::time::interval(std::time::Duration::from_millis(tick_interval_ms));
            ticks.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break,
                        }
                    }
                    _ = ticks.tick() => {
                        runnable.on_tick().await;
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Submission handle for other components.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub fn handle(&self) -> anyhow::Result<WorkerHandle<R::Task>> {
        self.tx
            .as_ref()
            .map(|tx| WorkerHandle { tx: tx.clone() })
            .ok_or_else(|| anyhow::anyhow!("worker not running"))
    }

    /// Submit a task, waiting for queue space.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    /// Stops the worker and waits for `shutdown` to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[derive(Default, Clone)]
    struct Counters {
        runs: Arc<AtomicU32>,
        ticks: Arc<AtomicU32>,
        shutdowns: Arc<AtomicU32>,
    }

    struct CountingRunnable(Counters);

    #[async_trait]
    impl BackgroundRunnable for CountingRunnable {
        type Task = String;

        async fn run(&mut self, _task: String) {
            self.0.runs.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_tick(&mut self) {
            self.0.ticks.fetch_add(1, Ordering::SeqCst);
        }

        async fn shutdown(&mut self) {
            self.0.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn start_submit_and_stop() {
        let counters = Counters::default();
        let mut worker = BackgroundWorker::start(CountingRunnable(counters.clone()), 60_000);

        worker.submit("a".to_string()).await.unwrap();
        worker.submit("b".to_string()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counters.runs.load(Ordering::SeqCst), 2);

        worker.stop().await;
        assert_eq!(counters.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handle_requests_reach_the_runnable() {
        let counters = Counters::default();
        let mut worker = BackgroundWorker::start(CountingRunnable(counters.clone()), 60_000);
        let handle = worker.handle().unwrap();

        assert!(handle.clone().request("x".to_string()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counters.runs.load(Ordering::SeqCst), 1);

        worker.stop().await;
        assert!(!handle.request("late".to_string()));
    }

    #[tokio::test]
    async fn tick_fires_periodically() {
        let counters = Counters::default();
        let mut worker = BackgroundWorker::start(CountingRunnable(counters.clone()), 20);
        tokio::time::sleep(Duration::from_millis(100)).await;
        worker.stop().await;
        assert!(counters.ticks.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn submit_after_stop_returns_error() {
        let mut worker = BackgroundWorker::start(CountingRunnable(Counters::default()), 60_000);
        worker.stop().await;
        assert!(worker.submit("late".to_string()).await.is_err());
        assert!(worker.handle().is_err());
    }
}
