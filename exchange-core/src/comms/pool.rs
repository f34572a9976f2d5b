//! Bounded worker pool for inbound command handlers.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::warn;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Runs handler futures with a concurrency bound, retaining join handles so
/// in-flight work can be drained on shutdown.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_workers)),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Schedule a handler. It starts once a worker slot is free; slow handlers
    /// on one channel therefore never block delivery on others, they only
    /// consume their own slot.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let handle = tokio::spawn(async move {
            if let Ok(_permit) = semaphore.acquire_owned().await {
                fut.await;
            }
        });

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Wait for in-flight handlers up to `drain_timeout` in total. Handlers
    /// still running past the deadline are abandoned (logged, not aborted).
    pub async fn drain(&self, drain_timeout: Duration) {
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };

        let deadline = Instant::now() + drain_timeout;
        for handle in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, handle).await.is_err() {
                warn!("command handler still running after drain deadline, abandoning it");
            }
        }
    }

    /// Number of not-yet-finished handlers. Test hook.
    pub fn in_flight(&self) -> usize {
        let guard = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        guard.iter().filter(|h| !h.is_finished()).count()
    }
}
