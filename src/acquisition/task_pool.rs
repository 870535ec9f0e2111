// =============================================================================
// Bounded fire-and-forget task pool
// =============================================================================
//
// Callers submit work and move on. At most `limit` tasks run at once (the rest
// wait on the semaphore); an `Err` outcome is logged, never returned.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct BackgroundTasks {
    permits: Arc<Semaphore>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl BackgroundTasks {
    pub fn new(limit: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit.max(1))),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Run `work` in the background under the concurrency limit.
    pub fn submit<F>(&self, name: &'static str, work: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let permits = self.permits.clone();
        let handle = tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            match work.await {
                Ok(()) => debug!(task = name, "background task finished"),
                Err(e) => warn!(task = name, error = %e, "background task failed"),
            }
        });

        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Tasks submitted and not yet finished.
    pub fn pending(&self) -> usize {
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.len()
    }

    /// Wait for every task submitted so far.
    pub async fn drain(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Abort everything still queued or running.
    pub fn abort_all(&self) {
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn failures_do_not_escape() {
        let pool = BackgroundTasks::new(2);
        let ran = Arc::new(AtomicUsize::new(0));

        for i in 0..4 {
            let ran = ran.clone();
            pool.submit("test", async move {
                ran.fetch_add(1, Ordering::SeqCst);
                if i % 2 == 0 {
                    anyhow::bail!("task {i} failed");
                }
                Ok(())
            });
        }
        pool.drain().await;

        assert_eq!(ran.load(Ordering::SeqCst), 4);
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let pool = BackgroundTasks::new(3);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..12 {
            let running = running.clone();
            let peak = peak.clone();
            pool.submit("test", async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            });
        }
        pool.drain().await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn abort_all_cancels_waiting_work() {
        let pool = BackgroundTasks::new(1);
        let ran = Arc::new(AtomicUsize::new(0));

        pool.submit("blocker", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        let counter = ran.clone();
        pool.submit("queued", async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        pool.abort_all();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(pool.pending(), 0);
    }
}
