//! Semaphore-bounded worker pools. A pool caps how many submitted futures
//! run at once; submissions past the cap queue on the semaphore instead of
//! blocking the submitter.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

/// A named, bounded, fire-and-forget executor for runtime work.
///
/// Cloning is cheap and shares the capacity with the original.
#[derive(Clone)]
pub struct WorkerPool {
    name: &'static str,
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name,
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Spawn `work` once a concurrency permit is available. The caller never
    /// waits: the permit is acquired inside the spawned task.
    pub fn submit<F>(&self, work: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let name = self.name;
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                debug!(pool = name, "worker pool closed, dropping submitted work");
                return;
            };
            work.await;
        });
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held by running work.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn runs_submitted_work() {
        let pool = WorkerPool::new("test", 4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.submit(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn caps_concurrency_at_capacity() {
        let pool = WorkerPool::new("test", 2);
        let (release_tx, release_rx) = tokio::sync::watch::channel(false);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let mut release = release_rx.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                while !*release.borrow() {
                    if release.changed().await.is_err() {
                        break;
                    }
                }
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
        release_tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }
}
