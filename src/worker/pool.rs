/// Bounded worker pool.
///
/// A fixed number of semaphore permits caps in-flight jobs; each claimed job
/// runs as an independent task holding one permit. No other cross-job
/// coordination exists.
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    #[must_use]
    pub fn new(max_workers: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    /// Waits until a worker slot is free.
    ///
    /// Returns `None` only if the pool was shut down, which the worker never
    /// does explicitly.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.semaphore).acquire_owned().await.ok()
    }

    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::task::JoinSet;
    use tokio::time::sleep;

    use super::*;

    #[tokio::test]
    async fn pool_bounds_in_flight_tasks() {
        let pool = WorkerPool::new(2);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let permit = pool.acquire().await.expect("pool open");
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            tasks.spawn(async move {
                let _permit = permit;
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(10)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            });
        }
        while tasks.join_next().await.is_some() {}

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn zero_sized_pool_still_runs_one_job() {
        let pool = WorkerPool::new(0);
        assert_eq!(pool.available(), 1);
        let permit = pool.acquire().await;
        assert!(permit.is_some());
    }
}
