//! A bounded pool for work which must not run on the reactor.

use crate::error::WorkerError;
use crate::Failure;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::trace;

/// Runs blocking closures on tokio's blocking threads, at most `size` at a time.
///
/// The context that dispatched the work stays with its driver while the closure runs, only the
/// closure and its result cross threads.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self { permits: Arc::new(Semaphore::new(size)), size }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of workers not busy right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn dispatch<T, F>(&self, task: F) -> impl Future<Output = Result<T, Failure>> + Send + 'static
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, Failure> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        async move {
            let permit = permits.acquire_owned().await.map_err(WorkerError::from)?;
            trace!(available = permit.num_permits(), "dispatch task to worker pool");
            // held by the blocking thread, dropping the caller does not free the slot
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                task()
            })
            .await
            .map_err(WorkerError::from)?
        }
    }
}

#[cfg(test)]
mod tests {
    use super::WorkerPool;
    use crate::Failure;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn bounded_concurrency() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let max = Arc::new(AtomicUsize::new(0));

        let tasks = (0..6).map(|_| {
            let running = Arc::clone(&running);
            let max = Arc::clone(&max);
            pool.dispatch(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        });

        for result in futures::future::join_all(tasks).await {
            result.unwrap();
        }

        assert!(max.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn abandoned_task_keeps_its_worker() {
        let pool = WorkerPool::new(1);
        let running = Arc::new(AtomicUsize::new(0));
        let max = Arc::new(AtomicUsize::new(0));
        let task = |running: Arc<AtomicUsize>, max: Arc<AtomicUsize>| {
            move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(100));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<(), Failure>(())
            }
        };

        let abandoned = pool.dispatch(task(Arc::clone(&running), Arc::clone(&max)));
        assert!(tokio::time::timeout(Duration::from_millis(10), abandoned).await.is_err());
        assert_eq!(pool.available(), 0);

        pool.dispatch(task(Arc::clone(&running), Arc::clone(&max))).await.unwrap();
        assert_eq!(max.load(Ordering::SeqCst), 1);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn panics_become_failures() {
        let pool = WorkerPool::new(1);
        let result: Result<(), Failure> = pool.dispatch(|| panic!("worker exploded")).await;
        let failure = result.unwrap_err();
        assert!(failure.is::<crate::error::WorkerError>());
    }

    #[test]
    fn size_is_at_least_one() {
        assert_eq!(WorkerPool::new(0).size(), 1);
    }
}
