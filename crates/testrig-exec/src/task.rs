//! Off-thread task execution with polling handles
//!
//! For work the caller wants concurrent with other DUT interaction, such
//! as a background load generator running while the test pokes the device.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::ExecError;

/// Bounded pool for explicitly asynchronous work
#[derive(Debug, Clone)]
pub struct TaskPool {
    permits: Arc<Semaphore>,
}

impl TaskPool {
    /// Pool running at most `capacity` tasks at a time
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Start `future` off the calling task and return a pollable handle
    ///
    /// Excess tasks queue on the pool's capacity before running.
    pub fn spawn<F, T>(&self, future: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let inner = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            future.await
        });
        TaskHandle { inner }
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        // Matches the handful of background jobs a single-DUT test runs.
        Self::new(8)
    }
}

/// Handle to a running background task
pub struct TaskHandle<T> {
    inner: JoinHandle<T>,
}

impl<T> TaskHandle<T> {
    /// Non-blocking completion check
    #[must_use]
    pub fn done(&self) -> bool {
        self.inner.is_finished()
    }

    /// Wait for the task and return its value
    ///
    /// # Errors
    /// `Task` when the task panicked or was aborted.
    pub async fn result(self) -> Result<T, ExecError> {
        self.inner
            .await
            .map_err(|e| ExecError::Task(e.to_string()))
    }

    /// Like `result`, but gives up after `timeout_duration`
    ///
    /// The task itself keeps running detached; only the wait is bounded.
    ///
    /// # Errors
    /// `Timeout` when the wait expires, `Task` when the task panicked.
    pub async fn result_timeout(mut self, timeout_duration: Duration) -> Result<T, ExecError> {
        match timeout(timeout_duration, &mut self.inner).await {
            Ok(result) => result.map_err(|e| ExecError::Task(e.to_string())),
            Err(_) => Err(ExecError::Timeout {
                operation: "background task".to_string(),
                timeout: timeout_duration,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_result_returns_value() {
        let pool = TaskPool::new(2);
        let handle = pool.spawn(async { 40 + 2 });
        assert_eq!(handle.result().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_done_flips_after_completion() {
        let pool = TaskPool::new(2);
        let handle = pool.spawn(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        });
        assert!(!handle.done());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(handle.done());
        handle.result().await.unwrap();
    }

    #[tokio::test]
    async fn test_result_timeout() {
        let pool = TaskPool::new(2);
        let handle = pool.spawn(async {
            tokio::time::sleep(Duration::from_secs(10)).await;
        });
        let result = handle.result_timeout(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(ExecError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_panic_surfaces_as_error() {
        let pool = TaskPool::new(2);
        let handle = pool.spawn(async { panic!("boom") });
        let result: Result<(), _> = handle.result().await;
        assert!(matches!(result, Err(ExecError::Task(_))));
    }

    #[tokio::test]
    async fn test_capacity_bounds_concurrency() {
        static RUNNING: AtomicUsize = AtomicUsize::new(0);
        static PEAK: AtomicUsize = AtomicUsize::new(0);

        let pool = TaskPool::new(2);
        let handles: Vec<_> = (0..6)
            .map(|_| {
                pool.spawn(async {
                    let now = RUNNING.fetch_add(1, Ordering::SeqCst) + 1;
                    PEAK.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    RUNNING.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.result().await.unwrap();
        }
        assert!(PEAK.load(Ordering::SeqCst) <= 2);
    }
}
