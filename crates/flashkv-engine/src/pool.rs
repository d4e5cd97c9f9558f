//! Bounded worker pool for blocking disk I/O
//!
//! Disk operations are synchronous `std::fs` calls; this pool dispatches
//! them to the blocking thread pool with a semaphore holding the number of
//! in-flight operations at `max_workers`. Requests past the ceiling queue on
//! the semaphore.

use flashkv_common::{Error, Result};
use std::sync::Arc;
use tokio::sync::Semaphore;

pub struct IoPool {
    permits: Arc<Semaphore>,
}

impl IoPool {
    #[must_use]
    pub fn new(max_workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    /// Run a blocking closure on the pool, awaiting its completion.
    ///
    /// Returns `Error::TaskJoin` if the pool has been closed or the worker
    /// panicked.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::TaskJoin("I/O pool is closed".to_string()))?;
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            f()
        });
        handle.await.map_err(|err| Error::TaskJoin(err.to_string()))
    }

    /// Close the pool; subsequent `run` calls fail immediately
    pub fn close(&self) {
        self.permits.close();
    }
}
