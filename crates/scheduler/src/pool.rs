//! Worker threads that run task bodies.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::error::SchedulerError;

/// A `rayon` thread pool that can grow when the concurrency limit is raised.
///
/// The pool never limits concurrency itself; the scheduler only hands it as
/// many jobs as its limiter allows, and the pool is kept at least that large
/// so every dispatched body starts right away.
pub struct WorkerPool {
    inner: RwLock<SizedPool>,
}

struct SizedPool {
    pool: Arc<rayon::ThreadPool>,
    threads: usize,
}

fn build(threads: usize) -> Result<rayon::ThreadPool, SchedulerError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("stargaze-worker-{i}"))
        .build()
        .map_err(|e| SchedulerError::Pool(e.to_string()))
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self, SchedulerError> {
        let threads = threads.max(1);
        let pool = build(threads)?;
        Ok(Self {
            inner: RwLock::new(SizedPool {
                pool: Arc::new(pool),
                threads,
            }),
        })
    }

    pub fn threads(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).threads
    }

    /// Grow to at least `threads` workers.
    ///
    /// Jobs already queued on the old pool still run there; it shuts down
    /// once they finish and the last handle drops.
    pub fn ensure_capacity(&self, threads: usize) -> Result<(), SchedulerError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if threads <= inner.threads {
            return Ok(());
        }
        let pool = build(threads)?;
        info!("Worker pool resized: {} -> {} threads", inner.threads, threads);
        inner.pool = Arc::new(pool);
        inner.threads = threads;
        Ok(())
    }

    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let pool = Arc::clone(&self.inner.read().unwrap_or_else(PoisonError::into_inner).pool);
        pool.spawn(job);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn runs_jobs() {
        let pool = WorkerPool::new(2).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.spawn(move || tx.send(42).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }

    #[test]
    fn grows_but_never_shrinks() {
        let pool = WorkerPool::new(2).unwrap();
        pool.ensure_capacity(1).unwrap();
        assert_eq!(pool.threads(), 2);
        pool.ensure_capacity(6).unwrap();
        assert_eq!(pool.threads(), 6);

        let (tx, rx) = mpsc::channel();
        pool.spawn(move || tx.send(()).unwrap());
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }
}
