//! Bounded worker pools gating concurrent converter invocations.
//!
//! Grounded on `tools/transcoder.rs`'s `tokio::sync::Semaphore::new(args.workers)`
//! pattern for limiting concurrent ffmpeg children; generalized to two named
//! pools (`streaming`, `download`) per the scheduler contract. `tokio::sync::Semaphore`
//! already serves permits to waiters in FIFO order, so a queued `acquire()`
//! call is itself the pool's wait queue — no separate `VecDeque` is needed.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct Pool {
    name: &'static str,
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
}

impl Pool {
    pub fn new(name: &'static str, max_concurrency: usize) -> Self {
        Self {
            name,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn running(&self) -> usize {
        self.max_concurrency.saturating_sub(self.semaphore.available_permits())
    }

    /// Blocks, queuing FIFO, until a slot frees up. Used by work the caller
    /// is willing to wait for (cached and ephemeral transcodes).
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("pool semaphore is never closed")
    }

    /// Never blocks: returns `None` immediately if the pool is at capacity.
    /// Used by latency-sensitive work that would rather fail fast than queue
    /// (live transcodes).
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().try_acquire_owned().ok()
    }
}

pub struct Pools {
    pub streaming: Pool,
    pub download: Pool,
}

impl Pools {
    pub fn new(max_streaming_concurrency: usize, max_download_concurrency: usize) -> Self {
        Self {
            streaming: Pool::new("streaming", max_streaming_concurrency),
            download: Pool::new("download", max_download_concurrency),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_acquire_fails_once_pool_is_saturated() {
        let pool = Pool::new("streaming", 1);
        let _permit = pool.try_acquire().expect("first acquire should succeed");
        assert!(pool.try_acquire().is_none());
    }

    #[tokio::test]
    async fn releasing_a_permit_frees_capacity() {
        let pool = Pool::new("streaming", 1);
        let permit = pool.try_acquire().unwrap();
        drop(permit);
        assert!(pool.try_acquire().is_some());
    }

    #[tokio::test]
    async fn acquire_queues_until_a_permit_frees_up() {
        let pool = Arc::new(Pool::new("download", 1));
        let permit = pool.try_acquire().unwrap();

        let waiter_pool = pool.clone();
        let waiter = tokio::spawn(async move { waiter_pool.acquire().await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(permit);
        let _second_permit = waiter.await.unwrap();
    }
}
