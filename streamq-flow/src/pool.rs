//! Shared request pool.
//!
//! Every transport request (poller fetches, checkpoint commits, dispatcher
//! sends) first takes a permit from one [`RequestPool`]. The pool caps the
//! number of concurrent requests and, at capacity, grants permits strictly in
//! arrival order (tokio's semaphore is FIFO), so no component can starve
//! another.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::error::{FlowError, FlowResult};

/// Kind of transport request, for accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    /// Poller fetch.
    Fetch,
    /// Dispatcher produce.
    Produce,
    /// Checkpoint commit or load.
    Commit,
}

impl RequestClass {
    /// Returns all request classes.
    #[must_use]
    pub const fn all() -> [Self; 3] {
        [Self::Fetch, Self::Produce, Self::Commit]
    }

    const fn index(self) -> usize {
        match self {
            Self::Fetch => 0,
            Self::Produce => 1,
            Self::Commit => 2,
        }
    }
}

#[derive(Debug, Default)]
struct PoolCounters {
    granted: [AtomicU64; 3],
}

/// Snapshot of pool usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Pool ceiling.
    pub max_concurrent: usize,
    /// Permits currently held.
    pub in_flight: usize,
    /// Permits granted per class, indexed like [`RequestClass::all`].
    pub granted: [u64; 3],
}

impl PoolStats {
    /// Permits granted to one class.
    #[must_use]
    pub const fn granted_for(&self, class: RequestClass) -> u64 {
        self.granted[class.index()]
    }
}

/// Permit for one in-flight transport request; released on drop.
#[derive(Debug)]
pub struct RequestPermit {
    class: RequestClass,
    _permit: OwnedSemaphorePermit,
}

impl RequestPermit {
    /// Class the permit was granted for.
    #[must_use]
    pub const fn class(&self) -> RequestClass {
        self.class
    }
}

/// FIFO-fair ceiling on concurrent transport requests.
///
/// Clones share the same pool.
#[derive(Debug, Clone)]
pub struct RequestPool {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    counters: Arc<PoolCounters>,
}

impl RequestPool {
    /// Creates a pool allowing `max_concurrent` requests at once.
    ///
    /// # Panics
    ///
    /// Panics if `max_concurrent` is zero.
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        assert!(max_concurrent > 0, "max_concurrent must be > 0");
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            counters: Arc::new(PoolCounters::default()),
        }
    }

    /// Waits for a permit.
    ///
    /// # Errors
    ///
    /// Returns `Shutdown` once the pool is closed.
    pub async fn acquire(&self, class: RequestClass) -> FlowResult<RequestPermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| FlowError::Shutdown)?;
        Ok(self.grant(class, permit))
    }

    /// Takes a permit if one is free right now.
    ///
    /// # Errors
    ///
    /// Returns `Shutdown` once the pool is closed.
    pub fn try_acquire(&self, class: RequestClass) -> FlowResult<Option<RequestPermit>> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Ok(Some(self.grant(class, permit))),
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(FlowError::Shutdown),
        }
    }

    fn grant(&self, class: RequestClass, permit: OwnedSemaphorePermit) -> RequestPermit {
        self.counters.granted[class.index()].fetch_add(1, Ordering::Relaxed);
        RequestPermit {
            class,
            _permit: permit,
        }
    }

    /// Stops granting permits. Waiters fail with `Shutdown`; held permits
    /// stay valid until dropped.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Returns true once the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Returns current usage.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_concurrent: self.max_concurrent,
            in_flight: self.max_concurrent - self.semaphore.available_permits(),
            granted: RequestClass::all()
                .map(|class| self.counters.granted[class.index()].load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_ceiling_and_release() {
        let pool = RequestPool::new(2);
        let a = pool.acquire(RequestClass::Fetch).await.unwrap();
        let _b = pool.acquire(RequestClass::Produce).await.unwrap();
        assert!(pool.try_acquire(RequestClass::Commit).unwrap().is_none());
        assert_eq!(pool.stats().in_flight, 2);

        drop(a);
        let c = pool.try_acquire(RequestClass::Commit).unwrap();
        assert_eq!(c.map(|p| p.class()), Some(RequestClass::Commit));

        let stats = pool.stats();
        assert_eq!(stats.granted_for(RequestClass::Fetch), 1);
        assert_eq!(stats.granted_for(RequestClass::Produce), 1);
        assert_eq!(stats.granted_for(RequestClass::Commit), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_granted_in_arrival_order() {
        let pool = RequestPool::new(1);
        let held = pool.acquire(RequestClass::Fetch).await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        for id in 0..5u32 {
            let pool = pool.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let _permit = pool.acquire(RequestClass::Produce).await.unwrap();
                tx.send(id).unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
            });
            // Let each waiter enqueue before spawning the next one.
            tokio::task::yield_now().await;
        }
        drop(tx);
        drop(held);

        let mut order = Vec::new();
        while let Some(id) = rx.recv().await {
            order.push(id);
        }
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_close_fails_waiters() {
        let pool = RequestPool::new(1);
        let _held = pool.acquire(RequestClass::Fetch).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(RequestClass::Commit).await })
        };
        tokio::task::yield_now().await;
        pool.close();

        assert_eq!(waiter.await.unwrap().unwrap_err(), FlowError::Shutdown);
        assert!(pool.is_closed());
        assert!(matches!(
            pool.try_acquire(RequestClass::Fetch),
            Err(FlowError::Shutdown)
        ));
    }
}
