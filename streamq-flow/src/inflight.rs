//! Per-destination in-flight bound for outbound sends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use streamq_core::PartitionKey;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{FlowError, FlowResult};

/// Slot for one in-flight send to a destination; released on drop.
#[derive(Debug)]
pub struct InFlightPermit {
    _permit: OwnedSemaphorePermit,
}

/// Caps concurrent sends per destination partition.
///
/// Callers beyond the bound wait (backpressure); nothing is queued on their
/// behalf.
#[derive(Debug)]
pub struct InFlightLimiter {
    per_destination: usize,
    destinations: Mutex<HashMap<PartitionKey, Arc<Semaphore>>>,
    closed: AtomicBool,
}

impl InFlightLimiter {
    /// Creates a limiter with `per_destination` slots per partition.
    ///
    /// # Panics
    ///
    /// Panics if `per_destination` is zero.
    #[must_use]
    pub fn new(per_destination: usize) -> Self {
        assert!(per_destination > 0, "per_destination must be > 0");
        Self {
            per_destination,
            destinations: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn semaphore(&self, destination: &PartitionKey) -> Arc<Semaphore> {
        let mut destinations = self.destinations.lock().expect("in-flight lock poisoned");
        Arc::clone(
            destinations
                .entry(destination.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_destination))),
        )
    }

    /// Waits for a slot on `destination`.
    ///
    /// # Errors
    ///
    /// Returns `Shutdown` once the limiter is closed.
    pub async fn acquire(&self, destination: &PartitionKey) -> FlowResult<InFlightPermit> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FlowError::Shutdown);
        }
        let permit = self
            .semaphore(destination)
            .acquire_owned()
            .await
            .map_err(|_| FlowError::Shutdown)?;
        Ok(InFlightPermit { _permit: permit })
    }

    /// Number of sends currently in flight to `destination`.
    #[must_use]
    pub fn in_flight(&self, destination: &PartitionKey) -> usize {
        let destinations = self.destinations.lock().expect("in-flight lock poisoned");
        destinations
            .get(destination)
            .map_or(0, |s| self.per_destination - s.available_permits())
    }

    /// Slots per destination.
    #[must_use]
    pub const fn per_destination(&self) -> usize {
        self.per_destination
    }

    /// Fails current and future waiters with `Shutdown`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let destinations = self.destinations.lock().expect("in-flight lock poisoned");
        for semaphore in destinations.values() {
            semaphore.close();
        }
    }
}
