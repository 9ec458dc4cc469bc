//! Bounded session admission.
//!
//! A fixed pool of slots; each admitted session holds one until its permit is
//! dropped, whichever way the session ends.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{RelayError, Result};
use crate::utils::metrics::global_metrics;

#[derive(Debug, Clone)]
pub struct AdmissionPool {
    slots: Arc<Semaphore>,
    capacity: usize,
    wait: Duration,
}

/// A held admission slot, released on drop.
#[derive(Debug)]
pub struct SessionPermit {
    _permit: OwnedSemaphorePermit,
}

impl Drop for SessionPermit {
    fn drop(&mut self) {
        global_metrics().session_released();
        debug!("return session");
    }
}

impl AdmissionPool {
    /// A pool of `capacity` slots; callers wait at most `wait` for one.
    pub fn new(capacity: usize, wait: Duration) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            wait,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots not currently held.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Wait for a free slot, giving up with `RelayError::Timeout`.
    pub async fn acquire(&self) -> Result<SessionPermit> {
        match tokio::time::timeout(self.wait, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => {
                global_metrics().session_admitted();
                debug!("got session");
                Ok(SessionPermit { _permit: permit })
            }
            Ok(Err(_closed)) => Err(RelayError::Worker("admission pool closed".into())),
            Err(_) => {
                global_metrics().session_rejected();
                Err(RelayError::Timeout)
            }
        }
    }
}
