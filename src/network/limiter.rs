//! Bound on concurrently served client connections

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Hands out one permit per accepted client connection
#[derive(Clone)]
pub struct ConnectionLimiter {
    permits: Arc<Semaphore>,
    max_connections: usize,
}

impl ConnectionLimiter {
    /// Create a limiter
    ///
    /// # Panics
    ///
    /// Panics if `max_connections` is 0
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        assert!(max_connections > 0, "max_connections must be > 0");

        Self {
            permits: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Take a permit without waiting; `None` when the limit is reached
    pub fn try_admit(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.permits).try_acquire_owned().ok()
    }

    /// Connections currently holding a permit
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.max_connections - self.permits.available_permits()
    }

    /// Configured maximum
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}
