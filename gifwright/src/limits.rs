//! Admission control for the upload and animation endpoints.
//!
//! Both endpoints do heavy work per request (multi-megabyte bodies, pixel processing), so each has
//! a bounded number of in-flight requests, a bounded wait queue and a maximum wait. Requests that
//! cannot get a slot are answered with 429.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::{LimitsConfig, RequestLimitConfig};
use crate::errors::{Error, Result};

/// One limiter per guarded endpoint; `None` means unlimited
#[derive(Debug, Default, Clone)]
pub struct Limiters {
    pub uploads: Option<Arc<RequestLimiter>>,
    pub animations: Option<Arc<RequestLimiter>>,
}

impl Limiters {
    pub fn new(config: &LimitsConfig) -> Self {
        Self {
            uploads: RequestLimiter::new("upload", &config.uploads).map(Arc::new),
            animations: RequestLimiter::new("animation", &config.animations).map(Arc::new),
        }
    }
}

/// Acquire a slot from an optional limiter
pub async fn admit(limiter: Option<&Arc<RequestLimiter>>) -> Result<Option<RequestPermit>> {
    match limiter {
        Some(limiter) => limiter.acquire().await.map(Some),
        None => Ok(None),
    }
}

#[derive(Debug)]
pub struct RequestLimiter {
    /// Used in rejection messages, e.g. "upload"
    name: &'static str,
    semaphore: Arc<Semaphore>,
    waiting: AtomicUsize,
    max_waiting: Option<usize>,
    max_wait: Duration,
}

impl RequestLimiter {
    /// Returns `None` when `max_concurrent` is 0
    pub fn new(name: &'static str, config: &RequestLimitConfig) -> Option<Self> {
        if config.max_concurrent == 0 {
            return None;
        }

        Some(Self {
            name,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            waiting: AtomicUsize::new(0),
            max_waiting: (config.max_waiting > 0).then_some(config.max_waiting),
            max_wait: Duration::from_secs(config.max_wait_secs),
        })
    }

    fn busy(&self) -> Error {
        Error::TooManyRequests {
            message: format!("Too many {} requests in progress. Please retry later.", self.name),
        }
    }

    /// Wait for a slot, or fail with [`Error::TooManyRequests`] when the queue is full or the wait
    /// exceeds the configured maximum.
    pub async fn acquire(&self) -> Result<RequestPermit> {
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(RequestPermit { _permit: permit });
        }

        let ahead = self.waiting.fetch_add(1, Ordering::SeqCst);
        let _leave_queue = scopeguard::guard((), |_| {
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        });

        if self.max_waiting.is_some_and(|max| ahead >= max) {
            tracing::debug!(limiter = self.name, waiting = ahead, "Wait queue full");
            return Err(self.busy());
        }

        // A slot may have been freed while we joined the queue
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(RequestPermit { _permit: permit });
        }

        if self.max_wait.is_zero() {
            return Err(self.busy());
        }

        match tokio::time::timeout(self.max_wait, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(RequestPermit { _permit: permit }),
            Ok(Err(_closed)) => Err(Error::TooManyRequests {
                message: format!("The {} service is temporarily unavailable.", self.name),
            }),
            Err(_elapsed) => Err(Error::TooManyRequests {
                message: format!("Timed out waiting for an {} slot. Please retry later.", self.name),
            }),
        }
    }

    /// Requests currently queued for a slot
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

/// Held for the duration of a request; dropping it frees the slot
#[must_use]
pub struct RequestPermit {
    _permit: OwnedSemaphorePermit,
}
