//! Upload capacity control.
//!
//! Ingestion buffers whole request bodies in memory, so the number of uploads processed at once
//! is bounded by [`UploadLimiter`]. Requests beyond capacity queue for a slot, up to a bounded
//! queue length and wait time, and are then rejected with HTTP 429.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::AppState;
use crate::config::UploadLimitsConfig;
use crate::errors::{Error, Result};

const BUSY_MESSAGE: &str = "Too many uploads in progress. Please retry later.";

#[derive(Debug)]
pub struct UploadLimiter {
    slots: Arc<Semaphore>,
    waiting: AtomicUsize,
    /// None = unbounded queue
    max_waiting: Option<usize>,
    max_wait: Duration,
}

/// Held for the duration of one upload; the slot is released on drop.
#[must_use]
#[derive(Debug)]
pub struct UploadPermit {
    _permit: OwnedSemaphorePermit,
}

/// Decrements the waiting count however the wait ends.
struct Waiting<'a>(&'a AtomicUsize);

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl UploadLimiter {
    /// Returns `None` when `max_concurrent_uploads` is 0 (unlimited).
    pub fn from_config(config: &UploadLimitsConfig) -> Option<Arc<Self>> {
        if config.max_concurrent_uploads == 0 {
            return None;
        }

        Some(Arc::new(Self {
            slots: Arc::new(Semaphore::new(config.max_concurrent_uploads)),
            waiting: AtomicUsize::new(0),
            max_waiting: (config.max_waiting_uploads > 0).then_some(config.max_waiting_uploads),
            max_wait: Duration::from_secs(config.max_upload_wait_secs),
        }))
    }

    pub async fn acquire(&self) -> Result<UploadPermit> {
        if let Ok(permit) = self.slots.clone().try_acquire_owned() {
            return Ok(UploadPermit { _permit: permit });
        }

        let already_waiting = self.waiting.fetch_add(1, Ordering::SeqCst);
        let _waiting = Waiting(&self.waiting);

        if self.max_waiting.is_some_and(|max| already_waiting >= max) || self.max_wait.is_zero() {
            return Err(Error::TooManyRequests {
                message: BUSY_MESSAGE.to_string(),
            });
        }

        match tokio::time::timeout(self.max_wait, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(UploadPermit { _permit: permit }),
            Ok(Err(_closed)) => Err(Error::TooManyRequests {
                message: "Upload service temporarily unavailable.".to_string(),
            }),
            Err(_elapsed) => Err(Error::TooManyRequests {
                message: "Timed out waiting for an upload slot. Please retry later.".to_string(),
            }),
        }
    }

    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }
}

/// Route middleware for the upload endpoints. Runs before body extraction, so a queued request
/// has not buffered anything yet, and holds the slot until the response is produced.
pub async fn limit_uploads(State(state): State<AppState>, request: Request, next: Next) -> Result<Response> {
    let _permit = match &state.upload_limiter {
        Some(limiter) => Some(limiter.acquire().await.inspect_err(|_| {
            debug!(waiting = limiter.waiting(), "Upload rejected, limiter at capacity");
        })?),
        None => None,
    };

    Ok(next.run(request).await)
}
