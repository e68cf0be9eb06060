//! Bound on concurrently running parser processes.
//!
//! Uploads stream to disk without holding anything; a slot is only taken once a request has all
//! its files in scratch storage and is about to start the parser. Requests that find every slot
//! busy queue for one, up to `max_waiting_invocations` of them for at most `max_wait`. A full
//! queue or an expired wait is answered with 429, a shutdown while queued with 503.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::LimitsConfig;
use crate::errors::{Error, Result};
use crate::parser::ParserError;

const QUEUE_FULL: &str = "Too many invoice uploads in progress. Please retry later.";
const WAIT_EXPIRED: &str = "Timed out waiting for a processing slot. Please retry later.";

/// Parser process slots shared by all requests.
#[derive(Debug)]
pub struct ParserSlots {
    semaphore: Arc<Semaphore>,
    /// Requests currently queued for a slot
    queued: AtomicUsize,
    max_queued: Option<usize>,
    max_wait: Duration,
}

impl ParserSlots {
    /// `None` when `max_concurrent_invocations` is 0, i.e. parser runs are unbounded.
    pub fn from_config(config: &LimitsConfig) -> Option<Self> {
        (config.max_concurrent_invocations > 0).then(|| Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_invocations)),
            queued: AtomicUsize::new(0),
            max_queued: (config.max_waiting_invocations > 0).then_some(config.max_waiting_invocations),
            max_wait: config.max_wait,
        })
    }

    /// Take a slot, queueing if none is free.
    ///
    /// Dropping the returned future (client gone) leaves the queue as if the request never joined.
    pub async fn acquire(&self, shutdown: &CancellationToken) -> Result<ParserSlot> {
        if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
            return Ok(ParserSlot { _permit: permit });
        }

        let Some(_place) = QueuePlace::join(&self.queued, self.max_queued) else {
            return Err(busy(QUEUE_FULL));
        };

        if self.max_wait.is_zero() {
            return Err(busy(QUEUE_FULL));
        }

        debug!(queued = self.queued(), "Waiting for a parser slot");

        tokio::select! {
            permit = self.semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => Ok(ParserSlot { _permit: permit }),
                Err(_) => Err(ParserError::Cancelled.into()),
            },
            _ = tokio::time::sleep(self.max_wait) => Err(busy(WAIT_EXPIRED)),
            _ = shutdown.cancelled() => Err(ParserError::Cancelled.into()),
        }
    }

    /// Number of requests waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Number of slots not currently held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

fn busy(message: &str) -> Error {
    Error::TooManyRequests {
        message: message.to_string(),
    }
}

/// A request's place in the slot queue; leaving it (by any path) frees the place.
struct QueuePlace<'a> {
    queued: &'a AtomicUsize,
}

impl<'a> QueuePlace<'a> {
    fn join(queued: &'a AtomicUsize, max_queued: Option<usize>) -> Option<Self> {
        queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match max_queued {
                Some(max) if n >= max => None,
                _ => Some(n + 1),
            })
            .ok()?;
        Some(Self { queued })
    }
}

impl Drop for QueuePlace<'_> {
    fn drop(&mut self) {
        self.queued.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Held for the duration of one parser run.
#[must_use]
pub struct ParserSlot {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(max_concurrent: usize, max_waiting: usize, max_wait: Duration) -> Arc<ParserSlots> {
        Arc::new(
            ParserSlots::from_config(&LimitsConfig {
                max_concurrent_invocations: max_concurrent,
                max_waiting_invocations: max_waiting,
                max_wait,
            })
            .unwrap(),
        )
    }

    async fn wait_until_queued(slots: &ParserSlots, n: usize) {
        for _ in 0..100 {
            if slots.queued() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} queued, found {}", slots.queued());
    }

    #[test]
    fn test_zero_concurrency_means_unbounded() {
        assert!(ParserSlots::from_config(&LimitsConfig::default()).is_none());
    }

    #[tokio::test]
    async fn test_abandoned_waiter_leaves_queue() {
        let slots = slots(1, 1, Duration::from_secs(60));
        let shutdown = CancellationToken::new();
        let held = slots.acquire(&shutdown).await.unwrap();

        let waiter = {
            let slots = slots.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { slots.acquire(&shutdown).await.map(|_| ()) })
        };
        wait_until_queued(&slots, 1).await;

        // Client disconnects while queued
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        assert_eq!(slots.queued(), 0);

        // The freed place is usable by the next request
        let next = {
            let slots = slots.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { slots.acquire(&shutdown).await.map(|_| ()) })
        };
        wait_until_queued(&slots, 1).await;
        drop(held);

        assert!(next.await.unwrap().is_ok());
        assert_eq!(slots.queued(), 0);
        assert_eq!(slots.available(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_rejected_with_429() {
        let slots = slots(1, 1, Duration::from_secs(60));
        let shutdown = CancellationToken::new();
        let _held = slots.acquire(&shutdown).await.unwrap();

        let _waiter = {
            let slots = slots.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { slots.acquire(&shutdown).await.map(|_| ()) })
        };
        wait_until_queued(&slots, 1).await;

        let err = slots.acquire(&shutdown).await.err().unwrap();
        assert_eq!(err.status_code(), axum::http::StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.user_message(), QUEUE_FULL);
        assert_eq!(slots.queued(), 1);
    }

    #[tokio::test]
    async fn test_wait_expires() {
        let slots = slots(1, 0, Duration::from_millis(200));
        let shutdown = CancellationToken::new();
        let _held = slots.acquire(&shutdown).await.unwrap();

        let err = slots.acquire(&shutdown).await.err().unwrap();
        assert_eq!(err.user_message(), WAIT_EXPIRED);
        assert_eq!(slots.queued(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiters_with_503() {
        let slots = slots(1, 0, Duration::from_secs(60));
        let shutdown = CancellationToken::new();
        let _held = slots.acquire(&shutdown).await.unwrap();

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = slots.acquire(&shutdown).await.err().unwrap();
        assert_eq!(err.status_code(), axum::http::StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(slots.queued(), 0);
    }

    #[tokio::test]
    async fn test_released_slot_is_reused() {
        let slots = slots(2, 0, Duration::ZERO);
        let shutdown = CancellationToken::new();

        let first = slots.acquire(&shutdown).await.unwrap();
        let _second = slots.acquire(&shutdown).await.unwrap();
        assert_eq!(slots.available(), 0);
        assert!(slots.acquire(&shutdown).await.is_err());

        drop(first);
        assert!(slots.acquire(&shutdown).await.is_ok());
    }
}
