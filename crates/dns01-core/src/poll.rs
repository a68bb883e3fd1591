//! Bounded fixed-interval polling shared by every wait in the issuance flow

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Retry policy: fixed number of attempts, fixed delay, no backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poll {
    pub attempts: u32,
    pub interval: Duration,
}

impl Poll {
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }
}

impl Default for Poll {
    /// 60 attempts, one second apart
    fn default() -> Self {
        Self::new(60, Duration::from_secs(1))
    }
}

/// Outcome of a single attempt
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// Condition met, stop polling
    Ready(T),
    /// Not yet, try again after the interval
    Pending,
    /// Terminal failure, stop polling
    Failed(E),
}

#[derive(Debug, Error)]
pub enum PollError<E> {
    #[error("gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(E),
}

/// Run `check` until it is ready, fails, or the policy runs out
///
/// The interval is slept after every pending attempt, including the last, so
/// a condition that never holds takes `attempts * interval`. Cancellation is
/// observed before each attempt and during each sleep.
pub async fn poll_until<T, E, F, Fut>(
    policy: Poll,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T, PollError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    for attempt in 1..=policy.attempts {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled);
        }

        match check(attempt).await {
            Attempt::Ready(value) => return Ok(value),
            Attempt::Failed(e) => return Err(PollError::Failed(e)),
            Attempt::Pending => {
                tracing::trace!(attempt, max = policy.attempts, "Condition not met yet");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(PollError::Cancelled),
            _ = tokio::time::sleep(policy.interval) => {}
        }
    }

    Err(PollError::Exhausted {
        attempts: policy.attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_third_attempt() {
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let result: Result<u32, PollError<()>> =
            poll_until(Poll::default(), &cancel, |attempt| async move {
                if attempt == 3 {
                    Attempt::Ready(attempt)
                } else {
                    Attempt::Pending
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_exact_attempts() {
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let counter = calls.clone();
        let result: Result<(), PollError<()>> = poll_until(Poll::default(), &cancel, |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Attempt::Pending }
        })
        .await;

        assert!(matches!(result, Err(PollError::Exhausted { attempts: 60 })));
        assert_eq!(calls.load(Ordering::SeqCst), 60);
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_stops_immediately() {
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<(), PollError<&str>> = poll_until(Poll::default(), &cancel, |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Attempt::Failed("invalid") }
        })
        .await;

        match result {
            Err(PollError::Failed(e)) => assert_eq!(e, "invalid"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_sleep() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            trigger.cancel();
        });

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), PollError<()>> = poll_until(Poll::default(), &cancel, |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Attempt::Pending }
        })
        .await;

        assert!(matches!(result, Err(PollError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_check() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<(), PollError<()>> = poll_until(Poll::default(), &cancel, |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Attempt::Pending }
        })
        .await;

        assert!(matches!(result, Err(PollError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
