//! Bounded retry with an injectable sleep

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use tracing::debug;

/// Sleep function used between attempts.
///
/// Production code uses [`tokio_sleep`]; tests pass [`no_sleep`] so polling
/// runs instantly.
pub type SleepFn = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

/// Sleep on the tokio timer
pub fn tokio_sleep() -> SleepFn {
    Arc::new(|d: Duration| tokio::time::sleep(d).boxed())
}

/// Return immediately
pub fn no_sleep() -> SleepFn {
    Arc::new(|_: Duration| async {}.boxed())
}

/// Fixed-interval retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay between attempts
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            interval: Duration::from_secs(3),
        }
    }
}

/// Result of [`retry_until`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryOutcome {
    /// Attempts made
    pub attempts: u32,

    /// Whether the predicate held on the last attempt
    pub succeeded: bool,
}

/// Call `predicate` until it returns true or the attempt budget is spent.
///
/// The predicate receives the 1-based attempt number. Sleeps happen only
/// between attempts, never after the last one.
pub async fn retry_until<P, Fut>(policy: &RetryPolicy, sleep_fn: &SleepFn, mut predicate: P) -> RetryOutcome
where
    P: FnMut(u32) -> Fut,
    Fut: Future<Output = bool>,
{
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        if predicate(attempt).await {
            return RetryOutcome {
                attempts: attempt,
                succeeded: true,
            };
        }
        if attempt < max_attempts {
            debug!("Attempt {}/{} failed, retrying in {:?}", attempt, max_attempts, policy.interval);
            sleep_fn(policy.interval).await;
        }
    }

    RetryOutcome {
        attempts: max_attempts,
        succeeded: false,
    }
}
