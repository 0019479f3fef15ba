//! Retry of whole database attempts on SQLite lock contention
//!
//! Callers pass a closure that opens its own transaction, so every retry
//! starts from a clean state. The wait budget is `db_max_lock_wait_ms` from
//! the `[imports]` config.

use std::future::Future;
use std::time::{Duration, Instant};
use tally_common::{Error, Result};
use tracing::{debug, error, warn};

/// Doubling delay schedule bounded by a total wait budget
#[derive(Debug)]
struct LockBackoff {
    started: Instant,
    budget: Duration,
    next: Duration,
}

impl LockBackoff {
    const FIRST: Duration = Duration::from_millis(10);
    const CEILING: Duration = Duration::from_secs(1);

    fn new(max_wait_ms: u64) -> Self {
        Self {
            started: Instant::now(),
            budget: Duration::from_millis(max_wait_ms),
            next: Self::FIRST,
        }
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Delay before the next attempt, or `None` once the budget is spent
    fn next_delay(&mut self) -> Option<Duration> {
        if self.elapsed() >= self.budget {
            return None;
        }
        let delay = self.next;
        self.next = (self.next * 2).min(Self::CEILING);
        Some(delay)
    }
}

/// Run `attempt` until it succeeds, fails with something other than lock
/// contention, or the lock wait budget runs out (`Error::Internal`).
pub async fn retry_on_lock<F, Fut, T>(operation: &str, max_wait_ms: u64, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = LockBackoff::new(max_wait_ms);
    let mut tries = 0u32;

    loop {
        tries += 1;
        let err = match attempt().await {
            Ok(value) => {
                if tries > 1 {
                    debug!(operation, tries, elapsed_ms = backoff.elapsed().as_millis() as u64, "Succeeded after lock retries");
                }
                return Ok(value);
            }
            Err(err) if err.is_lock_contention() => err,
            Err(err) => return Err(err),
        };

        let Some(delay) = backoff.next_delay() else {
            let waited = backoff.elapsed().as_millis() as u64;
            error!(operation, tries, waited_ms = waited, max_wait_ms, error = %err, "Giving up on locked database");
            return Err(Error::Internal(format!(
                "{}: database still locked after {} attempts over {} ms",
                operation, tries, waited
            )));
        };
        warn!(operation, tries, delay_ms = delay.as_millis() as u64, "Database locked, retrying");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn locked() -> Error {
        Error::Database(sqlx::Error::Protocol("database is locked".into()))
    }

    #[test]
    fn test_backoff_doubles_up_to_ceiling() {
        let mut backoff = LockBackoff::new(60_000);
        let delays: Vec<u128> = (0..9).filter_map(|_| backoff.next_delay()).map(|d| d.as_millis()).collect();
        assert_eq!(delays, vec![10, 20, 40, 80, 160, 320, 640, 1000, 1000]);
    }

    #[test]
    fn test_zero_budget_never_waits() {
        let mut backoff = LockBackoff::new(0);
        assert!(backoff.next_delay().is_none());
    }

    #[tokio::test]
    async fn test_recovers_after_transient_lock() {
        let calls = Cell::new(0);
        let result = retry_on_lock("test", 5_000, || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move { if n < 3 { Err(locked()) } else { Ok(n) } }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result = retry_on_lock("test", 5_000, || {
            calls.set(calls.get() + 1);
            async { Err::<(), _>(Error::Conflict("taken".into())) }
        })
        .await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_is_internal_error() {
        let result = retry_on_lock("test", 30, || async { Err::<(), _>(locked()) }).await;
        assert!(matches!(result, Err(Error::Internal(msg)) if msg.contains("still locked")));
    }
}
