//! Capped exponential backoff for transport retries (spec §7: "Transport
//! errors are retried by the backend on a backoff"): `100ms * 2^n`, capped
//! at 30s.

use std::future::Future;
use std::time::Duration;

const BASE: Duration = Duration::from_millis(100);
const CAP: Duration = Duration::from_secs(30);

/// The delay before the `(attempt + 1)`th retry, `attempt` starting at 0 for
/// the first retry after the initial failed try.
pub fn delay_for_attempt(attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX);
    let millis = (BASE.as_millis() as u64).saturating_mul(factor);
    Duration::from_millis(millis).min(CAP)
}

/// Call `f` until it succeeds or `max_attempts` tries are exhausted,
/// sleeping between attempts with capped exponential backoff. Never sleeps
/// before the first attempt or after the last.
pub async fn retry<T, E, F, Fut>(max_attempts: u32, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(err);
                }
                tokio::time::sleep(delay_for_attempt(attempt - 1)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_doubles_and_caps_at_thirty_seconds() {
        assert_eq!(delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(delay_for_attempt(20), CAP);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = retry(3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("nope") }
        })
        .await;
        assert_eq!(result, Err("nope"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_returns_as_soon_as_it_succeeds() {
        let calls = AtomicU32::new(0);
        let result = retry(5, || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { if n < 2 { Err("nope") } else { Ok::<_, &str>(n) } }
        })
        .await;
        assert_eq!(result, Ok(2));
    }
}
