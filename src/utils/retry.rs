// Retry with exponential backoff

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

/// Runs `operation` until it succeeds, `should_retry` rejects the error, or
/// `max_attempts` is reached. The delay doubles after each failure, starting
/// at `base_delay` and capped at 32x.
pub async fn with_retry<F, Fut, T, E>(
    mut operation: F,
    max_attempts: u32,
    base_delay: Duration,
    should_retry: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                attempt += 1;
                if attempt >= max_attempts || !should_retry(&error) {
                    return Err(error);
                }
                let delay = base_delay * 2u32.pow((attempt - 1).min(5));
                debug!(attempt, error = %error, ?delay, "retrying");
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = with_retry(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(format!("fail {}", n))
                } else {
                    Ok(n)
                }
            },
            5,
            Duration::from_millis(1),
            |_| true,
        )
        .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("bad request".to_string())
            },
            5,
            Duration::from_millis(1),
            |e: &String| !e.starts_with("bad"),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
