//! The canonical etag-guarded retry loop. Every Story mutation goes
//! through this: read, apply, replace, and on `Conflict` re-read and
//! re-apply idempotently with exponential back-off.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use newsreel_common::NewsreelError;

/// Base back-off for a conflicted attempt. Actual delay is
/// `base * 2^attempt + jitter`.
const RETRY_BASE: Duration = Duration::from_millis(100);
const RETRY_MAX_ATTEMPTS: u32 = 5;
const RETRY_JITTER_MS: u64 = 50;

/// Run `attempt` up to five times, backing off on retryable errors
/// (Conflict, TransientNetwork, RateLimited). The closure must be
/// idempotent: it re-reads current state each time it runs.
pub async fn update_with_etag_retry<T, F, Fut>(
    op: &str,
    mut attempt: F,
) -> Result<T, NewsreelError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, NewsreelError>>,
{
    let mut last_err = None;
    for n in 0..RETRY_MAX_ATTEMPTS {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                let jitter = Duration::from_millis(rand::rng().random_range(0..RETRY_JITTER_MS));
                let backoff = RETRY_BASE * 2u32.pow(n) + jitter;
                debug!(op, attempt = n + 1, backoff_ms = backoff.as_millis() as u64, error = %e, "Retrying after conflict");
                tokio::time::sleep(backoff).await;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    let err = last_err.unwrap_or_else(|| NewsreelError::Fatal(format!("{op}: retry loop exhausted")));
    warn!(op, attempts = RETRY_MAX_ATTEMPTS, error = %err, "Giving up after repeated conflicts");
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_after_conflicts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let result = update_with_etag_retry("test", move || {
            let calls = calls_in.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(NewsreelError::conflict("stories", "s1"))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_five_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let err = update_with_etag_retry("test", move || {
            let calls = calls_in.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(NewsreelError::conflict("stories", "s1"))
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, NewsreelError::Conflict { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn validation_errors_do_not_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let err = update_with_etag_retry("test", move || {
            let calls = calls_in.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(NewsreelError::Validation("bad document".into()))
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, NewsreelError::Validation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
