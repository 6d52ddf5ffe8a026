//! Bounded retry with exponential backoff for store round trips

use crate::config::BackoffPolicy;
use crate::error::{matchmaking_error, MatchmakingError, Result};
use std::future::Future;
use tokio::time::sleep;
use tracing::{error, warn};

/// Run `op`, retrying transient store outages according to `policy`.
///
/// Only `StoreUnavailable` is retried; every other error is returned as is.
/// When retries run out the last outage becomes a `Connectivity` error.
pub async fn with_backoff<T, F, Fut>(policy: &BackoffPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry_count = 0;
    let mut delay = policy.base_delay();

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let transient = matchmaking_error(&err).is_some_and(MatchmakingError::is_transient);
        if !transient {
            return Err(err);
        }

        retry_count += 1;
        if retry_count > policy.max_retries {
            error!(
                "{} failed after {} retries: {}",
                operation, policy.max_retries, err
            );
            return Err(MatchmakingError::Connectivity {
                operation: operation.to_string(),
                attempts: retry_count,
                message: err.to_string(),
            }
            .into());
        }

        warn!(
            "{} attempt {} failed: {}. Retrying in {:?}",
            operation, retry_count, err, delay
        );
        sleep(delay).await;
        delay = policy.next_delay(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_retries: u32) -> BackoffPolicy {
        BackoffPolicy {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    fn outage() -> anyhow::Error {
        MatchmakingError::StoreUnavailable {
            message: "backend down".to_string(),
        }
        .into()
    }

    #[tokio::test]
    async fn test_recovers_within_budget() {
        let calls = &AtomicU32::new(0);
        let result = with_backoff(&fast_policy(3), "join", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(outage())
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_connectivity() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = with_backoff(&fast_policy(2), "leave", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(outage())
        })
        .await;

        let err = result.unwrap_err();
        assert!(matches!(
            matchmaking_error(&err),
            Some(MatchmakingError::Connectivity { operation, attempts: 3, .. }) if operation == "leave"
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_domain_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = with_backoff(&fast_policy(5), "join", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(MatchmakingError::AlreadyWaiting {
                party_id: "alice".to_string(),
            }
            .into())
        })
        .await;

        assert!(matches!(
            matchmaking_error(&result.unwrap_err()),
            Some(MatchmakingError::AlreadyWaiting { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
