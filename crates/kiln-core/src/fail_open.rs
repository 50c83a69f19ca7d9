//! Fail-open helpers for infrastructure work
//!
//! Journal writes, metrics flushes and similar side work must never fail a
//! build. Wrap them here so the failure becomes a `warn!` line.
//!
//! Not for agent execution or ledger mutations: those carry business state.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::Result;

/// Run an infrastructure operation, logging and swallowing its error
///
/// ```no_run
/// use kiln_core::fail_open::fail_open;
/// use kiln_core::Result;
///
/// async fn append_journal() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let written = fail_open("journal_append", || append_journal()).await;
///     assert!(written.is_some());
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!(operation = operation_name, "fail-open: {}", e);
            None
        }
    }
}

/// Like [`fail_open`] but retries with a linear backoff of `50ms * attempt`
pub async fn fail_open_with_retries<F, Fut, T>(
    operation_name: &str,
    mut f: F,
    max_retries: usize,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for attempt in 1..=max_retries {
        match f().await {
            Ok(val) => return Some(val),
            Err(e) if attempt == max_retries => {
                warn!(
                    operation = operation_name,
                    "fail-open after {} attempts: {}", max_retries, e
                );
            }
            Err(e) => {
                warn!(
                    operation = operation_name,
                    "attempt {}/{} failed: {}", attempt, max_retries, e
                );
                tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KilnError;

    #[tokio::test]
    async fn test_fail_open_success() {
        let result = fail_open("journal", || async { Ok::<_, KilnError>(7) }).await;
        assert_eq!(result, Some(7));
    }

    #[tokio::test]
    async fn test_fail_open_swallows_error() {
        let result = fail_open("journal", || async {
            Err::<u8, _>(KilnError::Other("disk full".to_string()))
        })
        .await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let mut attempts = 0;
        let result = fail_open_with_retries(
            "journal",
            || {
                attempts += 1;
                let current = attempts;
                async move {
                    if current < 3 {
                        Err(KilnError::Other("transient".to_string()))
                    } else {
                        Ok(current)
                    }
                }
            },
            3,
        )
        .await;
        assert_eq!(result, Some(3));
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let mut attempts = 0;
        let result = fail_open_with_retries(
            "journal",
            || {
                attempts += 1;
                async move { Err::<(), _>(KilnError::Other("persistent".to_string())) }
            },
            2,
        )
        .await;
        assert_eq!(result, None);
        assert_eq!(attempts, 2);
    }
}
