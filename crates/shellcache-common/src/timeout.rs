//! Timeout race for network operations.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::ShellError;

/// Run an operation, failing with [`ShellError::Timeout`] if it does not
/// finish within `timeout`.
///
/// `None` waits indefinitely.
pub async fn with_timeout<T, Fut>(timeout: Option<Duration>, operation: Fut) -> crate::Result<T>
where
    Fut: Future<Output = T>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, operation).await {
            Ok(value) => Ok(value),
            Err(_) => {
                debug!(?limit, "Operation timed out");
                Err(ShellError::Timeout(limit))
            }
        },
        None => Ok(operation.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_timeout_elapses() {
        let result = with_timeout(Some(Duration::from_millis(10)), async {
            sleep(Duration::from_secs(1)).await;
            42
        })
        .await;

        assert!(matches!(result, Err(ShellError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_completes_within_limit() {
        let result = with_timeout(Some(Duration::from_secs(1)), async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_no_limit() {
        let result = with_timeout(None, async {
            sleep(Duration::from_millis(5)).await;
            "done"
        })
        .await;
        assert_eq!(result.unwrap(), "done");
    }
}
