//! Bounded polling for conditions observed through the API server.
//!
//! Used where a reconcile pass has to see a side effect land before it can
//! continue, e.g. the prune Job disappearing after deletion. Everything else
//! relies on the controller's requeue instead of waiting in-line.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::Error;

/// Interval and bound for a poll loop
#[derive(Clone, Debug)]
pub struct PollConfig {
    /// Delay between checks
    pub interval: Duration,
    /// Total time allowed before giving up
    pub timeout: Duration,
}

impl PollConfig {
    /// Create a poll configuration
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Poll `check` until it reports `true`, it errors, or the timeout expires.
///
/// The first check runs immediately. Errors from `check` end the loop and are
/// returned unchanged; expiry returns [`Error::Timeout`].
pub async fn wait_until<F, Fut>(
    config: &PollConfig,
    operation_name: &str,
    mut check: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let start = tokio::time::Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if check().await? {
            return Ok(());
        }

        if start.elapsed() >= config.timeout {
            return Err(Error::timeout(operation_name, config.timeout));
        }

        debug!(
            operation = %operation_name,
            attempt,
            elapsed = ?start.elapsed(),
            "condition not met yet, polling again"
        );
        tokio::time::sleep(config.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> PollConfig {
        PollConfig::new(Duration::from_millis(1), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn returns_immediately_when_condition_holds() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        wait_until(&fast(), "ready", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn polls_until_condition_holds() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        wait_until(&fast(), "third time", || {
            let c = c.clone();
            async move { Ok(c.fetch_add(1, Ordering::SeqCst) >= 2) }
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn check_errors_stop_the_loop() {
        let result = wait_until(&fast(), "broken", || async {
            Err(Error::internal("api down"))
        })
        .await;
        assert!(matches!(result, Err(Error::Internal { .. })));
    }

    #[tokio::test]
    async fn expiry_reports_timeout() {
        let config = PollConfig::new(Duration::from_millis(5), Duration::from_millis(20));
        let result = wait_until(&config, "never", || async { Ok(false) }).await;
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "timed out after 20ms waiting for never");
        match err {
            Error::Timeout { operation, after } => {
                assert_eq!(operation, "never");
                assert_eq!(after, Duration::from_millis(20));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }
}
