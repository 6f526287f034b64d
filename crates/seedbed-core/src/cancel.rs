//! Cancellation helpers for bounded wait loops.
//!
//! Every wait loop in seedbed checks the run's [`CancellationToken`] before
//! sleeping and returns [`Error::Cancelled`] when it fires, so callers can tell
//! a deliberate abort apart from a timeout.

use std::time::Duration;

pub use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Fail fast if the token has already fired.
///
/// # Errors
///
/// Returns `Error::Cancelled` naming `operation` when the token is cancelled.
pub fn ensure_active(cancel: &CancellationToken, operation: &str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::cancelled(operation));
    }
    Ok(())
}

/// Sleep for `delay` unless the token fires first.
///
/// # Errors
///
/// Returns `Error::Cancelled` naming `operation` when the token fires before
/// the delay elapses.
pub async fn sleep_or_cancel(
    cancel: &CancellationToken,
    delay: Duration,
    operation: &str,
) -> Result<()> {
    ensure_active(cancel, operation)?;
    tokio::select! {
        () = cancel.cancelled() => Err(Error::cancelled(operation)),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sleeps_when_not_cancelled() {
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();
        sleep_or_cancel(&cancel, Duration::from_secs(5), "test wait")
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn returns_cancelled_when_token_fires() {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            child.cancel();
        });

        let err = sleep_or_cancel(&cancel, Duration::from_secs(600), "stabilization wait")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { ref operation } if operation == "stabilization wait"));
    }

    #[test]
    fn ensure_active_rejects_cancelled_token() {
        let cancel = CancellationToken::new();
        assert!(ensure_active(&cancel, "poll").is_ok());
        cancel.cancel();
        assert!(ensure_active(&cancel, "poll").unwrap_err().is_cancelled());
    }
}
