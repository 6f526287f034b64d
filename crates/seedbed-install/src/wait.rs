//! Bounded waits after an install.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use seedbed_cluster::{ClusterApiClient, ManagedApplication};
use seedbed_core::{ensure_active, sleep_or_cancel, CancellationToken, Error, Result};

/// Sleep for `duration`, logging progress every `progress_every`.
///
/// A plain delay, not a readiness probe.
///
/// # Errors
///
/// Returns `Error::Cancelled` if the token fires.
pub async fn stabilization_wait(
    duration: Duration,
    progress_every: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let operation = "stabilization wait";
    if duration.is_zero() {
        return ensure_active(cancel, operation);
    }

    let step = if progress_every.is_zero() {
        duration
    } else {
        progress_every
    };
    info!(secs = duration.as_secs(), "Waiting for the control plane to stabilize");

    let start = Instant::now();
    let mut remaining = duration;
    while !remaining.is_zero() {
        let delay = remaining.min(step);
        sleep_or_cancel(cancel, delay, operation).await?;
        remaining = remaining.saturating_sub(delay);
        info!(
            elapsed_secs = start.elapsed().as_secs(),
            remaining_secs = remaining.as_secs(),
            "Stabilizing"
        );
    }
    Ok(())
}

/// Poll until every application in `namespace` is synced and healthy.
///
/// An empty application list counts as not ready. Temporary API errors are
/// retried; any other API error ends the wait.
///
/// # Errors
///
/// Returns `Error::ApplicationsNotReady` carrying the pending names and the
/// most recent message once `attempts` are used up, `Error::Api` for a
/// permanent API error, or `Error::Cancelled`.
pub async fn wait_for_applications(
    client: &dyn ClusterApiClient,
    namespace: &str,
    attempts: u32,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<ManagedApplication>> {
    let operation = "application readiness wait";
    let mut pending: Vec<String> = Vec::new();
    let mut last_message: Option<String> = None;

    for attempt in 1..=attempts {
        ensure_active(cancel, operation)?;

        match client.list_applications(namespace).await {
            Ok(apps) if !apps.is_empty() && apps.iter().all(ManagedApplication::is_ready) => {
                info!(namespace, count = apps.len(), attempt, "All applications synced and healthy");
                return Ok(apps);
            }
            Ok(apps) if apps.is_empty() => {
                pending.clear();
                last_message = Some("no applications registered yet".to_string());
                debug!(namespace, attempt, "No applications registered yet");
            }
            Ok(apps) => {
                let not_ready: Vec<&ManagedApplication> =
                    apps.iter().filter(|a| !a.is_ready()).collect();
                pending = not_ready.iter().map(|a| a.name.clone()).collect();
                if let Some(message) = not_ready.iter().find_map(|a| a.message.clone()) {
                    last_message = Some(message);
                }
                debug!(
                    namespace,
                    attempt,
                    pending = %pending.join(","),
                    "Applications not ready"
                );
            }
            Err(e) if e.is_temporary() => {
                warn!(namespace, attempt, error = %e, "Temporary API error while polling applications");
                last_message = Some(e.to_string());
            }
            Err(e) => return Err(Error::Api(e)),
        }

        if attempt < attempts {
            sleep_or_cancel(cancel, interval, operation).await?;
        }
    }

    Err(Error::ApplicationsNotReady {
        namespace: namespace.to_string(),
        pending,
        last_message,
    })
}

#[cfg(test)]
mod tests {
    use seedbed_cluster::MockApiClient;
    use seedbed_core::ApiError;

    use super::*;

    fn app(name: &str, sync: &str, health: &str, message: Option<&str>) -> ManagedApplication {
        ManagedApplication {
            name: name.to_string(),
            sync: sync.to_string(),
            health: health.to_string(),
            message: message.map(str::to_string),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stabilization_waits_full_duration() {
        let start = Instant::now();
        stabilization_wait(
            Duration::from_secs(95),
            Duration::from_secs(30),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(95));
    }

    #[tokio::test(start_paused = true)]
    async fn stabilization_is_cancellable() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(45)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let err = stabilization_wait(Duration::from_secs(600), Duration::from_secs(30), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(start.elapsed() < Duration::from_secs(600));
    }

    #[tokio::test]
    async fn zero_stabilization_returns_immediately() {
        stabilization_wait(Duration::ZERO, Duration::from_secs(30), &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn applications_converge() {
        let client = MockApiClient::new();
        client
            .push_applications(Ok(Vec::new()))
            .push_applications(Ok(vec![app("web", "OutOfSync", "Progressing", None)]))
            .push_applications(Ok(vec![app("web", "Synced", "Healthy", None)]));

        let apps = wait_for_applications(
            &client,
            "argocd",
            10,
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(client.application_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_pending_and_last_message() {
        let client = MockApiClient::new();
        client.push_applications(Ok(vec![
            app("api", "Synced", "Healthy", None),
            app(
                "web",
                "Synced",
                "Degraded",
                Some("failed to pull image: lookup ghcr.io: no such host"),
            ),
        ]));

        let err = wait_for_applications(
            &client,
            "argocd",
            3,
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        match err {
            Error::ApplicationsNotReady {
                pending,
                last_message,
                ..
            } => {
                assert_eq!(pending, vec!["web"]);
                assert!(last_message.unwrap().contains("no such host"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(client.application_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_api_error_ends_wait() {
        let client = MockApiClient::new();
        client.push_applications(Err(ApiError::from_status(403, "forbidden")));

        let err = wait_for_applications(
            &client,
            "argocd",
            10,
            Duration::from_secs(5),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Api(_)));
        assert_eq!(client.application_calls(), 1);
    }
}
