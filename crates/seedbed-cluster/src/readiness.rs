//! Two-tier readiness verification.
//!
//! 1. **TCP**: the API endpoint accepts a connection. Bounded by
//!    [`ReadinessConfig::tcp_attempts`]; exhausting it is fatal.
//! 2. **API**: listing nodes succeeds and at least one node is Ready.
//!    Temporary API errors, zero nodes and zero Ready nodes are retried up
//!    to [`ReadinessConfig::api_attempts`]; any other API error aborts.
//!
//! Both loops check the cancellation token before every attempt.

use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use seedbed_core::{
    ensure_active, sleep_or_cancel, CancellationToken, Error, ReadinessTier, Result,
};

use crate::client::{ClusterApiClient, ClusterConnector};
use crate::handle::{ApiEndpoint, ClusterHandle};
use crate::types::ReadinessConfig;

/// Node counts observed by a successful API check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeReadiness {
    /// Nodes whose Ready condition is True.
    pub ready: u32,
    /// All nodes.
    pub total: u32,
}

/// Wait until the API endpoint accepts TCP connections.
///
/// # Errors
///
/// Returns `Error::ClusterNotReachable` with tier `tcp` once the attempts
/// are exhausted, or `Error::Cancelled`.
pub async fn wait_for_tcp(
    cluster: &str,
    endpoint: &ApiEndpoint,
    config: &ReadinessConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    let operation = "tcp readiness check";
    let addr = endpoint.authority();
    let mut last_error = String::from("no attempt made");

    for attempt in 1..=config.tcp_attempts {
        ensure_active(cancel, operation)?;

        let connect = TcpStream::connect((endpoint.host.as_str(), endpoint.port));
        match tokio::time::timeout(config.tcp_timeout, connect).await {
            Ok(Ok(_)) => {
                debug!(cluster, addr = %addr, attempt, "API endpoint accepts connections");
                return Ok(());
            }
            Ok(Err(e)) => last_error = e.to_string(),
            Err(_) => last_error = format!("connect timed out after {:?}", config.tcp_timeout),
        }

        debug!(cluster, addr = %addr, attempt, error = %last_error, "TCP check failed");
        if attempt < config.tcp_attempts {
            sleep_or_cancel(cancel, config.tcp_interval, operation).await?;
        }
    }

    Err(Error::ClusterNotReachable {
        cluster: cluster.to_string(),
        tier: ReadinessTier::Tcp,
        attempts: config.tcp_attempts,
        last_error: format!("{addr}: {last_error}"),
    })
}

/// Wait until the API lists at least one Ready node.
///
/// # Errors
///
/// Returns `Error::Api` for a non-temporary API error,
/// `Error::ClusterNotReachable` with tier `api` once the attempts are
/// exhausted, or `Error::Cancelled`.
pub async fn wait_for_ready_nodes(
    cluster: &str,
    client: &dyn ClusterApiClient,
    config: &ReadinessConfig,
    cancel: &CancellationToken,
) -> Result<NodeReadiness> {
    let operation = "node readiness check";
    let mut last_error = String::from("no attempt made");

    for attempt in 1..=config.api_attempts {
        ensure_active(cancel, operation)?;

        match client.list_nodes().await {
            Ok(nodes) => {
                let total = u32::try_from(nodes.len()).unwrap_or(u32::MAX);
                let ready = u32::try_from(nodes.iter().filter(|n| n.ready).count())
                    .unwrap_or(u32::MAX);
                if ready > 0 {
                    info!(cluster, ready, total, attempt, "Cluster has Ready nodes");
                    return Ok(NodeReadiness { ready, total });
                }
                last_error = if total == 0 {
                    "no nodes registered".to_string()
                } else {
                    format!("0/{total} nodes ready")
                };
                debug!(cluster, attempt, total, "No Ready nodes yet");
            }
            Err(e) if e.is_temporary() => {
                warn!(cluster, attempt, error = %e, "Temporary API error, retrying");
                last_error = e.to_string();
            }
            Err(e) => {
                warn!(cluster, attempt, error = %e, "API rejected node listing");
                return Err(Error::Api(e));
            }
        }

        if attempt < config.api_attempts {
            sleep_or_cancel(cancel, config.api_interval, operation).await?;
        }
    }

    Err(Error::ClusterNotReachable {
        cluster: cluster.to_string(),
        tier: ReadinessTier::Api,
        attempts: config.api_attempts,
        last_error,
    })
}

/// Run both tiers against `candidate` and return it marked as verified.
///
/// # Errors
///
/// Everything [`wait_for_tcp`] and [`wait_for_ready_nodes`] return, plus
/// `Error::Kubeconfig` if no API client can be built.
pub async fn verify_reachable(
    connector: &dyn ClusterConnector,
    candidate: ClusterHandle,
    config: &ReadinessConfig,
    cancel: &CancellationToken,
) -> Result<ClusterHandle> {
    let cluster = candidate.name.as_str();

    wait_for_tcp(cluster, &candidate.endpoint, config, cancel).await?;

    let client = connector.connect(&candidate).await?;
    let nodes = wait_for_ready_nodes(cluster, client.as_ref(), config, cancel).await?;

    info!(
        cluster,
        endpoint = %candidate.endpoint.authority(),
        ready = nodes.ready,
        total = nodes.total,
        "Cluster is reachable"
    );
    Ok(candidate.mark_verified())
}
