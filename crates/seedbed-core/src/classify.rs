//! Failure classification.
//!
//! This is the only module that looks at the text of third-party error
//! messages. Everything else works on the structured [`Error`] variants.
//! Patterns are deliberately narrow: an unrecognized message is always
//! treated as fatal.

use serde::Serialize;

use crate::error::{Error, ErrorCategory};
use crate::types::{Component, Operation};

/// How a failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Disposition {
    /// Abort and surface the error.
    Fatal,
    /// Retrying the same operation may succeed.
    Recoverable,
    /// A known infrastructure flake that a soft-fail policy may downgrade.
    SoftFailable,
}

/// A recognized failure shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureShape {
    /// The container runtime could not resolve an image registry host.
    RegistryDns,
    /// Pods did not start before a readiness timeout.
    PodStartTimeout,
    /// A lower layer marked the failure as recoverable.
    MarkedRecoverable,
}

impl FailureShape {
    /// Short human description of the likely root cause.
    #[must_use]
    pub const fn likely_cause(&self) -> &'static str {
        match self {
            Self::RegistryDns => {
                "the container runtime could not resolve an image registry hostname"
            }
            Self::PodStartTimeout => {
                "pods did not start in time, usually because images could not be pulled"
            }
            Self::MarkedRecoverable => "a transient failure reported by the installer",
        }
    }
}

/// The result of classifying an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorClassification {
    /// What to do with the failure.
    pub disposition: Disposition,
    /// The recognized shape, if any.
    pub shape: Option<FailureShape>,
    /// Component the failure is attributed to.
    pub component: Option<Component>,
    /// Operation that failed.
    pub operation: Option<Operation>,
    /// Cluster the failure happened on.
    pub cluster: Option<String>,
    /// Suggested diagnostic or remediation steps.
    pub remediation: Vec<String>,
}

/// Classify an error into a [`Disposition`] with context.
#[must_use]
pub fn classify(err: &Error) -> ErrorClassification {
    let ctx = err.operation_context();
    let component = ctx.map(|c| c.component);
    let operation = ctx.map(|c| c.operation);
    let cluster = ctx.and_then(|c| c.cluster.clone()).or_else(|| match err {
        Error::ClusterNotReachable { cluster, .. } => Some(cluster.clone()),
        _ => None,
    });

    let shape = recognized_shape(err);
    let disposition = if err.category() != ErrorCategory::Execution {
        Disposition::Fatal
    } else {
        match shape {
            Some(FailureShape::RegistryDns | FailureShape::PodStartTimeout) => {
                Disposition::SoftFailable
            }
            Some(FailureShape::MarkedRecoverable) => Disposition::Recoverable,
            None if err.is_recoverable() => Disposition::Recoverable,
            None => Disposition::Fatal,
        }
    };

    ErrorClassification {
        disposition,
        shape,
        component,
        operation,
        remediation: remediation_for(component, shape, cluster.as_deref()),
        cluster,
    }
}

/// Match an error against the shapes a soft-fail policy may act on.
///
/// Cancellation and configuration errors never match.
#[must_use]
pub fn recognized_shape(err: &Error) -> Option<FailureShape> {
    if err.category() != ErrorCategory::Execution {
        return None;
    }
    let text = chain_text(err);
    if is_registry_dns_failure(&text) {
        Some(FailureShape::RegistryDns)
    } else if is_pod_start_timeout(&text) {
        Some(FailureShape::PodStartTimeout)
    } else if err.operation_context().is_some() && err.is_recoverable() {
        Some(FailureShape::MarkedRecoverable)
    } else {
        None
    }
}

/// Render an error and all of its sources as one line.
#[must_use]
pub fn chain_text(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        let part = s.to_string();
        if !text.contains(&part) {
            text.push_str(": ");
            text.push_str(&part);
        }
        source = s.source();
    }
    text
}

/// DNS resolution failure while talking to an image registry.
#[must_use]
pub fn is_registry_dns_failure(text: &str) -> bool {
    let t = text.to_lowercase();
    let dns = t.contains("no such host")
        || t.contains("server misbehaving")
        || t.contains("temporary failure in name resolution")
        || (t.contains("lookup ") && t.contains("i/o timeout"));
    let registry = t.contains("registry")
        || t.contains("pull")
        || t.contains("image")
        || t.contains("docker.io")
        || t.contains("ghcr.io")
        || t.contains("quay.io");
    dns && registry
}

/// Readiness timeout while waiting for pods to come up.
#[must_use]
pub fn is_pod_start_timeout(text: &str) -> bool {
    let t = text.to_lowercase();
    t.contains("timed out waiting for pods")
        || (t.contains("timed out waiting for the condition")
            && (t.contains("imagepullbackoff") || t.contains("errimagepull")))
}

/// `git clone --branch` output for a branch or ref that does not exist.
#[must_use]
pub fn is_missing_ref(stderr: &str) -> bool {
    let t = stderr.to_lowercase();
    (t.contains("remote branch") && t.contains("not found"))
        || t.contains("couldn't find remote ref")
        || t.contains("did not match any file(s) known to git")
}

/// Network-level failure text from a client that does not expose structured errors.
#[must_use]
pub fn is_transient_network_text(text: &str) -> bool {
    let t = text.to_lowercase();
    [
        "connection refused",
        "connection reset",
        "i/o timeout",
        "no such host",
        "timed out",
        "service unavailable",
        "tls handshake timeout",
    ]
    .iter()
    .any(|p| t.contains(p))
}

/// Provider output for deleting or querying a cluster that does not exist.
#[must_use]
pub fn is_cluster_absent(stderr: &str) -> bool {
    let t = stderr.to_lowercase();
    t.contains("no such cluster")
        || t.contains("not found")
        || t.contains("no nodes found")
        || t.contains("does not exist")
}

fn remediation_for(
    component: Option<Component>,
    shape: Option<FailureShape>,
    cluster: Option<&str>,
) -> Vec<String> {
    let mut steps = Vec::new();
    match shape {
        Some(FailureShape::RegistryDns) => {
            steps.push("Check DNS resolution from the container runtime, e.g. `docker run --rm busybox nslookup registry-1.docker.io`".to_string());
        }
        Some(FailureShape::PodStartTimeout) => {
            steps.push("kubectl get pods -A --field-selector=status.phase!=Running".to_string());
            steps.push("kubectl get events -A --sort-by=.lastTimestamp".to_string());
        }
        _ => {}
    }
    match component {
        Some(Component::Cluster) | None => {
            if let Some(name) = cluster {
                steps.push(format!("docker ps --filter name={name}"));
            }
        }
        Some(Component::ControlPlane) => {
            steps.push("helm status argocd -n argocd".to_string());
            steps.push("kubectl get pods -n argocd".to_string());
        }
        Some(Component::ApplicationBundle | Component::ManagedApplications) => {
            steps.push("kubectl get applications.argoproj.io -A".to_string());
        }
        Some(Component::Orchestrator) => {}
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, ApiErrorKind};

    fn dns_error() -> Error {
        Error::ApplicationsNotReady {
            namespace: "argocd".into(),
            pending: vec!["web".into()],
            last_message: Some(
                "failed to pull image \"ghcr.io/acme/web:1.0\": dial tcp: lookup ghcr.io on 10.0.0.1:53: no such host".into(),
            ),
        }
    }

    #[test]
    fn registry_dns_detection() {
        assert!(is_registry_dns_failure(
            "Failed to pull image: dial tcp: lookup registry-1.docker.io: no such host"
        ));
        assert!(is_registry_dns_failure(
            "pull access: lookup quay.io on 127.0.0.11:53: server misbehaving"
        ));
        // DNS failure unrelated to a registry
        assert!(!is_registry_dns_failure("lookup api.internal: no such host"));
        // Registry failure unrelated to DNS
        assert!(!is_registry_dns_failure("image pull unauthorized"));
    }

    #[test]
    fn pod_timeout_detection() {
        assert!(is_pod_start_timeout("Error: timed out waiting for pods to be ready"));
        assert!(is_pod_start_timeout(
            "timed out waiting for the condition (ErrImagePull)"
        ));
        assert!(!is_pod_start_timeout("timed out waiting for the condition"));
    }

    #[test]
    fn missing_ref_detection() {
        assert!(is_missing_ref(
            "warning: Could not find remote branch nope to clone.\nfatal: Remote branch nope not found in upstream origin"
        ));
        assert!(is_missing_ref("fatal: couldn't find remote ref refs/heads/nope"));
        assert!(!is_missing_ref("fatal: repository not found"));
    }

    #[test]
    fn classifies_wrapped_dns_failure_as_soft_failable() {
        let err: Error = dns_error()
            .wrap(Component::ManagedApplications, Operation::Waiting)
            .on_cluster("demo")
            .into();

        let c = classify(&err);
        assert_eq!(c.disposition, Disposition::SoftFailable);
        assert_eq!(c.shape, Some(FailureShape::RegistryDns));
        assert_eq!(c.component, Some(Component::ManagedApplications));
        assert_eq!(c.cluster.as_deref(), Some("demo"));
        assert!(!c.remediation.is_empty());
    }

    #[test]
    fn unknown_failures_are_fatal() {
        let err: Error = Error::CommandFailed {
            command: "helm upgrade --install argocd".into(),
            exit_code: 1,
            stderr: "Error: chart not found".into(),
        }
        .wrap(Component::ControlPlane, Operation::Installation)
        .into();

        let c = classify(&err);
        assert_eq!(c.disposition, Disposition::Fatal);
        assert_eq!(c.shape, None);
    }

    #[test]
    fn marked_recoverable_is_recoverable() {
        let err: Error = Error::CommandFailed {
            command: "helm".into(),
            exit_code: 1,
            stderr: "etcdserver: leader changed".into(),
        }
        .wrap(Component::ApplicationBundle, Operation::Installation)
        .recoverable(true)
        .into();

        let c = classify(&err);
        assert_eq!(c.disposition, Disposition::Recoverable);
        assert_eq!(c.shape, Some(FailureShape::MarkedRecoverable));
    }

    #[test]
    fn temporary_api_error_is_recoverable() {
        let err = Error::Api(ApiError::new(ApiErrorKind::Transport, "connection refused"));
        assert_eq!(classify(&err).disposition, Disposition::Recoverable);
    }

    #[test]
    fn cancellation_is_never_soft_failable() {
        let err: Error = Error::cancelled("waiting for pods")
            .wrap(Component::ManagedApplications, Operation::Waiting)
            .into();
        assert_eq!(recognized_shape(&err), None);
        assert_eq!(classify(&err).disposition, Disposition::Fatal);
    }

    #[test]
    fn chain_text_walks_sources() {
        let err: Error = dns_error()
            .wrap(Component::ManagedApplications, Operation::Waiting)
            .into();
        let text = chain_text(&err);
        assert!(text.contains("managed-applications waiting failed"));
        assert!(text.contains("no such host"));
    }
}
