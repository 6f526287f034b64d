//! Error taxonomy shared by every seedbed crate.
//!
//! Failures fall into three categories:
//!
//! - **Configuration**: invalid input detected before any external call.
//! - **Execution**: something went wrong while talking to external tools or
//!   the cluster API.
//! - **Cancelled**: the run's cancellation token fired during a wait.
//!
//! Lower layers attach structure through [`OperationError`], which records the
//! component and operation that failed and whether retrying the operation is
//! meaningful. Text heuristics over third-party messages live in
//! [`crate::classify`], never here.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::types::{Component, Operation};

/// A result type using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur anywhere in a provisioning run.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid combination of run settings.
    #[error("configuration error: {0}")]
    Config(String),

    /// A cluster spec field failed validation.
    #[error("invalid cluster spec: {field} {reason}")]
    InvalidSpec {
        /// The offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// An external program could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An external program exited with a non-zero status.
    #[error("command `{command}` exited with code {exit_code}: {stderr}")]
    CommandFailed {
        /// Rendered command line.
        command: String,
        /// Process exit code (-1 when terminated by a signal).
        exit_code: i32,
        /// Trimmed standard error.
        stderr: String,
    },

    /// An external program ran past its timeout and was killed.
    #[error("command `{command}` timed out after {after:?}")]
    CommandTimedOut {
        /// Rendered command line.
        command: String,
        /// The configured timeout.
        after: Duration,
    },

    /// The cluster API returned an error.
    #[error("cluster API error: {0}")]
    Api(#[from] ApiError),

    /// The named cluster does not exist.
    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    /// A cluster lifecycle transition is not allowed from the current state.
    #[error("invalid state transition for cluster {cluster}: cannot transition from {from} to {to}")]
    InvalidState {
        /// Cluster name.
        cluster: String,
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },

    /// The cluster never became usable within the readiness budget.
    #[error("cluster {cluster} not reachable ({tier} check failed after {attempts} attempts): {last_error}")]
    ClusterNotReachable {
        /// Cluster name.
        cluster: String,
        /// Which readiness tier gave up.
        tier: ReadinessTier,
        /// Attempts made at that tier.
        attempts: u32,
        /// Last observed failure, for diagnostics.
        last_error: String,
    },

    /// The requested branch or ref does not exist in the bundle repository.
    #[error("branch or ref '{reference}' not found in {repository}")]
    BranchNotFound {
        /// Repository URL.
        repository: String,
        /// The missing branch or ref.
        reference: String,
    },

    /// Managed applications did not converge in time.
    #[error("applications in namespace {namespace} not ready: {}{}", .pending.join(", "), .last_message.as_deref().map(|m| format!(" (last message: {m})")).unwrap_or_default())]
    ApplicationsNotReady {
        /// Namespace that was watched.
        namespace: String,
        /// Applications that were not synced and healthy at the last poll.
        pending: Vec<String>,
        /// Most recent status or condition message reported by a pending application.
        last_message: Option<String>,
    },

    /// A wait loop was interrupted by the run's cancellation token.
    #[error("{operation} cancelled")]
    Cancelled {
        /// The wait that was interrupted.
        operation: String,
    },

    /// Kubeconfig could not be read or interpreted.
    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    /// Local I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A failure wrapped with component and operation context.
    #[error(transparent)]
    Operation(#[from] OperationError),
}

/// Broad failure category, used for reporting and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Rejected before any side effect.
    Configuration,
    /// Failed while doing work.
    Execution,
    /// Interrupted deliberately.
    Cancelled,
}

impl Error {
    /// Build an `InvalidSpec` error.
    #[must_use]
    pub fn invalid_spec(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            field,
            reason: reason.into(),
        }
    }

    /// Build a `Cancelled` error for the named wait.
    #[must_use]
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Wrap this error with component and operation context.
    #[must_use]
    pub fn wrap(self, component: Component, operation: Operation) -> OperationError {
        OperationError::new(component, operation, self)
    }

    /// The broad category of this error, looking through wrappers.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) | Self::InvalidSpec { .. } => ErrorCategory::Configuration,
            Self::Cancelled { .. } => ErrorCategory::Cancelled,
            Self::Operation(op) => op.source.category(),
            _ => ErrorCategory::Execution,
        }
    }

    /// Returns true if this failure was a deliberate cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.category() == ErrorCategory::Cancelled
    }

    /// Returns true if retrying the failed operation is meaningful.
    ///
    /// An explicit flag on an [`OperationError`] always wins over whatever the
    /// wrapped error would report on its own.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Operation(op) => op.recoverable,
            Self::Api(e) => e.is_temporary(),
            Self::CommandTimedOut { .. } => true,
            _ => false,
        }
    }

    /// The innermost structured context attached to this error, if any.
    #[must_use]
    pub fn operation_context(&self) -> Option<&OperationError> {
        match self {
            Self::Operation(op) => Some(op.source.operation_context().unwrap_or(op)),
            _ => None,
        }
    }
}

/// A failure annotated with where it happened.
#[derive(Debug, Error)]
#[error("{component} {operation} failed{}: {source}", .cluster.as_deref().map(|c| format!(" on cluster {c}")).unwrap_or_default())]
pub struct OperationError {
    /// Component that failed.
    pub component: Component,
    /// What the component was doing.
    pub operation: Operation,
    /// Cluster the operation targeted, when known.
    pub cluster: Option<String>,
    /// Whether repeating the same operation may succeed.
    pub recoverable: bool,
    /// The underlying failure.
    #[source]
    pub source: Box<Error>,
}

impl OperationError {
    /// Wrap an error with context. Not recoverable unless marked otherwise.
    #[must_use]
    pub fn new(component: Component, operation: Operation, source: Error) -> Self {
        Self {
            component,
            operation,
            cluster: None,
            recoverable: false,
            source: Box::new(source),
        }
    }

    /// Attach the target cluster name.
    #[must_use]
    pub fn on_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    /// Set the recoverable flag explicitly.
    #[must_use]
    pub const fn recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }
}

/// The readiness tier that gave up in [`Error::ClusterNotReachable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadinessTier {
    /// Raw TCP connection to the API endpoint.
    Tcp,
    /// Node listing through the cluster API.
    Api,
}

impl fmt::Display for ReadinessTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Api => write!(f, "api"),
        }
    }
}

/// Kind of failure reported by a cluster API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    /// Connection refused, reset, DNS failure and other transport problems.
    Transport,
    /// The request did not complete in time.
    Timeout,
    /// The server answered with a "try again later" status (429, 5xx).
    Unavailable,
    /// The server rejected the request; retrying will not help.
    Rejected,
}

/// An error from the cluster API, already sorted into temporary or not.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ApiError {
    /// Failure kind.
    pub kind: ApiErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl ApiError {
    /// Create a new API error.
    #[must_use]
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Map an HTTP status from the API server to an error.
    #[must_use]
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        let kind = match code {
            408 | 504 => ApiErrorKind::Timeout,
            429 | 500 | 502 | 503 => ApiErrorKind::Unavailable,
            _ => ApiErrorKind::Rejected,
        };
        Self::new(kind, message)
    }

    /// Returns true if the readiness loop should keep polling after this error.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(
            self.kind,
            ApiErrorKind::Transport | ApiErrorKind::Timeout | ApiErrorKind::Unavailable
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories() {
        assert_eq!(
            Error::Config("x".into()).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            Error::invalid_spec("name", "must not be empty").category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            Error::cancelled("stabilization wait").category(),
            ErrorCategory::Cancelled
        );
        assert_eq!(
            Error::ClusterNotFound("demo".into()).category(),
            ErrorCategory::Execution
        );
    }

    #[test]
    fn category_looks_through_wrappers() {
        let err: Error = Error::cancelled("application wait")
            .wrap(Component::ManagedApplications, Operation::Waiting)
            .into();
        assert!(err.is_cancelled());
    }

    #[test]
    fn explicit_flag_overrides_inner_recoverability() {
        let inner = Error::Api(ApiError::new(ApiErrorKind::Transport, "connection refused"));
        assert!(inner.is_recoverable());

        let wrapped: Error = inner
            .wrap(Component::ManagedApplications, Operation::Waiting)
            .recoverable(false)
            .into();
        assert!(!wrapped.is_recoverable());
    }

    #[test]
    fn api_status_mapping() {
        assert!(ApiError::from_status(503, "unavailable").is_temporary());
        assert!(ApiError::from_status(429, "slow down").is_temporary());
        assert!(ApiError::from_status(504, "gateway timeout").is_temporary());
        assert!(!ApiError::from_status(403, "forbidden").is_temporary());
        assert!(!ApiError::from_status(404, "not found").is_temporary());
    }

    #[test]
    fn operation_error_display_includes_context() {
        let err = Error::CommandFailed {
            command: "helm upgrade --install argocd".into(),
            exit_code: 1,
            stderr: "boom".into(),
        }
        .wrap(Component::ControlPlane, Operation::Installation)
        .on_cluster("demo");

        let text = err.to_string();
        assert!(text.contains("control-plane installation failed on cluster demo"));
        assert!(text.contains("boom"));
    }

    #[test]
    fn innermost_context_is_reported() {
        let inner: Error = Error::Io(std::io::Error::other("disk"))
            .wrap(Component::ApplicationBundle, Operation::Installation)
            .into();
        let outer: Error = inner.wrap(Component::Orchestrator, Operation::Rollout).into();

        let ctx = outer.operation_context().unwrap();
        assert_eq!(ctx.component, Component::ApplicationBundle);
    }
}
