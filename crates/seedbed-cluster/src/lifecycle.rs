//! Cluster lifecycle state machine.
//!
//! ```text
//!   Absent ──create──▶ Creating ──▶ VerifyingReachability ──▶ Ready
//!     │                   │                  │                  │
//!     │                   └─────▶ Failed ◀───┘                  │
//!     │                             │                           │
//!     └─────────────────────────▶ Deleting ◀────────────────────┘
//!                                   │
//!                                   ▼
//!                                 Absent
//! ```
//!
//! There is no stopped state. Starting an existing cluster degrades to a
//! reachability check (`Ready → VerifyingReachability`).

use std::fmt;

use serde::{Deserialize, Serialize};

use seedbed_core::{Error, Result};

/// Where a cluster is in its lifecycle, as seen by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterState {
    /// Not known to exist.
    #[default]
    Absent,
    /// The provider's create command is running.
    Creating,
    /// TCP and API checks are running.
    VerifyingReachability,
    /// Both readiness tiers passed.
    Ready,
    /// Creation or verification failed. Nothing is rolled back.
    Failed,
    /// The provider's delete command is running.
    Deleting,
}

impl ClusterState {
    /// Stable kebab-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Creating => "creating",
            Self::VerifyingReachability => "verifying-reachability",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Deleting => "deleting",
        }
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validates a state transition and returns the target state if valid.
///
/// # Errors
///
/// Returns `Error::InvalidState` if the transition is not allowed.
pub fn validate_transition(cluster: &str, from: ClusterState, to: ClusterState) -> Result<ClusterState> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(Error::InvalidState {
            cluster: cluster.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

/// Check if a state transition is valid according to the state machine.
#[must_use]
pub const fn is_valid_transition(from: ClusterState, to: ClusterState) -> bool {
    use ClusterState::{Absent, Creating, Deleting, Failed, Ready, VerifyingReachability};

    matches!(
        (from, to),
        // Create from scratch or retry after a failure
        (Absent | Failed, Creating)
            | (Creating, VerifyingReachability | Failed)
            | (VerifyingReachability, Ready | Failed)
            // Adopting an existing cluster, or re-checking a known one
            | (Absent | Ready | Failed, VerifyingReachability)
            | (Ready | Failed | Absent, Deleting)
            | (Deleting, Absent | Failed)
    )
}

/// Returns the list of valid target states from the given state.
#[must_use]
pub fn valid_transitions_from(state: ClusterState) -> Vec<ClusterState> {
    use ClusterState::{Absent, Creating, Deleting, Failed, Ready, VerifyingReachability};

    match state {
        Absent => vec![Creating, VerifyingReachability, Deleting],
        Creating => vec![VerifyingReachability, Failed],
        VerifyingReachability => vec![Ready, Failed],
        Ready => vec![VerifyingReachability, Deleting],
        Failed => vec![Creating, VerifyingReachability, Deleting],
        Deleting => vec![Absent, Failed],
    }
}

/// Returns true while a provider command or readiness check is in flight.
#[must_use]
pub const fn is_busy(state: ClusterState) -> bool {
    matches!(
        state,
        ClusterState::Creating | ClusterState::VerifyingReachability | ClusterState::Deleting
    )
}
