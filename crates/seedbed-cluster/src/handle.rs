//! Cluster handles and the per-process cluster registry.
//!
//! A [`ClusterHandle`] is only ever produced after both readiness tiers
//! passed. The [`ClusterRegistry`] remembers the lifecycle state of every
//! cluster this process touched and caches verified handles so repeated
//! lookups skip the API round-trips.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use seedbed_core::{ProviderKind, Result};

use crate::lifecycle::{validate_transition, ClusterState};

/// How the API client should treat the server certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TlsPolicy {
    /// Verify against the CA in the kubeconfig.
    #[default]
    Verify,
    /// `insecure-skip-tls-verify` is set for the cluster.
    SkipVerify,
    /// Plain HTTP.
    Plaintext,
}

/// Where the cluster API listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApiEndpoint {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Certificate handling.
    pub tls: TlsPolicy,
}

impl ApiEndpoint {
    /// Create an endpoint that verifies TLS.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: TlsPolicy::Verify,
        }
    }

    /// `host:port`, bracketing IPv6 literals.
    #[must_use]
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// A reference to a cluster whose API was reachable with a Ready node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterHandle {
    /// Cluster name.
    pub name: String,
    /// Provider that owns the cluster.
    pub provider: ProviderKind,
    /// Kubeconfig context for the cluster.
    pub context: String,
    /// Kubeconfig file holding the context.
    pub kubeconfig: PathBuf,
    /// API server endpoint.
    pub endpoint: ApiEndpoint,
    verified_at: Option<Instant>,
}

impl ClusterHandle {
    /// Build an unverified handle. Crate-private so verification cannot be skipped.
    pub(crate) fn candidate(
        name: impl Into<String>,
        provider: ProviderKind,
        kubeconfig: PathBuf,
        endpoint: ApiEndpoint,
    ) -> Self {
        let name = name.into();
        Self {
            context: provider.context_name(&name),
            name,
            provider,
            kubeconfig,
            endpoint,
            verified_at: None,
        }
    }

    /// A handle that claims to be verified, for tests outside this crate.
    #[cfg(any(test, feature = "test-utils"))]
    #[must_use]
    pub fn verified_for_tests(name: &str, provider: ProviderKind, endpoint: ApiEndpoint) -> Self {
        Self::candidate(
            name,
            provider,
            std::env::temp_dir().join(format!("{name}.kubeconfig")),
            endpoint,
        )
        .mark_verified()
    }

    pub(crate) fn mark_verified(mut self) -> Self {
        self.verified_at = Some(Instant::now());
        self
    }

    /// Returns true if the handle passed the readiness checks.
    ///
    /// Only dry-run plans carry unverified handles.
    #[must_use]
    pub const fn is_verified(&self) -> bool {
        self.verified_at.is_some()
    }

    /// Returns true if the handle was verified less than `ttl` ago.
    #[must_use]
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.verified_at.is_some_and(|at| at.elapsed() < ttl)
    }
}

#[derive(Debug, Default)]
struct Entry {
    state: ClusterState,
    provider: Option<ProviderKind>,
    handle: Option<ClusterHandle>,
}

/// Lifecycle state and verified handles for every cluster this process touched.
///
/// Handles are invalidated when the cluster leaves `Ready` and when their
/// verification is older than the caller's TTL.
#[derive(Debug, Default)]
pub struct ClusterRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl ClusterRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of a cluster. Unknown clusters are `Absent`.
    #[must_use]
    pub fn state(&self, cluster: &str) -> ClusterState {
        self.entries
            .read()
            .get(cluster)
            .map_or(ClusterState::Absent, |e| e.state)
    }

    /// Provider recorded for a cluster, if any.
    #[must_use]
    pub fn provider(&self, cluster: &str) -> Option<ProviderKind> {
        self.entries.read().get(cluster).and_then(|e| e.provider)
    }

    /// Record the provider that owns a cluster.
    pub fn set_provider(&self, cluster: &str, provider: ProviderKind) {
        self.entries
            .write()
            .entry(cluster.to_string())
            .or_default()
            .provider = Some(provider);
    }

    /// Move a cluster to a new state.
    ///
    /// Leaving `Ready` drops the cached handle. Reaching `Absent` forgets
    /// the cluster entirely.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidState` if the transition is not allowed.
    pub fn transition(&self, cluster: &str, to: ClusterState) -> Result<()> {
        let mut entries = self.entries.write();
        let from = entries.get(cluster).map_or(ClusterState::Absent, |e| e.state);
        validate_transition(cluster, from, to)?;

        debug!(cluster, %from, %to, "Cluster state transition");

        if to == ClusterState::Absent {
            entries.remove(cluster);
            return Ok(());
        }
        let entry = entries.entry(cluster.to_string()).or_default();
        entry.state = to;
        if to != ClusterState::Ready {
            entry.handle = None;
        }
        Ok(())
    }

    /// Cache a verified handle. The cluster must already be `Ready`.
    pub fn store_handle(&self, handle: ClusterHandle) {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&handle.name) {
            if entry.state == ClusterState::Ready && handle.is_verified() {
                entry.provider = Some(handle.provider);
                entry.handle = Some(handle);
            }
        }
    }

    /// A cached handle verified less than `ttl` ago.
    #[must_use]
    pub fn fresh_handle(&self, cluster: &str, ttl: Duration) -> Option<ClusterHandle> {
        self.entries
            .read()
            .get(cluster)
            .and_then(|e| e.handle.as_ref())
            .filter(|h| h.is_fresh(ttl))
            .cloned()
    }

    /// Drop the cached handle for a cluster.
    pub fn invalidate(&self, cluster: &str) {
        if let Some(entry) = self.entries.write().get_mut(cluster) {
            entry.handle = None;
        }
    }

    /// Names of all tracked clusters.
    #[must_use]
    pub fn clusters(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }
}
