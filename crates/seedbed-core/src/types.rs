//! Plain data types shared across the provisioning pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Node image tag used when a spec does not pin one.
pub const DEFAULT_NODE_TAG: &str = "v1.31.2";

/// Cluster tooling used to create the ephemeral cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Kubernetes-in-Docker.
    #[default]
    Kind,
    /// k3s-in-Docker.
    K3d,
}

impl ProviderKind {
    /// Name of the external program that drives this provider.
    #[must_use]
    pub const fn program(&self) -> &'static str {
        match self {
            Self::Kind => "kind",
            Self::K3d => "k3d",
        }
    }

    /// Kubeconfig context name the provider assigns to a cluster.
    #[must_use]
    pub fn context_name(&self, cluster: &str) -> String {
        format!("{}-{cluster}", self.program())
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "kind" => Ok(Self::Kind),
            "k3d" | "k3s" => Ok(Self::K3d),
            other => Err(Error::invalid_spec(
                "provider",
                format!("'{other}' is not a recognized provider (expected kind or k3d)"),
            )),
        }
    }
}

/// Desired shape of a cluster. Immutable once handed to the provisioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    /// Cluster name, unique within the local container runtime.
    pub name: String,
    /// Total node count including the control-plane node.
    pub nodes: u32,
    /// Node image tag. Falls back to [`DEFAULT_NODE_TAG`].
    #[serde(default)]
    pub version: Option<String>,
    /// Provider used to create the cluster.
    #[serde(default)]
    pub provider: ProviderKind,
}

impl ClusterSpec {
    /// Create a spec with the given name and node count on the default provider.
    #[must_use]
    pub fn new(name: impl Into<String>, nodes: u32) -> Self {
        Self {
            name: name.into(),
            nodes,
            version: None,
            provider: ProviderKind::default(),
        }
    }

    /// Use a different provider.
    #[must_use]
    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = provider;
        self
    }

    /// Pin the node image tag.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// The node image tag, defaulted.
    #[must_use]
    pub fn version_or_default(&self) -> &str {
        self.version.as_deref().unwrap_or(DEFAULT_NODE_TAG)
    }

    /// Check the spec before anything is executed.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidSpec` for an empty or malformed name, a zero node
    /// count, or an empty version tag.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_spec("name", "must not be empty"));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
            || self.name.starts_with('-')
        {
            return Err(Error::invalid_spec(
                "name",
                format!(
                    "'{}' must consist of lowercase letters, digits and '-'",
                    self.name
                ),
            ));
        }
        if self.nodes == 0 {
            return Err(Error::invalid_spec("nodes", "must be at least 1"));
        }
        if self.version.as_deref().is_some_and(|v| v.trim().is_empty()) {
            return Err(Error::invalid_spec("version", "must not be blank when set"));
        }
        Ok(())
    }
}

/// Summary of a cluster as reported by list and status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    /// Cluster name.
    pub name: String,
    /// Provider that owns the cluster.
    pub provider: ProviderKind,
    /// `"<ready>/<total>"`, or `"Unknown"` when the API could not be queried.
    pub status: String,
    /// Number of nodes seen through the API (0 when unknown).
    pub node_count: u32,
}

/// Status string used when the cluster API cannot be queried.
pub const STATUS_UNKNOWN: &str = "Unknown";

/// Release status of an installed component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    /// Release name.
    pub name: String,
    /// Namespace the release lives in.
    pub namespace: String,
    /// Release status, e.g. `deployed` or `failed`.
    pub status: String,
    /// Chart version, or the release revision when the chart version is unavailable.
    pub version: String,
}

/// Where the declarative application bundle comes from and how to install it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationBundleSpec {
    /// Git repository URL.
    pub repository: String,
    /// Branch, tag or ref to check out.
    pub reference: String,
    /// Chart path inside the repository.
    pub path: String,
    /// Namespace the bundle and its applications are installed into.
    pub namespace: String,
    /// Timeout for the install command.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Values overrides passed as `--set key=value`.
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

impl ApplicationBundleSpec {
    /// Create a bundle spec with a 10 minute install timeout and no overrides.
    #[must_use]
    pub fn new(
        repository: impl Into<String>,
        reference: impl Into<String>,
        path: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            repository: repository.into(),
            reference: reference.into(),
            path: path.into(),
            namespace: namespace.into(),
            timeout: Duration::from_secs(600),
            values: BTreeMap::new(),
        }
    }

    /// Add a values override.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Run-wide behaviour switches supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunMode {
    /// Recreate or reinstall even when the target already exists.
    pub force: bool,
    /// Print commands instead of executing them.
    pub dry_run: bool,
    /// Echo every external command.
    pub verbose: bool,
    /// No human at the terminal (CI).
    pub non_interactive: bool,
}

impl RunMode {
    /// Interactive run with all other switches off.
    #[must_use]
    pub const fn interactive() -> Self {
        Self {
            force: false,
            dry_run: false,
            verbose: false,
            non_interactive: false,
        }
    }

    /// Non-interactive (CI) run with all other switches off.
    #[must_use]
    pub const fn ci() -> Self {
        Self {
            force: false,
            dry_run: false,
            verbose: false,
            non_interactive: true,
        }
    }
}

/// Deployment flavour. Only selects templated values for the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentMode {
    /// Everything runs inside the ephemeral cluster.
    Standalone,
    /// Shared backing services outside the cluster.
    Shared,
    /// Hosted control services.
    Managed,
}

impl DeploymentMode {
    /// Stable name used in values overrides.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::Shared => "shared",
            Self::Managed => "managed",
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "standalone" => Ok(Self::Standalone),
            "shared" => Ok(Self::Shared),
            "managed" => Ok(Self::Managed),
            other => Err(Error::Config(format!(
                "unknown deployment mode '{other}' (expected standalone, shared or managed)"
            ))),
        }
    }
}

/// The part of the system an [`crate::OperationError`] is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Component {
    /// The ephemeral cluster itself.
    Cluster,
    /// The GitOps controller installed first.
    ControlPlane,
    /// The repository-sourced application bundle.
    ApplicationBundle,
    /// Applications created by the bundle.
    ManagedApplications,
    /// Top-level sequencing.
    Orchestrator,
}

impl Component {
    /// Stable kebab-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cluster => "cluster",
            Self::ControlPlane => "control-plane",
            Self::ApplicationBundle => "application-bundle",
            Self::ManagedApplications => "managed-applications",
            Self::Orchestrator => "orchestrator",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a component was doing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    /// Creating a cluster.
    Provisioning,
    /// Installing a release.
    Installation,
    /// Waiting for convergence.
    Waiting,
    /// Deleting a cluster.
    Deletion,
    /// The overall rollout.
    Rollout,
}

impl Operation {
    /// Stable kebab-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Installation => "installation",
            Self::Waiting => "waiting",
            Self::Deletion => "deletion",
            Self::Rollout => "rollout",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_validation() {
        assert!(ClusterSpec::new("demo", 1).validate().is_ok());
        assert!(ClusterSpec::new("demo-2", 3).validate().is_ok());

        assert!(matches!(
            ClusterSpec::new("", 1).validate(),
            Err(Error::InvalidSpec { field: "name", .. })
        ));
        assert!(matches!(
            ClusterSpec::new("Demo_Cluster", 1).validate(),
            Err(Error::InvalidSpec { field: "name", .. })
        ));
        assert!(matches!(
            ClusterSpec::new("demo", 0).validate(),
            Err(Error::InvalidSpec { field: "nodes", .. })
        ));
        assert!(matches!(
            ClusterSpec::new("demo", 1).with_version(" ").validate(),
            Err(Error::InvalidSpec { field: "version", .. })
        ));
    }

    #[test]
    fn version_defaults() {
        let spec = ClusterSpec::new("demo", 1);
        assert_eq!(spec.version_or_default(), DEFAULT_NODE_TAG);
        assert_eq!(spec.with_version("v1.30.0").version_or_default(), "v1.30.0");
    }

    #[test]
    fn provider_parsing() {
        assert_eq!("kind".parse::<ProviderKind>().unwrap(), ProviderKind::Kind);
        assert_eq!("K3D".parse::<ProviderKind>().unwrap(), ProviderKind::K3d);
        assert!("minikube".parse::<ProviderKind>().is_err());
        assert_eq!(ProviderKind::Kind.context_name("demo"), "kind-demo");
        assert_eq!(ProviderKind::K3d.context_name("demo"), "k3d-demo");
    }

    #[test]
    fn deployment_mode_parsing() {
        assert_eq!(
            "Shared".parse::<DeploymentMode>().unwrap(),
            DeploymentMode::Shared
        );
        assert!(matches!(
            "hybrid".parse::<DeploymentMode>(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn bundle_spec_serde() {
        let spec = ApplicationBundleSpec::new(
            "https://github.com/example/apps.git",
            "main",
            "charts/app-of-apps",
            "argocd",
        )
        .with_value("global.domain", "localhost");

        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["timeout"], 600);
        let back: ApplicationBundleSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn component_names() {
        assert_eq!(Component::ControlPlane.to_string(), "control-plane");
        assert_eq!(
            Component::ManagedApplications.to_string(),
            "managed-applications"
        );
        assert_eq!(Operation::Waiting.to_string(), "waiting");
    }
}
