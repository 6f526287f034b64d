//! Request, outcome and configuration types for orchestration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use seedbed_cluster::ProvisionerConfig;
use seedbed_core::{
    ApplicationBundleSpec, ClusterSpec, DeploymentMode, Error, ProviderKind, Result, RunMode,
};
use seedbed_install::{InstallReport, InstallerConfig};

use crate::guidance::Guidance;

/// Which cluster a run targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterTarget {
    /// Create the cluster, or reuse it if it already exists.
    Create(ClusterSpec),
    /// Use a cluster that must already exist.
    Existing(String),
}

impl ClusterTarget {
    /// Name of the targeted cluster.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Create(spec) => &spec.name,
            Self::Existing(name) => name,
        }
    }
}

/// Everything one provisioning run needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallationRequest {
    /// Cluster to create or reuse.
    pub target: ClusterTarget,
    /// Application bundle. Without one only the control plane is installed.
    pub bundle: Option<ApplicationBundleSpec>,
    /// Run-wide switches.
    pub run_mode: RunMode,
    /// Deployment flavour. Required for non-interactive runs.
    pub deployment_mode: Option<DeploymentMode>,
}

impl InstallationRequest {
    /// Request that creates the cluster described by `spec`.
    #[must_use]
    pub fn create(spec: ClusterSpec) -> Self {
        Self {
            target: ClusterTarget::Create(spec),
            bundle: None,
            run_mode: RunMode::interactive(),
            deployment_mode: None,
        }
    }

    /// Request that targets an existing cluster.
    #[must_use]
    pub fn existing(name: impl Into<String>) -> Self {
        Self {
            target: ClusterTarget::Existing(name.into()),
            bundle: None,
            run_mode: RunMode::interactive(),
            deployment_mode: None,
        }
    }

    /// Set the application bundle.
    #[must_use]
    pub fn with_bundle(mut self, bundle: ApplicationBundleSpec) -> Self {
        self.bundle = Some(bundle);
        self
    }

    /// Set the run mode.
    #[must_use]
    pub const fn with_run_mode(mut self, run_mode: RunMode) -> Self {
        self.run_mode = run_mode;
        self
    }

    /// Set the deployment mode.
    #[must_use]
    pub const fn with_deployment_mode(mut self, mode: DeploymentMode) -> Self {
        self.deployment_mode = Some(mode);
        self
    }

    /// Check the request before any external command runs.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when a non-interactive run has no deployment
    /// mode or an existing-cluster name is empty, and `Error::InvalidSpec`
    /// for an invalid cluster spec.
    pub fn validate(&self) -> Result<()> {
        if self.run_mode.non_interactive && self.deployment_mode.is_none() {
            return Err(Error::Config(
                "non-interactive runs require a deployment mode".into(),
            ));
        }
        match &self.target {
            ClusterTarget::Create(spec) => spec.validate(),
            ClusterTarget::Existing(name) if name.trim().is_empty() => {
                Err(Error::Config("existing cluster name must not be empty".into()))
            }
            ClusterTarget::Existing(_) => Ok(()),
        }
    }
}

/// Summary of a run that reached the end of the rollout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Correlates the run's log lines.
    pub run_id: Uuid,
    /// Cluster the rollout targeted.
    pub cluster: String,
    /// Whether this run created the cluster.
    pub created: bool,
    /// What the installer did.
    pub install: InstallReport,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

/// The result of a run.
#[derive(Debug)]
pub enum Outcome {
    /// Everything converged.
    Success(RunSummary),
    /// The install hit a known infrastructure flake and the policy
    /// downgraded it to a warning.
    SoftFailed {
        /// Cluster the rollout targeted.
        cluster: String,
        /// The error text.
        reason: String,
        /// What to check and how to retry.
        guidance: Guidance,
    },
    /// The run failed.
    Fatal(Error),
}

impl Outcome {
    /// Process exit code for this outcome.
    ///
    /// Soft-failed runs exit 0; cancelled runs exit 130.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Success(_) | Self::SoftFailed { .. } => 0,
            Self::Fatal(e) if e.is_cancelled() => 130,
            Self::Fatal(_) => 1,
        }
    }

    /// Returns true for [`Outcome::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns true for [`Outcome::SoftFailed`].
    #[must_use]
    pub const fn is_soft_failed(&self) -> bool {
        matches!(self, Self::SoftFailed { .. })
    }

    /// The error of a fatal outcome.
    #[must_use]
    pub const fn error(&self) -> Option<&Error> {
        match self {
            Self::Fatal(e) => Some(e),
            _ => None,
        }
    }
}

/// Configuration for the orchestration service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Cluster name used when the caller gives none.
    pub default_cluster_name: String,
    /// Node count used when the caller gives none.
    pub default_nodes: u32,
    /// Provider used when the caller gives none.
    pub default_provider: ProviderKind,
    /// Delete a cluster this run was creating when provisioning fails.
    pub delete_on_provision_failure: bool,
    /// Cluster provisioner settings.
    pub provisioner: ProvisionerConfig,
    /// Installer settings.
    pub installer: InstallerConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_cluster_name: "seedbed".to_string(),
            default_nodes: 3,
            default_provider: ProviderKind::default(),
            delete_on_provision_failure: false,
            provisioner: ProvisionerConfig::default(),
            installer: InstallerConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Create config from environment variables, falling back to defaults.
    ///
    /// # Environment Variables
    ///
    /// - `SEEDBED_CLUSTER_NAME`: default cluster name
    /// - `SEEDBED_NODES`: default node count
    /// - `SEEDBED_PROVIDER`: default provider (`kind` or `k3d`)
    /// - `SEEDBED_DELETE_ON_FAILURE`: delete a half-created cluster (`true`/`1`)
    ///
    /// Provisioner and installer settings read their own variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self {
            provisioner: ProvisionerConfig::from_env(),
            installer: InstallerConfig::from_env(),
            ..Self::default()
        };

        if let Ok(name) = std::env::var("SEEDBED_CLUSTER_NAME") {
            if !name.trim().is_empty() {
                config.default_cluster_name = name.trim().to_string();
            }
        }
        if let Ok(val) = std::env::var("SEEDBED_NODES") {
            if let Ok(n) = val.trim().parse() {
                config.default_nodes = n;
            }
        }
        if let Ok(val) = std::env::var("SEEDBED_PROVIDER") {
            if let Ok(provider) = val.trim().parse() {
                config.default_provider = provider;
            }
        }
        if let Ok(val) = std::env::var("SEEDBED_DELETE_ON_FAILURE") {
            config.delete_on_provision_failure =
                matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes");
        }

        config
    }

    /// A cluster spec built from the defaults.
    #[must_use]
    pub fn default_spec(&self) -> ClusterSpec {
        ClusterSpec::new(self.default_cluster_name.clone(), self.default_nodes)
            .with_provider(self.default_provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_interactive_requires_deployment_mode() {
        let request = InstallationRequest::create(ClusterSpec::new("demo", 1))
            .with_run_mode(RunMode::ci());
        assert!(matches!(request.validate(), Err(Error::Config(_))));

        let request = request.with_deployment_mode(DeploymentMode::Standalone);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn interactive_runs_need_no_deployment_mode() {
        let request = InstallationRequest::existing("demo");
        assert!(request.validate().is_ok());
        assert_eq!(request.target.name(), "demo");
    }

    #[test]
    fn invalid_targets_rejected() {
        assert!(InstallationRequest::existing(" ").validate().is_err());
        assert!(matches!(
            InstallationRequest::create(ClusterSpec::new("demo", 0)).validate(),
            Err(Error::InvalidSpec { field: "nodes", .. })
        ));
    }

    #[test]
    fn exit_codes() {
        assert_eq!(Outcome::Fatal(Error::Config("x".into())).exit_code(), 1);
        assert_eq!(Outcome::Fatal(Error::cancelled("wait")).exit_code(), 130);
        let soft = Outcome::SoftFailed {
            cluster: "demo".into(),
            reason: "flake".into(),
            guidance: Guidance::for_error(&Error::Config("x".into())),
        };
        assert_eq!(soft.exit_code(), 0);
        assert!(soft.is_soft_failed());
    }

    #[test]
    fn default_spec() {
        let config = OrchestratorConfig::default();
        let spec = config.default_spec();
        assert_eq!(spec.name, "seedbed");
        assert_eq!(spec.nodes, 3);
        assert_eq!(spec.provider, ProviderKind::Kind);
    }
}
