//! Types and configuration for the installer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use seedbed_core::{ApplicationBundleSpec, DeploymentMode, RunMode};

/// Where the control-plane chart comes from and how it is installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneChart {
    /// Helm release name.
    pub release: String,
    /// Chart reference, `<repo>/<chart>`.
    pub chart: String,
    /// Local name for the chart repository.
    pub repo_name: String,
    /// Chart repository URL.
    pub repo_url: String,
    /// Namespace the control plane is installed into.
    pub namespace: String,
    /// Chart version. Latest when unset.
    pub version: Option<String>,
    /// Timeout for the install command.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for ControlPlaneChart {
    fn default() -> Self {
        Self {
            release: "argocd".to_string(),
            chart: "argo/argo-cd".to_string(),
            repo_name: "argo".to_string(),
            repo_url: "https://argoproj.github.io/argo-helm".to_string(),
            namespace: "argocd".to_string(),
            version: None,
            timeout: Duration::from_secs(600),
        }
    }
}

/// Configuration for the application installer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    /// Control-plane chart settings.
    pub control_plane: ControlPlaneChart,
    /// Helm release name used for the application bundle.
    pub bundle_release: String,
    /// Fixed delay after a fresh control-plane install.
    #[serde(with = "duration_secs")]
    pub stabilization: Duration,
    /// How often the stabilization wait logs progress.
    #[serde(with = "duration_secs")]
    pub progress_interval: Duration,
    /// Polls of the managed applications before giving up.
    pub app_wait_attempts: u32,
    /// Delay between application polls.
    #[serde(with = "duration_ms")]
    pub app_wait_interval: Duration,
    /// Timeout for fetching the bundle repository.
    #[serde(with = "duration_secs")]
    pub fetch_timeout: Duration,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            control_plane: ControlPlaneChart::default(),
            bundle_release: "seedbed-apps".to_string(),
            stabilization: Duration::from_secs(600),
            progress_interval: Duration::from_secs(30),
            app_wait_attempts: 60,
            app_wait_interval: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(300),
        }
    }
}

impl InstallerConfig {
    /// Create config from environment variables, falling back to defaults.
    ///
    /// # Environment Variables
    ///
    /// - `SEEDBED_STABILIZATION_SECS`: stabilization delay after the control-plane install
    /// - `SEEDBED_APP_WAIT_ATTEMPTS`: managed application polls
    /// - `SEEDBED_APP_WAIT_INTERVAL_MS`: delay between application polls
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("SEEDBED_STABILIZATION_SECS") {
            if let Ok(n) = val.trim().parse() {
                config.stabilization = Duration::from_secs(n);
            }
        }
        if let Ok(val) = std::env::var("SEEDBED_APP_WAIT_ATTEMPTS") {
            if let Ok(n) = val.trim().parse() {
                config.app_wait_attempts = n;
            }
        }
        if let Ok(val) = std::env::var("SEEDBED_APP_WAIT_INTERVAL_MS") {
            if let Ok(n) = val.trim().parse() {
                config.app_wait_interval = Duration::from_millis(n);
            }
        }

        config
    }
}

/// What to install on a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstallPlan {
    /// Application bundle. Without one, only the control plane is installed.
    pub bundle: Option<ApplicationBundleSpec>,
    /// Deployment flavour passed to the bundle as `global.deploymentMode`.
    pub deployment_mode: Option<DeploymentMode>,
    /// Run-wide switches.
    pub run_mode: RunMode,
}

/// What happened to a release during an install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseAction {
    /// The release was installed or upgraded.
    Installed,
    /// The release was already deployed and left alone.
    AlreadyInstalled,
    /// Dry run: commands were logged, nothing ran.
    Planned,
}

/// Summary of a successful install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    /// Control-plane release.
    pub control_plane: ReleaseAction,
    /// Bundle release, when a bundle was requested.
    pub bundle: Option<ReleaseAction>,
    /// Managed applications that reported synced and healthy.
    pub applications: Vec<String>,
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

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
