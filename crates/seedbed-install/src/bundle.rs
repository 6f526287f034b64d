//! Application bundle sources.

use std::path::{Component as PathComponent, Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tempfile::TempDir;
use tracing::{debug, info};

use seedbed_core::classify::is_missing_ref;
use seedbed_core::{ApplicationBundleSpec, Error, Result};
use seedbed_exec::{CommandRunner, RunOptions};

const GIT: &str = "git";

/// Check a bundle spec before anything runs.
///
/// # Errors
///
/// Returns `Error::Config` for an empty repository, ref or namespace, or a
/// chart path that is absolute or leaves the repository.
pub fn validate(spec: &ApplicationBundleSpec) -> Result<()> {
    if spec.repository.trim().is_empty() {
        return Err(Error::Config("bundle repository must not be empty".into()));
    }
    if spec.reference.trim().is_empty() {
        return Err(Error::Config("bundle branch or ref must not be empty".into()));
    }
    if spec.namespace.trim().is_empty() {
        return Err(Error::Config("bundle namespace must not be empty".into()));
    }
    let path = Path::new(&spec.path);
    if path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, PathComponent::ParentDir | PathComponent::Prefix(_)))
    {
        return Err(Error::Config(format!(
            "bundle path '{}' must be relative to the repository root",
            spec.path
        )));
    }
    Ok(())
}

/// A shallow checkout of the bundle repository, removed on drop.
#[derive(Debug)]
pub struct Checkout {
    dir: TempDir,
    chart: PathBuf,
}

impl Checkout {
    /// Directory of the chart inside the checkout.
    #[must_use]
    pub fn chart_dir(&self) -> &Path {
        &self.chart
    }

    /// Root of the checkout.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Returns true if the chart declares dependencies that need building.
    ///
    /// A chart without a `Chart.yaml` has none.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a malformed `Chart.yaml`, or the read
    /// failure.
    pub async fn has_dependencies(&self) -> Result<bool> {
        let path = self.chart.join("Chart.yaml");
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let manifest: ChartManifest = serde_yaml::from_str(&text)
            .map_err(|e| Error::Config(format!("invalid {}: {e}", path.display())))?;
        Ok(manifest.dependencies.is_some_and(|deps| !deps.is_empty()))
    }
}

/// The parts of `Chart.yaml` the installer reads.
#[derive(Debug, Deserialize)]
struct ChartManifest {
    #[serde(default)]
    dependencies: Option<Vec<serde_yaml::Value>>,
}

/// Clone `spec.reference` of `spec.repository` into a scratch directory.
///
/// # Errors
///
/// Returns `Error::BranchNotFound` when the ref does not exist, otherwise
/// whatever the runner or filesystem reports.
pub async fn fetch(
    runner: &dyn CommandRunner,
    spec: &ApplicationBundleSpec,
    timeout: Duration,
) -> Result<Checkout> {
    let dir = tempfile::Builder::new().prefix("seedbed-bundle-").tempdir()?;
    let repo_dir = dir.path().join("repo");

    let args = vec![
        "clone".to_string(),
        "--depth".to_string(),
        "1".to_string(),
        "--branch".to_string(),
        spec.reference.clone(),
        spec.repository.clone(),
        repo_dir.display().to_string(),
    ];

    info!(repository = %spec.repository, reference = %spec.reference, "Fetching application bundle");
    let out = runner
        .run(GIT, &args, &RunOptions::with_timeout(timeout))
        .await?;

    if !out.success() && is_missing_ref(&out.stderr) {
        return Err(Error::BranchNotFound {
            repository: spec.repository.clone(),
            reference: spec.reference.clone(),
        });
    }
    out.check(GIT, &args)?;

    let chart = repo_dir.join(&spec.path);
    debug!(chart = %chart.display(), "Bundle checked out");
    Ok(Checkout { dir, chart })
}
