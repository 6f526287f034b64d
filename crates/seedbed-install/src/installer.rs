//! The application installer.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use seedbed_cluster::{ClusterConnector, ClusterHandle, ManagedApplication};
use seedbed_core::classify::is_transient_network_text;
use seedbed_core::{
    ApplicationBundleSpec, CancellationToken, Component, DeploymentMode, Error, Operation,
    Result, RunMode, StatusInfo,
};
use seedbed_exec::{CommandRunner, RunOptions};

use crate::helm::{self, Release, HELM};
use crate::types::{InstallPlan, InstallReport, InstallerConfig, ReleaseAction};
use crate::{bundle, wait};

/// Installs the control plane and the application bundle onto a cluster.
pub struct ApplicationInstaller {
    runner: Arc<dyn CommandRunner>,
    connector: Arc<dyn ClusterConnector>,
    config: InstallerConfig,
}

impl ApplicationInstaller {
    /// Create an installer.
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        connector: Arc<dyn ClusterConnector>,
        config: InstallerConfig,
    ) -> Self {
        Self {
            runner,
            connector,
            config,
        }
    }

    /// Get the installer config.
    #[must_use]
    pub const fn config(&self) -> &InstallerConfig {
        &self.config
    }

    /// Roll out the control plane, then the bundle if one is given.
    ///
    /// The bundle phase only starts after the control plane is in place.
    /// In dry-run mode commands are issued through the runner but every
    /// wait is skipped.
    ///
    /// # Errors
    ///
    /// - `Error::Config` for an invalid bundle spec, before anything runs.
    /// - Control-plane failures wrapped as `control-plane` / `installation`.
    /// - `Error::BranchNotFound`, unwrapped, for a missing bundle ref.
    /// - Other bundle failures wrapped as `application-bundle` / `installation`.
    /// - Application wait failures wrapped as `managed-applications` /
    ///   `waiting`, never recoverable.
    pub async fn install(
        &self,
        handle: &ClusterHandle,
        plan: &InstallPlan,
        cancel: &CancellationToken,
    ) -> Result<InstallReport> {
        if let Some(spec) = &plan.bundle {
            bundle::validate(spec)?;
        }

        let control_plane = self
            .install_control_plane(handle, plan.run_mode, cancel)
            .await?;

        let Some(spec) = &plan.bundle else {
            info!(cluster = %handle.name, "No application bundle requested");
            return Ok(InstallReport {
                control_plane,
                bundle: None,
                applications: Vec::new(),
            });
        };

        self.install_bundle(handle, spec, plan.deployment_mode).await?;

        if plan.run_mode.dry_run {
            return Ok(InstallReport {
                control_plane,
                bundle: Some(ReleaseAction::Planned),
                applications: Vec::new(),
            });
        }

        let apps = self
            .wait_for_applications(handle, &spec.namespace, cancel)
            .await?;

        Ok(InstallReport {
            control_plane,
            bundle: Some(ReleaseAction::Installed),
            applications: apps.into_iter().map(|a| a.name).collect(),
        })
    }

    async fn install_control_plane(
        &self,
        handle: &ClusterHandle,
        run_mode: RunMode,
        cancel: &CancellationToken,
    ) -> Result<ReleaseAction> {
        let wrap = |e: Error| -> Error {
            e.wrap(Component::ControlPlane, Operation::Installation)
                .on_cluster(&handle.name)
                .recoverable(false)
                .into()
        };
        let chart = &self.config.control_plane;

        if !run_mode.force && !run_mode.dry_run {
            if self
                .is_installed(handle, Component::ControlPlane, None)
                .await
                .map_err(wrap)?
            {
                info!(
                    cluster = %handle.name,
                    release = %chart.release,
                    "Control plane already installed, skipping"
                );
                return Ok(ReleaseAction::AlreadyInstalled);
            }
        }

        info!(cluster = %handle.name, release = %chart.release, chart = %chart.chart, "Installing control plane");

        let result = async {
            self.runner
                .run_checked(
                    HELM,
                    &helm::repo_add_args(chart),
                    &RunOptions::with_timeout(self.config.fetch_timeout),
                )
                .await?;

            let values = BTreeMap::new();
            let release = Release {
                name: &chart.release,
                chart: &chart.chart,
                namespace: &chart.namespace,
                version: chart.version.as_deref(),
                timeout: chart.timeout,
                values: &values,
            };
            self.runner
                .run_checked(
                    HELM,
                    &helm::upgrade_args(&release, handle),
                    &RunOptions::with_timeout(chart.timeout + self.config.fetch_timeout),
                )
                .await?;
            Ok::<(), Error>(())
        }
        .await;
        result.map_err(wrap)?;

        if run_mode.dry_run {
            return Ok(ReleaseAction::Planned);
        }

        info!(cluster = %handle.name, release = %chart.release, "Control plane installed");
        wait::stabilization_wait(
            self.config.stabilization,
            self.config.progress_interval,
            cancel,
        )
        .await
        .map_err(wrap)?;

        Ok(ReleaseAction::Installed)
    }

    async fn install_bundle(
        &self,
        handle: &ClusterHandle,
        spec: &ApplicationBundleSpec,
        mode: Option<DeploymentMode>,
    ) -> Result<()> {
        let checkout = match bundle::fetch(self.runner.as_ref(), spec, self.config.fetch_timeout).await {
            Ok(checkout) => checkout,
            Err(e @ Error::BranchNotFound { .. }) => return Err(e),
            Err(e) => return Err(bundle_error(handle, e)),
        };

        let mut values = spec.values.clone();
        if let Some(mode) = mode {
            values.insert("global.deploymentMode".to_string(), mode.as_str().to_string());
        }

        let chart_dir = checkout.chart_dir().display().to_string();
        let release = Release {
            name: &self.config.bundle_release,
            chart: &chart_dir,
            namespace: &spec.namespace,
            version: None,
            timeout: spec.timeout,
            values: &values,
        };

        info!(
            cluster = %handle.name,
            release = %self.config.bundle_release,
            namespace = %spec.namespace,
            "Installing application bundle"
        );

        let result = async {
            if checkout.has_dependencies().await? {
                self.runner
                    .run_checked(
                        HELM,
                        &helm::dependency_build_args(checkout.chart_dir(), handle),
                        &RunOptions::with_timeout(self.config.fetch_timeout),
                    )
                    .await?;
            }
            self.runner
                .run_checked(
                    HELM,
                    &helm::upgrade_args(&release, handle),
                    &RunOptions::with_timeout(spec.timeout + self.config.fetch_timeout),
                )
                .await?;
            Ok::<(), Error>(())
        }
        .await;

        result.map_err(|e| bundle_error(handle, e))
    }

    /// Wait until every managed application in `namespace` is synced and healthy.
    ///
    /// Safe to call again on its own after a failed rollout.
    ///
    /// # Errors
    ///
    /// Any failure, wrapped as `managed-applications` / `waiting` with the
    /// recoverable flag cleared.
    pub async fn wait_for_applications(
        &self,
        handle: &ClusterHandle,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ManagedApplication>> {
        let result = async {
            let client = self.connector.connect(handle).await?;
            wait::wait_for_applications(
                client.as_ref(),
                namespace,
                self.config.app_wait_attempts,
                self.config.app_wait_interval,
                cancel,
            )
            .await
        }
        .await;

        result.map_err(|e| {
            warn!(cluster = %handle.name, namespace, error = %e, "Managed applications not ready");
            e.wrap(Component::ManagedApplications, Operation::Waiting)
                .on_cluster(&handle.name)
                .recoverable(false)
                .into()
        })
    }

    /// Returns true if the component's release is deployed.
    ///
    /// See [`ApplicationInstaller::get_status`] for `namespace`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a component without a release, or the
    /// helm failure when the status cannot be determined.
    pub async fn is_installed(
        &self,
        handle: &ClusterHandle,
        component: Component,
        namespace: Option<&str>,
    ) -> Result<bool> {
        Ok(self.get_status(handle, component, namespace).await?.status == "deployed")
    }

    /// Release status of a component.
    ///
    /// `namespace` is where the release was installed. `None` means the
    /// control-plane namespace, which is also where a bundle lands unless
    /// its spec names another.
    ///
    /// A release helm does not know reports status `not-installed`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for a component without a release, or the
    /// helm failure when the status cannot be determined.
    pub async fn get_status(
        &self,
        handle: &ClusterHandle,
        component: Component,
        namespace: Option<&str>,
    ) -> Result<StatusInfo> {
        let release = self.release_for(component)?;
        let namespace = namespace.unwrap_or(&self.config.control_plane.namespace);
        let args = helm::status_args(release, namespace, handle);
        let out = self
            .runner
            .run(HELM, &args, &RunOptions::with_timeout(self.config.fetch_timeout))
            .await?;

        if !out.success() && helm::is_release_missing(&out.stderr) {
            debug!(release, namespace, "Release not installed");
            return Ok(helm::not_installed(release, namespace));
        }
        let out = out.check(HELM, &args)?;
        if out.stdout.trim().is_empty() {
            // Dry-run runners answer with empty output
            return Ok(helm::not_installed(release, namespace));
        }
        helm::parse_status(&out.stdout)
    }

    fn release_for(&self, component: Component) -> Result<&str> {
        match component {
            Component::ControlPlane => Ok(&self.config.control_plane.release),
            Component::ApplicationBundle => Ok(&self.config.bundle_release),
            other => Err(Error::Config(format!("component {other} has no release"))),
        }
    }
}

/// Bundle install failures are recoverable when they look like a timeout or
/// a network blip.
fn bundle_error(handle: &ClusterHandle, err: Error) -> Error {
    let recoverable = match &err {
        Error::CommandTimedOut { .. } => true,
        Error::CommandFailed { stderr, .. } => is_transient_network_text(stderr),
        _ => false,
    };
    err.wrap(Component::ApplicationBundle, Operation::Installation)
        .on_cluster(&handle.name)
        .recoverable(recoverable)
        .into()
}
