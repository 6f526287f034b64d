//! The orchestration service.
//!
//! Sequences cluster provisioning and the two-phase install, then applies
//! the soft-fail policy to install failures.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use seedbed_cluster::{ClusterConnector, ClusterHandle, ClusterProvisioner};
use seedbed_core::{classify, CancellationToken, ClusterSpec, Error, Result, RunMode};
use seedbed_exec::CommandRunner;
use seedbed_install::{ApplicationInstaller, InstallPlan};

use crate::guidance::Guidance;
use crate::policy::SoftFailPolicy;
use crate::types::{ClusterTarget, InstallationRequest, OrchestratorConfig, Outcome, RunSummary};

/// Runs one provisioning request end to end.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Provision (or reuse) the cluster, install onto it and judge the result.
    ///
    /// Never returns an error directly: every failure is an [`Outcome`].
    async fn run(&self, request: &InstallationRequest, cancel: &CancellationToken) -> Outcome;
}

/// The orchestration service implementation.
pub struct OrchestrationService {
    provisioner: ClusterProvisioner,
    installer: ApplicationInstaller,
    policy: SoftFailPolicy,
    config: OrchestratorConfig,
}

impl OrchestrationService {
    /// Create a service over the given runner and connector.
    ///
    /// The soft-fail policy judges for the detected host platform.
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        connector: Arc<dyn ClusterConnector>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            provisioner: ClusterProvisioner::new(
                Arc::clone(&runner),
                Arc::clone(&connector),
                config.provisioner.clone(),
            ),
            installer: ApplicationInstaller::new(runner, connector, config.installer.clone()),
            policy: SoftFailPolicy::default(),
            config,
        }
    }

    /// Replace the soft-fail policy.
    #[must_use]
    pub fn with_policy(mut self, policy: SoftFailPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The cluster provisioner.
    #[must_use]
    pub const fn provisioner(&self) -> &ClusterProvisioner {
        &self.provisioner
    }

    /// The application installer.
    #[must_use]
    pub const fn installer(&self) -> &ApplicationInstaller {
        &self.installer
    }

    /// The soft-fail policy.
    #[must_use]
    pub const fn policy(&self) -> &SoftFailPolicy {
        &self.policy
    }

    /// Get the configuration.
    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Fill an empty or blank cluster name with the configured default.
    fn normalize(&self, request: &InstallationRequest) -> InstallationRequest {
        let mut request = request.clone();
        if let ClusterTarget::Create(spec) = &mut request.target {
            if spec.name.trim().is_empty() {
                debug!(name = %self.config.default_cluster_name, "No cluster name given, using default");
                spec.name.clone_from(&self.config.default_cluster_name);
            }
        }
        request
    }

    async fn execute(
        &self,
        run_id: Uuid,
        request: &InstallationRequest,
        cancel: &CancellationToken,
    ) -> Outcome {
        let started_at = Utc::now();

        if let Err(e) = request.validate() {
            error!(error = %e, "Rejected request");
            return Outcome::Fatal(e);
        }

        let (handle, created) = match self.acquire_cluster(request, cancel).await {
            Ok(acquired) => acquired,
            Err(e) => {
                // Provisioning failures are never soft-failed
                error!(error = %e, "Cluster provisioning failed");
                return Outcome::Fatal(e);
            }
        };

        let plan = InstallPlan {
            bundle: request.bundle.clone(),
            deployment_mode: request.deployment_mode,
            run_mode: request.run_mode,
        };

        match self.installer.install(&handle, &plan, cancel).await {
            Ok(install) => {
                info!(cluster = %handle.name, created, "Run complete");
                Outcome::Success(RunSummary {
                    run_id,
                    cluster: handle.name,
                    created,
                    install,
                    started_at,
                    finished_at: Utc::now(),
                })
            }
            Err(e) => self.judge_install_failure(&handle, e, request.run_mode),
        }
    }

    /// Get a handle for the request's target, creating the cluster if needed.
    async fn acquire_cluster(
        &self,
        request: &InstallationRequest,
        cancel: &CancellationToken,
    ) -> Result<(ClusterHandle, bool)> {
        let force = request.run_mode.force;

        match &request.target {
            ClusterTarget::Create(spec) if request.run_mode.dry_run => {
                self.provisioner.plan_create(spec).await?;
                info!(cluster = %spec.name, "Dry run, skipping readiness checks");
                Ok((self.provisioner.planned_handle(spec), true))
            }
            ClusterTarget::Existing(name) if request.run_mode.dry_run => {
                let spec = ClusterSpec::new(name.clone(), self.config.default_nodes)
                    .with_provider(self.config.default_provider);
                Ok((self.provisioner.planned_handle(&spec), false))
            }
            ClusterTarget::Create(spec) => {
                let existed = self.provisioner.exists(&spec.name).await?;
                match self
                    .provisioner
                    .ensure_known(spec, existed, force, cancel)
                    .await
                {
                    Ok(acquired) => Ok(acquired),
                    Err(e) => {
                        if !existed || force {
                            self.cleanup_after_failure(&spec.name, &e).await;
                        }
                        Err(e)
                    }
                }
            }
            ClusterTarget::Existing(name) => {
                let handle = self.provisioner.get_handle(name, cancel).await?;
                Ok((handle, false))
            }
        }
    }

    async fn cleanup_after_failure(&self, name: &str, err: &Error) {
        if !self.config.delete_on_provision_failure || err.is_cancelled() {
            return;
        }
        warn!(cluster = name, "Deleting cluster after failed provisioning");
        if let Err(e) = self.provisioner.delete(name, true).await {
            warn!(cluster = name, error = %e, "Cleanup after failed provisioning failed");
        }
    }

    fn judge_install_failure(&self, handle: &ClusterHandle, err: Error, run_mode: RunMode) -> Outcome {
        if !self.policy.should_soft_fail(&err, run_mode) {
            error!(cluster = %handle.name, error = %err, "Install failed");
            return Outcome::Fatal(err);
        }

        let classification = classify(&err);
        let guidance = Guidance::from_classification(&err, &classification);
        warn!(
            cluster = %handle.name,
            shape = ?classification.shape,
            platform = %self.policy.platform(),
            error = %err,
            "Install failed on a known infrastructure issue, completing with warnings"
        );
        Outcome::SoftFailed {
            cluster: handle.name.clone(),
            reason: err.to_string(),
            guidance,
        }
    }
}

#[async_trait]
impl Orchestrator for OrchestrationService {
    async fn run(&self, request: &InstallationRequest, cancel: &CancellationToken) -> Outcome {
        let run_id = Uuid::new_v4();
        let request = self.normalize(request);
        let span = info_span!("run", %run_id, cluster = request.target.name());
        self.execute(run_id, &request, cancel).instrument(span).await
    }
}
