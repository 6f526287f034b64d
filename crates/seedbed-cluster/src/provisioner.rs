//! The cluster provisioner.
//!
//! Creates, deletes, lists and inspects clusters through a provider CLI
//! driven by a [`CommandRunner`], and hands out [`ClusterHandle`]s only
//! after the two readiness tiers passed.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use seedbed_core::classify::is_cluster_absent;
use seedbed_core::{
    CancellationToken, ClusterInfo, ClusterSpec, Component, Error, Operation, ProviderKind,
    Result, STATUS_UNKNOWN,
};
use seedbed_exec::{CommandRunner, RunOptions};

use crate::client::ClusterConnector;
use crate::handle::{ApiEndpoint, ClusterHandle, ClusterRegistry};
use crate::lifecycle::ClusterState;
use crate::types::ProvisionerConfig;
use crate::{kubeconfig, provider, readiness};

const QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Creates and manages ephemeral clusters.
pub struct ClusterProvisioner {
    runner: Arc<dyn CommandRunner>,
    connector: Arc<dyn ClusterConnector>,
    config: ProvisionerConfig,
    registry: ClusterRegistry,
}

impl ClusterProvisioner {
    /// Create a provisioner.
    #[must_use]
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        connector: Arc<dyn ClusterConnector>,
        config: ProvisionerConfig,
    ) -> Self {
        Self {
            runner,
            connector,
            config,
            registry: ClusterRegistry::new(),
        }
    }

    /// Get the provisioner config.
    #[must_use]
    pub const fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    /// Lifecycle state of a cluster as seen by this provisioner.
    #[must_use]
    pub fn state(&self, name: &str) -> ClusterState {
        self.registry.state(name)
    }

    /// The connector used for readiness checks.
    #[must_use]
    pub fn connector(&self) -> Arc<dyn ClusterConnector> {
        Arc::clone(&self.connector)
    }

    /// Create a cluster and wait until it is reachable with a Ready node.
    ///
    /// A failed create is left in place for inspection.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidSpec` before any command runs for an invalid
    /// spec. Every later failure is wrapped with component `cluster` and
    /// operation `provisioning`.
    pub async fn create(&self, spec: &ClusterSpec, cancel: &CancellationToken) -> Result<ClusterHandle> {
        self.issue_create(spec).await?;
        self.verify(&spec.name, spec.provider, cancel)
            .await
            .map_err(|e| provisioning_error(&spec.name, e))
    }

    /// Validate the spec and pass the create commands to the runner without
    /// touching the filesystem or the lifecycle registry.
    ///
    /// The provider config is logged instead of written. Meant for dry runs,
    /// where the runner only records what it would execute.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidSpec` for an invalid spec, or a wrapped runner
    /// failure.
    pub async fn plan_create(&self, spec: &ClusterSpec) -> Result<()> {
        spec.validate()?;
        let config_path = self.config.provider_config_path(&spec.name);
        let kubeconfig = self.config.kubeconfig_path(&spec.name);

        let result = async {
            let rendered =
                provider::render_config(spec, self.config.api_host_override.as_deref())?;
            info!(
                cluster = %spec.name,
                path = %config_path.display(),
                "Planned provider config:\n{rendered}"
            );
            let opts = RunOptions::with_timeout(self.config.command_timeout);
            for args in provider::create_commands(spec, &config_path, &kubeconfig) {
                self.runner
                    .run_checked(spec.provider.program(), &args, &opts)
                    .await?;
            }
            Ok::<(), Error>(())
        }
        .await;
        result.map_err(|e| provisioning_error(&spec.name, e))
    }

    async fn issue_create(&self, spec: &ClusterSpec) -> Result<()> {
        spec.validate()?;
        self.registry.transition(&spec.name, ClusterState::Creating)?;
        self.registry.set_provider(&spec.name, spec.provider);

        info!(
            cluster = %spec.name,
            provider = %spec.provider,
            nodes = spec.nodes,
            version = spec.version_or_default(),
            "Creating cluster"
        );

        if let Err(e) = self.run_create_commands(spec).await {
            self.mark_failed(&spec.name);
            return Err(provisioning_error(&spec.name, e));
        }
        Ok(())
    }

    async fn run_create_commands(&self, spec: &ClusterSpec) -> Result<()> {
        let config_path = self.config.provider_config_path(&spec.name);
        let kubeconfig = self.config.kubeconfig_path(&spec.name);

        let rendered = provider::render_config(spec, self.config.api_host_override.as_deref())?;
        tokio::fs::create_dir_all(&self.config.kubeconfig_dir).await?;
        tokio::fs::write(&config_path, rendered).await?;
        debug!(cluster = %spec.name, path = %config_path.display(), "Wrote provider config");

        let opts = RunOptions::with_timeout(self.config.command_timeout);
        for args in provider::create_commands(spec, &config_path, &kubeconfig) {
            self.runner
                .run_checked(spec.provider.program(), &args, &opts)
                .await?;
        }

        self.rewrite_kubeconfig(&kubeconfig).await
    }

    /// An unverified handle describing where `spec` would be reachable.
    ///
    /// Only meaningful for dry-run plans; nothing has been checked.
    #[must_use]
    pub fn planned_handle(&self, spec: &ClusterSpec) -> ClusterHandle {
        ClusterHandle::candidate(
            spec.name.clone(),
            spec.provider,
            self.config.kubeconfig_path(&spec.name),
            ApiEndpoint::new(
                self.config
                    .api_host_override
                    .clone()
                    .unwrap_or_else(|| "127.0.0.1".to_string()),
                6443,
            ),
        )
    }

    /// Create the cluster, or reuse it when it already exists.
    ///
    /// With `force`, an existing cluster is deleted and recreated. Returns
    /// the handle and whether a new cluster was created.
    ///
    /// # Errors
    ///
    /// Everything [`ClusterProvisioner::create`], [`ClusterProvisioner::delete`]
    /// and [`ClusterProvisioner::get_handle`] return.
    pub async fn ensure(
        &self,
        spec: &ClusterSpec,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<(ClusterHandle, bool)> {
        spec.validate()?;
        let existed = self.exists(&spec.name).await?;
        self.ensure_known(spec, existed, force, cancel).await
    }

    /// [`ClusterProvisioner::ensure`] for a caller that already looked the
    /// cluster up with [`ClusterProvisioner::exists`].
    ///
    /// # Errors
    ///
    /// Same as [`ClusterProvisioner::ensure`].
    pub async fn ensure_known(
        &self,
        spec: &ClusterSpec,
        existed: bool,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<(ClusterHandle, bool)> {
        spec.validate()?;

        if existed {
            if force {
                info!(cluster = %spec.name, "Cluster exists, recreating (force)");
                self.delete(&spec.name, true).await?;
            } else {
                info!(cluster = %spec.name, "Cluster exists, reusing");
                let handle = self.get_handle(&spec.name, cancel).await?;
                return Ok((handle, false));
            }
        }

        let handle = self.create(spec, cancel).await?;
        Ok((handle, true))
    }

    /// A verified handle for an existing cluster.
    ///
    /// Reuses the cached handle while it is younger than the configured TTL;
    /// otherwise re-exports the kubeconfig and re-runs both readiness tiers.
    ///
    /// # Errors
    ///
    /// Returns `Error::ClusterNotFound` if no provider knows the cluster,
    /// or a wrapped readiness failure.
    pub async fn get_handle(&self, name: &str, cancel: &CancellationToken) -> Result<ClusterHandle> {
        if let Some(handle) = self.registry.fresh_handle(name, self.config.handle_ttl) {
            debug!(cluster = name, "Using cached cluster handle");
            return Ok(handle);
        }

        let provider = self
            .find_provider(name)
            .await?
            .ok_or_else(|| Error::ClusterNotFound(name.to_string()))?;

        let result = async {
            self.export_kubeconfig(name, provider).await?;
            self.verify(name, provider, cancel).await
        }
        .await;
        result.map_err(|e| provisioning_error(name, e))
    }

    /// Start an existing cluster.
    ///
    /// Clusters have no stopped state, so this is a fresh reachability check.
    ///
    /// # Errors
    ///
    /// Same as [`ClusterProvisioner::get_handle`].
    pub async fn start(&self, name: &str, cancel: &CancellationToken) -> Result<ClusterHandle> {
        self.registry.invalidate(name);
        self.get_handle(name, cancel).await
    }

    async fn verify(
        &self,
        name: &str,
        provider: ProviderKind,
        cancel: &CancellationToken,
    ) -> Result<ClusterHandle> {
        self.registry
            .transition(name, ClusterState::VerifyingReachability)?;

        let kubeconfig = self.config.kubeconfig_path(name);
        let context = provider.context_name(name);
        let result = async {
            let endpoint = self.connector.resolve_endpoint(&kubeconfig, &context).await?;
            let candidate = ClusterHandle::candidate(name, provider, kubeconfig.clone(), endpoint);
            readiness::verify_reachable(
                self.connector.as_ref(),
                candidate,
                &self.config.readiness,
                cancel,
            )
            .await
        }
        .await;

        match result {
            Ok(handle) => {
                self.registry.transition(name, ClusterState::Ready)?;
                self.registry.store_handle(handle.clone());
                Ok(handle)
            }
            Err(e) => {
                self.mark_failed(name);
                Err(e)
            }
        }
    }

    /// Delete a cluster.
    ///
    /// Without `force`, a cluster no provider knows is an error. With
    /// `force`, absence and an unreachable provider are tolerated.
    ///
    /// # Errors
    ///
    /// Returns `Error::ClusterNotFound`, or the delete failure wrapped with
    /// component `cluster` and operation `deletion`.
    pub async fn delete(&self, name: &str, force: bool) -> Result<()> {
        let found = match self.find_provider(name).await {
            Ok(found) => found,
            Err(e) if force => {
                warn!(cluster = name, error = %e, "Could not look up cluster, deleting anyway");
                self.registry.provider(name)
            }
            Err(e) => return Err(deletion_error(name, e)),
        };

        let Some(provider) = found else {
            if force {
                info!(cluster = name, "Cluster not found, nothing to delete");
                self.remove_local_files(name).await;
                return Ok(());
            }
            return Err(Error::ClusterNotFound(name.to_string()));
        };

        self.registry.transition(name, ClusterState::Deleting)?;
        info!(cluster = name, provider = %provider, force, "Deleting cluster");

        let args = provider::delete_args(provider, name);
        let opts = RunOptions::with_timeout(self.config.command_timeout);
        let outcome = match self.runner.run(provider.program(), &args, &opts).await {
            Ok(out) if out.success() => Ok(()),
            Ok(out) if force && is_cluster_absent(&out.stderr) => {
                debug!(cluster = name, "Provider reports cluster already gone");
                Ok(())
            }
            Ok(out) => out.check(provider.program(), &args).map(|_| ()),
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            self.mark_failed(name);
            return Err(deletion_error(name, e));
        }

        self.registry.transition(name, ClusterState::Absent)?;
        self.remove_local_files(name).await;
        info!(cluster = name, "Cluster deleted");
        Ok(())
    }

    /// List clusters across all configured providers.
    ///
    /// Providers whose CLI is not installed are skipped.
    ///
    /// # Errors
    ///
    /// Returns the failure of a provider's list command.
    pub async fn list(&self) -> Result<Vec<ClusterInfo>> {
        let mut clusters = Vec::new();
        for &provider in &self.config.providers {
            let names = match self.list_names(provider).await {
                Ok(names) => names,
                Err(Error::Spawn { program, .. }) => {
                    debug!(program, "Provider CLI not available, skipping");
                    continue;
                }
                Err(e) => return Err(e),
            };
            for name in names {
                clusters.push(self.status_of(&name, provider).await);
            }
        }
        Ok(clusters)
    }

    /// Status of one cluster. API failures report status `Unknown`.
    ///
    /// # Errors
    ///
    /// Returns `Error::ClusterNotFound` if no provider knows the cluster.
    pub async fn status(&self, name: &str) -> Result<ClusterInfo> {
        let provider = self
            .find_provider(name)
            .await?
            .ok_or_else(|| Error::ClusterNotFound(name.to_string()))?;
        Ok(self.status_of(name, provider).await)
    }

    /// Returns true if any configured provider knows the cluster.
    ///
    /// # Errors
    ///
    /// Returns the failure of a provider's list command.
    pub async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.find_provider(name).await?.is_some())
    }

    async fn status_of(&self, name: &str, provider: ProviderKind) -> ClusterInfo {
        let mut info = ClusterInfo {
            name: name.to_string(),
            provider,
            status: STATUS_UNKNOWN.to_string(),
            node_count: 0,
        };

        let result = async {
            self.export_kubeconfig(name, provider).await?;
            let kubeconfig = self.config.kubeconfig_path(name);
            let endpoint = self
                .connector
                .resolve_endpoint(&kubeconfig, &provider.context_name(name))
                .await?;
            let candidate = ClusterHandle::candidate(name, provider, kubeconfig, endpoint);
            let client = self.connector.connect(&candidate).await?;
            Ok::<_, Error>(client.list_nodes().await?)
        }
        .await;

        match result {
            Ok(nodes) => {
                let total = u32::try_from(nodes.len()).unwrap_or(u32::MAX);
                let ready = nodes.iter().filter(|n| n.ready).count();
                info.status = format!("{ready}/{total}");
                info.node_count = total;
            }
            Err(e) => debug!(cluster = name, error = %e, "Cluster status unavailable"),
        }
        info
    }

    async fn find_provider(&self, name: &str) -> Result<Option<ProviderKind>> {
        if let Some(provider) = self.registry.provider(name) {
            return Ok(Some(provider));
        }
        for &provider in &self.config.providers {
            match self.list_names(provider).await {
                Ok(names) if names.iter().any(|n| n == name) => return Ok(Some(provider)),
                Ok(_) => {}
                Err(Error::Spawn { program, .. }) => {
                    debug!(program, "Provider CLI not available, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(None)
    }

    async fn list_names(&self, provider: ProviderKind) -> Result<Vec<String>> {
        let args = provider::list_args(provider);
        let out = self
            .runner
            .run_checked(provider.program(), &args, &RunOptions::with_timeout(QUERY_TIMEOUT))
            .await?;
        provider::parse_list(provider, &out.stdout)
    }

    async fn export_kubeconfig(&self, name: &str, provider: ProviderKind) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.kubeconfig_dir).await?;
        let kubeconfig = self.config.kubeconfig_path(name);
        let args = provider::export_kubeconfig_args(provider, name, &kubeconfig);
        self.runner
            .run_checked(provider.program(), &args, &RunOptions::with_timeout(QUERY_TIMEOUT))
            .await?;
        self.rewrite_kubeconfig(&kubeconfig).await
    }

    async fn rewrite_kubeconfig(&self, path: &Path) -> Result<()> {
        let Some(host) = self.config.api_host_override.as_deref() else {
            return Ok(());
        };
        match kubeconfig::rewrite_loopback(path, host).await {
            Ok(_) => Ok(()),
            // Dry-run and mocked runners never write the file
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No kubeconfig to rewrite");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn remove_local_files(&self, name: &str) {
        for path in [
            self.config.kubeconfig_path(name),
            self.config.provider_config_path(name),
        ] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "Removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove file"),
            }
        }
    }

    fn mark_failed(&self, name: &str) {
        if let Err(e) = self.registry.transition(name, ClusterState::Failed) {
            warn!(cluster = name, error = %e, "Could not record failed state");
        }
    }
}

fn provisioning_error(name: &str, err: Error) -> Error {
    if err.operation_context().is_some() {
        return err;
    }
    err.wrap(Component::Cluster, Operation::Provisioning)
        .on_cluster(name)
        .into()
}

fn deletion_error(name: &str, err: Error) -> Error {
    err.wrap(Component::Cluster, Operation::Deletion)
        .on_cluster(name)
        .into()
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use seedbed_core::{ApiError, ReadinessTier};
    use seedbed_exec::{CommandOutput, MockRunner};

    use super::*;
    use crate::client::mock::MockConnector;
    use crate::client::{ClusterApiClient, NodeStatus};
    use crate::types::ReadinessConfig;

    struct Fixture {
        runner: Arc<MockRunner>,
        connector: Arc<MockConnector>,
        provisioner: ClusterProvisioner,
        _listener: TcpListener,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let dir = tempfile::tempdir().unwrap();

        let runner = Arc::new(MockRunner::new());
        let connector = Arc::new(MockConnector::new(ApiEndpoint::new("127.0.0.1", port)));
        let config = ProvisionerConfig {
            kubeconfig_dir: dir.path().to_path_buf(),
            readiness: ReadinessConfig::fast(3, 5),
            providers: vec![ProviderKind::Kind],
            ..ProvisionerConfig::default()
        };
        let provisioner = ClusterProvisioner::new(
            Arc::clone(&runner) as Arc<dyn CommandRunner>,
            Arc::clone(&connector) as Arc<dyn ClusterConnector>,
            config,
        );

        Fixture {
            runner,
            connector,
            provisioner,
            _listener: listener,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn create_returns_verified_handle() {
        let f = fixture().await;
        let cancel = CancellationToken::new();

        let handle = f
            .provisioner
            .create(&ClusterSpec::new("demo", 2), &cancel)
            .await
            .unwrap();

        assert!(handle.is_verified());
        assert_eq!(handle.context, "kind-demo");
        assert_eq!(f.provisioner.state("demo"), ClusterState::Ready);
        assert_eq!(f.runner.count("kind", &["create", "cluster"]), 1);
        assert!(f.provisioner.config().provider_config_path("demo").exists());

        // The cluster behind the handle lists a Ready node
        let nodes = f.connector.client().list_nodes().await.unwrap();
        assert!(nodes.iter().any(|n| n.ready));
    }

    #[tokio::test]
    async fn invalid_spec_runs_nothing() {
        let f = fixture().await;
        let err = f
            .provisioner
            .create(&ClusterSpec::new("", 1), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidSpec { field: "name", .. }));
        assert!(f.runner.invocations().is_empty());
        assert_eq!(f.provisioner.state(""), ClusterState::Absent);
    }

    #[tokio::test]
    async fn create_command_failure_is_wrapped_and_not_rolled_back() {
        let f = fixture().await;
        f.runner
            .fail("kind", &["create", "cluster"], 1, "ERROR: failed to create cluster");

        let err = f
            .provisioner
            .create(&ClusterSpec::new("demo", 1), &CancellationToken::new())
            .await
            .unwrap_err();

        let ctx = err.operation_context().unwrap();
        assert_eq!(ctx.component, Component::Cluster);
        assert_eq!(ctx.operation, Operation::Provisioning);
        assert_eq!(ctx.cluster.as_deref(), Some("demo"));
        assert_eq!(f.provisioner.state("demo"), ClusterState::Failed);
        assert_eq!(f.runner.count("kind", &["delete"]), 0);
    }

    #[tokio::test]
    async fn unreachable_cluster_never_yields_handle() {
        let f = fixture().await;
        f.connector
            .client()
            .push_nodes(Ok(vec![NodeStatus::new("demo-control-plane", false)]));

        let err = f
            .provisioner
            .create(&ClusterSpec::new("demo", 1), &CancellationToken::new())
            .await
            .unwrap_err();

        let Error::Operation(op) = &err else {
            panic!("expected wrapped error, got {err}");
        };
        assert!(matches!(
            *op.source,
            Error::ClusterNotReachable {
                tier: ReadinessTier::Api,
                ..
            }
        ));
        assert_eq!(f.provisioner.state("demo"), ClusterState::Failed);
        assert!(f
            .provisioner
            .registry
            .fresh_handle("demo", Duration::from_secs(60))
            .is_none());
    }

    #[tokio::test]
    async fn get_handle_uses_cache_until_ttl() {
        let f = fixture().await;
        let cancel = CancellationToken::new();
        f.provisioner
            .create(&ClusterSpec::new("demo", 1), &cancel)
            .await
            .unwrap();
        let calls = f.connector.client().node_calls();

        f.provisioner.get_handle("demo", &cancel).await.unwrap();
        assert_eq!(f.connector.client().node_calls(), calls);

        // Start always re-checks
        f.provisioner.start("demo", &cancel).await.unwrap();
        assert!(f.connector.client().node_calls() > calls);
    }

    #[tokio::test]
    async fn get_handle_for_unknown_cluster() {
        let f = fixture().await;
        let err = f
            .provisioner
            .get_handle("ghost", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ClusterNotFound(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn get_handle_adopts_existing_cluster() {
        let f = fixture().await;
        f.runner
            .on("kind", &["get", "clusters"], CommandOutput::ok("demo\n"));

        let handle = f
            .provisioner
            .get_handle("demo", &CancellationToken::new())
            .await
            .unwrap();
        assert!(handle.is_verified());
        assert_eq!(f.runner.count("kind", &["export", "kubeconfig"]), 1);
        assert_eq!(f.provisioner.state("demo"), ClusterState::Ready);
    }

    #[tokio::test]
    async fn ensure_reuses_or_recreates() {
        let f = fixture().await;
        let cancel = CancellationToken::new();
        f.runner
            .on("kind", &["get", "clusters"], CommandOutput::ok("demo\n"));
        let spec = ClusterSpec::new("demo", 1);

        let (_, created) = f.provisioner.ensure(&spec, false, &cancel).await.unwrap();
        assert!(!created);
        assert_eq!(f.runner.count("kind", &["create"]), 0);

        let (_, created) = f.provisioner.ensure(&spec, true, &cancel).await.unwrap();
        assert!(created);
        assert_eq!(f.runner.count("kind", &["delete", "cluster"]), 1);
        assert_eq!(f.runner.count("kind", &["create", "cluster"]), 1);
    }

    #[tokio::test]
    async fn ensure_looks_the_cluster_up_once() {
        let f = fixture().await;
        let cancel = CancellationToken::new();

        let (_, created) = f
            .provisioner
            .ensure(&ClusterSpec::new("demo", 1), false, &cancel)
            .await
            .unwrap();
        assert!(created);
        assert_eq!(f.runner.count("kind", &["get", "clusters"]), 1);
    }

    #[tokio::test]
    async fn plan_create_writes_nothing() {
        let f = fixture().await;
        let dir = f.provisioner.config().kubeconfig_dir.join("plans");
        let provisioner = ClusterProvisioner::new(
            Arc::clone(&f.runner) as Arc<dyn CommandRunner>,
            Arc::clone(&f.connector) as Arc<dyn ClusterConnector>,
            ProvisionerConfig {
                kubeconfig_dir: dir.clone(),
                ..f.provisioner.config().clone()
            },
        );

        provisioner
            .plan_create(&ClusterSpec::new("demo", 1))
            .await
            .unwrap();

        assert_eq!(f.runner.count("kind", &["create", "cluster"]), 1);
        assert!(!dir.exists());
        assert_eq!(provisioner.state("demo"), ClusterState::Absent);
    }

    #[tokio::test]
    async fn plan_create_rejects_invalid_spec() {
        let f = fixture().await;
        let err = f
            .provisioner
            .plan_create(&ClusterSpec::new("demo", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSpec { .. }));
        assert!(f.runner.invocations().is_empty());
    }

    #[tokio::test]
    async fn delete_requires_existing_cluster_unless_forced() {
        let f = fixture().await;

        let err = f.provisioner.delete("ghost", false).await.unwrap_err();
        assert!(matches!(err, Error::ClusterNotFound(_)));

        f.provisioner.delete("ghost", true).await.unwrap();
        assert_eq!(f.runner.count("kind", &["delete"]), 0);
    }

    #[tokio::test]
    async fn delete_invalidates_handle() {
        let f = fixture().await;
        let cancel = CancellationToken::new();
        f.provisioner
            .create(&ClusterSpec::new("demo", 1), &cancel)
            .await
            .unwrap();

        f.provisioner.delete("demo", false).await.unwrap();
        assert_eq!(f.provisioner.state("demo"), ClusterState::Absent);
        assert!(f
            .provisioner
            .registry
            .fresh_handle("demo", Duration::from_secs(60))
            .is_none());
        assert!(!f.provisioner.config().provider_config_path("demo").exists());
    }

    #[tokio::test]
    async fn forced_delete_tolerates_absent_cluster_output() {
        let f = fixture().await;
        f.runner
            .on("kind", &["get", "clusters"], CommandOutput::ok("demo\n"));
        f.runner
            .fail("kind", &["delete", "cluster"], 1, "ERROR: no nodes found for cluster \"demo\"");

        assert!(f.provisioner.delete("demo", false).await.is_err());
        assert_eq!(f.provisioner.state("demo"), ClusterState::Failed);

        f.provisioner.delete("demo", true).await.unwrap();
        assert_eq!(f.provisioner.state("demo"), ClusterState::Absent);
    }

    #[tokio::test]
    async fn status_is_unknown_when_api_fails_and_idempotent() {
        let f = fixture().await;
        f.runner
            .on("kind", &["get", "clusters"], CommandOutput::ok("demo\n"));
        f.connector
            .client()
            .push_nodes(Err(ApiError::from_status(503, "unavailable")));

        let first = f.provisioner.status("demo").await.unwrap();
        let second = f.provisioner.status("demo").await.unwrap();
        assert_eq!(first.status, STATUS_UNKNOWN);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn status_reports_ready_over_total() {
        let f = fixture().await;
        f.runner
            .on("kind", &["get", "clusters"], CommandOutput::ok("demo\n"));
        f.connector.client().push_nodes(Ok(vec![
            NodeStatus::new("a", true),
            NodeStatus::new("b", false),
            NodeStatus::new("c", true),
        ]));

        let info = f.provisioner.status("demo").await.unwrap();
        assert_eq!(info.status, "2/3");
        assert_eq!(info.node_count, 3);
        assert_eq!(info.provider, ProviderKind::Kind);
    }

    #[tokio::test]
    async fn list_covers_every_cluster() {
        let f = fixture().await;
        f.runner
            .on("kind", &["get", "clusters"], CommandOutput::ok("alpha\nbeta\n"));

        let clusters = f.provisioner.list().await.unwrap();
        let names: Vec<&str> = clusters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert!(clusters.iter().all(|c| c.status == "1/1"));
    }

    #[tokio::test]
    async fn cancelled_create_reports_cancellation() {
        let f = fixture().await;
        f.connector.client().push_nodes(Ok(Vec::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = f
            .provisioner
            .create(&ClusterSpec::new("demo", 1), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
