//! End-to-end runs against scripted commands and a scripted cluster API.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use seedbed_cluster::{
    ApiEndpoint, ClusterConnector, ManagedApplication, MockConnector, ProvisionerConfig,
    ReadinessConfig,
};
use seedbed_control::{
    HostPlatform, InstallationRequest, OrchestrationService, Orchestrator, OrchestratorConfig,
    Outcome, SoftFailPolicy,
};
use seedbed_core::{
    ApplicationBundleSpec, CancellationToken, ClusterSpec, Component, DeploymentMode, Error,
    ProviderKind, RunMode,
};
use seedbed_exec::{CommandOutput, CommandRunner, MockRunner};
use seedbed_install::{InstallerConfig, ReleaseAction};

const DNS_MESSAGE: &str =
    "Failed to pull image \"ghcr.io/acme/web:1.4\": dial tcp: lookup ghcr.io on 10.255.255.254:53: no such host";

struct Harness {
    runner: Arc<MockRunner>,
    connector: Arc<MockConnector>,
    service: OrchestrationService,
    _listener: TcpListener,
    dir: tempfile::TempDir,
}

async fn harness_with(platform: HostPlatform, delete_on_provision_failure: bool) -> Harness {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let dir = tempfile::tempdir().unwrap();

    let runner = Arc::new(MockRunner::new());
    let connector = Arc::new(MockConnector::new(ApiEndpoint::new("127.0.0.1", port)));
    let config = OrchestratorConfig {
        delete_on_provision_failure,
        provisioner: ProvisionerConfig {
            kubeconfig_dir: dir.path().to_path_buf(),
            readiness: ReadinessConfig::fast(3, 3),
            providers: vec![ProviderKind::Kind],
            ..ProvisionerConfig::default()
        },
        installer: InstallerConfig {
            stabilization: Duration::ZERO,
            app_wait_attempts: 2,
            app_wait_interval: Duration::from_millis(5),
            ..InstallerConfig::default()
        },
        ..OrchestratorConfig::default()
    };

    let service = OrchestrationService::new(
        Arc::clone(&runner) as Arc<dyn CommandRunner>,
        Arc::clone(&connector) as Arc<dyn ClusterConnector>,
        config,
    )
    .with_policy(SoftFailPolicy::new(platform));

    Harness {
        runner,
        connector,
        service,
        _listener: listener,
        dir,
    }
}

async fn harness(platform: HostPlatform) -> Harness {
    harness_with(platform, false).await
}

fn bundle() -> ApplicationBundleSpec {
    ApplicationBundleSpec::new(
        "https://github.com/example/apps.git",
        "main",
        "charts/app-of-apps",
        "argocd",
    )
}

fn app(name: &str, health: &str, message: Option<&str>) -> ManagedApplication {
    ManagedApplication {
        name: name.to_string(),
        sync: "Synced".to_string(),
        health: health.to_string(),
        message: message.map(str::to_string),
    }
}

fn ci_request() -> InstallationRequest {
    InstallationRequest::create(ClusterSpec::new("demo", 1))
        .with_bundle(bundle())
        .with_run_mode(RunMode::ci())
        .with_deployment_mode(DeploymentMode::Standalone)
}

// Scenario A
#[tokio::test]
async fn create_returns_usable_handle_after_one_poll() {
    let h = harness(HostPlatform::Linux).await;

    let handle = h
        .service
        .provisioner()
        .create(&ClusterSpec::new("demo", 1), &CancellationToken::new())
        .await
        .unwrap();

    assert!(handle.is_verified());
    assert_eq!(h.connector.client().node_calls(), 1);
    assert_eq!(h.runner.count("kind", &["create", "cluster"]), 1);
}

#[tokio::test]
async fn full_run_succeeds() {
    let h = harness(HostPlatform::Linux).await;
    h.connector
        .client()
        .push_applications(Ok(vec![app("web", "Healthy", None)]));

    let outcome = h.service.run(&ci_request(), &CancellationToken::new()).await;

    let Outcome::Success(summary) = outcome else {
        panic!("expected success, got {outcome:?}");
    };
    assert_eq!(summary.cluster, "demo");
    assert!(summary.created);
    assert_eq!(summary.install.control_plane, ReleaseAction::Installed);
    assert_eq!(summary.install.bundle, Some(ReleaseAction::Installed));
    assert_eq!(summary.install.applications, vec!["web"]);
    assert!(summary.finished_at >= summary.started_at);
}

// Scenario B
#[tokio::test]
async fn control_plane_failure_skips_bundle() {
    let h = harness(HostPlatform::WindowsWsl).await;
    h.runner.fail(
        "helm",
        &["upgrade", "--install", "argocd"],
        1,
        "Error: INSTALLATION FAILED: context deadline exceeded",
    );

    let outcome = h.service.run(&ci_request(), &CancellationToken::new()).await;

    let err = outcome.error().expect("fatal outcome");
    let ctx = err.operation_context().unwrap();
    assert_eq!(ctx.component, Component::ControlPlane);
    assert_eq!(ctx.cluster.as_deref(), Some("demo"));
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(h.runner.count("git", &["clone"]), 0);
    assert_eq!(
        h.runner.count("helm", &["upgrade", "--install", "seedbed-apps"]),
        0
    );
}

// Scenario C
#[tokio::test]
async fn missing_branch_surfaces_unwrapped() {
    let h = harness(HostPlatform::WindowsWsl).await;
    h.runner.fail(
        "git",
        &["clone"],
        128,
        "warning: Could not find remote branch main to clone.\nfatal: Remote branch main not found in upstream origin",
    );

    let outcome = h.service.run(&ci_request(), &CancellationToken::new()).await;

    assert!(matches!(
        outcome,
        Outcome::Fatal(Error::BranchNotFound { ref reference, .. }) if reference == "main"
    ));
}

// Scenario D
#[tokio::test]
async fn registry_dns_failure_soft_fails_in_ci_on_wsl() {
    let h = harness(HostPlatform::WindowsWsl).await;
    h.connector
        .client()
        .push_applications(Ok(vec![app("web", "Degraded", Some(DNS_MESSAGE))]));

    let outcome = h.service.run(&ci_request(), &CancellationToken::new()).await;

    let Outcome::SoftFailed {
        ref cluster,
        ref reason,
        ref guidance,
    } = outcome
    else {
        panic!("expected soft-fail, got {outcome:?}");
    };
    assert_eq!(cluster, "demo");
    assert!(reason.contains("no such host"));
    assert!(guidance.summary.starts_with("Completed with warnings"));
    assert!(guidance.likely_cause.is_some());
    assert!(!guidance.diagnostics.is_empty());
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(
        h.runner.count("helm", &["upgrade", "--install", "seedbed-apps"]),
        1
    );
}

// Scenario E
#[tokio::test]
async fn same_failure_is_fatal_when_interactive() {
    let h = harness(HostPlatform::WindowsWsl).await;
    h.connector
        .client()
        .push_applications(Ok(vec![app("web", "Degraded", Some(DNS_MESSAGE))]));

    let request = ci_request().with_run_mode(RunMode::interactive());
    let outcome = h.service.run(&request, &CancellationToken::new()).await;

    let err = outcome.error().expect("fatal outcome");
    let ctx = err.operation_context().unwrap();
    assert_eq!(ctx.component, Component::ManagedApplications);
    assert!(matches!(*ctx.source, Error::ApplicationsNotReady { .. }));
    assert!(err.to_string().contains("no such host"));
    assert!(!err.is_recoverable());
}

#[tokio::test]
async fn soft_fail_needs_allow_listed_platform() {
    let h = harness(HostPlatform::Linux).await;
    h.connector
        .client()
        .push_applications(Ok(vec![app("web", "Degraded", Some(DNS_MESSAGE))]));

    let outcome = h.service.run(&ci_request(), &CancellationToken::new()).await;
    assert!(matches!(outcome, Outcome::Fatal(_)));
}

#[tokio::test]
async fn ci_without_deployment_mode_runs_nothing() {
    let h = harness(HostPlatform::WindowsWsl).await;
    let request = InstallationRequest::create(ClusterSpec::new("demo", 1))
        .with_run_mode(RunMode::ci());

    let outcome = h.service.run(&request, &CancellationToken::new()).await;

    assert!(matches!(outcome, Outcome::Fatal(Error::Config(_))));
    assert!(h.runner.invocations().is_empty());
}

#[tokio::test]
async fn provisioning_failure_is_never_soft_failed() {
    let h = harness(HostPlatform::WindowsWsl).await;
    h.runner.fail(
        "kind",
        &["create", "cluster"],
        1,
        "ERROR: failed to pull image \"kindest/node\": lookup registry-1.docker.io: no such host",
    );

    let outcome = h.service.run(&ci_request(), &CancellationToken::new()).await;

    let err = outcome.error().expect("fatal outcome");
    assert_eq!(err.operation_context().unwrap().component, Component::Cluster);
    assert_eq!(h.runner.count("helm", &["upgrade"]), 0);
    // Cleanup is opt-in
    assert_eq!(h.runner.count("kind", &["delete", "cluster"]), 0);
}

#[tokio::test]
async fn failed_create_is_cleaned_up_when_enabled() {
    let h = harness_with(HostPlatform::Linux, true).await;
    h.runner
        .fail("kind", &["create", "cluster"], 1, "ERROR: failed to create cluster");

    let outcome = h.service.run(&ci_request(), &CancellationToken::new()).await;

    assert!(matches!(outcome, Outcome::Fatal(_)));
    assert_eq!(h.runner.count("kind", &["delete", "cluster"]), 1);
}

#[tokio::test]
async fn existing_cluster_is_reused() {
    let h = harness(HostPlatform::Linux).await;
    h.runner
        .on("kind", &["get", "clusters"], CommandOutput::ok("demo\n"));

    let request = InstallationRequest::create(ClusterSpec::new("demo", 1));
    let outcome = h.service.run(&request, &CancellationToken::new()).await;

    let Outcome::Success(summary) = outcome else {
        panic!("expected success, got {outcome:?}");
    };
    assert!(!summary.created);
    assert_eq!(summary.install.bundle, None);
    assert_eq!(h.runner.count("kind", &["create"]), 0);
    assert_eq!(h.runner.count("kind", &["export", "kubeconfig"]), 1);
}

#[tokio::test]
async fn unknown_existing_cluster_is_fatal() {
    let h = harness(HostPlatform::Linux).await;

    let outcome = h
        .service
        .run(&InstallationRequest::existing("ghost"), &CancellationToken::new())
        .await;

    assert!(matches!(outcome, Outcome::Fatal(Error::ClusterNotFound(ref n)) if n == "ghost"));
}

#[tokio::test]
async fn dry_run_plans_everything_and_waits_for_nothing() {
    let h = harness(HostPlatform::Linux).await;
    let mut run_mode = RunMode::interactive();
    run_mode.dry_run = true;
    let request = InstallationRequest::create(ClusterSpec::new("demo", 1))
        .with_bundle(bundle())
        .with_run_mode(run_mode);

    let outcome = h.service.run(&request, &CancellationToken::new()).await;

    let Outcome::Success(summary) = outcome else {
        panic!("expected success, got {outcome:?}");
    };
    assert_eq!(summary.install.control_plane, ReleaseAction::Planned);
    assert_eq!(summary.install.bundle, Some(ReleaseAction::Planned));
    assert_eq!(h.runner.count("kind", &["create", "cluster"]), 1);
    assert_eq!(h.connector.client().node_calls(), 0);
    assert_eq!(h.connector.connects(), 0);
    // Provider config is logged, not written
    assert_eq!(std::fs::read_dir(h.dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn blank_cluster_name_falls_back_to_default() {
    let h = harness(HostPlatform::Linux).await;

    for name in ["", "   "] {
        let outcome = h
            .service
            .run(
                &InstallationRequest::create(ClusterSpec::new(name, 1)),
                &CancellationToken::new(),
            )
            .await;

        let Outcome::Success(summary) = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert_eq!(summary.cluster, "seedbed");
    }
    let create = h.runner.last("kind", &["create", "cluster"]).unwrap();
    assert!(create.args.iter().any(|a| a == "seedbed"));
}

#[tokio::test]
async fn create_looks_up_existing_clusters_once() {
    let h = harness(HostPlatform::Linux).await;

    let outcome = h
        .service
        .run(
            &InstallationRequest::create(ClusterSpec::new("demo", 1)),
            &CancellationToken::new(),
        )
        .await;

    assert!(outcome.is_success());
    assert_eq!(h.runner.count("kind", &["get", "clusters"]), 1);
}

#[tokio::test]
async fn cancellation_is_fatal_and_exits_130() {
    let h = harness(HostPlatform::WindowsWsl).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = h.service.run(&ci_request(), &cancel).await;

    let err = outcome.error().expect("fatal outcome");
    assert!(err.is_cancelled());
    assert_eq!(outcome.exit_code(), 130);
}
