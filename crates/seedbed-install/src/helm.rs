//! Helm command lines and release status parsing.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use seedbed_cluster::ClusterHandle;
use seedbed_core::{Error, Result, StatusInfo};

use crate::types::ControlPlaneChart;

/// Program name.
pub const HELM: &str = "helm";

/// Status reported for a release helm does not know.
pub const STATUS_NOT_INSTALLED: &str = "not-installed";

/// Arguments that point helm at the handle's cluster.
#[must_use]
pub fn connection_args(handle: &ClusterHandle) -> Vec<String> {
    vec![
        "--kube-context".to_string(),
        handle.context.clone(),
        "--kubeconfig".to_string(),
        handle.kubeconfig.display().to_string(),
    ]
}

/// `helm repo add` for the control-plane chart repository.
#[must_use]
pub fn repo_add_args(chart: &ControlPlaneChart) -> Vec<String> {
    vec![
        "repo".to_string(),
        "add".to_string(),
        chart.repo_name.clone(),
        chart.repo_url.clone(),
        "--force-update".to_string(),
    ]
}

/// A release to install or upgrade.
#[derive(Debug, Clone)]
pub struct Release<'a> {
    /// Release name.
    pub name: &'a str,
    /// Chart reference or local chart directory.
    pub chart: &'a str,
    /// Target namespace.
    pub namespace: &'a str,
    /// Chart version, for repository charts.
    pub version: Option<&'a str>,
    /// `--wait` timeout.
    pub timeout: Duration,
    /// `--set` overrides, applied in key order.
    pub values: &'a BTreeMap<String, String>,
}

/// `helm upgrade --install` for a release.
#[must_use]
pub fn upgrade_args(release: &Release<'_>, handle: &ClusterHandle) -> Vec<String> {
    let mut args = vec![
        "upgrade".to_string(),
        "--install".to_string(),
        release.name.to_string(),
        release.chart.to_string(),
        "--namespace".to_string(),
        release.namespace.to_string(),
        "--create-namespace".to_string(),
        "--wait".to_string(),
        "--timeout".to_string(),
        format!("{}s", release.timeout.as_secs()),
    ];
    if let Some(version) = release.version {
        args.push("--version".to_string());
        args.push(version.to_string());
    }
    for (key, value) in release.values {
        args.push("--set".to_string());
        args.push(format!("{key}={value}"));
    }
    args.extend(connection_args(handle));
    args
}

/// `helm dependency build` for a local chart.
#[must_use]
pub fn dependency_build_args(chart_dir: &Path, handle: &ClusterHandle) -> Vec<String> {
    let mut args = vec![
        "dependency".to_string(),
        "build".to_string(),
        chart_dir.display().to_string(),
    ];
    args.extend(connection_args(handle));
    args
}

/// `helm status -o json` for a release.
#[must_use]
pub fn status_args(release: &str, namespace: &str, handle: &ClusterHandle) -> Vec<String> {
    let mut args = vec![
        "status".to_string(),
        release.to_string(),
        "--namespace".to_string(),
        namespace.to_string(),
        "-o".to_string(),
        "json".to_string(),
    ];
    args.extend(connection_args(handle));
    args
}

/// Returns true if helm's stderr says the release does not exist.
#[must_use]
pub fn is_release_missing(stderr: &str) -> bool {
    stderr.to_lowercase().contains("release: not found")
}

#[derive(Debug, Deserialize)]
struct ReleaseStatus {
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    version: u64,
    info: ReleaseInfo,
    #[serde(default)]
    chart: Option<ReleaseChart>,
}

#[derive(Debug, Deserialize)]
struct ReleaseInfo {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ReleaseChart {
    metadata: ChartMetadata,
}

#[derive(Debug, Deserialize)]
struct ChartMetadata {
    #[serde(default)]
    version: Option<String>,
}

/// Parse `helm status -o json`.
///
/// # Errors
///
/// Returns `Error::Config` if the output is not a helm release document.
pub fn parse_status(json: &str) -> Result<StatusInfo> {
    let status: ReleaseStatus = serde_json::from_str(json)
        .map_err(|e| Error::Config(format!("unexpected helm status output: {e}")))?;

    let version = status
        .chart
        .and_then(|c| c.metadata.version)
        .unwrap_or_else(|| format!("revision {}", status.version));

    Ok(StatusInfo {
        name: status.name,
        namespace: status.namespace,
        status: status.info.status,
        version,
    })
}

/// `StatusInfo` for a release helm does not know.
#[must_use]
pub fn not_installed(release: &str, namespace: &str) -> StatusInfo {
    StatusInfo {
        name: release.to_string(),
        namespace: namespace.to_string(),
        status: STATUS_NOT_INSTALLED.to_string(),
        version: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use seedbed_cluster::ApiEndpoint;
    use seedbed_core::ProviderKind;

    use super::*;

    fn handle() -> ClusterHandle {
        ClusterHandle::verified_for_tests(
            "demo",
            ProviderKind::Kind,
            ApiEndpoint::new("127.0.0.1", 6443),
        )
    }

    #[test]
    fn upgrade_args_include_values_and_connection() {
        let values = BTreeMap::from([
            ("b.key".to_string(), "2".to_string()),
            ("a.key".to_string(), "1".to_string()),
        ]);
        let release = Release {
            name: "argocd",
            chart: "argo/argo-cd",
            namespace: "argocd",
            version: Some("7.7.0"),
            timeout: Duration::from_secs(600),
            values: &values,
        };

        let args = upgrade_args(&release, &handle());
        let line = args.join(" ");
        assert!(line.starts_with("upgrade --install argocd argo/argo-cd --namespace argocd"));
        assert!(line.contains("--timeout 600s"));
        assert!(line.contains("--version 7.7.0"));
        assert!(line.contains("--set a.key=1 --set b.key=2"));
        assert!(line.contains("--kube-context kind-demo"));
    }

    #[test]
    fn parses_deployed_release() {
        let json = r#"{
            "name": "argocd",
            "namespace": "argocd",
            "version": 3,
            "info": {"status": "deployed", "description": "Upgrade complete"},
            "chart": {"metadata": {"name": "argo-cd", "version": "7.7.0"}}
        }"#;
        let status = parse_status(json).unwrap();
        assert_eq!(
            status,
            StatusInfo {
                name: "argocd".into(),
                namespace: "argocd".into(),
                status: "deployed".into(),
                version: "7.7.0".into(),
            }
        );
    }

    #[test]
    fn falls_back_to_revision() {
        let json = r#"{"name": "apps", "version": 2, "info": {"status": "failed"}}"#;
        let status = parse_status(json).unwrap();
        assert_eq!(status.status, "failed");
        assert_eq!(status.version, "revision 2");
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(parse_status("not json"), Err(Error::Config(_))));
    }

    #[test]
    fn missing_release_detection() {
        assert!(is_release_missing("Error: release: not found"));
        assert!(!is_release_missing("Error: Kubernetes cluster unreachable"));
    }
}
