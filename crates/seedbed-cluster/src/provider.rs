//! Provider-specific configuration and command lines.
//!
//! Each provider gets a declarative config file generated from the
//! [`ClusterSpec`] and a fixed set of command lines. Nothing here runs a
//! command; the provisioner feeds these to a `CommandRunner`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use seedbed_core::{ClusterSpec, Error, ProviderKind, Result};

const KIND_NODE_IMAGE: &str = "kindest/node";
const K3S_IMAGE: &str = "rancher/k3s";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KindConfig {
    kind: &'static str,
    api_version: &'static str,
    name: String,
    nodes: Vec<KindNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    networking: Option<KindNetworking>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    kubeadm_config_patches: Vec<String>,
}

#[derive(Debug, Serialize)]
struct KindNode {
    role: &'static str,
    image: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KindNetworking {
    api_server_address: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct K3dConfig {
    api_version: &'static str,
    kind: &'static str,
    metadata: K3dMetadata,
    servers: u32,
    agents: u32,
    image: String,
    options: K3dOptions,
}

#[derive(Debug, Serialize)]
struct K3dMetadata {
    name: String,
}

#[derive(Debug, Serialize)]
struct K3dOptions {
    k3s: K3sOptions,
    kubeconfig: K3dKubeconfigOptions,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct K3sOptions {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    extra_args: Vec<K3sArg>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct K3sArg {
    arg: String,
    node_filters: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct K3dKubeconfigOptions {
    update_default_kubeconfig: bool,
    switch_current_context: bool,
}

#[derive(Debug, Deserialize)]
struct K3dListEntry {
    name: String,
}

/// Render the provider config file for `spec`.
///
/// When `api_host` is set, the API server certificate also covers that host
/// so the rewritten kubeconfig still verifies.
///
/// # Errors
///
/// Returns `Error::Config` if serialization fails.
pub fn render_config(spec: &ClusterSpec, api_host: Option<&str>) -> Result<String> {
    let yaml = match spec.provider {
        ProviderKind::Kind => serde_yaml::to_string(&kind_config(spec, api_host)),
        ProviderKind::K3d => serde_yaml::to_string(&k3d_config(spec, api_host)),
    };
    yaml.map_err(|e| Error::Config(format!("failed to render {} config: {e}", spec.provider)))
}

fn kind_config(spec: &ClusterSpec, api_host: Option<&str>) -> KindConfig {
    let image = format!("{KIND_NODE_IMAGE}:{}", spec.version_or_default());
    let mut nodes = vec![KindNode {
        role: "control-plane",
        image: image.clone(),
    }];
    for _ in 1..spec.nodes {
        nodes.push(KindNode {
            role: "worker",
            image: image.clone(),
        });
    }

    let (networking, kubeadm_config_patches) = match api_host {
        Some(host) => (
            Some(KindNetworking {
                api_server_address: "0.0.0.0".to_string(),
            }),
            vec![format!(
                "kind: ClusterConfiguration\napiServer:\n  certSANs:\n  - \"{host}\"\n  - \"127.0.0.1\"\n  - \"localhost\"\n"
            )],
        ),
        None => (None, Vec::new()),
    };

    KindConfig {
        kind: "Cluster",
        api_version: "kind.x-k8s.io/v1alpha4",
        name: spec.name.clone(),
        nodes,
        networking,
        kubeadm_config_patches,
    }
}

fn k3d_config(spec: &ClusterSpec, api_host: Option<&str>) -> K3dConfig {
    let extra_args = api_host
        .map(|host| {
            vec![K3sArg {
                arg: format!("--tls-san={host}"),
                node_filters: vec!["server:*"],
            }]
        })
        .unwrap_or_default();

    K3dConfig {
        api_version: "k3d.io/v1alpha5",
        kind: "Simple",
        metadata: K3dMetadata {
            name: spec.name.clone(),
        },
        servers: 1,
        agents: spec.nodes.saturating_sub(1),
        image: format!("{K3S_IMAGE}:{}", k3s_tag(spec.version_or_default())),
        options: K3dOptions {
            k3s: K3sOptions { extra_args },
            kubeconfig: K3dKubeconfigOptions {
                update_default_kubeconfig: false,
                switch_current_context: false,
            },
        },
    }
}

/// k3s images carry a `-k3sN` suffix on the upstream Kubernetes tag.
fn k3s_tag(version: &str) -> String {
    if version.contains("-k3s") {
        version.to_string()
    } else {
        format!("{version}-k3s1")
    }
}

fn strings<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

/// Command lines that create a cluster and leave its kubeconfig at `kubeconfig`.
#[must_use]
pub fn create_commands(
    spec: &ClusterSpec,
    config_path: &Path,
    kubeconfig: &Path,
) -> Vec<Vec<String>> {
    match spec.provider {
        ProviderKind::Kind => vec![strings([
            "create",
            "cluster",
            "--name",
            spec.name.as_str(),
            "--config",
            path_arg(config_path).as_str(),
            "--kubeconfig",
            path_arg(kubeconfig).as_str(),
        ])],
        ProviderKind::K3d => vec![
            strings(["cluster", "create", "--config", path_arg(config_path).as_str()]),
            export_kubeconfig_args(ProviderKind::K3d, &spec.name, kubeconfig),
        ],
    }
}

/// Command line that (re)writes the kubeconfig of an existing cluster.
#[must_use]
pub fn export_kubeconfig_args(provider: ProviderKind, name: &str, kubeconfig: &Path) -> Vec<String> {
    match provider {
        ProviderKind::Kind => strings([
            "export",
            "kubeconfig",
            "--name",
            name,
            "--kubeconfig",
            path_arg(kubeconfig).as_str(),
        ]),
        ProviderKind::K3d => strings([
            "kubeconfig",
            "write",
            name,
            "--output",
            path_arg(kubeconfig).as_str(),
            "--overwrite",
        ]),
    }
}

/// Command line that deletes a cluster.
#[must_use]
pub fn delete_args(provider: ProviderKind, name: &str) -> Vec<String> {
    match provider {
        ProviderKind::Kind => strings(["delete", "cluster", "--name", name]),
        ProviderKind::K3d => strings(["cluster", "delete", name]),
    }
}

/// Command line that lists clusters.
#[must_use]
pub fn list_args(provider: ProviderKind) -> Vec<String> {
    match provider {
        ProviderKind::Kind => strings(["get", "clusters"]),
        ProviderKind::K3d => strings(["cluster", "list", "-o", "json"]),
    }
}

/// Parse the output of [`list_args`].
///
/// # Errors
///
/// Returns `Error::Config` if k3d's JSON output cannot be parsed.
pub fn parse_list(provider: ProviderKind, stdout: &str) -> Result<Vec<String>> {
    match provider {
        // "No kind clusters found." goes to stderr, so stdout is just names
        ProviderKind::Kind => Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()),
        ProviderKind::K3d => {
            if stdout.trim().is_empty() {
                return Ok(Vec::new());
            }
            let entries: Vec<K3dListEntry> = serde_json::from_str(stdout)
                .map_err(|e| Error::Config(format!("unexpected k3d cluster list output: {e}")))?;
            Ok(entries.into_iter().map(|e| e.name).collect())
        }
    }
}
