//! Command-line arguments.

use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};

use seedbed_control::{InstallationRequest, OrchestratorConfig};
use seedbed_core::{ApplicationBundleSpec, ClusterSpec, DeploymentMode, ProviderKind, RunMode};

/// Provision an ephemeral cluster and roll out a GitOps application bundle.
#[derive(Parser, Debug)]
#[command(name = "seedbed")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Raise seedbed logging to debug and echo every external command.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create (or reuse) a cluster and install onto it.
    Up(UpArgs),
    /// Delete a cluster.
    Down {
        /// Cluster name.
        name: String,
        /// Succeed even if the cluster is already gone.
        #[arg(long)]
        force: bool,
    },
    /// List clusters across providers.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Show the status of a cluster and its releases.
    Status {
        /// Cluster name.
        name: String,
        /// Namespace the bundle was installed into.
        #[arg(long, default_value = "argocd")]
        bundle_namespace: String,
    },
}

#[derive(ClapArgs, Debug)]
pub struct UpArgs {
    /// Cluster name.
    #[arg(long, conflicts_with = "existing")]
    pub name: Option<String>,

    /// Install onto this existing cluster instead of creating one.
    #[arg(long)]
    pub existing: Option<String>,

    /// Number of nodes.
    #[arg(long)]
    pub nodes: Option<u32>,

    /// Cluster provider (kind or k3d).
    #[arg(long)]
    pub provider: Option<ProviderKind>,

    /// Kubernetes node image tag.
    #[arg(long = "k8s-version")]
    pub k8s_version: Option<String>,

    /// Git repository holding the application bundle.
    #[arg(long, env = "SEEDBED_BUNDLE_REPO")]
    pub bundle_repo: Option<String>,

    /// Branch or ref of the bundle repository.
    #[arg(long, default_value = "main")]
    pub bundle_ref: String,

    /// Chart path inside the bundle repository.
    #[arg(long, default_value = ".")]
    pub bundle_path: String,

    /// Namespace the bundle is installed into.
    #[arg(long, default_value = "argocd")]
    pub bundle_namespace: String,

    /// Bundle install timeout in seconds.
    #[arg(long, default_value_t = 600)]
    pub bundle_timeout: u64,

    /// Bundle values override, repeatable.
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub values: Vec<(String, String)>,

    /// Deployment flavour (standalone, shared or managed).
    #[arg(long, env = "SEEDBED_DEPLOYMENT_MODE")]
    pub deployment_mode: Option<DeploymentMode>,

    /// Recreate the cluster and reinstall releases that already exist.
    #[arg(long)]
    pub force: bool,

    /// Print commands instead of running them.
    #[arg(long)]
    pub dry_run: bool,

    /// No human at the terminal. Any `CI` value other than an empty or
    /// false-like one enables it.
    #[arg(long, env = "CI", value_parser = clap::builder::FalseyValueParser::new())]
    pub non_interactive: bool,
}

impl UpArgs {
    /// Build the orchestration request, filling gaps from `config`.
    pub fn to_request(&self, config: &OrchestratorConfig, verbose: bool) -> InstallationRequest {
        let run_mode = RunMode {
            force: self.force,
            dry_run: self.dry_run,
            verbose,
            non_interactive: self.non_interactive,
        };

        let mut request = if let Some(existing) = &self.existing {
            InstallationRequest::existing(existing.clone())
        } else {
            let mut spec = ClusterSpec::new(
                self.name
                    .clone()
                    .unwrap_or_else(|| config.default_cluster_name.clone()),
                self.nodes.unwrap_or(config.default_nodes),
            )
            .with_provider(self.provider.unwrap_or(config.default_provider));
            if let Some(version) = &self.k8s_version {
                spec = spec.with_version(version.clone());
            }
            InstallationRequest::create(spec)
        }
        .with_run_mode(run_mode);

        if let Some(mode) = self.deployment_mode {
            request = request.with_deployment_mode(mode);
        }

        if let Some(repo) = &self.bundle_repo {
            let mut bundle = ApplicationBundleSpec::new(
                repo.clone(),
                self.bundle_ref.clone(),
                self.bundle_path.clone(),
                self.bundle_namespace.clone(),
            );
            bundle.timeout = Duration::from_secs(self.bundle_timeout);
            for (key, value) in &self.values {
                bundle = bundle.with_value(key.clone(), value.clone());
            }
            request = request.with_bundle(bundle);
        }

        request
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{s}'"))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.trim().to_string(), value.to_string()))
}
