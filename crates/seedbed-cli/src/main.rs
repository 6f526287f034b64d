//! Seedbed CLI - ephemeral cluster provisioning.
//!
//! This is the entry point for the `seedbed` binary.

mod args;
mod render;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seedbed_cluster::KubeConnector;
use seedbed_control::{OrchestrationService, Orchestrator, OrchestratorConfig};
use seedbed_core::{CancellationToken, Component};
use seedbed_exec::{ProcessRunner, RunnerFlags};

use args::{Args, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            trigger.cancel();
        }
    });

    match run(args, &cancel).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(if cancel.is_cancelled() { 130 } else { 1 })
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "info,seedbed=debug"
    } else {
        "info,seedbed=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(args: Args, cancel: &CancellationToken) -> anyhow::Result<u8> {
    let config = OrchestratorConfig::from_env();
    let dry_run = matches!(&args.command, Command::Up(up) if up.dry_run);
    let runner = ProcessRunner::new(RunnerFlags {
        dry_run,
        verbose: args.verbose,
    });
    let service = OrchestrationService::new(
        Arc::new(runner),
        Arc::new(KubeConnector::default()),
        config.clone(),
    );

    match args.command {
        Command::Up(up) => {
            let request = up.to_request(&config, args.verbose);
            let outcome = service.run(&request, cancel).await;
            let text = render::outcome(&outcome);
            if outcome.error().is_some() {
                eprint!("{text}");
            } else {
                print!("{text}");
            }
            u8::try_from(outcome.exit_code()).context("exit code out of range")
        }
        Command::Down { name, force } => {
            service
                .provisioner()
                .delete(&name, force)
                .await
                .with_context(|| format!("deleting cluster {name}"))?;
            println!("Cluster {name} deleted");
            Ok(0)
        }
        Command::List { json } => {
            let clusters = service
                .provisioner()
                .list()
                .await
                .context("listing clusters")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&clusters)?);
            } else {
                print!("{}", render::cluster_table(&clusters));
            }
            Ok(0)
        }
        Command::Status {
            name,
            bundle_namespace,
        } => {
            let info = service
                .provisioner()
                .status(&name)
                .await
                .with_context(|| format!("querying cluster {name}"))?;
            println!(
                "{:<14} {} {} ({} nodes)",
                "cluster", info.provider, info.status, info.node_count
            );

            // Releases can only be queried on a reachable cluster
            match service.provisioner().get_handle(&name, cancel).await {
                Ok(handle) => {
                    for (label, component, namespace) in [
                        ("control-plane", Component::ControlPlane, None),
                        (
                            "bundle",
                            Component::ApplicationBundle,
                            Some(bundle_namespace.as_str()),
                        ),
                    ] {
                        let status = service
                            .installer()
                            .get_status(&handle, component, namespace)
                            .await
                            .with_context(|| format!("querying {component} release"))?;
                        print!("{}", render::release(label, &status));
                    }
                }
                Err(e) => {
                    tracing::debug!(cluster = %name, error = %e, "Cluster not reachable, skipping releases");
                }
            }
            Ok(0)
        }
    }
}
