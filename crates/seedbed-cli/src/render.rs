//! Terminal output for outcomes and queries.

use std::fmt::Write as _;

use seedbed_control::{Guidance, Outcome};
use seedbed_core::{ClusterInfo, StatusInfo};
use seedbed_install::ReleaseAction;

const BANNER: &str = "==================== COMPLETED WITH WARNINGS ====================";

/// Render a run outcome for the terminal.
pub fn outcome(outcome: &Outcome) -> String {
    let mut out = String::new();
    match outcome {
        Outcome::Success(summary) => {
            let verb = if summary.created { "created" } else { "reused" };
            let _ = writeln!(out, "Cluster {} {verb}", summary.cluster);
            let _ = writeln!(out, "  control plane: {}", action(summary.install.control_plane));
            if let Some(bundle) = summary.install.bundle {
                let _ = writeln!(out, "  bundle:        {}", action(bundle));
            }
            if !summary.install.applications.is_empty() {
                let _ = writeln!(
                    out,
                    "  applications:  {}",
                    summary.install.applications.join(", ")
                );
            }
            let secs = (summary.finished_at - summary.started_at).num_seconds();
            let _ = writeln!(out, "Done in {secs}s (run {})", summary.run_id);
        }
        Outcome::SoftFailed {
            cluster,
            reason,
            guidance,
        } => {
            let _ = writeln!(out, "{BANNER}");
            let _ = writeln!(out, "Cluster {cluster} is up, but the rollout did not converge.");
            let _ = writeln!(out, "Reason: {reason}");
            let _ = write!(out, "{guidance}");
            let _ = writeln!(out, "{BANNER}");
        }
        Outcome::Fatal(e) => {
            let _ = writeln!(out, "error: {e}");
            let _ = write!(out, "{}", Guidance::for_error(e));
        }
    }
    out
}

const fn action(action: ReleaseAction) -> &'static str {
    match action {
        ReleaseAction::Installed => "installed",
        ReleaseAction::AlreadyInstalled => "already installed",
        ReleaseAction::Planned => "planned (dry run)",
    }
}

/// Render a cluster listing as a table.
pub fn cluster_table(clusters: &[ClusterInfo]) -> String {
    if clusters.is_empty() {
        return "No clusters found.\n".to_string();
    }
    let width = clusters.iter().map(|c| c.name.len()).max().unwrap_or(0).max(4);
    let mut out = format!("{:<width$}  {:<8}  {:<8}  NODES\n", "NAME", "PROVIDER", "READY");
    for c in clusters {
        let _ = writeln!(
            out,
            "{:<width$}  {:<8}  {:<8}  {}",
            c.name,
            c.provider.to_string(),
            c.status,
            c.node_count
        );
    }
    out
}

/// Render a release status line.
pub fn release(label: &str, status: &StatusInfo) -> String {
    if status.version.is_empty() {
        format!("{label:<14} {} ({})\n", status.status, status.namespace)
    } else {
        format!(
            "{label:<14} {} {} ({})\n",
            status.status, status.version, status.namespace
        )
    }
}
