//! Human-readable guidance for failed and soft-failed runs.

use std::fmt;

use serde::Serialize;

use seedbed_core::{classify, Component, Disposition, Error, ErrorClassification};

/// What went wrong and what to do about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Guidance {
    /// One-line summary.
    pub summary: String,
    /// Most likely root cause, when the failure shape is recognized.
    pub likely_cause: Option<String>,
    /// Commands that help diagnose the failure.
    pub diagnostics: Vec<String>,
    /// How to retry.
    pub retry: Vec<String>,
}

impl Guidance {
    /// Guidance for `err`, classifying it first.
    #[must_use]
    pub fn for_error(err: &Error) -> Self {
        Self::from_classification(err, &classify(err))
    }

    /// Guidance for `err` from an existing classification.
    #[must_use]
    pub fn from_classification(err: &Error, classification: &ErrorClassification) -> Self {
        let location = match (&classification.component, &classification.operation) {
            (Some(component), Some(operation)) => format!("{component} {operation}"),
            (Some(component), None) => component.to_string(),
            _ => "run".to_string(),
        };
        let on_cluster = classification
            .cluster
            .as_deref()
            .map(|c| format!(" on cluster {c}"))
            .unwrap_or_default();

        let summary = match classification.disposition {
            Disposition::SoftFailable => {
                format!("Completed with warnings: {location} did not finish{on_cluster}")
            }
            Disposition::Recoverable => {
                format!("{location} failed{on_cluster}, retrying may succeed")
            }
            Disposition::Fatal if err.is_cancelled() => format!("{location} cancelled{on_cluster}"),
            Disposition::Fatal => format!("{location} failed{on_cluster}"),
        };

        Self {
            summary,
            likely_cause: classification
                .shape
                .map(|shape| shape.likely_cause().to_string()),
            diagnostics: classification.remediation.clone(),
            retry: retry_steps(classification),
        }
    }
}

fn retry_steps(classification: &ErrorClassification) -> Vec<String> {
    let Some(cluster) = classification.cluster.as_deref() else {
        return Vec::new();
    };
    match classification.component {
        Some(Component::ManagedApplications | Component::ApplicationBundle) => vec![format!(
            "seedbed up --existing {cluster} --bundle-repo <repo> (reuses the cluster and control plane)"
        )],
        Some(Component::ControlPlane) => {
            vec![format!("seedbed up --existing {cluster} --force")]
        }
        Some(Component::Cluster) => vec![
            format!("seedbed down {cluster} --force"),
            format!("seedbed up --name {cluster}"),
        ],
        Some(Component::Orchestrator) | None => Vec::new(),
    }
}

impl fmt::Display for Guidance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.summary)?;
        if let Some(cause) = &self.likely_cause {
            writeln!(f, "Likely cause: {cause}")?;
        }
        if !self.diagnostics.is_empty() {
            writeln!(f, "Diagnose with:")?;
            for step in &self.diagnostics {
                writeln!(f, "  {step}")?;
            }
        }
        if !self.retry.is_empty() {
            writeln!(f, "Retry with:")?;
            for step in &self.retry {
                writeln!(f, "  {step}")?;
            }
        }
        Ok(())
    }
}
