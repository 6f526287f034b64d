//! Provisioning orchestration for seedbed.
//!
//! This crate sequences the whole run: provision (or reuse) a cluster,
//! install the control plane and the application bundle, then decide how
//! the run ended.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐     ┌──────────────────────┐
//! │ ClusterProvisioner │────▶│ ApplicationInstaller │
//! └────────────────────┘     └──────────┬───────────┘
//!                                       │ error
//!                            ┌──────────▼───────────┐
//!                            │    SoftFailPolicy    │
//!                            └──────────┬───────────┘
//!                                       ▼
//!           Success | SoftFailed(reason, guidance) | Fatal(error)
//! ```
//!
//! Provisioning failures are always fatal. Install failures are soft-failed
//! only for non-interactive runs on an allow-listed platform, and only when
//! the error matches a recognized infrastructure shape.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use seedbed_cluster::KubeConnector;
//! use seedbed_control::{InstallationRequest, OrchestrationService, Orchestrator, OrchestratorConfig};
//! use seedbed_core::CancellationToken;
//! use seedbed_exec::{ProcessRunner, RunnerFlags};
//!
//! # async fn example() {
//! let config = OrchestratorConfig::from_env();
//! let request = InstallationRequest::create(config.default_spec());
//! let service = OrchestrationService::new(
//!     Arc::new(ProcessRunner::new(RunnerFlags::default())),
//!     Arc::new(KubeConnector::default()),
//!     config,
//! );
//!
//! let outcome = service.run(&request, &CancellationToken::new()).await;
//! std::process::exit(outcome.exit_code());
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod guidance;
pub mod policy;
pub mod service;
pub mod types;

pub use guidance::Guidance;
pub use policy::{HostPlatform, SoftFailPolicy};
pub use service::{OrchestrationService, Orchestrator};
pub use types::{
    ClusterTarget, InstallationRequest, OrchestratorConfig, Outcome, RunSummary,
};
