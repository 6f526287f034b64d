//! Control-plane and application bundle rollout for seedbed.
//!
//! Installation runs in two ordered phases on a verified cluster:
//!
//! 1. **Control plane**: the GitOps controller chart, installed with helm
//!    and followed by a fixed stabilization delay on a fresh install.
//! 2. **Application bundle**: a chart fetched from a git branch, installed
//!    as a helm release, after which every managed application must report
//!    synced and healthy.
//!
//! Failures carry [`seedbed_core::OperationError`] context naming the
//! component and operation that failed.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use seedbed_cluster::{ClusterHandle, KubeConnector};
//! use seedbed_core::{ApplicationBundleSpec, CancellationToken};
//! use seedbed_exec::{ProcessRunner, RunnerFlags};
//! use seedbed_install::{ApplicationInstaller, InstallPlan, InstallerConfig};
//!
//! # async fn example(handle: ClusterHandle) -> seedbed_core::Result<()> {
//! let installer = ApplicationInstaller::new(
//!     Arc::new(ProcessRunner::new(RunnerFlags::default())),
//!     Arc::new(KubeConnector::default()),
//!     InstallerConfig::from_env(),
//! );
//!
//! let plan = InstallPlan {
//!     bundle: Some(ApplicationBundleSpec::new(
//!         "https://github.com/example/apps.git",
//!         "main",
//!         "charts/app-of-apps",
//!         "argocd",
//!     )),
//!     ..InstallPlan::default()
//! };
//! let report = installer.install(&handle, &plan, &CancellationToken::new()).await?;
//! println!("{} applications ready", report.applications.len());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bundle;
pub mod helm;
pub mod installer;
pub mod types;
pub mod wait;

pub use installer::ApplicationInstaller;
pub use types::{ControlPlaneChart, InstallPlan, InstallReport, InstallerConfig, ReleaseAction};
