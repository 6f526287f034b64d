//! Ephemeral cluster provisioning for seedbed.
//!
//! This crate creates local Kubernetes clusters through a provider CLI
//! (`kind` or `k3d`) and verifies they are usable before anything is
//! installed on them.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────┐   CommandRunner   ┌──────────────┐
//! │ ClusterProvisioner │──────────────────▶│ kind / k3d   │
//! └─────────┬──────────┘                   └──────────────┘
//!           │ ClusterConnector
//!           ▼
//! ┌────────────────────┐   TCP + list nodes
//! │  ClusterApiClient  │──────────────────▶ API server
//! └────────────────────┘
//! ```
//!
//! A [`ClusterHandle`] is only returned after the API endpoint accepted a TCP
//! connection and listed at least one Ready node.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use seedbed_cluster::{ClusterProvisioner, KubeConnector, ProvisionerConfig};
//! use seedbed_core::{CancellationToken, ClusterSpec};
//! use seedbed_exec::{ProcessRunner, RunnerFlags};
//!
//! # async fn example() -> seedbed_core::Result<()> {
//! let provisioner = ClusterProvisioner::new(
//!     Arc::new(ProcessRunner::new(RunnerFlags::default())),
//!     Arc::new(KubeConnector::default()),
//!     ProvisionerConfig::from_env(),
//! );
//!
//! let handle = provisioner
//!     .create(&ClusterSpec::new("demo", 3), &CancellationToken::new())
//!     .await?;
//! println!("cluster API at {}", handle.endpoint.authority());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod handle;
pub mod kubeconfig;
pub mod lifecycle;
pub mod provider;
pub mod provisioner;
pub mod readiness;
pub mod types;

pub use client::{
    ClusterApiClient, ClusterConnector, KubeApiClient, KubeConnector, ManagedApplication,
    NodeStatus,
};
pub use handle::{ApiEndpoint, ClusterHandle, ClusterRegistry, TlsPolicy};
pub use lifecycle::ClusterState;
pub use provisioner::ClusterProvisioner;
pub use readiness::{verify_reachable, NodeReadiness};
pub use types::{ProvisionerConfig, ReadinessConfig};

#[cfg(any(test, feature = "test-utils"))]
pub use client::mock::{MockApiClient, MockConnector};
