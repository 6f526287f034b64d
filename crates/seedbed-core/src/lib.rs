//! Core types and utilities for seedbed.
//!
//! This crate provides the foundations shared by every stage of a
//! provisioning run:
//!
//! - **Types**: cluster and bundle specs, run-mode flags, status summaries
//! - **Errors**: the [`Error`] taxonomy and the [`OperationError`] context wrapper
//! - **Classification**: [`classify`] sorts failures into fatal, recoverable and
//!   soft-failable
//! - **Cancellation**: helpers every bounded wait loop uses
//!
//! # Example
//!
//! ```
//! use seedbed_core::{classify, Component, Disposition, Error, Operation};
//!
//! let err: Error = Error::ApplicationsNotReady {
//!     namespace: "argocd".into(),
//!     pending: vec!["web".into()],
//!     last_message: Some("dial tcp: lookup registry-1.docker.io: no such host (image pull)".into()),
//! }
//! .wrap(Component::ManagedApplications, Operation::Waiting)
//! .into();
//!
//! assert_eq!(classify(&err).disposition, Disposition::SoftFailable);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cancel;
pub mod classify;
pub mod error;
pub mod types;

pub use cancel::{ensure_active, sleep_or_cancel, CancellationToken};
pub use classify::{classify, Disposition, ErrorClassification, FailureShape};
pub use error::{
    ApiError, ApiErrorKind, Error, ErrorCategory, OperationError, ReadinessTier, Result,
};
pub use types::{
    ApplicationBundleSpec, ClusterInfo, ClusterSpec, Component, DeploymentMode, Operation,
    ProviderKind, RunMode, StatusInfo, DEFAULT_NODE_TAG, STATUS_UNKNOWN,
};
