//! External command execution for seedbed.
//!
//! Every interaction with cluster tooling (`kind`, `k3d`, `helm`, `git`) goes
//! through the [`CommandRunner`] trait, so the provisioning and install logic
//! never depends on a concrete process type.
//!
//! - [`ProcessRunner`] spawns real child processes, or only logs them in
//!   dry-run mode.
//! - `MockRunner` (behind the `test-utils` feature) answers from scripted
//!   rules and records every invocation.
//!
//! # Example
//!
//! ```no_run
//! use seedbed_exec::{CommandRunner, ProcessRunner, RunOptions, RunnerFlags};
//!
//! # async fn example() -> seedbed_core::Result<()> {
//! let runner = ProcessRunner::new(RunnerFlags { dry_run: false, verbose: true });
//! let out = runner
//!     .run_checked("kind", &["get".into(), "clusters".into()], &RunOptions::default())
//!     .await?;
//! println!("{}", out.stdout);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod runner;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use runner::{
    render_command, CommandOutput, CommandRunner, ProcessRunner, RunOptions, RunnerFlags,
};

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{Invocation, MockRunner};
