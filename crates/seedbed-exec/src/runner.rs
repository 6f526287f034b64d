//! The `CommandRunner` capability and its process-backed implementation.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use seedbed_core::{Error, Result};

/// Options for a single command execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Working directory. Inherits the current directory when unset.
    pub dir: Option<PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Kill the command after this long. Zero means no timeout.
    pub timeout: Duration,
}

impl RunOptions {
    /// Options with a timeout and nothing else.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Set the working directory.
    #[must_use]
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Add an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// What a finished command produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code. `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Wall-clock run time.
    pub duration: Duration,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// Failed output with the given exit code and stderr.
    #[must_use]
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    /// Returns true if the command exited with code 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turn a non-zero exit into `Error::CommandFailed`.
    ///
    /// # Errors
    ///
    /// Returns `Error::CommandFailed` carrying the rendered command and stderr.
    pub fn check(self, program: &str, args: &[String]) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(Error::CommandFailed {
                command: render_command(program, args),
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Render a command line for logs and error messages.
#[must_use]
pub fn render_command(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        if arg.contains(char::is_whitespace) {
            line.push('\'');
            line.push_str(arg);
            line.push('\'');
        } else {
            line.push_str(arg);
        }
    }
    line
}

/// Runs external tools on behalf of the provisioner and installer.
///
/// A non-zero exit status is reported through [`CommandOutput::exit_code`],
/// not as an error; callers decide what a failure means. Errors are reserved
/// for commands that could not be started or ran past their timeout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Spawn` if the program cannot be started and
    /// `Error::CommandTimedOut` if it exceeds `opts.timeout`.
    async fn run(&self, program: &str, args: &[String], opts: &RunOptions)
        -> Result<CommandOutput>;

    /// Run and require a zero exit code.
    ///
    /// # Errors
    ///
    /// Everything [`CommandRunner::run`] returns, plus `Error::CommandFailed`
    /// for a non-zero exit.
    async fn run_checked(
        &self,
        program: &str,
        args: &[String],
        opts: &RunOptions,
    ) -> Result<CommandOutput> {
        self.run(program, args, opts).await?.check(program, args)
    }
}

/// Switches held by [`ProcessRunner`]. Nothing else is kept between calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerFlags {
    /// Log commands instead of executing them.
    pub dry_run: bool,
    /// Echo every command at info level.
    pub verbose: bool,
}

/// Runs commands as child processes.
///
/// Intended for one sequential caller; the orchestrator never issues
/// commands concurrently.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    flags: RunnerFlags,
}

impl ProcessRunner {
    /// Create a runner with the given flags.
    #[must_use]
    pub const fn new(flags: RunnerFlags) -> Self {
        Self { flags }
    }

    /// Get the runner's flags.
    #[must_use]
    pub const fn flags(&self) -> RunnerFlags {
        self.flags
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        opts: &RunOptions,
    ) -> Result<CommandOutput> {
        let line = render_command(program, args);

        if self.flags.dry_run {
            info!(command = %line, "dry-run: not executing");
            return Ok(CommandOutput::default());
        }

        if self.flags.verbose {
            info!(command = %line, dir = ?opts.dir, "Running command");
        } else {
            debug!(command = %line, dir = ?opts.dir, "Running command");
        }

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &opts.dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &opts.env {
            cmd.env(key, value);
        }

        let start = Instant::now();
        let output = if opts.timeout.is_zero() {
            cmd.output().await
        } else {
            match tokio::time::timeout(opts.timeout, cmd.output()).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(Error::CommandTimedOut {
                        command: line,
                        after: opts.timeout,
                    });
                }
            }
        };
        let output = output.map_err(|source| Error::Spawn {
            program: program.to_string(),
            source,
        })?;

        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: start.elapsed(),
        };

        debug!(
            command = %line,
            exit_code = result.exit_code,
            duration_ms = result.duration.as_millis(),
            "Command finished"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn render_quotes_whitespace() {
        assert_eq!(
            render_command("helm", &args(&["--set", "a=b c"])),
            "helm --set 'a=b c'"
        );
    }

    #[test]
    fn check_maps_non_zero_exit() {
        let err = CommandOutput::failed(2, "  nope \n")
            .check("kind", &args(&["get", "clusters"]))
            .unwrap_err();
        match err {
            Error::CommandFailed {
                command,
                exit_code,
                stderr,
            } => {
                assert_eq!(command, "kind get clusters");
                assert_eq!(exit_code, 2);
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn dry_run_has_no_side_effects() {
        let runner = ProcessRunner::new(RunnerFlags {
            dry_run: true,
            verbose: false,
        });
        let out = runner
            .run("definitely-not-a-real-program", &[], &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(out, CommandOutput::default());
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let runner = ProcessRunner::default();
        let err = runner
            .run("definitely-not-a-real-program", &[], &RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let runner = ProcessRunner::default();
        let out = runner
            .run(
                "sh",
                &args(&["-c", "echo out; echo err >&2; exit 3"]),
                &RunOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn passes_env_and_dir() {
        let runner = ProcessRunner::default();
        let opts = RunOptions::default().in_dir("/").env("SEEDBED_TEST_VALUE", "42");
        let out = runner
            .run("sh", &args(&["-c", "echo $SEEDBED_TEST_VALUE; pwd"]), &opts)
            .await
            .unwrap();
        let lines: Vec<&str> = out.stdout.lines().collect();
        assert_eq!(lines, vec!["42", "/"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_kills_command() {
        let runner = ProcessRunner::default();
        let err = runner
            .run(
                "sleep",
                &args(&["5"]),
                &RunOptions::with_timeout(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CommandTimedOut { .. }));
    }
}
