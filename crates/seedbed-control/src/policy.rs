//! Soft-fail policy.
//!
//! A failed install is downgraded to "completed with warnings" only when all
//! three hold:
//!
//! - nobody is at the terminal (non-interactive run),
//! - the host platform is on the allow-list,
//! - the error matches a recognized infrastructure shape.
//!
//! Cluster provisioning failures never reach this policy.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use seedbed_core::classify::recognized_shape;
use seedbed_core::{Error, FailureShape, RunMode};

/// The platform the run executes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostPlatform {
    /// Native Linux.
    Linux,
    /// macOS.
    MacOs,
    /// Native Windows.
    Windows,
    /// Linux running under the Windows Subsystem for Linux.
    WindowsWsl,
    /// Anything else.
    Other,
}

impl HostPlatform {
    /// Detect the current platform.
    #[must_use]
    pub fn detect() -> Self {
        let osrelease = std::fs::read_to_string("/proc/sys/kernel/osrelease").ok();
        Self::from_parts(std::env::consts::OS, osrelease.as_deref())
    }

    /// Classify an OS name plus the Linux kernel release string, if any.
    ///
    /// WSL kernels carry "microsoft" in their release string.
    #[must_use]
    pub fn from_parts(os: &str, kernel_release: Option<&str>) -> Self {
        match os {
            "linux" => {
                if kernel_release.is_some_and(|r| r.to_lowercase().contains("microsoft")) {
                    Self::WindowsWsl
                } else {
                    Self::Linux
                }
            }
            "macos" => Self::MacOs,
            "windows" => Self::Windows,
            _ => Self::Other,
        }
    }

    /// Stable kebab-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::MacOs => "macos",
            Self::Windows => "windows",
            Self::WindowsWsl => "windows-wsl",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for HostPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides whether an install failure may be reported as a warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftFailPolicy {
    platform: HostPlatform,
    allowed: Vec<HostPlatform>,
}

impl Default for SoftFailPolicy {
    fn default() -> Self {
        Self::new(HostPlatform::detect())
    }
}

impl SoftFailPolicy {
    /// Policy for `platform` with the default allow-list.
    ///
    /// The default allow-list holds only WSL hosts.
    #[must_use]
    pub fn new(platform: HostPlatform) -> Self {
        Self {
            platform,
            allowed: vec![HostPlatform::WindowsWsl],
        }
    }

    /// Replace the allow-list.
    #[must_use]
    pub fn with_allowed(mut self, allowed: Vec<HostPlatform>) -> Self {
        self.allowed = allowed;
        self
    }

    /// The platform this policy judges for.
    #[must_use]
    pub const fn platform(&self) -> HostPlatform {
        self.platform
    }

    /// Returns true if the policy's platform is allow-listed.
    #[must_use]
    pub fn platform_allowed(&self) -> bool {
        self.allowed.contains(&self.platform)
    }

    /// The shape that makes `err` soft-failable under `run_mode`, if any.
    #[must_use]
    pub fn soft_fail_shape(&self, err: &Error, run_mode: RunMode) -> Option<FailureShape> {
        if !run_mode.non_interactive {
            debug!("Interactive run, soft-fail disabled");
            return None;
        }
        if !self.platform_allowed() {
            debug!(platform = %self.platform, "Platform not allow-listed for soft-fail");
            return None;
        }
        recognized_shape(err)
    }

    /// Returns true if `err` may be reported as a warning instead of a failure.
    #[must_use]
    pub fn should_soft_fail(&self, err: &Error, run_mode: RunMode) -> bool {
        self.soft_fail_shape(err, run_mode).is_some()
    }
}
