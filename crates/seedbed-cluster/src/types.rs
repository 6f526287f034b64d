//! Configuration for the cluster crate.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry budget for the two readiness tiers.
///
/// The defaults give a freshly created cluster roughly 10s to open its API
/// port and another 30s to report a Ready node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// TCP connection attempts.
    pub tcp_attempts: u32,
    /// Delay between TCP attempts.
    #[serde(with = "duration_ms")]
    pub tcp_interval: Duration,
    /// Timeout for a single TCP connection attempt.
    #[serde(with = "duration_ms")]
    pub tcp_timeout: Duration,
    /// Node listing attempts.
    pub api_attempts: u32,
    /// Delay between node listing attempts.
    #[serde(with = "duration_ms")]
    pub api_interval: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            tcp_attempts: 10,
            tcp_interval: Duration::from_secs(1),
            tcp_timeout: Duration::from_secs(2),
            api_attempts: 15,
            api_interval: Duration::from_secs(2),
        }
    }
}

impl ReadinessConfig {
    /// Create config from environment variables, falling back to defaults.
    ///
    /// # Environment Variables
    ///
    /// - `SEEDBED_TCP_ATTEMPTS`: TCP connection attempts
    /// - `SEEDBED_TCP_INTERVAL_MS`: delay between TCP attempts
    /// - `SEEDBED_TCP_TIMEOUT_MS`: per-attempt TCP timeout
    /// - `SEEDBED_API_ATTEMPTS`: node listing attempts
    /// - `SEEDBED_API_INTERVAL_MS`: delay between node listing attempts
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(n) = env_parse("SEEDBED_TCP_ATTEMPTS") {
            config.tcp_attempts = n;
        }
        if let Some(ms) = env_parse("SEEDBED_TCP_INTERVAL_MS") {
            config.tcp_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse("SEEDBED_TCP_TIMEOUT_MS") {
            config.tcp_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse("SEEDBED_API_ATTEMPTS") {
            config.api_attempts = n;
        }
        if let Some(ms) = env_parse("SEEDBED_API_INTERVAL_MS") {
            config.api_interval = Duration::from_millis(ms);
        }

        config
    }

    /// Millisecond-scale budget for tests.
    #[must_use]
    pub const fn fast(tcp_attempts: u32, api_attempts: u32) -> Self {
        Self {
            tcp_attempts,
            tcp_interval: Duration::from_millis(5),
            tcp_timeout: Duration::from_millis(200),
            api_attempts,
            api_interval: Duration::from_millis(5),
        }
    }
}

/// Configuration for the cluster provisioner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    /// Directory for generated provider configs and per-cluster kubeconfigs.
    pub kubeconfig_dir: PathBuf,
    /// Replace loopback API server addresses with this host.
    pub api_host_override: Option<String>,
    /// Readiness retry budget.
    pub readiness: ReadinessConfig,
    /// How long a verified handle is reused before `get_handle` re-checks it.
    #[serde(with = "duration_ms")]
    pub handle_ttl: Duration,
    /// Timeout for provider create and delete commands.
    #[serde(with = "duration_ms")]
    pub command_timeout: Duration,
    /// Providers consulted by `list`.
    pub providers: Vec<seedbed_core::ProviderKind>,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            kubeconfig_dir: default_kubeconfig_dir(),
            api_host_override: None,
            readiness: ReadinessConfig::default(),
            handle_ttl: Duration::from_secs(30),
            command_timeout: Duration::from_secs(600),
            providers: vec![
                seedbed_core::ProviderKind::Kind,
                seedbed_core::ProviderKind::K3d,
            ],
        }
    }
}

impl ProvisionerConfig {
    /// Create config from environment variables, falling back to defaults.
    ///
    /// # Environment Variables
    ///
    /// - `SEEDBED_KUBECONFIG_DIR`: where kubeconfigs and provider configs are written
    /// - `SEEDBED_API_HOST`: API host that replaces loopback addresses
    /// - plus everything [`ReadinessConfig::from_env`] reads
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self {
            readiness: ReadinessConfig::from_env(),
            ..Self::default()
        };

        if let Ok(val) = std::env::var("SEEDBED_KUBECONFIG_DIR") {
            config.kubeconfig_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("SEEDBED_API_HOST") {
            if !val.trim().is_empty() {
                config.api_host_override = Some(val.trim().to_string());
            }
        }

        config
    }

    /// Kubeconfig path for a cluster.
    #[must_use]
    pub fn kubeconfig_path(&self, cluster: &str) -> PathBuf {
        self.kubeconfig_dir.join(format!("{cluster}.kubeconfig"))
    }

    /// Generated provider config path for a cluster.
    #[must_use]
    pub fn provider_config_path(&self, cluster: &str) -> PathBuf {
        self.kubeconfig_dir.join(format!("{cluster}.cluster.yaml"))
    }
}

fn default_kubeconfig_dir() -> PathBuf {
    std::env::var_os("HOME").map_or_else(
        || std::env::temp_dir().join("seedbed"),
        |home| PathBuf::from(home).join(".seedbed").join("kube"),
    )
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_defaults() {
        let config = ReadinessConfig::default();
        assert_eq!(config.tcp_attempts, 10);
        assert_eq!(config.tcp_interval, Duration::from_secs(1));
        assert_eq!(config.tcp_timeout, Duration::from_secs(2));
        assert_eq!(config.api_attempts, 15);
        assert_eq!(config.api_interval, Duration::from_secs(2));
    }

    #[test]
    fn paths_are_per_cluster() {
        let config = ProvisionerConfig {
            kubeconfig_dir: PathBuf::from("/tmp/seedbed"),
            ..ProvisionerConfig::default()
        };
        assert_eq!(
            config.kubeconfig_path("demo"),
            PathBuf::from("/tmp/seedbed/demo.kubeconfig")
        );
        assert_eq!(
            config.provider_config_path("demo"),
            PathBuf::from("/tmp/seedbed/demo.cluster.yaml")
        );
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: ProvisionerConfig =
            serde_json::from_str(r#"{"api_host_override": "host.docker.internal"}"#).unwrap();
        assert_eq!(
            config.api_host_override.as_deref(),
            Some("host.docker.internal")
        );
        assert_eq!(config.readiness, ReadinessConfig::default());
        assert_eq!(config.handle_ttl, Duration::from_secs(30));
    }
}
