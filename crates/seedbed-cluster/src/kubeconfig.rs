//! Kubeconfig inspection and the loopback address rewrite.

use std::path::{Path, PathBuf};

use kube::config::Kubeconfig;
use tracing::{debug, info};

use seedbed_core::{Error, Result};

use crate::handle::{ApiEndpoint, TlsPolicy};

/// Hosts the providers write into kubeconfigs for a local API server.
const LOOPBACK_HOSTS: [&str; 3] = ["127.0.0.1", "0.0.0.0", "localhost"];

/// Load a kubeconfig file.
///
/// # Errors
///
/// Returns `Error::Kubeconfig` if the file is missing or malformed.
pub fn load(path: &Path) -> Result<Kubeconfig> {
    Kubeconfig::read_from(path)
        .map_err(|e| Error::Kubeconfig(format!("{}: {e}", path.display())))
}

/// Resolve the API endpoint for `context`.
///
/// # Errors
///
/// Returns `Error::Kubeconfig` if the context, its cluster or the server
/// address is missing or unparseable.
pub fn endpoint_for_context(config: &Kubeconfig, context: &str) -> Result<ApiEndpoint> {
    let cluster_name = config
        .contexts
        .iter()
        .find(|c| c.name == context)
        .and_then(|c| c.context.as_ref())
        .map(|c| c.cluster.clone())
        .ok_or_else(|| Error::Kubeconfig(format!("context {context} not found")))?;

    let cluster = config
        .clusters
        .iter()
        .find(|c| c.name == cluster_name)
        .and_then(|c| c.cluster.as_ref())
        .ok_or_else(|| Error::Kubeconfig(format!("cluster {cluster_name} not found")))?;

    let server = cluster
        .server
        .as_deref()
        .ok_or_else(|| Error::Kubeconfig(format!("cluster {cluster_name} has no server")))?;

    let mut endpoint = parse_server(server)?;
    if endpoint.tls == TlsPolicy::Verify && cluster.insecure_skip_tls_verify == Some(true) {
        endpoint.tls = TlsPolicy::SkipVerify;
    }
    Ok(endpoint)
}

/// Parse a kubeconfig `server` URL into an endpoint.
///
/// # Errors
///
/// Returns `Error::Kubeconfig` for an unsupported scheme or invalid port.
pub fn parse_server(server: &str) -> Result<ApiEndpoint> {
    let invalid = |reason: &str| Error::Kubeconfig(format!("invalid server address {server}: {reason}"));

    let (rest, tls, default_port) = if let Some(rest) = server.strip_prefix("https://") {
        (rest, TlsPolicy::Verify, 443)
    } else if let Some(rest) = server.strip_prefix("http://") {
        (rest, TlsPolicy::Plaintext, 80)
    } else {
        return Err(invalid("expected http or https"));
    };

    let authority = rest.split('/').next().unwrap_or_default();
    if authority.is_empty() {
        return Err(invalid("missing host"));
    }

    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, after) = bracketed
            .split_once(']')
            .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
        let port = match after.strip_prefix(':') {
            Some(p) => p.parse().map_err(|_| invalid("bad port"))?,
            None => default_port,
        };
        (host.to_string(), port)
    } else {
        match authority.rsplit_once(':') {
            Some((host, p)) => (host.to_string(), p.parse().map_err(|_| invalid("bad port"))?),
            None => (authority.to_string(), default_port),
        }
    };

    Ok(ApiEndpoint { host, port, tls })
}

/// Rewrite loopback API server addresses in kubeconfig text.
///
/// Only `server:` lines are touched. Returns `None` when nothing matched,
/// which is also the case on a second pass over already rewritten text.
#[must_use]
pub fn rewrite_loopback_text(text: &str, host: &str) -> Option<String> {
    if LOOPBACK_HOSTS.contains(&host) {
        return None;
    }

    let mut changed = false;
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        if line.trim_start().starts_with("server:") {
            if let Some(rewritten) = replace_loopback(line, host) {
                out.push_str(&rewritten);
                changed = true;
                continue;
            }
        }
        out.push_str(line);
    }

    changed.then_some(out)
}

fn replace_loopback(line: &str, host: &str) -> Option<String> {
    for scheme in ["https://", "http://"] {
        for loopback in LOOPBACK_HOSTS {
            let needle = format!("{scheme}{loopback}:");
            if line.contains(&needle) {
                return Some(line.replacen(&needle, &format!("{scheme}{host}:"), 1));
            }
        }
    }
    None
}

/// Rewrite loopback API server addresses in a kubeconfig file in place.
///
/// The new content is written to a sibling temp file and renamed over the
/// original. A file without loopback addresses is left untouched.
///
/// # Errors
///
/// Returns `Error::Io` if the file cannot be read or replaced.
pub async fn rewrite_loopback(path: &Path, host: &str) -> Result<bool> {
    let text = tokio::fs::read_to_string(path).await?;

    let Some(rewritten) = rewrite_loopback_text(&text, host) else {
        debug!(path = %path.display(), "No loopback server address to rewrite");
        return Ok(false);
    };

    let tmp = temp_path(path);
    tokio::fs::write(&tmp, rewritten).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    info!(path = %path.display(), host, "Rewrote loopback API server address");
    Ok(true)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KIND_KUBECONFIG: &str = "apiVersion: v1
clusters:
- cluster:
    certificate-authority-data: AAAA
    server: https://127.0.0.1:40123
  name: kind-demo
contexts:
- context:
    cluster: kind-demo
    user: kind-demo
  name: kind-demo
current-context: kind-demo
kind: Config
preferences: {}
users:
- name: kind-demo
  user:
    client-certificate-data: BBBB
    client-key-data: CCCC
";

    #[test]
    fn parses_server_addresses() {
        let ep = parse_server("https://127.0.0.1:6443").unwrap();
        assert_eq!((ep.host.as_str(), ep.port, ep.tls), ("127.0.0.1", 6443, TlsPolicy::Verify));

        let ep = parse_server("https://example.com").unwrap();
        assert_eq!(ep.port, 443);

        let ep = parse_server("http://localhost:8080/prefix").unwrap();
        assert_eq!((ep.host.as_str(), ep.port, ep.tls), ("localhost", 8080, TlsPolicy::Plaintext));

        let ep = parse_server("https://[::1]:6443").unwrap();
        assert_eq!((ep.host.as_str(), ep.port), ("::1", 6443));

        assert!(parse_server("tcp://127.0.0.1:6443").is_err());
        assert!(parse_server("https://127.0.0.1:port").is_err());
    }

    #[test]
    fn resolves_endpoint_for_context() {
        let config = Kubeconfig::from_yaml(KIND_KUBECONFIG).unwrap();
        let ep = endpoint_for_context(&config, "kind-demo").unwrap();
        assert_eq!(ep, ApiEndpoint::new("127.0.0.1", 40123));

        assert!(matches!(
            endpoint_for_context(&config, "kind-other"),
            Err(Error::Kubeconfig(_))
        ));
    }

    #[test]
    fn rewrite_only_touches_server_lines() {
        let text = "server: https://127.0.0.1:6443\nnote: https://127.0.0.1:9999\n";
        let out = rewrite_loopback_text(text, "host.docker.internal").unwrap();
        assert_eq!(
            out,
            "server: https://host.docker.internal:6443\nnote: https://127.0.0.1:9999\n"
        );
    }

    #[test]
    fn rewrite_is_idempotent() {
        let once = rewrite_loopback_text(KIND_KUBECONFIG, "172.17.0.1").unwrap();
        assert!(once.contains("server: https://172.17.0.1:40123"));
        assert!(rewrite_loopback_text(&once, "172.17.0.1").is_none());
    }

    #[test]
    fn rewrite_to_loopback_is_a_noop() {
        assert!(rewrite_loopback_text(KIND_KUBECONFIG, "localhost").is_none());
    }

    #[tokio::test]
    async fn rewrites_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.kubeconfig");
        std::fs::write(&path, KIND_KUBECONFIG).unwrap();

        assert!(rewrite_loopback(&path, "172.17.0.1").await.unwrap());
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("https://172.17.0.1:40123"));
        assert!(!dir.path().join("demo.kubeconfig.tmp").exists());

        // The rewritten file still parses
        let config = load(&path).unwrap();
        let ep = endpoint_for_context(&config, "kind-demo").unwrap();
        assert_eq!(ep.host, "172.17.0.1");

        assert!(!rewrite_loopback(&path, "172.17.0.1").await.unwrap());
    }

    #[tokio::test]
    async fn file_without_pattern_is_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.kubeconfig");
        let original = KIND_KUBECONFIG.replace("127.0.0.1", "10.1.2.3");
        std::fs::write(&path, &original).unwrap();
        let before = std::fs::metadata(&path).unwrap().modified().unwrap();

        assert!(!rewrite_loopback(&path, "172.17.0.1").await.unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
        assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), before);
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = rewrite_loopback(&dir.path().join("nope"), "172.17.0.1")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
