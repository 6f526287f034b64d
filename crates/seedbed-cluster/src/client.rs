//! Cluster API access.
//!
//! The provisioner and installer only need two reads from the cluster API:
//! node readiness and the status of GitOps-managed applications. Both sit
//! behind [`ClusterApiClient`] so transport failures stay distinguishable
//! from an empty, successful answer. A [`ClusterConnector`] turns a
//! kubeconfig context into such a client.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use tracing::debug;

use seedbed_core::classify::is_transient_network_text;
use seedbed_core::{ApiError, ApiErrorKind, Error, Result};

use crate::handle::{ApiEndpoint, ClusterHandle};
use crate::kubeconfig;

/// A node and whether its `Ready` condition is `True`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    /// Node name.
    pub name: String,
    /// Ready condition.
    pub ready: bool,
}

impl NodeStatus {
    /// Create a node status.
    #[must_use]
    pub fn new(name: impl Into<String>, ready: bool) -> Self {
        Self {
            name: name.into(),
            ready,
        }
    }
}

/// Sync and health of one GitOps-managed application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedApplication {
    /// Application name.
    pub name: String,
    /// Sync status, e.g. `Synced` or `OutOfSync`.
    pub sync: String,
    /// Health status, e.g. `Healthy`, `Progressing` or `Degraded`.
    pub health: String,
    /// Latest condition or operation message, if any.
    pub message: Option<String>,
}

impl ManagedApplication {
    /// Returns true once the application is synced and healthy.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.sync == "Synced" && self.health == "Healthy"
    }
}

/// Read access to a single cluster's API.
#[async_trait]
pub trait ClusterApiClient: Send + Sync {
    /// List nodes with their readiness.
    ///
    /// An empty list is a successful answer, not an error.
    async fn list_nodes(&self) -> std::result::Result<Vec<NodeStatus>, ApiError>;

    /// List GitOps applications in `namespace`.
    ///
    /// Returns an empty list while the application resource type is not yet
    /// registered.
    async fn list_applications(
        &self,
        namespace: &str,
    ) -> std::result::Result<Vec<ManagedApplication>, ApiError>;
}

/// Produces API clients for kubeconfig contexts.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Read the API endpoint for `context` from a kubeconfig file.
    async fn resolve_endpoint(&self, kubeconfig: &Path, context: &str) -> Result<ApiEndpoint>;

    /// Build a client for the cluster behind `handle`.
    async fn connect(&self, handle: &ClusterHandle) -> Result<Arc<dyn ClusterApiClient>>;
}

/// Connector backed by `kube`.
#[derive(Debug, Clone)]
pub struct KubeConnector {
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl Default for KubeConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
        }
    }
}

impl KubeConnector {
    /// Create a connector with the given per-request timeouts.
    #[must_use]
    pub const fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
        }
    }
}

#[async_trait]
impl ClusterConnector for KubeConnector {
    async fn resolve_endpoint(&self, kubeconfig: &Path, context: &str) -> Result<ApiEndpoint> {
        let config = kubeconfig::load(kubeconfig)?;
        kubeconfig::endpoint_for_context(&config, context)
    }

    async fn connect(&self, handle: &ClusterHandle) -> Result<Arc<dyn ClusterApiClient>> {
        let kubeconfig = kubeconfig::load(&handle.kubeconfig)?;
        let options = KubeConfigOptions {
            context: Some(handle.context.clone()),
            ..KubeConfigOptions::default()
        };
        let mut config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| Error::Kubeconfig(format!("context {}: {e}", handle.context)))?;
        config.connect_timeout = Some(self.connect_timeout);
        config.read_timeout = Some(self.read_timeout);

        let client = Client::try_from(config)
            .map_err(|e| Error::Kubeconfig(format!("failed to build client: {e}")))?;

        debug!(cluster = %handle.name, context = %handle.context, "Connected cluster API client");
        Ok(Arc::new(KubeApiClient { client }))
    }
}

/// [`ClusterApiClient`] over a `kube::Client`.
#[derive(Clone)]
pub struct KubeApiClient {
    client: Client,
}

impl KubeApiClient {
    /// Wrap an existing client.
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    fn applications_api(&self, namespace: &str) -> Api<DynamicObject> {
        let gvk = GroupVersionKind::gvk("argoproj.io", "v1alpha1", "Application");
        let resource = ApiResource::from_gvk(&gvk);
        Api::namespaced_with(self.client.clone(), namespace, &resource)
    }
}

#[async_trait]
impl ClusterApiClient for KubeApiClient {
    async fn list_nodes(&self) -> std::result::Result<Vec<NodeStatus>, ApiError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default())
            .await
            .map_err(api_error_from_kube)?;

        Ok(list
            .items
            .iter()
            .map(|node| NodeStatus {
                name: node.metadata.name.clone().unwrap_or_default(),
                ready: node_is_ready(node),
            })
            .collect())
    }

    async fn list_applications(
        &self,
        namespace: &str,
    ) -> std::result::Result<Vec<ManagedApplication>, ApiError> {
        match self
            .applications_api(namespace)
            .list(&ListParams::default())
            .await
        {
            Ok(list) => Ok(list.items.iter().map(application_from_object).collect()),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!(namespace, "Application resource not registered yet");
                Ok(Vec::new())
            }
            Err(e) => Err(api_error_from_kube(e)),
        }
    }
}

fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

fn application_from_object(obj: &DynamicObject) -> ManagedApplication {
    let status = obj.data.get("status");
    let text = |pointer: &str| {
        status
            .and_then(|s| s.pointer(pointer))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    };

    let message = status
        .and_then(|s| s.get("conditions"))
        .and_then(serde_json::Value::as_array)
        .and_then(|conditions| {
            conditions
                .iter()
                .rev()
                .find_map(|c| c.get("message").and_then(serde_json::Value::as_str))
        })
        .map(str::to_string)
        .or_else(|| text("/operationState/message"))
        .or_else(|| text("/health/message"));

    ManagedApplication {
        name: obj.metadata.name.clone().unwrap_or_default(),
        sync: text("/sync/status").unwrap_or_else(|| "Unknown".to_string()),
        health: text("/health/status").unwrap_or_else(|| "Unknown".to_string()),
        message,
    }
}

/// Sort a `kube` error into temporary and permanent failures.
#[must_use]
pub fn api_error_from_kube(err: kube::Error) -> ApiError {
    match &err {
        kube::Error::Api(resp) => ApiError::from_status(resp.code, resp.message.clone()),
        kube::Error::HyperError(_) | kube::Error::Service(_) => {
            let message = err.to_string();
            let kind = if message.to_lowercase().contains("timed out")
                || message.to_lowercase().contains("timeout")
            {
                ApiErrorKind::Timeout
            } else {
                ApiErrorKind::Transport
            };
            ApiError::new(kind, message)
        }
        _ => {
            let message = err.to_string();
            let kind = if is_transient_network_text(&message) {
                ApiErrorKind::Transport
            } else {
                ApiErrorKind::Rejected
            };
            ApiError::new(kind, message)
        }
    }
}

/// Scripted connector and API client for tests.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use std::collections::VecDeque;

    use parking_lot::Mutex;

    use super::*;

    type Reply<T> = std::result::Result<T, ApiError>;

    /// Hands out scripted replies in order and keeps repeating the last one.
    struct Script<T: Clone> {
        replies: VecDeque<Reply<T>>,
        fallback: Reply<T>,
    }

    impl<T: Clone> Script<T> {
        fn new(fallback: T) -> Self {
            Self {
                replies: VecDeque::new(),
                fallback: Ok(fallback),
            }
        }

        fn next(&mut self) -> Reply<T> {
            match self.replies.pop_front() {
                Some(reply) => {
                    if self.replies.is_empty() {
                        self.fallback = reply.clone();
                    }
                    reply
                }
                None => self.fallback.clone(),
            }
        }
    }

    /// An API client that answers from scripted replies.
    ///
    /// By default it reports one Ready node and no applications.
    pub struct MockApiClient {
        nodes: Mutex<Script<Vec<NodeStatus>>>,
        applications: Mutex<Script<Vec<ManagedApplication>>>,
        node_calls: Mutex<u32>,
        application_calls: Mutex<u32>,
    }

    impl Default for MockApiClient {
        fn default() -> Self {
            Self {
                nodes: Mutex::new(Script::new(vec![NodeStatus::new("node-0", true)])),
                applications: Mutex::new(Script::new(Vec::new())),
                node_calls: Mutex::new(0),
                application_calls: Mutex::new(0),
            }
        }
    }

    impl MockApiClient {
        /// Create a client reporting one Ready node.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue a node listing reply.
        pub fn push_nodes(&self, reply: Reply<Vec<NodeStatus>>) -> &Self {
            self.nodes.lock().replies.push_back(reply);
            self
        }

        /// Queue an application listing reply.
        pub fn push_applications(&self, reply: Reply<Vec<ManagedApplication>>) -> &Self {
            self.applications.lock().replies.push_back(reply);
            self
        }

        /// Number of `list_nodes` calls so far.
        #[must_use]
        pub fn node_calls(&self) -> u32 {
            *self.node_calls.lock()
        }

        /// Number of `list_applications` calls so far.
        #[must_use]
        pub fn application_calls(&self) -> u32 {
            *self.application_calls.lock()
        }
    }

    #[async_trait]
    impl ClusterApiClient for MockApiClient {
        async fn list_nodes(&self) -> Reply<Vec<NodeStatus>> {
            *self.node_calls.lock() += 1;
            self.nodes.lock().next()
        }

        async fn list_applications(&self, _namespace: &str) -> Reply<Vec<ManagedApplication>> {
            *self.application_calls.lock() += 1;
            self.applications.lock().next()
        }
    }

    /// A connector that resolves every context to a fixed endpoint and
    /// hands out one shared [`MockApiClient`].
    pub struct MockConnector {
        endpoint: Mutex<ApiEndpoint>,
        client: Arc<MockApiClient>,
        connect_error: Mutex<Option<String>>,
        connects: Mutex<u32>,
    }

    impl MockConnector {
        /// Create a connector for `endpoint`.
        #[must_use]
        pub fn new(endpoint: ApiEndpoint) -> Self {
            Self {
                endpoint: Mutex::new(endpoint),
                client: Arc::new(MockApiClient::new()),
                connect_error: Mutex::new(None),
                connects: Mutex::new(0),
            }
        }

        /// The shared API client.
        #[must_use]
        pub fn client(&self) -> Arc<MockApiClient> {
            Arc::clone(&self.client)
        }

        /// Change the endpoint reported for every context.
        pub fn set_endpoint(&self, endpoint: ApiEndpoint) {
            *self.endpoint.lock() = endpoint;
        }

        /// Make `connect` fail with a kubeconfig error.
        pub fn fail_connect(&self, message: impl Into<String>) {
            *self.connect_error.lock() = Some(message.into());
        }

        /// Number of `connect` calls so far.
        #[must_use]
        pub fn connects(&self) -> u32 {
            *self.connects.lock()
        }
    }

    #[async_trait]
    impl ClusterConnector for MockConnector {
        async fn resolve_endpoint(&self, _kubeconfig: &Path, _context: &str) -> Result<ApiEndpoint> {
            Ok(self.endpoint.lock().clone())
        }

        async fn connect(&self, _handle: &ClusterHandle) -> Result<Arc<dyn ClusterApiClient>> {
            *self.connects.lock() += 1;
            if let Some(message) = self.connect_error.lock().clone() {
                return Err(Error::Kubeconfig(message));
            }
            Ok(Arc::clone(&self.client) as Arc<dyn ClusterApiClient>)
        }
    }
}
