use http::{HeaderValue, Method};
use hyper::body::Bytes;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};

use crate::errors::FederationError;
use crate::http::{NodeClient, NodeRequest};
use crate::metrics_defs::NODE_REQUEST_FAILURES;
use crate::registry::{Node, Registry};
use crate::rewrite::substitute_prefix;

/// Body sent along with a scattered request
#[derive(Clone, Debug)]
pub enum ScatterBody {
    Empty,
    /// Same body for every node, prefix substitution is applied per node
    Shared(Bytes),
    /// Already rewritten body per node, aligned with the target list
    PerNode(Vec<Bytes>),
}

/// A request to send to every target node
#[derive(Clone, Debug)]
pub struct ScatterRequest {
    pub method: Method,
    /// Path and query in placeholder form
    pub path_and_query: String,
    pub body: ScatterBody,
    pub content_type: &'static str,
    pub opaque_id: Option<HeaderValue>,
}

impl ScatterRequest {
    pub fn new(method: Method, path_and_query: impl Into<String>) -> Self {
        Self {
            method,
            path_and_query: path_and_query.into(),
            body: ScatterBody::Empty,
            content_type: "application/json",
            opaque_id: None,
        }
    }

    pub fn with_body(mut self, body: ScatterBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_content_type(mut self, content_type: &'static str) -> Self {
        self.content_type = content_type;
        self
    }

    pub fn with_opaque_id(mut self, opaque_id: Option<HeaderValue>) -> Self {
        self.opaque_id = opaque_id;
        self
    }

    fn for_node(&self, index: usize, node: &Node) -> NodeRequest {
        let body = match &self.body {
            ScatterBody::Empty => None,
            ScatterBody::Shared(body) => Some(match std::str::from_utf8(body) {
                Ok(text) => Bytes::from(substitute_prefix(text, node.prefix())),
                Err(_) => body.clone(),
            }),
            ScatterBody::PerNode(bodies) => bodies.get(index).cloned(),
        };

        let mut request = NodeRequest::new(
            self.method.clone(),
            substitute_prefix(&self.path_and_query, node.prefix()),
        )
        .with_content_type(self.content_type)
        .with_opaque_id(self.opaque_id.clone());
        if let Some(body) = body {
            request = request.with_body(body);
        }
        request
    }
}

/// One node's contribution to a scatter, `{}` when the node failed
#[derive(Clone, Debug, PartialEq)]
pub struct PerNodeResponse {
    /// Alias of the node, `None` for the placeholder returned when there was
    /// no node to ask
    pub cluster: Option<String>,
    pub body: JsonValue,
}

impl PerNodeResponse {
    fn empty(cluster: Option<String>) -> Self {
        Self {
            cluster,
            body: JsonValue::Object(Default::default()),
        }
    }
}

/// Sends a request to every target node concurrently and collects the
/// responses in target order.
#[derive(Clone)]
pub struct Executor {
    client: NodeClient,
    registry: Registry,
    scatter_timeout: Option<Duration>,
}

impl Executor {
    pub fn new(client: NodeClient, registry: Registry, scatter_timeout: Option<Duration>) -> Self {
        Self {
            client,
            registry,
            scatter_timeout,
        }
    }

    pub fn client(&self) -> &NodeClient {
        &self.client
    }

    fn cluster_of(&self, node: &Node) -> Option<String> {
        self.registry.cluster_for(node.address()).map(String::from)
    }

    /// Scatters `request` to `targets`.
    ///
    /// Never fails: a node that errors or does not answer before the scatter
    /// deadline contributes an empty object. Without targets the result is a
    /// single empty response so every merge policy has something to work on.
    pub async fn scatter(
        &self,
        targets: &[Arc<Node>],
        request: &ScatterRequest,
    ) -> Vec<PerNodeResponse> {
        if targets.is_empty() {
            return vec![PerNodeResponse::empty(None)];
        }

        let mut join_set = JoinSet::new();
        for (index, node) in targets.iter().enumerate() {
            let client = self.client.clone();
            let node = node.clone();
            let node_request = request.for_node(index, &node);
            join_set.spawn(async move { (index, client.send(&node, node_request).await) });
        }

        let mut results: Vec<Option<Result<JsonValue, FederationError>>> =
            (0..targets.len()).map(|_| None).collect();
        let deadline = self.scatter_timeout.map(|t| Instant::now() + t);

        loop {
            let joined = match deadline {
                Some(deadline) => match timeout_at(deadline, join_set.join_next()).await {
                    Ok(joined) => joined,
                    Err(_) => break,
                },
                None => join_set.join_next().await,
            };

            match joined {
                Some(Ok((index, result))) => {
                    results[index] = Some(result.map(|response| response.body));
                }
                Some(Err(e)) => tracing::error!("Task panicked: {}", e),
                None => break,
            }
        }
        join_set.abort_all();

        targets
            .iter()
            .zip(results)
            .map(|(node, result)| {
                let cluster = self.cluster_of(node);
                let error = match result {
                    Some(Ok(body)) => return PerNodeResponse { cluster, body },
                    Some(Err(e)) => e,
                    None => FederationError::NodeTimeout(node.to_string()),
                };

                tracing::warn!(
                    node = %node,
                    cluster = ?cluster,
                    error = %error,
                    "Node request failed, using empty response"
                );
                shared::counter!(
                    NODE_REQUEST_FAILURES,
                    "cluster" => cluster.clone().unwrap_or_default()
                )
                .increment(1);
                PerNodeResponse::empty(cluster)
            })
            .collect()
    }
}
