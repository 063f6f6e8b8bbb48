use http::{HeaderValue, Method, StatusCode};
use hyper::body::Bytes;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::{Config, TlsConfig};
use crate::errors::FederationError;
use crate::registry::Node;
use crate::rewrite::unprefix_response;

/// Header carrying the caller's correlation id, forwarded to every node.
pub const OPAQUE_ID_HEADER: &str = "x-opaque-id";

/// A request addressed to a single node.
///
/// The path is already rewritten for the target node.
#[derive(Clone, Debug)]
pub struct NodeRequest {
    pub method: Method,
    pub path_and_query: String,
    pub body: Option<Bytes>,
    pub content_type: &'static str,
    pub opaque_id: Option<HeaderValue>,
}

impl NodeRequest {
    pub fn new(method: Method, path_and_query: impl Into<String>) -> Self {
        Self {
            method,
            path_and_query: path_and_query.into(),
            body: None,
            content_type: "application/json",
            opaque_id: None,
        }
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
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
}

/// Parsed response of a single node.
#[derive(Clone, Debug)]
pub struct NodeResponse {
    pub status: StatusCode,
    pub body: JsonValue,
}

/// Keep-alive HTTP client shared by every request to the nodes.
///
/// The number of in-flight requests is bounded separately for `http` and
/// `https` nodes.
#[derive(Clone)]
pub struct NodeClient {
    client: reqwest::Client,
    http_permits: Arc<Semaphore>,
    https_permits: Arc<Semaphore>,
    request_timeout: Duration,
    ping_timeout: Duration,
}

impl NodeClient {
    pub fn new(config: &Config) -> Result<Self, FederationError> {
        let timeouts = &config.timeouts;
        let builder = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(timeouts.pool_idle_timeout_secs))
            .pool_max_idle_per_host(config.max_connections_per_scheme)
            .tcp_nodelay(true);
        let client = apply_tls(builder, &config.tls)?.build()?;

        Ok(Self {
            client,
            http_permits: Arc::new(Semaphore::new(config.max_connections_per_scheme)),
            https_permits: Arc::new(Semaphore::new(config.max_connections_per_scheme)),
            request_timeout: Duration::from_secs(timeouts.request_timeout_secs),
            ping_timeout: Duration::from_secs(timeouts.ping_timeout_secs),
        })
    }

    fn permits_for(&self, node: &Node) -> &Semaphore {
        if node.is_https() {
            &self.https_permits
        } else {
            &self.http_permits
        }
    }

    /// Sends one request to a node and parses the JSON response.
    ///
    /// An empty body parses to an empty object. Index names in the response
    /// carrying the node prefix are rewritten back to the placeholder.
    pub async fn send(
        &self,
        node: &Node,
        request: NodeRequest,
    ) -> Result<NodeResponse, FederationError> {
        let node_identifier = node.to_string();

        let _permit = self
            .permits_for(node)
            .acquire()
            .await
            .map_err(|e| FederationError::InternalError(e.to_string()))?;

        let mut builder = self
            .client
            .request(request.method, node.url_for(&request.path_and_query))
            .timeout(self.request_timeout)
            .header(http::header::CONTENT_TYPE, request.content_type);

        if let Some(opaque_id) = request.opaque_id {
            builder = builder.header(OPAQUE_ID_HEADER, opaque_id);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                FederationError::NodeTimeout(node_identifier.clone())
            } else {
                FederationError::NodeRequestFailed(node_identifier.clone(), e.to_string())
            }
        })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FederationError::ResponseBodyError(e.to_string()))?;

        let mut body = if bytes.iter().all(u8::is_ascii_whitespace) {
            JsonValue::Object(Default::default())
        } else {
            serde_json::from_slice(&bytes).map_err(|e| {
                FederationError::InvalidNodeResponse(node_identifier.clone(), e.to_string())
            })?
        };
        unprefix_response(&mut body, node.prefix());

        Ok(NodeResponse { status, body })
    }

    /// Liveness check, `HEAD /` answered with a success status.
    pub async fn ping(&self, node: &Node) -> bool {
        let result = self
            .client
            .head(node.url_for("/"))
            .timeout(self.ping_timeout)
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(node = %node, error = %e, "Ping failed");
                false
            }
        }
    }
}

fn apply_tls(
    mut builder: reqwest::ClientBuilder,
    tls: &TlsConfig,
) -> Result<reqwest::ClientBuilder, FederationError> {
    let read = |path: &std::path::Path| {
        std::fs::read(path)
            .map_err(|e| FederationError::TlsConfig(format!("{}: {e}", path.display())))
    };

    if tls.insecure {
        builder = builder.danger_accept_invalid_certs(true);
    }

    if let Some(ca_path) = &tls.ca_trust_file {
        let pem = read(ca_path)?;
        let certs = reqwest::Certificate::from_pem_bundle(&pem)
            .map_err(|e| FederationError::TlsConfig(e.to_string()))?;
        for cert in certs {
            builder = builder.add_root_certificate(cert);
        }
    }

    if let (Some(cert_path), Some(key_path)) = (&tls.client_cert, &tls.client_key) {
        let cert = read(cert_path)?;
        let key = read(key_path)?;
        let identity = reqwest::Identity::from_pkcs8_pem(&cert, &key)
            .map_err(|e| FederationError::TlsConfig(e.to_string()))?;
        builder = builder.identity(identity);
    }

    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{MockNode, test_config};
    use serde_json::json;

    #[tokio::test]
    async fn test_send_parses_json_and_forwards_headers() {
        let mock = MockNode::start(|_| (StatusCode::OK, r#"{"acknowledged":true}"#.into())).await;
        let node = Node::parse(&mock.address()).unwrap();
        let client = NodeClient::new(&test_config(&[&mock.address()], &["C1"])).unwrap();

        let request = NodeRequest::new(Method::POST, "/sessions2-*/_search?rest_total_hits_as_int=true")
            .with_body(Bytes::from_static(b"{\"size\":1}"))
            .with_opaque_id(Some(HeaderValue::from_static("trace-1")));
        let response = client.send(&node, request).await.unwrap();

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, json!({"acknowledged": true}));

        let recorded = mock.requests();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].method, Method::POST);
        assert_eq!(
            recorded[0].path_and_query,
            "/sessions2-*/_search?rest_total_hits_as_int=true"
        );
        assert_eq!(recorded[0].opaque_id.as_deref(), Some("trace-1"));
        assert_eq!(recorded[0].body.as_ref(), b"{\"size\":1}");
    }

    #[tokio::test]
    async fn test_send_empty_body_is_empty_object() {
        let mock = MockNode::start(|_| (StatusCode::OK, String::new())).await;
        let node = Node::parse(&mock.address()).unwrap();
        let client = NodeClient::new(&test_config(&[&mock.address()], &["C1"])).unwrap();

        let response = client
            .send(&node, NodeRequest::new(Method::GET, "/"))
            .await
            .unwrap();
        assert_eq!(response.body, json!({}));
    }

    #[tokio::test]
    async fn test_send_invalid_node_body_is_error() {
        let mock = MockNode::start(|_| (StatusCode::OK, "not json".into())).await;
        let node = Node::parse(&mock.address()).unwrap();
        let client = NodeClient::new(&test_config(&[&mock.address()], &["C1"])).unwrap();

        let result = client.send(&node, NodeRequest::new(Method::GET, "/")).await;
        assert!(matches!(result, Err(FederationError::InvalidNodeResponse(_, _))));
    }

    #[tokio::test]
    async fn test_send_connection_refused() {
        // Port 1 on localhost is not listening
        let node = Node::parse("127.0.0.1:1").unwrap();
        let client = NodeClient::new(&test_config(&["127.0.0.1:1"], &["C1"])).unwrap();

        let result = client.send(&node, NodeRequest::new(Method::GET, "/")).await;
        assert!(matches!(
            result,
            Err(FederationError::NodeRequestFailed(_, _))
        ));
        assert!(!client.ping(&node).await);
    }

    #[tokio::test]
    async fn test_ping() {
        let mock = MockNode::start(|_| (StatusCode::OK, String::new())).await;
        let node = Node::parse(&mock.address()).unwrap();
        let client = NodeClient::new(&test_config(&[&mock.address()], &["C1"])).unwrap();

        assert!(client.ping(&node).await);
        mock.set_healthy(false);
        assert!(!client.ping(&node).await);
    }
}
