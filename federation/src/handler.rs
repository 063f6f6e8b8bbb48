use async_trait::async_trait;
use http::request::Parts;
use http::{HeaderValue, Method};
use hyper::Response;
use hyper::body::Bytes;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use url::form_urlencoded;

use crate::errors::FederationError;
use crate::executor::{Executor, ScatterBody, ScatterRequest};
use crate::health::HealthTracker;
use crate::http::OPAQUE_ID_HEADER;
use crate::registry::{Node, Registry};
use crate::router::RouteParams;

/// Query parameter restricting a request to some cluster aliases
pub const CLUSTER_PARAM: &str = "cluster";

/// Everything a handler needs besides the request itself
#[derive(Clone)]
pub struct Context {
    pub registry: Registry,
    pub health: HealthTracker,
    pub executor: Executor,
}

impl Context {
    /// Active nodes the request may be sent to, in configuration order.
    pub fn targets(&self, request: &FederatedRequest) -> Vec<Arc<Node>> {
        self.health.active_nodes(request.clusters.as_deref())
    }
}

/// An inbound request with its body collected and the cluster filter
/// extracted from the query string.
#[derive(Clone, Debug)]
pub struct FederatedRequest {
    pub method: Method,
    pub path: String,
    /// Query string without the cluster filter, `None` when nothing is left
    pub query: Option<String>,
    /// Cluster aliases named in the query, `None` when not filtered
    pub clusters: Option<Vec<String>>,
    pub params: RouteParams,
    pub body: Bytes,
    pub opaque_id: Option<HeaderValue>,
}

impl FederatedRequest {
    pub fn new(parts: &Parts, params: RouteParams, body: Bytes) -> Self {
        let (query, clusters) = split_cluster_filter(parts.uri.query());

        Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            query,
            clusters,
            params,
            body,
            opaque_id: parts.headers.get(OPAQUE_ID_HEADER).cloned(),
        }
    }

    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    pub fn has_body(&self) -> bool {
        !self.body.iter().all(u8::is_ascii_whitespace)
    }

    /// The body parsed as JSON, an empty body reads as `{}`.
    pub fn json_body(&self) -> Result<JsonValue, FederationError> {
        if !self.has_body() {
            return Ok(JsonValue::Object(Default::default()));
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// The request as-is, scattered to every target
    pub fn scatter_request(&self) -> ScatterRequest {
        let body = if self.has_body() {
            ScatterBody::Shared(self.body.clone())
        } else {
            ScatterBody::Empty
        };

        ScatterRequest::new(self.method.clone(), self.path_and_query())
            .with_body(body)
            .with_opaque_id(self.opaque_id.clone())
    }
}

/// Removes every `cluster` parameter from a raw query string.
///
/// Values may be comma separated or repeated. Other parameters are kept
/// byte for byte.
pub fn split_cluster_filter(query: Option<&str>) -> (Option<String>, Option<Vec<String>>) {
    let Some(query) = query else {
        return (None, None);
    };

    let mut kept = Vec::new();
    let mut clusters = Vec::new();
    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        match form_urlencoded::parse(pair.as_bytes()).next() {
            Some((key, value)) if key == CLUSTER_PARAM => clusters.extend(
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|cluster| !cluster.is_empty())
                    .map(String::from),
            ),
            _ => kept.push(pair),
        }
    }

    let query = (!kept.is_empty()).then(|| kept.join("&"));
    let clusters = (!clusters.is_empty()).then_some(clusters);
    (query, clusters)
}

/// Handler for one family of endpoints
#[async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Serves one request. Errors are turned into JSON error responses by
    /// the service.
    async fn handle(
        &self,
        ctx: &Context,
        request: FederatedRequest,
    ) -> Result<Response<Bytes>, FederationError>;
}
