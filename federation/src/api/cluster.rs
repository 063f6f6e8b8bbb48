use async_trait::async_trait;
use http::StatusCode;
use hyper::Response;
use hyper::body::Bytes;
use serde_json::{Value as JsonValue, json};

use crate::api::utils::{empty_response, json_response};
use crate::errors::FederationError;
use crate::handler::{Context, FederatedRequest, Handler};

/// Lists every configured cluster alias and whether its node is active.
pub struct ClusterDetailsHandler;

#[async_trait]
impl Handler for ClusterDetailsHandler {
    fn name(&self) -> &'static str {
        "cluster_details"
    }

    async fn handle(
        &self,
        ctx: &Context,
        _request: FederatedRequest,
    ) -> Result<Response<Bytes>, FederationError> {
        let active = ctx.health.snapshot();

        let mut available = Vec::new();
        let mut active_clusters = Vec::new();
        let mut inactive_clusters = Vec::new();
        for cluster in ctx.registry.clusters() {
            available.push(cluster.to_string());
            match ctx.registry.node_for(cluster) {
                Some(node) if active.contains(node) => active_clusters.push(cluster.to_string()),
                _ => inactive_clusters.push(cluster.to_string()),
            }
        }

        json_response(
            StatusCode::OK,
            &json!({
                "available": available,
                "active": active_clusters,
                "inactive": inactive_clusters,
            }),
        )
    }
}

/// Answers without contacting any node.
pub struct StaticHandler {
    name: &'static str,
    /// `None` answers with an empty body
    body: Option<JsonValue>,
}

impl StaticHandler {
    pub fn json(name: &'static str, body: JsonValue) -> Self {
        Self {
            name,
            body: Some(body),
        }
    }

    pub fn empty(name: &'static str) -> Self {
        Self { name, body: None }
    }
}

#[async_trait]
impl Handler for StaticHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn handle(
        &self,
        _ctx: &Context,
        _request: FederatedRequest,
    ) -> Result<Response<Bytes>, FederationError> {
        match &self.body {
            Some(body) => json_response(StatusCode::OK, body),
            None => empty_response(StatusCode::OK),
        }
    }
}
