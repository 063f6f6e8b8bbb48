use async_trait::async_trait;
use http::Method;
use hyper::Response;
use hyper::body::Bytes;

use crate::api::utils::json_response;
use crate::errors::FederationError;
use crate::handler::{Context, FederatedRequest, Handler};
use crate::http::NodeRequest;
use crate::rewrite::substitute_prefix;

/// Query parameter making a write visible to the next read
const REFRESH_PARAM: &str = "refresh=true";

/// Forwards the request to the first configured node only.
///
/// # Used for:
///
/// - `GET|POST /users/_doc/:user` - user records are kept on one node
/// - `GET /_cat/master`
pub struct PrimaryNodeHandler {
    name: &'static str,
    refresh_writes: bool,
}

impl PrimaryNodeHandler {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            refresh_writes: false,
        }
    }

    /// Adds `refresh=true` to forwarded `POST` requests.
    pub fn with_write_refresh(mut self) -> Self {
        self.refresh_writes = true;
        self
    }

    fn path_and_query(&self, request: &FederatedRequest) -> String {
        let path_and_query = request.path_and_query();
        if !self.refresh_writes || request.method != Method::POST {
            return path_and_query;
        }
        match &request.query {
            Some(_) => format!("{path_and_query}&{REFRESH_PARAM}"),
            None => format!("{path_and_query}?{REFRESH_PARAM}"),
        }
    }
}

#[async_trait]
impl Handler for PrimaryNodeHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn handle(
        &self,
        ctx: &Context,
        request: FederatedRequest,
    ) -> Result<Response<Bytes>, FederationError> {
        let node = ctx.registry.primary().ok_or(FederationError::NoNodes)?;

        if let Some(user) = request.params.get("user") {
            tracing::debug!(user, method = %request.method, "Forwarding user request");
        }

        let mut node_request = NodeRequest::new(
            request.method.clone(),
            substitute_prefix(&self.path_and_query(&request), node.prefix()),
        )
        .with_opaque_id(request.opaque_id.clone());
        if request.has_body() {
            let body = match std::str::from_utf8(&request.body) {
                Ok(text) => Bytes::from(substitute_prefix(text, node.prefix())),
                Err(_) => request.body.clone(),
            };
            node_request = node_request.with_body(body);
        }

        let response = ctx.executor.client().send(node, node_request).await?;
        json_response(response.status, &response.body)
    }
}
