use async_trait::async_trait;
use http::Method;
use hyper::Response;
use hyper::body::Bytes;
use serde_json::Value as JsonValue;

use crate::api::utils::json_response;
use crate::errors::FederationError;
use crate::handler::{Context, FederatedRequest, Handler};
use crate::http::NodeRequest;
use crate::rewrite::substitute_prefix;

/// Parameters added to every forwarded update
const UPDATE_PARAMS: &str = "retry_on_conflict=3&timeout=10m";

/// Field of the update body naming the cluster holding the document
const TARGET_CLUSTER_FIELD: &str = "cluster";

/// Applies a document update on exactly one node.
///
/// Documents live on a single node, so the body has to name the cluster
/// the document was read from. The field is removed before forwarding.
pub struct UpdateHandler;

#[async_trait]
impl Handler for UpdateHandler {
    fn name(&self) -> &'static str {
        "update"
    }

    async fn handle(
        &self,
        ctx: &Context,
        request: FederatedRequest,
    ) -> Result<Response<Bytes>, FederationError> {
        let mut body = request.json_body()?;
        let index = request.params.get("index").unwrap_or_default();
        let document = request.params.get("id").unwrap_or_default();

        let cluster = match body
            .as_object_mut()
            .and_then(|fields| fields.remove(TARGET_CLUSTER_FIELD))
        {
            Some(JsonValue::String(cluster)) if !cluster.is_empty() => cluster,
            _ => {
                tracing::warn!(index, document, "Update request without target cluster");
                return Err(FederationError::MissingTargetCluster);
            }
        };

        let node = ctx
            .registry
            .node_for(&cluster)
            .ok_or_else(|| FederationError::UnknownTargetCluster(cluster.clone()))?;

        let path = substitute_prefix(&request.path, node.prefix());
        let path_and_query = match &request.query {
            Some(query) => format!("{path}?{query}&{UPDATE_PARAMS}"),
            None => format!("{path}?{UPDATE_PARAMS}"),
        };

        let node_request = NodeRequest::new(Method::POST, path_and_query)
            .with_body(Bytes::from(serde_json::to_vec(&body)?))
            .with_opaque_id(request.opaque_id.clone());
        let response = ctx.executor.client().send(node, node_request).await?;

        if !response.status.is_success() {
            tracing::warn!(
                cluster = %cluster,
                index,
                document,
                status = %response.status,
                "Failed to update the document"
            );
        }

        json_response(response.status, &response.body)
    }
}
