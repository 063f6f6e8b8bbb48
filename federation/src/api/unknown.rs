use async_trait::async_trait;
use http::{Method, StatusCode};
use hyper::Response;
use hyper::body::Bytes;

use crate::api::utils::empty_response;
use crate::errors::FederationError;
use crate::handler::{Context, FederatedRequest, Handler};
use crate::metrics_defs::UNKNOWN_REQUESTS;

/// Fallback for requests no route matched.
///
/// `GET` requests are still scattered so the node answers end up in the
/// log, which helps adding the missing route. The client always gets an
/// empty 404.
pub struct UnknownHandler;

#[async_trait]
impl Handler for UnknownHandler {
    fn name(&self) -> &'static str {
        "unknown"
    }

    async fn handle(
        &self,
        ctx: &Context,
        request: FederatedRequest,
    ) -> Result<Response<Bytes>, FederationError> {
        shared::counter!(UNKNOWN_REQUESTS, "method" => request.method.to_string()).increment(1);

        if request.method == Method::GET {
            let targets = ctx.targets(&request);
            let responses = ctx
                .executor
                .scatter(&targets, &request.scatter_request())
                .await;
            tracing::warn!(
                method = %request.method,
                path = %request.path_and_query(),
                responses = ?responses,
                "Unknown request"
            );
        } else {
            tracing::warn!(
                method = %request.method,
                path = %request.path_and_query(),
                body = %String::from_utf8_lossy(&request.body),
                "Unknown request"
            );
        }

        empty_response(StatusCode::NOT_FOUND)
    }
}
