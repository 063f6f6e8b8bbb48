use async_trait::async_trait;
use http::StatusCode;
use hyper::Response;
use hyper::body::Bytes;

use crate::api::utils::json_response;
use crate::errors::FederationError;
use crate::handler::{Context, FederatedRequest, Handler};
use crate::merger::GatherPolicy;

/// Sends the request unchanged (apart from prefix substitution) to every
/// target node and merges the answers with a fixed policy.
///
/// # Used for:
///
/// - `GET /_tasks`, `GET /_nodes...` - map union
/// - `GET /_cluster/health`, `/:index/_count` - numeric summation
/// - `GET /_cat/*` - concatenation
/// - `GET /:index/_stats` - index stats
/// - `GET /:index/:type/:id` - first found document
pub struct GatherHandler {
    name: &'static str,
    policy: GatherPolicy,
}

impl GatherHandler {
    pub fn new(name: &'static str, policy: GatherPolicy) -> Self {
        Self { name, policy }
    }
}

#[async_trait]
impl Handler for GatherHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn handle(
        &self,
        ctx: &Context,
        request: FederatedRequest,
    ) -> Result<Response<Bytes>, FederationError> {
        let targets = ctx.targets(&request);
        let responses = ctx
            .executor
            .scatter(&targets, &request.scatter_request())
            .await;

        json_response(StatusCode::OK, &self.policy.merge(responses))
    }
}
