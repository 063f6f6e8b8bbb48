use async_trait::async_trait;
use http::StatusCode;
use hyper::Response;
use hyper::body::Bytes;

use crate::api::utils::{json_response, split_batches, split_rewrites};
use crate::errors::FederationError;
use crate::executor::{PerNodeResponse, ScatterBody};
use crate::handler::{Context, FederatedRequest, Handler};
use crate::merger::{merge_msearch, merge_search};
use crate::rewrite::{parse_msearch, rewrite_msearch_for_nodes, rewrite_search_for_nodes};

/// Searches every target node and merges the hit lists, facets and
/// aggregations into one response.
///
/// Each node gets its own rewritten query. A node whose query cannot be
/// rewritten is left out and shows up as an error object in the merge.
pub struct SearchHandler;

#[async_trait]
impl Handler for SearchHandler {
    fn name(&self) -> &'static str {
        "search"
    }

    async fn handle(
        &self,
        ctx: &Context,
        request: FederatedRequest,
    ) -> Result<Response<Bytes>, FederationError> {
        let search = request.json_body()?;
        let targets = ctx.targets(&request);
        let scatter = request.scatter_request();

        if !request.has_body() {
            let responses = ctx.executor.scatter(&targets, &scatter).await;
            return json_response(StatusCode::OK, &merge_search(&search, &responses));
        }

        let results = rewrite_search_for_nodes(ctx.executor.client(), &targets, &search).await;
        let rewritten = split_rewrites(&ctx.registry, targets, results)?;

        let scatter = scatter.with_body(ScatterBody::PerNode(rewritten.bodies));
        let mut responses = ctx.executor.scatter(&rewritten.targets, &scatter).await;
        responses.extend(rewritten.failures);

        json_response(StatusCode::OK, &merge_search(&search, &responses))
    }
}

/// Runs a newline delimited batch of searches on every target node and
/// merges the results query by query.
///
/// A query that cannot be rewritten for a node is left out of that node's
/// batch and counts as an error object for that node only.
pub struct MultiSearchHandler;

#[async_trait]
impl Handler for MultiSearchHandler {
    fn name(&self) -> &'static str {
        "msearch"
    }

    async fn handle(
        &self,
        ctx: &Context,
        request: FederatedRequest,
    ) -> Result<Response<Bytes>, FederationError> {
        let items = parse_msearch(&request.body)?;
        let targets = ctx.targets(&request);

        let batches = rewrite_msearch_for_nodes(ctx.executor.client(), &targets, &items).await;
        let batched = split_batches(&ctx.registry, targets, batches, items.len())?;

        let bodies = batched.batches.iter().map(|batch| batch.body.clone()).collect();
        let scatter = request
            .scatter_request()
            .with_content_type("application/x-ndjson")
            .with_body(ScatterBody::PerNode(bodies));
        let scattered = ctx.executor.scatter(&batched.targets, &scatter).await;

        let mut responses = if batched.targets.is_empty() {
            scattered
        } else {
            scattered
                .into_iter()
                .zip(&batched.batches)
                .map(|(response, batch)| PerNodeResponse {
                    body: batch.realign(&response.body, items.len()),
                    cluster: response.cluster,
                })
                .collect()
        };
        responses.extend(batched.failures);

        let searches: Vec<_> = items.into_iter().map(|item| item.search).collect();
        json_response(StatusCode::OK, &merge_msearch(&searches, &responses))
    }
}
