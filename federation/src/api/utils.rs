use http::StatusCode;
use http::header::CONTENT_TYPE;
use hyper::Response;
use hyper::body::Bytes;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::errors::FederationError;
use crate::executor::PerNodeResponse;
use crate::registry::{Node, Registry};
use crate::rewrite::MultiSearchBatch;

/// Serializes a value to a JSON response.
pub fn json_response(
    status: StatusCode,
    body: &JsonValue,
) -> Result<Response<Bytes>, FederationError> {
    let bytes = serde_json::to_vec(body).map(Bytes::from)?;
    Ok(Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(bytes)?)
}

pub fn empty_response(status: StatusCode) -> Result<Response<Bytes>, FederationError> {
    Ok(Response::builder().status(status).body(Bytes::new())?)
}

/// Nodes whose request body could be rewritten, with those bodies
pub struct Rewritten {
    pub targets: Vec<Arc<Node>>,
    pub bodies: Vec<Bytes>,
    /// Error objects standing in for the nodes whose rewrite failed
    pub failures: Vec<PerNodeResponse>,
}

/// Separates successful rewrites from failed ones.
///
/// Fails when there were targets but none of them could be rewritten.
pub fn split_rewrites(
    registry: &Registry,
    targets: Vec<Arc<Node>>,
    results: Vec<Result<Bytes, FederationError>>,
) -> Result<Rewritten, FederationError> {
    let attempted = targets.len();
    let mut rewritten = Rewritten {
        targets: Vec::with_capacity(attempted),
        bodies: Vec::with_capacity(attempted),
        failures: Vec::new(),
    };
    let mut last_error = None;

    for (node, result) in targets.into_iter().zip(results) {
        match result {
            Ok(body) => {
                rewritten.targets.push(node);
                rewritten.bodies.push(body);
            }
            Err(e) => {
                let cluster = registry.cluster_for(node.address()).map(String::from);
                tracing::warn!(node = %node, cluster = ?cluster, error = %e, "Query rewrite failed");
                rewritten.failures.push(PerNodeResponse {
                    cluster,
                    body: e.to_json(),
                });
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if rewritten.targets.is_empty() => {
            Err(FederationError::RewriteFailed(e.to_string()))
        }
        _ => Ok(rewritten),
    }
}

/// Multi-search batches of the nodes with at least one rewritten query
pub struct Batched {
    pub targets: Vec<Arc<Node>>,
    pub batches: Vec<MultiSearchBatch>,
    /// Realigned error objects of the nodes where no query could be rewritten
    pub failures: Vec<PerNodeResponse>,
}

/// Separates the nodes that still have queries to run from those that
/// have none left.
///
/// Fails when there were queries to run but none of them could be
/// rewritten for any node.
pub fn split_batches(
    registry: &Registry,
    targets: Vec<Arc<Node>>,
    batches: Vec<MultiSearchBatch>,
    query_count: usize,
) -> Result<Batched, FederationError> {
    let mut batched = Batched {
        targets: Vec::with_capacity(targets.len()),
        batches: Vec::with_capacity(targets.len()),
        failures: Vec::new(),
    };
    let mut last_error = None;

    for (node, batch) in targets.into_iter().zip(batches) {
        let cluster = registry.cluster_for(node.address()).map(String::from);
        for (query, error) in &batch.failures {
            tracing::warn!(node = %node, cluster = ?cluster, query, error = %error, "Query rewrite failed");
        }

        if batch.included.is_empty() {
            if let Some((_, error)) = batch.failures.last() {
                last_error = Some(error.to_string());
            }
            batched.failures.push(PerNodeResponse {
                body: batch.realign(&JsonValue::Null, query_count),
                cluster,
            });
        } else {
            batched.targets.push(node);
            batched.batches.push(batch);
        }
    }

    match last_error {
        Some(e) if batched.targets.is_empty() => Err(FederationError::RewriteFailed(e)),
        _ => Ok(batched),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::new(
            vec!["a:9200".into(), "b:9200".into()],
            vec!["C1".into(), "C2".into()],
        )
        .unwrap()
    }

    #[test]
    fn test_split_rewrites_partial_failure() {
        let registry = registry();
        let targets: Vec<_> = registry.nodes().cloned().collect();
        let results = vec![
            Err(FederationError::NoMatchingFiles("x.pcap".into())),
            Ok(Bytes::from_static(b"{}")),
        ];

        let rewritten = split_rewrites(&registry, targets, results).unwrap();
        assert_eq!(rewritten.targets.len(), 1);
        assert_eq!(rewritten.targets[0].address(), "b:9200");
        assert_eq!(rewritten.failures.len(), 1);
        assert_eq!(rewritten.failures[0].cluster.as_deref(), Some("C1"));
        assert_eq!(
            rewritten.failures[0].body["error"]["type"],
            "query_rewrite_exception"
        );
    }

    #[test]
    fn test_split_rewrites_all_failed() {
        let registry = registry();
        let targets: Vec<_> = registry.nodes().cloned().collect();
        let results = vec![
            Err(FederationError::NoMatchingFiles("x.pcap".into())),
            Err(FederationError::NoMatchingFiles("x.pcap".into())),
        ];

        let result = split_rewrites(&registry, targets, results);
        assert!(matches!(result, Err(FederationError::RewriteFailed(_))));

        // Nothing to rewrite is not a failure
        let rewritten = split_rewrites(&registry, Vec::new(), Vec::new()).unwrap();
        assert!(rewritten.targets.is_empty());
    }

    #[test]
    fn test_split_batches() {
        let registry = registry();
        let targets: Vec<_> = registry.nodes().cloned().collect();
        let batches = vec![
            MultiSearchBatch {
                failures: vec![
                    (0, FederationError::NoMatchingFiles("x.pcap".into())),
                    (1, FederationError::NoMatchingFiles("x.pcap".into())),
                ],
                ..Default::default()
            },
            MultiSearchBatch {
                included: vec![1],
                body: Bytes::from_static(b"{}\n{}\n"),
                failures: vec![(0, FederationError::NoMatchingFiles("x.pcap".into()))],
            },
        ];

        let batched = split_batches(&registry, targets, batches, 2).unwrap();
        assert_eq!(batched.targets.len(), 1);
        assert_eq!(batched.targets[0].address(), "b:9200");
        assert_eq!(batched.batches[0].included, vec![1]);
        assert_eq!(batched.failures.len(), 1);
        assert_eq!(batched.failures[0].cluster.as_deref(), Some("C1"));
        assert_eq!(
            batched.failures[0].body["responses"][1]["error"]["type"],
            "query_rewrite_exception"
        );
    }

    #[test]
    fn test_split_batches_nothing_rewritten() {
        let registry = registry();
        let targets: Vec<_> = registry.nodes().cloned().collect();
        let failed = || MultiSearchBatch {
            failures: vec![(0, FederationError::NoMatchingFiles("x.pcap".into()))],
            ..Default::default()
        };

        let result = split_batches(&registry, targets, vec![failed(), failed()], 1);
        assert!(matches!(result, Err(FederationError::RewriteFailed(_))));

        // An empty batch has nothing that could fail
        let targets: Vec<_> = registry.nodes().cloned().collect();
        let empty = vec![MultiSearchBatch::default(), MultiSearchBatch::default()];
        let batched = split_batches(&registry, targets, empty, 0).unwrap();
        assert!(batched.targets.is_empty());
        assert_eq!(batched.failures.len(), 2);
    }

    #[test]
    fn test_json_response() {
        let response = json_response(StatusCode::OK, &serde_json::json!({"a": 1})).unwrap();
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(response.body().as_ref(), b"{\"a\":1}");
    }
}
