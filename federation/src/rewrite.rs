//! Query Rewriter
//!
//! Clients address indices through the `MULTIPREFIX_` placeholder, e.g.
//! `MULTIPREFIX_sessions2-*`. Every node may store its indices under a
//! different prefix, so paths and bodies are rewritten per node before they
//! are sent, and node responses are rewritten back to the placeholder.
//!
//! Search bodies additionally get
//! - their pagination widened (`size + from`, no `from`) so the global page
//!   can be cut after merging, and
//! - every `fileand` filter resolved against the node's own `files` index,
//!   because file ids are only meaningful on the node that wrote them.

use hyper::body::Bytes;
use serde_json::{Map, Value as JsonValue, json};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::errors::FederationError;
use crate::http::{NodeClient, NodeRequest};
use crate::registry::Node;

pub const PREFIX_PLACEHOLDER: &str = "MULTIPREFIX_";

/// Index names that live under the per-node prefix
pub const INDEX_SUFFIXES: &[&str] = &[
    "sessions2",
    "sessions3",
    "sessions",
    "stats",
    "dstats",
    "sequence",
    "files",
    "users",
    "history",
    "fields",
    "hunts",
    "lookups",
    "queries",
];

/// Query field resolved through the node's `files` index
pub const FILE_FILTER_FIELD: &str = "fileand";

/// Maximum number of file documents one file filter can resolve to
const FILE_LOOKUP_SIZE: usize = 500;

fn starts_with_index_suffix(name: &str) -> bool {
    INDEX_SUFFIXES.iter().any(|suffix| name.starts_with(suffix))
}

/// Replaces every placeholder that is directly followed by a known index
/// suffix with `prefix`. Other occurrences are left untouched.
pub fn substitute_prefix(text: &str, prefix: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for (start, placeholder) in text.match_indices(PREFIX_PLACEHOLDER) {
        let end = start + placeholder.len();
        out.push_str(&text[last..start]);
        if starts_with_index_suffix(&text[end..]) {
            out.push_str(prefix);
        } else {
            out.push_str(placeholder);
        }
        last = end;
    }

    out.push_str(&text[last..]);
    out
}

fn unprefixed_name(name: &str, prefix: &str) -> Option<String> {
    if name.starts_with(PREFIX_PLACEHOLDER) {
        return None;
    }
    let rest = name.strip_prefix(prefix)?;
    starts_with_index_suffix(rest).then(|| format!("{PREFIX_PLACEHOLDER}{rest}"))
}

/// Rewrites index names in a node response back to the placeholder.
///
/// Index names show up as keys of the top level object (aliases,
/// templates), as keys below an `indices` object (stats) and as string
/// values of `index`/`_index` fields (hits, cat listings).
pub fn unprefix_response(body: &mut JsonValue, prefix: &str) {
    unprefix_value(body, prefix, true);
}

fn unprefix_value(value: &mut JsonValue, prefix: &str, rename_keys: bool) {
    match value {
        JsonValue::Object(map) => {
            if rename_keys {
                rename_index_keys(map, prefix);
            }
            for (key, child) in map.iter_mut() {
                if key.ends_with("index")
                    && let JsonValue::String(name) = child
                    && let Some(renamed) = unprefixed_name(name, prefix)
                {
                    *name = renamed;
                    continue;
                }
                unprefix_value(child, prefix, key == "indices");
            }
        }
        JsonValue::Array(items) => {
            for item in items {
                unprefix_value(item, prefix, false);
            }
        }
        _ => {}
    }
}

fn rename_index_keys(map: &mut Map<String, JsonValue>, prefix: &str) {
    let renames: Vec<(String, String)> = map
        .keys()
        .filter_map(|key| unprefixed_name(key, prefix).map(|renamed| (key.clone(), renamed)))
        .collect();

    for (old, new) in renames {
        if let Some(value) = map.remove(&old) {
            map.insert(new, value);
        }
    }
}

/// Reads a numeric option that clients send either as number or as string.
pub fn json_usize(value: Option<&JsonValue>) -> Option<usize> {
    match value? {
        JsonValue::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(|n| n as usize),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Widens `size` by `from` and drops `from`, so every node returns all hits
/// needed to cut the requested page after the global merge.
pub fn prepare_pagination(body: &mut JsonValue) {
    let Some(search) = body.as_object_mut() else {
        return;
    };

    let from = json_usize(search.get("from")).unwrap_or(0);
    if let Some(size) = json_usize(search.get("size")).filter(|size| *size > 0) {
        search.insert("size".to_string(), json!(size + from));
    }
    search.remove("from");
}

fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Removes every string valued file filter and returns it with the JSON
/// pointer of the object that held it.
fn take_file_filters(value: &mut JsonValue, pointer: &str, found: &mut Vec<(String, String)>) {
    match value {
        JsonValue::Object(map) => {
            if let Some(JsonValue::String(_)) = map.get(FILE_FILTER_FIELD)
                && let Some(JsonValue::String(name)) = map.remove(FILE_FILTER_FIELD)
            {
                found.push((pointer.to_string(), name));
            }
            for (key, child) in map.iter_mut() {
                let child_pointer = format!("{pointer}/{}", escape_pointer_token(key));
                take_file_filters(child, &child_pointer, found);
            }
        }
        JsonValue::Array(items) => {
            for (index, item) in items.iter_mut().enumerate() {
                take_file_filters(item, &format!("{pointer}/{index}"), found);
            }
        }
        _ => {}
    }
}

/// Query against the `files` index matching a file name filter:
/// `/regex/`, a wildcard pattern containing `*`, or an exact name.
pub fn file_name_query(name: &str) -> JsonValue {
    if name.len() >= 2 && name.starts_with('/') && name.ends_with('/') {
        json!({"query": {"regexp": {"name": &name[1..name.len() - 1]}}})
    } else if name.contains('*') {
        json!({"query": {"wildcard": {"name": name}}})
    } else {
        json!({"query": {"term": {"name": name}}})
    }
}

/// Looks up the files matching `name` on `node` and returns one filter
/// clause per (node, file id) pair.
async fn resolve_file_filter(
    client: &NodeClient,
    node: &Node,
    name: &str,
) -> Result<Vec<JsonValue>, FederationError> {
    let path = format!("/{}files/_search?size={FILE_LOOKUP_SIZE}", node.prefix());
    let body = serde_json::to_vec(&file_name_query(name))?;
    let response = client
        .send(node, NodeRequest::new(http::Method::POST, path).with_body(Bytes::from(body)))
        .await?;

    let clauses: Vec<JsonValue> = response
        .body
        .pointer("/hits/hits")
        .and_then(JsonValue::as_array)
        .into_iter()
        .flatten()
        .filter_map(|file| {
            let source = file.get("_source")?;
            Some(json!({"bool": {"must": [
                {"term": {"node": source.get("node")?}},
                {"term": {"fileId": source.get("num")?}},
            ]}}))
        })
        .collect();

    if clauses.is_empty() {
        return Err(FederationError::NoMatchingFiles(name.to_string()));
    }

    Ok(clauses)
}

/// Rewrites one search body for one node.
pub async fn rewrite_search(
    client: &NodeClient,
    node: &Arc<Node>,
    search: &JsonValue,
) -> Result<JsonValue, FederationError> {
    let mut body = search.clone();
    prepare_pagination(&mut body);

    let mut filters = Vec::new();
    take_file_filters(&mut body, "", &mut filters);
    if filters.is_empty() {
        return Ok(body);
    }

    let mut join_set = JoinSet::new();
    for (pointer, name) in filters {
        let client = client.clone();
        let node = node.clone();
        join_set.spawn(async move {
            let clauses = resolve_file_filter(&client, &node, &name).await;
            (pointer, clauses)
        });
    }

    while let Some(joined) = join_set.join_next().await {
        let (pointer, clauses) = joined
            .map_err(|e| FederationError::InternalError(format!("File lookup task failed: {e}")))?;
        let clauses = clauses?;
        if let Some(JsonValue::Object(target)) = body.pointer_mut(&pointer) {
            target.insert("bool".to_string(), json!({"should": clauses}));
        }
    }

    Ok(body)
}

/// Serializes a rewritten body and substitutes the node prefix in it.
fn finalize_body(body: &JsonValue, node: &Node) -> Result<String, FederationError> {
    Ok(substitute_prefix(&serde_json::to_string(body)?, node.prefix()))
}

/// One (header, query) pair of a multi-search body
#[derive(Clone, Debug, PartialEq)]
pub struct MultiSearchItem {
    pub header: JsonValue,
    pub search: JsonValue,
}

/// Parses a newline delimited multi-search body into header/query pairs.
pub fn parse_msearch(body: &[u8]) -> Result<Vec<MultiSearchItem>, FederationError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| FederationError::RequestBodyError(e.to_string()))?;

    let lines: Vec<&str> = text
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if lines.len() % 2 != 0 {
        return Err(FederationError::RequestBodyError(
            "multi-search body must consist of header and query line pairs".to_string(),
        ));
    }

    lines
        .chunks(2)
        .map(|pair| {
            Ok(MultiSearchItem {
                header: serde_json::from_str(pair[0])?,
                search: serde_json::from_str(pair[1])?,
            })
        })
        .collect()
}

/// Runs `rewrite` for every target concurrently.
///
/// The result at position `i` belongs to `targets[i]`, `None` when its task
/// did not complete.
async fn rewrite_per_node<T, F, Fut>(targets: &[Arc<Node>], rewrite: F) -> Vec<Option<T>>
where
    F: Fn(Arc<Node>) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut join_set = JoinSet::new();
    for (index, node) in targets.iter().enumerate() {
        let rewritten = rewrite(node.clone());
        join_set.spawn(async move { (index, rewritten.await) });
    }

    let mut results: Vec<Option<T>> = (0..targets.len()).map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, result)) => results[index] = Some(result),
            Err(e) => tracing::error!("Rewrite task panicked: {}", e),
        }
    }

    results
}

fn incomplete_rewrite() -> FederationError {
    FederationError::InternalError("Rewrite task did not complete".to_string())
}

/// Rewrites a search body for every target node.
pub async fn rewrite_search_for_nodes(
    client: &NodeClient,
    targets: &[Arc<Node>],
    search: &JsonValue,
) -> Vec<Result<Bytes, FederationError>> {
    rewrite_per_node(targets, |node| {
        let client = client.clone();
        let search = search.clone();
        async move {
            let body = rewrite_search(&client, &node, &search).await?;
            Ok(Bytes::from(finalize_body(&body, &node)?))
        }
    })
    .await
    .into_iter()
    .map(|result| result.unwrap_or_else(|| Err(incomplete_rewrite())))
    .collect()
}

/// One node's share of a multi-search
#[derive(Debug, Default)]
pub struct MultiSearchBatch {
    /// Positions in the client's batch of the queries in `body`, in body order
    pub included: Vec<usize>,
    /// Newline delimited header/query pairs of the included queries
    pub body: Bytes,
    /// Queries that could not be rewritten for this node
    pub failures: Vec<(usize, FederationError)>,
}

impl MultiSearchBatch {
    fn failed(query_count: usize) -> Self {
        Self {
            failures: (0..query_count).map(|index| (index, incomplete_rewrite())).collect(),
            ..Default::default()
        }
    }

    /// Lays the node's `responses` out by position in the client's batch.
    ///
    /// Failed queries get their error object, queries the node did not
    /// answer an empty object.
    pub fn realign(&self, node_body: &JsonValue, query_count: usize) -> JsonValue {
        let mut responses = vec![json!({}); query_count];
        let answered = node_body.get("responses").and_then(JsonValue::as_array);

        for (sent, &index) in self.included.iter().enumerate() {
            if let (Some(slot), Some(response)) =
                (responses.get_mut(index), answered.and_then(|a| a.get(sent)))
            {
                *slot = response.clone();
            }
        }
        for (index, error) in &self.failures {
            if let Some(slot) = responses.get_mut(*index) {
                *slot = error.to_json();
            }
        }

        json!({ "responses": responses })
    }
}

async fn rewrite_msearch_item(
    client: &NodeClient,
    node: &Arc<Node>,
    item: &MultiSearchItem,
) -> Result<String, FederationError> {
    let search = rewrite_search(client, node, &item.search).await?;
    Ok(format!(
        "{}\n{}\n",
        finalize_body(&item.header, node)?,
        finalize_body(&search, node)?
    ))
}

/// Rewrites a multi-search body for every target node.
///
/// Every (node, query) pair is rewritten on its own, so a query that
/// cannot be rewritten for a node only drops that query from the node's
/// batch.
pub async fn rewrite_msearch_for_nodes(
    client: &NodeClient,
    targets: &[Arc<Node>],
    items: &[MultiSearchItem],
) -> Vec<MultiSearchBatch> {
    rewrite_per_node(targets, |node| {
        let client = client.clone();
        let items = items.to_vec();
        async move {
            let mut batch = MultiSearchBatch::default();
            let mut bundle = String::new();
            for (index, item) in items.iter().enumerate() {
                match rewrite_msearch_item(&client, &node, item).await {
                    Ok(lines) => {
                        bundle.push_str(&lines);
                        batch.included.push(index);
                    }
                    Err(e) => batch.failures.push((index, e)),
                }
            }
            batch.body = Bytes::from(bundle);
            batch
        }
    })
    .await
    .into_iter()
    .map(|batch| batch.unwrap_or_else(|| MultiSearchBatch::failed(items.len())))
    .collect()
}
