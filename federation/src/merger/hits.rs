//! Search response merging.
//!
//! The merged response is shaped by the client's original query: the facets
//! and aggregations it asked for, its sort order and its `from`/`size` page.

use icu_collator::options::CollatorOptions;
use icu_collator::{Collator, CollatorBorrowed};
use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue, json};
use std::cmp::Ordering;

use super::buckets::{AggregationMerge, BucketKind, FacetMerge};
use super::{accumulate, add_numbers};
use crate::executor::PerNodeResponse;
use crate::rewrite::json_usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn parse(order: Option<&str>, default: SortOrder) -> Self {
        match order {
            Some(order) if order.eq_ignore_ascii_case("asc") => SortOrder::Asc,
            Some(order) if order.eq_ignore_ascii_case("desc") => SortOrder::Desc,
            _ => default,
        }
    }
}

/// Sort direction of every entry in the query's `sort` list.
///
/// `"field"` sorts ascending, `{"field": "asc"}` uses the given order and
/// `{"field": {"order": ..}}` descends unless `asc` is given.
fn sort_orders(search: &JsonValue) -> Vec<SortOrder> {
    let entries = match search.get("sort") {
        Some(JsonValue::Array(entries)) => entries.as_slice(),
        Some(entry) => std::slice::from_ref(entry),
        None => &[],
    };

    entries
        .iter()
        .map(|entry| match entry {
            JsonValue::String(_) => SortOrder::Asc,
            JsonValue::Object(fields) => match fields.values().next() {
                Some(JsonValue::String(order)) => {
                    SortOrder::parse(Some(order.as_str()), SortOrder::Desc)
                }
                Some(options) => SortOrder::parse(
                    options.get("order").and_then(JsonValue::as_str),
                    SortOrder::Desc,
                ),
                None => SortOrder::Desc,
            },
            _ => SortOrder::Desc,
        })
        .collect()
}

/// Root locale collator for string sort values. Accents sort with their
/// base letter and lower case sorts before upper case.
fn string_collator() -> Option<CollatorBorrowed<'static>> {
    match Collator::try_new(Default::default(), CollatorOptions::default()) {
        Ok(collator) => Some(collator),
        Err(e) => {
            tracing::error!(error = %e, "Failed to load collation data");
            None
        }
    }
}

/// Per-key sort directions of a query plus the string collator.
struct HitOrdering {
    orders: Vec<SortOrder>,
    collator: Option<CollatorBorrowed<'static>>,
}

impl HitOrdering {
    fn new(orders: Vec<SortOrder>) -> Self {
        Self {
            orders,
            collator: string_collator(),
        }
    }

    fn compare_strings(&self, a: &str, b: &str) -> Ordering {
        match &self.collator {
            Some(collator) => collator.compare(a, b),
            None => a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| b.cmp(a)),
        }
    }

    fn compare_values(&self, a: &JsonValue, b: &JsonValue) -> Ordering {
        match (a, b) {
            (JsonValue::String(x), JsonValue::String(y)) => self.compare_strings(x, y),
            _ => super::compare_values(a, b),
        }
    }

    /// Compares two hits by their `sort` values.
    fn compare_hits(&self, a: &JsonValue, b: &JsonValue) -> Ordering {
        let empty: Vec<JsonValue> = Vec::new();
        let a_values = a.get("sort").and_then(JsonValue::as_array).unwrap_or(&empty);
        let b_values = b.get("sort").and_then(JsonValue::as_array).unwrap_or(&empty);

        for ((a_value, b_value), order) in a_values.iter().zip(b_values).zip(&self.orders) {
            let ordering = self.compare_values(a_value, b_value);
            if ordering != Ordering::Equal {
                return match order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                };
            }
        }
        Ordering::Equal
    }
}

/// Hit total either as plain number or as `{value, relation}`
#[derive(Default)]
struct HitTotal {
    value: Option<JsonValue>,
    as_object: bool,
    lower_bound: bool,
}

impl HitTotal {
    fn add(&mut self, total: Option<&JsonValue>) {
        let value = match total {
            Some(JsonValue::Object(total)) => {
                self.as_object = true;
                if total.get("relation").and_then(JsonValue::as_str) == Some("gte") {
                    self.lower_bound = true;
                }
                total.get("value")
            }
            other => other,
        };

        if let Some(value @ JsonValue::Number(_)) = value {
            self.value = Some(match &self.value {
                Some(current) => add_numbers(current, value),
                None => value.clone(),
            });
        }
    }

    fn finish(self) -> JsonValue {
        let value = self.value.unwrap_or_else(|| json!(0));
        if self.as_object {
            let relation = if self.lower_bound { "gte" } else { "eq" };
            json!({"value": value, "relation": relation})
        } else {
            value
        }
    }
}

/// Search results accumulated across nodes
struct SearchMerge {
    total: HitTotal,
    counters: Map<String, JsonValue>,
    hits: Vec<JsonValue>,
    facets: IndexMap<String, FacetMerge>,
    aggregations: IndexMap<String, AggregationMerge>,
}

impl SearchMerge {
    fn new(search: &JsonValue) -> Self {
        let facets = search
            .get("facets")
            .and_then(JsonValue::as_object)
            .into_iter()
            .flatten()
            .map(|(name, definition)| {
                (name.clone(), FacetMerge::new(BucketKind::of_facet(definition)))
            })
            .collect();

        let aggregations = ["aggregations", "aggs"]
            .iter()
            .filter_map(|field| search.get(*field).and_then(JsonValue::as_object))
            .flatten()
            .map(|(name, definition)| {
                (
                    name.clone(),
                    AggregationMerge::new(BucketKind::of_aggregation(definition)),
                )
            })
            .collect();

        Self {
            total: HitTotal::default(),
            counters: Map::new(),
            hits: Vec::new(),
            facets,
            aggregations,
        }
    }

    fn add(&mut self, response: &PerNodeResponse) {
        let body = &response.body;
        let Some(hits) = body.get("hits") else {
            if let Some(error) = body.get("error") {
                tracing::warn!(cluster = ?response.cluster, error = %error, "Search failed on node");
            } else {
                tracing::debug!(cluster = ?response.cluster, "Node returned no search results");
            }
            return;
        };

        self.total.add(hits.get("total"));
        for field in ["missing", "other"] {
            accumulate(&mut self.counters, field, hits.get(field));
        }

        for hit in hits.get("hits").and_then(JsonValue::as_array).into_iter().flatten() {
            let mut hit = hit.clone();
            if let (Some(cluster), JsonValue::Object(fields)) = (&response.cluster, &mut hit) {
                fields.insert("cluster".to_string(), json!(cluster));
                if let Some(JsonValue::Object(source)) = fields.get_mut("_source") {
                    source.insert("cluster".to_string(), json!(cluster));
                }
            }
            self.hits.push(hit);
        }

        for (name, facet) in self.facets.iter_mut() {
            if let Some(node_facet) = body.get("facets").and_then(|f| f.get(name)) {
                facet.add(node_facet);
            }
        }
        for (name, aggregation) in self.aggregations.iter_mut() {
            if let Some(node_aggregation) = body.get("aggregations").and_then(|a| a.get(name)) {
                aggregation.add(node_aggregation);
            }
        }
    }

    fn finish(mut self, search: &JsonValue) -> JsonValue {
        let orders = sort_orders(search);
        if !orders.is_empty() {
            let ordering = HitOrdering::new(orders);
            // Stable, hits with equal sort values keep node order
            self.hits.sort_by(|a, b| ordering.compare_hits(a, b));
        }

        if let Some(size) = json_usize(search.get("size")).filter(|size| *size > 0) {
            let from = json_usize(search.get("from")).unwrap_or(0);
            self.hits = self.hits.into_iter().skip(from).take(size).collect();
        }

        let mut hits = self.counters;
        hits.insert("total".to_string(), self.total.finish());
        hits.insert("hits".to_string(), JsonValue::Array(self.hits));

        let mut result = Map::new();
        result.insert("hits".to_string(), JsonValue::Object(hits));
        if search.get("facets").is_some() {
            let facets = self
                .facets
                .into_iter()
                .map(|(name, facet)| (name, facet.finish()))
                .collect();
            result.insert("facets".to_string(), JsonValue::Object(facets));
        }
        if search.get("aggregations").is_some() || search.get("aggs").is_some() {
            let aggregations = self
                .aggregations
                .into_iter()
                .map(|(name, aggregation)| (name, aggregation.finish()))
                .collect();
            result.insert("aggregations".to_string(), JsonValue::Object(aggregations));
        }
        JsonValue::Object(result)
    }
}

/// Merges the per node responses of one search.
///
/// `search` is the client's query before pagination was widened.
pub fn merge_search(search: &JsonValue, responses: &[PerNodeResponse]) -> JsonValue {
    let mut merge = SearchMerge::new(search);
    for response in responses {
        merge.add(response);
    }
    merge.finish(search)
}

/// Merges multi-search responses query by query.
pub fn merge_msearch(searches: &[JsonValue], responses: &[PerNodeResponse]) -> JsonValue {
    let merged: Vec<JsonValue> = searches
        .iter()
        .enumerate()
        .map(|(index, search)| {
            let per_query: Vec<PerNodeResponse> = responses
                .iter()
                .map(|response| PerNodeResponse {
                    cluster: response.cluster.clone(),
                    body: response
                        .body
                        .get("responses")
                        .and_then(|r| r.get(index))
                        .cloned()
                        .unwrap_or_else(|| json!({})),
                })
                .collect();
            merge_search(search, &per_query)
        })
        .collect();

    json!({"responses": merged})
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(cluster: &str, body: JsonValue) -> PerNodeResponse {
        PerNodeResponse {
            cluster: Some(cluster.to_string()),
            body,
        }
    }

    fn hits_with_sort(values: &[i64]) -> JsonValue {
        let hits: Vec<JsonValue> = values
            .iter()
            .map(|v| json!({"_id": format!("id{v}"), "_source": {}, "sort": [v]}))
            .collect();
        json!({"hits": {"total": values.len(), "hits": hits}})
    }

    fn sort_values(merged: &JsonValue) -> Vec<i64> {
        merged["hits"]["hits"]
            .as_array()
            .unwrap()
            .iter()
            .map(|hit| hit["sort"][0].as_i64().unwrap())
            .collect()
    }

    #[test]
    fn test_totals_and_pagination() {
        let node_a = hits_with_sort(&[9, 7, 5, 3]);
        let node_b = hits_with_sort(&[8, 6, 4]);
        let responses = vec![response("C1", node_a), response("C2", node_b)];

        for (size, from) in [(2, 0), (3, 2), (10, 0), (5, 5), (4, 7), (1, 100)] {
            let search = json!({"size": size, "from": from, "sort": [{"lastPacket": {"order": "desc"}}]});
            let merged = merge_search(&search, &responses);

            assert_eq!(merged["hits"]["total"], 7);
            let expected = size.min(7usize.saturating_sub(from));
            assert_eq!(merged["hits"]["hits"].as_array().unwrap().len(), expected);
        }

        let search = json!({"size": 3, "from": 2, "sort": [{"lastPacket": {"order": "desc"}}]});
        assert_eq!(sort_values(&merge_search(&search, &responses)), vec![7, 6, 5]);
    }

    #[test]
    fn test_hits_are_tagged_with_cluster() {
        let merged = merge_search(
            &json!({}),
            &[
                response("C1", json!({"hits": {"total": 1, "hits": [{"_id": "a", "_source": {"ip": 1}}]}})),
                response("C2", json!({"hits": {"total": 1, "hits": [{"_id": "b"}]}})),
            ],
        );

        assert_eq!(
            merged,
            json!({"hits": {"total": 2, "hits": [
                {"_id": "a", "cluster": "C1", "_source": {"ip": 1, "cluster": "C1"}},
                {"_id": "b", "cluster": "C2"},
            ]}})
        );
    }

    #[test]
    fn test_sort_orders() {
        let search = json!({"sort": [
            "firstPacket",
            {"lastPacket": "asc"},
            {"ip.src": {"order": "desc"}},
            {"node": {"missing": "_last"}},
        ]});
        assert_eq!(
            sort_orders(&search),
            vec![SortOrder::Asc, SortOrder::Asc, SortOrder::Desc, SortOrder::Desc]
        );
    }

    #[test]
    fn test_multi_key_sort() {
        let hit = |id: &str, sort: JsonValue| json!({"_id": id, "sort": sort});
        let node_a = json!({"hits": {"total": 2, "hits": [
            hit("a1", json!(["b", 1])),
            hit("a2", json!(["a", 5])),
        ]}});
        let node_b = json!({"hits": {"total": 2, "hits": [
            hit("b1", json!(["B", 3])),
            hit("b2", json!(["b", 9])),
        ]}});
        let search = json!({"sort": [{"node": {"order": "asc"}}, {"lastPacket": {"order": "desc"}}]});

        let merged = merge_search(&search, &[response("C1", node_a), response("C2", node_b)]);
        let ids: Vec<&str> = merged["hits"]["hits"]
            .as_array()
            .unwrap()
            .iter()
            .map(|hit| hit["_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["a2", "b2", "a1", "b1"]);
    }

    #[test]
    fn test_string_sort_is_locale_aware() {
        let hit = |id: &str| json!({"_id": id, "sort": [id]});
        let node_a = json!({"hits": {"total": 2, "hits": [hit("zebra"), hit("Élan")]}});
        let node_b = json!({"hits": {"total": 2, "hits": [hit("élan"), hit("fox")]}});

        let ids = |search: JsonValue| -> Vec<String> {
            merge_search(&search, &[response("C1", node_a.clone()), response("C2", node_b.clone())])
                ["hits"]["hits"]
                .as_array()
                .unwrap()
                .iter()
                .map(|hit| hit["_id"].as_str().unwrap().to_string())
                .collect()
        };

        assert_eq!(ids(json!({"sort": ["name"]})), vec!["élan", "Élan", "fox", "zebra"]);
        assert_eq!(
            ids(json!({"sort": [{"name": {"order": "desc"}}]})),
            vec!["zebra", "fox", "Élan", "élan"]
        );
    }

    #[test]
    fn test_total_object_form_and_counters() {
        let merged = merge_search(
            &json!({}),
            &[
                response("C1", json!({"hits": {"total": {"value": 10, "relation": "eq"}, "missing": 1, "hits": []}})),
                response("C2", json!({"hits": {"total": {"value": 10000, "relation": "gte"}, "missing": 2, "hits": []}})),
            ],
        );
        assert_eq!(merged["hits"]["total"], json!({"value": 10010, "relation": "gte"}));
        assert_eq!(merged["hits"]["missing"], 3);
        assert!(merged["hits"].get("other").is_none());
    }

    #[test]
    fn test_facets_and_aggregations_follow_query() {
        let search = json!({
            "facets": {"lp": {"histogram": {"field": "lp", "interval": 60}}},
            "aggs": {"proto": {"terms": {"field": "protocol"}}},
        });
        let node = |count: i64| {
            json!({
                "hits": {"total": count, "hits": []},
                "facets": {"lp": {"_type": "histogram", "total": 10, "missing": 0, "other": 0,
                    "entries": [{"key": 60, "count": 2, "total": 10}]}},
                "aggregations": {"proto": {"doc_count_error_upper_bound": 0, "sum_other_doc_count": 0,
                    "buckets": [{"key": "tcp", "doc_count": count}]}},
            })
        };

        let ab = merge_search(&search, &[response("C1", node(1)), response("C2", node(2))]);
        let ba = merge_search(&search, &[response("C2", node(2)), response("C1", node(1))]);

        assert_eq!(ab["facets"]["lp"]["total"], 20);
        assert_eq!(ab["facets"]["lp"]["entries"], json!([{"key": 60, "count": 4, "total": 20}]));
        assert_eq!(ab["aggregations"]["proto"]["buckets"], json!([{"key": "tcp", "doc_count": 3}]));
        assert_eq!(ab["facets"], ba["facets"]);
        assert_eq!(ab["aggregations"], ba["aggregations"]);
    }

    #[test]
    fn test_responses_without_hits_are_skipped() {
        let search = json!({"aggregations": {"a": {"terms": {"field": "x"}}}});
        let merged = merge_search(
            &search,
            &[
                PerNodeResponse { cluster: None, body: json!({}) },
                response("C2", json!({"error": {"type": "query_rewrite_exception"}})),
            ],
        );
        assert_eq!(
            merged,
            json!({
                "hits": {"total": 0, "hits": []},
                "aggregations": {"a": {"doc_count_error_upper_bound": 0, "sum_other_doc_count": 0, "buckets": []}},
            })
        );
    }

    #[test]
    fn test_merge_msearch() {
        let searches = vec![json!({"size": 1}), json!({})];
        let node = |cluster: &str, total: i64| {
            response(
                cluster,
                json!({"responses": [
                    {"hits": {"total": total, "hits": [{"_id": cluster}]}},
                    {"hits": {"total": 1, "hits": []}},
                ]}),
            )
        };

        let merged = merge_msearch(&searches, &[node("C1", 3), node("C2", 4)]);
        let responses = merged["responses"].as_array().unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["hits"]["total"], 7);
        assert_eq!(responses[0]["hits"]["hits"].as_array().unwrap().len(), 1);
        assert_eq!(responses[1]["hits"]["total"], 2);
    }
}
