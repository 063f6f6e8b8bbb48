//! Bucket merging for legacy facets and aggregations.
//!
//! Buckets from every node are collected into a map keyed by the bucket key,
//! counts of buckets with the same key are summed, and the map is turned
//! back into an ordered array. The bucket kind comes from the query, never
//! from the response shape.

use indexmap::IndexMap;
use indexmap::map::Entry;
use serde_json::{Map, Value as JsonValue, json};

use super::{accumulate, add_numbers, bucket_key, compare_values};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BucketKind {
    Histogram,
    Terms,
}

impl BucketKind {
    /// Kind of a legacy facet definition from the query
    pub fn of_facet(definition: &JsonValue) -> Self {
        if definition.get("histogram").is_some() {
            BucketKind::Histogram
        } else {
            BucketKind::Terms
        }
    }

    /// Kind of an aggregation definition from the query
    pub fn of_aggregation(definition: &JsonValue) -> Self {
        if definition.get("histogram").is_some() || definition.get("date_histogram").is_some() {
            BucketKind::Histogram
        } else {
            BucketKind::Terms
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BucketKind::Histogram => "histogram",
            BucketKind::Terms => "terms",
        }
    }
}

/// Bucket layout of one merge flavor
struct Layout {
    /// Field holding the bucket key
    key_field: &'static str,
    /// Field holding the bucket count
    count_field: &'static str,
    /// Additional counters summed per bucket, as JSON pointers
    extra_counters: &'static [&'static str],
}

const FACET_HISTOGRAM: Layout = Layout {
    key_field: "key",
    count_field: "count",
    extra_counters: &["/total"],
};

const FACET_TERMS: Layout = Layout {
    key_field: "term",
    count_field: "count",
    extra_counters: &["/total"],
};

const AGGREGATION: Layout = Layout {
    key_field: "key",
    count_field: "doc_count",
    extra_counters: &["/db/value", "/pa/value"],
};

struct BucketMap {
    kind: BucketKind,
    layout: &'static Layout,
    buckets: IndexMap<String, JsonValue>,
}

impl BucketMap {
    fn new(kind: BucketKind, layout: &'static Layout) -> Self {
        Self {
            kind,
            layout,
            buckets: IndexMap::new(),
        }
    }

    fn add_all(&mut self, buckets: Option<&JsonValue>) {
        for bucket in buckets.and_then(JsonValue::as_array).into_iter().flatten() {
            self.add(bucket);
        }
    }

    fn add(&mut self, bucket: &JsonValue) {
        let Some(key) = bucket.get(self.layout.key_field) else {
            return;
        };

        match self.buckets.entry(bucket_key(key)) {
            Entry::Vacant(entry) => {
                entry.insert(bucket.clone());
            }
            Entry::Occupied(mut entry) => {
                let merged = entry.get_mut();
                if let JsonValue::Object(fields) = merged {
                    accumulate(fields, self.layout.count_field, bucket.get(self.layout.count_field));
                }
                for pointer in self.layout.extra_counters {
                    if let (Some(current), Some(other)) =
                        (merged.pointer_mut(pointer), bucket.pointer(pointer))
                    {
                        *current = add_numbers(current, other);
                    }
                }
            }
        }
    }

    fn key_of<'a>(&self, bucket: &'a JsonValue) -> &'a JsonValue {
        bucket.get(self.layout.key_field).unwrap_or(&JsonValue::Null)
    }

    fn count_of<'a>(&self, bucket: &'a JsonValue) -> &'a JsonValue {
        bucket.get(self.layout.count_field).unwrap_or(&JsonValue::Null)
    }

    /// Histograms ascend by key, terms descend by count with ties ascending
    /// by key, so the result does not depend on node order.
    fn into_sorted(self) -> Vec<JsonValue> {
        let mut buckets: Vec<JsonValue> = self.buckets.values().cloned().collect();
        buckets.sort_by(|a, b| match self.kind {
            BucketKind::Histogram => compare_values(self.key_of(a), self.key_of(b)),
            BucketKind::Terms => compare_values(self.count_of(b), self.count_of(a))
                .then_with(|| compare_values(self.key_of(a), self.key_of(b))),
        });
        buckets
    }
}

/// One legacy facet accumulated across nodes
pub struct FacetMerge {
    buckets: BucketMap,
    totals: Map<String, JsonValue>,
}

impl FacetMerge {
    pub fn new(kind: BucketKind) -> Self {
        let layout = match kind {
            BucketKind::Histogram => &FACET_HISTOGRAM,
            BucketKind::Terms => &FACET_TERMS,
        };
        let mut totals = Map::new();
        for field in ["total", "missing", "other"] {
            totals.insert(field.to_string(), json!(0));
        }

        Self {
            buckets: BucketMap::new(kind, layout),
            totals,
        }
    }

    fn array_field(&self) -> &'static str {
        match self.buckets.kind {
            BucketKind::Histogram => "entries",
            BucketKind::Terms => "terms",
        }
    }

    pub fn add(&mut self, facet: &JsonValue) {
        for field in ["total", "missing", "other"] {
            accumulate(&mut self.totals, field, facet.get(field));
        }
        let array_field = self.array_field();
        self.buckets.add_all(facet.get(array_field));
    }

    pub fn finish(self) -> JsonValue {
        let array_field = self.array_field();
        let kind = self.buckets.kind;
        let mut facet = self.totals;
        facet.insert("_type".to_string(), json!(kind.as_str()));
        facet.insert(array_field.to_string(), JsonValue::Array(self.buckets.into_sorted()));
        JsonValue::Object(facet)
    }
}

/// One bucket aggregation accumulated across nodes
pub struct AggregationMerge {
    buckets: BucketMap,
    totals: Map<String, JsonValue>,
}

impl AggregationMerge {
    pub fn new(kind: BucketKind) -> Self {
        let mut totals = Map::new();
        for field in ["doc_count_error_upper_bound", "sum_other_doc_count"] {
            totals.insert(field.to_string(), json!(0));
        }

        Self {
            buckets: BucketMap::new(kind, &AGGREGATION),
            totals,
        }
    }

    pub fn add(&mut self, aggregation: &JsonValue) {
        for field in ["doc_count_error_upper_bound", "sum_other_doc_count"] {
            accumulate(&mut self.totals, field, aggregation.get(field));
        }
        self.buckets.add_all(aggregation.get("buckets"));
    }

    pub fn finish(self) -> JsonValue {
        let mut aggregation = self.totals;
        aggregation.insert("buckets".to_string(), JsonValue::Array(self.buckets.into_sorted()));
        JsonValue::Object(aggregation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_facet_sums_matching_keys() {
        let node_a = json!({"_type": "histogram", "total": 10, "missing": 0, "other": 0,
            "entries": [{"key": 60, "count": 2, "total": 10}]});
        let node_b = json!({"_type": "histogram", "total": 10, "missing": 1, "other": 0,
            "entries": [{"key": 60, "count": 2, "total": 10}, {"key": 0, "count": 1, "total": 3}]});

        let mut merge = FacetMerge::new(BucketKind::Histogram);
        merge.add(&node_a);
        merge.add(&node_b);
        let facet = merge.finish();

        assert_eq!(facet["_type"], "histogram");
        assert_eq!(facet["total"], 20);
        assert_eq!(facet["missing"], 1);
        assert_eq!(
            facet["entries"],
            json!([
                {"key": 0, "count": 1, "total": 3},
                {"key": 60, "count": 4, "total": 20},
            ])
        );
    }

    #[test]
    fn test_terms_facet_is_independent_of_node_order() {
        let node_a = json!({"terms": [{"term": "tcp", "count": 5}, {"term": "udp", "count": 2}]});
        let node_b = json!({"terms": [{"term": "icmp", "count": 4}, {"term": "udp", "count": 2}]});

        let merged = |first: &JsonValue, second: &JsonValue| {
            let mut merge = FacetMerge::new(BucketKind::Terms);
            merge.add(first);
            merge.add(second);
            merge.finish()
        };

        let ab = merged(&node_a, &node_b);
        assert_eq!(ab, merged(&node_b, &node_a));
        assert_eq!(
            ab["terms"],
            json!([
                {"term": "tcp", "count": 5},
                {"term": "icmp", "count": 4},
                {"term": "udp", "count": 4},
            ])
        );
    }

    #[test]
    fn test_terms_aggregation() {
        let node_a = json!({"doc_count_error_upper_bound": 1, "sum_other_doc_count": 10, "buckets": [
            {"key": "10.0.0.1", "doc_count": 3, "db": {"value": 100}, "pa": {"value": 4}},
            {"key": "10.0.0.2", "doc_count": 1, "db": {"value": 10}, "pa": {"value": 1}},
        ]});
        let node_b = json!({"doc_count_error_upper_bound": 2, "sum_other_doc_count": 5, "buckets": [
            {"key": "10.0.0.2", "doc_count": 2, "db": {"value": 20}, "pa": {"value": 2}},
        ]});

        let mut merge = AggregationMerge::new(BucketKind::Terms);
        merge.add(&node_a);
        merge.add(&node_b);
        let aggregation = merge.finish();

        assert_eq!(aggregation["doc_count_error_upper_bound"], 3);
        assert_eq!(aggregation["sum_other_doc_count"], 15);
        // Equal counts fall back to ascending key
        assert_eq!(
            aggregation["buckets"],
            json!([
                {"key": "10.0.0.1", "doc_count": 3, "db": {"value": 100}, "pa": {"value": 4}},
                {"key": "10.0.0.2", "doc_count": 3, "db": {"value": 30}, "pa": {"value": 3}},
            ])
        );
        assert!(aggregation.get("_type").is_none());
    }

    #[test]
    fn test_histogram_aggregation_orders_by_key() {
        let mut merge = AggregationMerge::new(BucketKind::Histogram);
        merge.add(&json!({"buckets": [{"key": 2000, "doc_count": 1}, {"key": 1000, "doc_count": 9}]}));
        merge.add(&json!({"buckets": [{"key": 1000, "doc_count": 1}]}));

        assert_eq!(
            merge.finish()["buckets"],
            json!([{"key": 1000, "doc_count": 10}, {"key": 2000, "doc_count": 1}])
        );
    }

    #[test]
    fn test_kind_from_query() {
        assert_eq!(
            BucketKind::of_facet(&json!({"histogram": {"field": "lp", "interval": 60}})),
            BucketKind::Histogram
        );
        assert_eq!(BucketKind::of_facet(&json!({"terms": {"field": "a"}})), BucketKind::Terms);
        assert_eq!(
            BucketKind::of_aggregation(&json!({"date_histogram": {"field": "lp"}})),
            BucketKind::Histogram
        );
    }
}
