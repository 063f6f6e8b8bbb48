use serde_json::{Map, Value as JsonValue, json};
use std::collections::HashSet;

use super::{accumulate, add_numbers};
use crate::executor::PerNodeResponse;

/// Field name of the template whose lowest schema version wins
const SESSIONS_TEMPLATE: &str = "MULTIPREFIX_sessions2_template";

/// Merge policies for plain scatter-gather endpoints
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatherPolicy {
    /// Array responses concatenated in target order
    Concat,
    /// The first node's response
    First,
    /// Numeric top level fields summed
    Sum,
    /// Union of the object under the given field, or of the top level
    MapUnion(Option<&'static str>),
    /// Per index document counts summed
    IndexStats,
    /// The response with the lowest sessions template schema version
    MinSchemaVersion,
    /// Field catalog hits de-duplicated by `_id`
    FieldCatalog,
    /// The first response holding a found document
    FirstFound,
}

impl GatherPolicy {
    pub fn merge(&self, responses: Vec<PerNodeResponse>) -> JsonValue {
        let bodies: Vec<JsonValue> = responses.into_iter().map(|r| r.body).collect();

        match self {
            GatherPolicy::Concat => concat(bodies),
            GatherPolicy::First => first(bodies),
            GatherPolicy::Sum => sum(bodies),
            GatherPolicy::MapUnion(field) => map_union(bodies, *field),
            GatherPolicy::IndexStats => index_stats(bodies),
            GatherPolicy::MinSchemaVersion => min_schema_version(bodies),
            GatherPolicy::FieldCatalog => field_catalog(bodies),
            GatherPolicy::FirstFound => first_found(bodies),
        }
    }
}

fn first(bodies: Vec<JsonValue>) -> JsonValue {
    bodies.into_iter().next().unwrap_or_else(|| json!({}))
}

fn concat(bodies: Vec<JsonValue>) -> JsonValue {
    let mut merged = Vec::new();
    for body in bodies {
        match body {
            JsonValue::Array(items) => merged.extend(items),
            other => {
                if let Some(error) = other.get("error") {
                    tracing::warn!(error = %error, "Listing failed on node");
                }
            }
        }
    }
    JsonValue::Array(merged)
}

fn sum(bodies: Vec<JsonValue>) -> JsonValue {
    let mut bodies = bodies.into_iter();
    let mut merged = match bodies.next() {
        Some(JsonValue::Object(first)) => first,
        _ => Map::new(),
    };

    for body in bodies {
        for (field, value) in body.as_object().into_iter().flatten() {
            accumulate(&mut merged, field, Some(value));
        }
    }

    merged.insert("cluster_name".to_string(), json!("COMBINED"));
    JsonValue::Object(merged)
}

fn map_union(bodies: Vec<JsonValue>, field: Option<&str>) -> JsonValue {
    let mut bodies = bodies.into_iter();
    let mut merged = match bodies.next() {
        Some(JsonValue::Object(first)) => first,
        _ => Map::new(),
    };

    for body in bodies {
        let entries = match field {
            Some(field) => body.get(field).and_then(JsonValue::as_object).cloned(),
            None => body.as_object().cloned(),
        };
        let Some(entries) = entries else {
            continue;
        };

        let target = match field {
            Some(field) => {
                let slot = merged
                    .entry(field.to_string())
                    .or_insert_with(|| JsonValue::Object(Map::new()));
                if !slot.is_object() {
                    *slot = JsonValue::Object(Map::new());
                }
                match slot {
                    JsonValue::Object(target) => target,
                    _ => continue,
                }
            }
            None => &mut merged,
        };
        target.extend(entries);
    }

    JsonValue::Object(merged)
}

fn index_stats(bodies: Vec<JsonValue>) -> JsonValue {
    let mut bodies = bodies.into_iter();
    let mut merged = bodies.next().unwrap_or_else(|| json!({}));

    for body in bodies {
        let Some(JsonValue::Object(indices)) = body.get("indices") else {
            continue;
        };
        let Some(merged_indices) = merged.as_object_mut().and_then(|m| {
            m.entry("indices")
                .or_insert_with(|| JsonValue::Object(Map::new()))
                .as_object_mut()
        }) else {
            continue;
        };

        for (index, stats) in indices {
            let Some(existing) = merged_indices.get_mut(index) else {
                merged_indices.insert(index.clone(), stats.clone());
                continue;
            };
            for pointer in ["/total/docs/count", "/total/docs/deleted"] {
                if let (Some(current), Some(other)) =
                    (existing.pointer_mut(pointer), stats.pointer(pointer))
                {
                    *current = add_numbers(current, other);
                }
            }
        }
    }

    merged
}

fn schema_version(body: &JsonValue) -> Option<f64> {
    body.get(SESSIONS_TEMPLATE)?
        .pointer("/mappings/_meta/molochDbVersion")?
        .as_f64()
}

fn min_schema_version(bodies: Vec<JsonValue>) -> JsonValue {
    let lowest = bodies
        .iter()
        .enumerate()
        .filter_map(|(index, body)| schema_version(body).map(|version| (index, version)))
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(index, _)| index)
        .unwrap_or(0);

    bodies
        .into_iter()
        .nth(lowest)
        .unwrap_or_else(|| json!({}))
}

fn field_catalog(bodies: Vec<JsonValue>) -> JsonValue {
    let mut seen = HashSet::new();
    let mut hits = Vec::new();

    for body in &bodies {
        if let Some(error) = body.get("error") {
            tracing::warn!(error = %error, "Field catalog search failed on node");
        }
        for hit in body
            .pointer("/hits/hits")
            .and_then(JsonValue::as_array)
            .into_iter()
            .flatten()
        {
            let id = hit.get("_id").map(super::bucket_key).unwrap_or_default();
            if seen.insert(id) {
                hits.push(hit.clone());
            }
        }
    }

    json!({"hits": {"total": hits.len(), "hits": hits}})
}

fn first_found(bodies: Vec<JsonValue>) -> JsonValue {
    // Failed nodes contribute `{}`, so a not-found answer needs a `found` key
    let found = bodies
        .iter()
        .position(|body| body.get("found").and_then(JsonValue::as_bool) == Some(true))
        .or_else(|| bodies.iter().position(|body| body.get("found").is_some()))
        .unwrap_or(0);

    bodies
        .into_iter()
        .nth(found)
        .unwrap_or_else(|| json!({}))
}
