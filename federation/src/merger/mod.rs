//! Response merging for scattered requests.
//!
//! Every endpoint family picks one merge policy:
//! - Plain gathers (`GatherPolicy`): concatenation, numeric summation, map
//!   union, index stats, minimum schema version, field catalog, first
//!   response and first found document.
//! - Searches (`hits`): hit lists, legacy facets and aggregations merged into
//!   one result, resorted and cut to the requested page.
//!
//! Merges never fail. A node that failed contributes an empty object, which
//! every policy treats as "nothing to add".

pub mod buckets;
pub mod hits;
pub mod simple;

use serde_json::{Map, Value as JsonValue, json};
use std::cmp::Ordering;

pub use hits::{merge_msearch, merge_search};
pub use simple::GatherPolicy;

/// Adds two JSON numbers, keeping integers as integers.
pub(crate) fn add_numbers(a: &JsonValue, b: &JsonValue) -> JsonValue {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64())
                && let Some(sum) = x.checked_add(y)
            {
                return json!(sum);
            }
            if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64())
                && let Some(sum) = x.checked_add(y)
            {
                return json!(sum);
            }
            json!(x.as_f64().unwrap_or_default() + y.as_f64().unwrap_or_default())
        }
        (JsonValue::Number(_), _) => a.clone(),
        (_, JsonValue::Number(_)) => b.clone(),
        _ => a.clone(),
    }
}

/// Adds `value` onto `target[field]` when `value` is a number.
pub(crate) fn accumulate(target: &mut Map<String, JsonValue>, field: &str, value: Option<&JsonValue>) {
    let Some(value @ JsonValue::Number(_)) = value else {
        return;
    };
    let sum = match target.get(field) {
        Some(current) => add_numbers(current, value),
        None => value.clone(),
    };
    target.insert(field.to_string(), sum);
}

fn type_rank(value: &JsonValue) -> u8 {
    match value {
        JsonValue::Null => 0,
        JsonValue::Bool(_) => 1,
        JsonValue::Number(_) => 2,
        JsonValue::String(_) => 3,
        JsonValue::Array(_) => 4,
        JsonValue::Object(_) => 5,
    }
}

/// Total order over JSON scalars: numbers numerically, strings bytewise,
/// different types by type.
pub(crate) fn compare_values(a: &JsonValue, b: &JsonValue) -> Ordering {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (JsonValue::String(x), JsonValue::String(y)) => x.cmp(y),
        (JsonValue::Bool(x), JsonValue::Bool(y)) => x.cmp(y),
        _ => type_rank(a)
            .cmp(&type_rank(b))
            .then_with(|| a.to_string().cmp(&b.to_string())),
    }
}

/// Map key identifying a bucket, so `60` and `"60"` land in the same bucket.
pub(crate) fn bucket_key(key: &JsonValue) -> String {
    match key {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_numbers() {
        assert_eq!(add_numbers(&json!(2), &json!(3)), json!(5));
        assert_eq!(add_numbers(&json!(-2), &json!(3)), json!(1));
        assert_eq!(add_numbers(&json!(1.5), &json!(1)), json!(2.5));
        assert_eq!(add_numbers(&json!(u64::MAX), &json!(0)), json!(u64::MAX));
        assert_eq!(add_numbers(&json!("x"), &json!(4)), json!(4));
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_values(&json!(99), &json!("1")), Ordering::Less);
        assert_eq!(compare_values(&JsonValue::Null, &json!(0)), Ordering::Less);
    }
}
