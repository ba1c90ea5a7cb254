// src/value.rs
// Shared helpers over serde_json::Value: equality, ordering, dates, numbers

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Key of the extended-JSON date wrapper: `{"$date": "2024-01-01T00:00:00Z"}`
pub const DATE_KEY: &str = "$date";
/// Key of the regex wrapper: `{"$regex": "^a", "$options": "i"}`
pub const REGEX_KEY: &str = "$regex";
pub const REGEX_OPTIONS_KEY: &str = "$options";

/// Wrap a timestamp as a Date value
pub fn date_value(at: DateTime<Utc>) -> Value {
    let mut map = Map::new();
    map.insert(DATE_KEY.to_string(), Value::String(at.to_rfc3339()));
    Value::Object(map)
}

/// Current time as a Date value
pub fn now_value() -> Value {
    date_value(Utc::now())
}

/// Decode a Date value. Accepts an RFC 3339 string or epoch milliseconds.
pub fn as_date(value: &Value) -> Option<DateTime<Utc>> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    match map.get(DATE_KEY)? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

pub fn is_date(value: &Value) -> bool {
    as_date(value).is_some()
}

/// A regex value is an object made only of `$regex` (string) and `$options`
pub fn is_regex(value: &Value) -> bool {
    match value.as_object() {
        Some(map) => {
            map.get(REGEX_KEY).map_or(false, Value::is_string)
                && map.keys().all(|k| k == REGEX_KEY || k == REGEX_OPTIONS_KEY)
        }
        None => false,
    }
}

/// Objects that the matcher must treat as scalars
pub fn is_scalar_object(value: &Value) -> bool {
    is_date(value)
}

/// Convert an f64 result back into a JSON number, keeping integral values as integers
pub fn number_value(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

/// Deep equality: numbers compare numerically, object key order is ignored
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            if let (Some(d1), Some(d2)) = (as_date(a), as_date(b)) {
                return d1 == d2;
            }
            x.len() == y.len()
                && x.iter().all(|(k, v)| y.get(k).map_or(false, |w| values_equal(v, w)))
        }
        _ => a == b,
    }
}

/// Native comparison; `None` when the two values are not comparable
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(n1), Value::Number(n2)) => {
            let f1 = n1.as_f64()?;
            let f2 = n2.as_f64()?;
            f1.partial_cmp(&f2)
        }
        (Value::String(s1), Value::String(s2)) => Some(s1.cmp(s2)),
        (Value::Bool(b1), Value::Bool(b2)) => Some(b1.cmp(b2)),
        (Value::Object(_), Value::Object(_)) => {
            let d1 = as_date(a)?;
            let d2 = as_date(b)?;
            Some(d1.cmp(&d2))
        }
        _ => None,
    }
}

/// Total order used by sorts. Missing sorts first; mixed types order by type priority.
pub fn sort_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a_val), Some(b_val)) => {
            let (pa, pb) = (type_priority(a_val), type_priority(b_val));
            if pa != pb {
                return pa.cmp(&pb);
            }
            compare_values(a_val, b_val).unwrap_or(Ordering::Equal)
        }
    }
}

/// Type priority for mixed-type sorting
fn type_priority(val: &Value) -> u8 {
    match val {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) if is_date(val) => 6,
        Value::Object(_) if is_regex(val) => 7,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// JavaScript-style truthiness
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map_or(false, |f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// Tag reported by a `typeof`-style check
fn primitive_tag(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Null | Value::Array(_) | Value::Object(_) => "object",
    }
}

/// `$type` check: either the primitive tag or a structural tag must match
pub fn type_matches(value: Option<&Value>, tag: &str) -> bool {
    let value = match value {
        Some(v) => v,
        None => return tag == "undefined",
    };

    if primitive_tag(value) == tag {
        return true;
    }

    match tag {
        "array" => value.is_array(),
        "date" => is_date(value),
        "regex" => is_regex(value),
        "null" => value.is_null(),
        "plainobject" => value.is_object() && !is_date(value) && !is_regex(value),
        "int" => value
            .as_f64()
            .map_or(false, |f| f.is_finite() && f.fract() == 0.0),
        "bool" => value.is_boolean(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_values_equal_numeric_forms() {
        assert!(values_equal(&json!(1), &json!(1.0)));
        assert!(!values_equal(&json!(1), &json!("1")));
    }

    #[test]
    fn test_values_equal_ignores_key_order() {
        assert!(values_equal(&json!({"a": 1, "b": [1, 2]}), &json!({"b": [1, 2], "a": 1})));
        assert!(!values_equal(&json!({"a": 1}), &json!({"a": 1, "b": 2})));
    }

    #[test]
    fn test_date_roundtrip_and_compare() {
        let early = date_value(Utc.timestamp_millis_opt(1_000).unwrap());
        let late = json!({"$date": 5_000});

        assert!(is_date(&early));
        assert_eq!(compare_values(&early, &late), Some(Ordering::Less));
        assert!(values_equal(&json!({"$date": "1970-01-01T00:00:01Z"}), &early));
    }

    #[test]
    fn test_number_value_keeps_integers() {
        assert_eq!(number_value(110000.0), json!(110000));
        assert_eq!(number_value(2.5), json!(2.5));
        assert_eq!(number_value(f64::NAN), Value::Null);
    }

    #[test]
    fn test_sort_cmp_mixed_types() {
        assert_eq!(sort_cmp(None, Some(&json!(null))), Ordering::Less);
        assert_eq!(sort_cmp(Some(&json!(5)), Some(&json!("a"))), Ordering::Less);
        assert_eq!(sort_cmp(Some(&json!("b")), Some(&json!("a"))), Ordering::Greater);
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(None));
        assert!(!is_truthy(Some(&json!(0))));
        assert!(!is_truthy(Some(&json!(""))));
        assert!(is_truthy(Some(&json!([]))));
        assert!(is_truthy(Some(&json!("x"))));
    }

    #[test]
    fn test_type_tags() {
        assert!(type_matches(Some(&json!([1])), "array"));
        assert!(type_matches(Some(&json!([1])), "object"));
        assert!(type_matches(Some(&json!(null)), "null"));
        assert!(type_matches(Some(&json!(3)), "int"));
        assert!(!type_matches(Some(&json!(3.5)), "int"));
        assert!(type_matches(Some(&json!({"a": 1})), "plainobject"));
        assert!(!type_matches(Some(&now_value()), "plainobject"));
        assert!(type_matches(Some(&now_value()), "date"));
        assert!(type_matches(Some(&json!({"$regex": "^a"})), "regex"));
        assert!(type_matches(None, "undefined"));
    }
}
