use serde_json::{Map, Value};

/// One record: a JSON object carrying a unique key field.
pub type Dataset = Map<String, Value>;

/// Merge `priority` over `base`, in place.
///
/// Later values win. Nested objects merge field by field. A `null` in the
/// priority data means "absent": the field is removed from `base` instead of
/// being overwritten.
pub fn merge_into(base: &mut Dataset, priority: Dataset) {
    for (field, value) in priority {
        match value {
            Value::Null => {
                base.remove(&field);
            }
            Value::Object(nested) => match base.get_mut(&field) {
                Some(Value::Object(existing)) => merge_into(existing, nested),
                _ => {
                    base.insert(field, Value::Object(strip_absent(nested)));
                }
            },
            other => {
                base.insert(field, other);
            }
        }
    }
}

fn strip_absent(mut object: Dataset) -> Dataset {
    object.retain(|_, v| !v.is_null());
    for value in object.values_mut() {
        if let Value::Object(nested) = value {
            *nested = strip_absent(std::mem::take(nested));
        }
    }
    object
}

/// True when every field of `query` is deep-equal to the same field of
/// `candidate`. An empty query matches everything.
pub fn matches_query(candidate: &Dataset, query: &Dataset) -> bool {
    query
        .iter()
        .all(|(field, expected)| candidate.get(field).is_some_and(|v| deep_equal(v, expected)))
}

/// Structural equality where numbers compare by value, so `1` equals `1.0`.
fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| deep_equal(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| deep_equal(v, w)))
        }
        _ => a == b,
    }
}

/// Read the key of a dataset. Numeric keys are accepted and stringified.
pub fn key_of(dataset: &Dataset, key_field: &str) -> Option<String> {
    match dataset.get(key_field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Fresh unique dataset key.
pub fn generate_key() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dataset(value: Value) -> Dataset {
        match value {
            Value::Object(map) => map,
            _ => panic!("test dataset must be an object"),
        }
    }

    #[test]
    fn merge_overwrites_and_removes() {
        let mut base = dataset(json!({"key": "k", "a": 1, "b": 2}));
        merge_into(&mut base, dataset(json!({"a": 10, "b": null, "c": 3})));
        assert_eq!(Value::Object(base), json!({"key": "k", "a": 10, "c": 3}));
    }

    #[test]
    fn merge_recurses_into_objects() {
        let mut base = dataset(json!({"style": {"color": "red", "size": 2}}));
        merge_into(
            &mut base,
            dataset(json!({"style": {"size": null, "weight": "bold"}})),
        );
        assert_eq!(
            Value::Object(base),
            json!({"style": {"color": "red", "weight": "bold"}})
        );
    }

    #[test]
    fn merge_does_not_insert_absent_nested_fields() {
        let mut base = Dataset::new();
        merge_into(&mut base, dataset(json!({"style": {"size": null, "x": 1}})));
        assert_eq!(Value::Object(base), json!({"style": {"x": 1}}));
    }

    #[test]
    fn query_requires_every_field() {
        let candidate = dataset(json!({"a": 1, "b": true, "c": [1, 2]}));
        assert!(matches_query(&candidate, &dataset(json!({"a": 1, "b": true}))));
        assert!(matches_query(&candidate, &dataset(json!({"c": [1, 2]}))));
        assert!(!matches_query(&candidate, &dataset(json!({"a": 1, "b": false}))));
        assert!(!matches_query(&candidate, &dataset(json!({"missing": 1}))));
        assert!(matches_query(&candidate, &Dataset::new()));
    }

    #[test]
    fn numbers_match_by_value() {
        let candidate = dataset(json!({"a": 1.0, "nested": {"n": [2.0, 3]}}));
        assert!(matches_query(&candidate, &dataset(json!({"a": 1}))));
        assert!(matches_query(&candidate, &dataset(json!({"nested": {"n": [2, 3.0]}}))));
        assert!(!matches_query(&candidate, &dataset(json!({"a": 1.5}))));
        assert!(!matches_query(&candidate, &dataset(json!({"nested": {"n": [2]}}))));
    }

    #[test]
    fn numeric_keys_are_stringified() {
        let d = dataset(json!({"id": 42}));
        assert_eq!(key_of(&d, "id").as_deref(), Some("42"));
        assert_eq!(key_of(&d, "key"), None);
    }

    #[test]
    fn generated_keys_are_unique() {
        assert_ne!(generate_key(), generate_key());
    }
}
