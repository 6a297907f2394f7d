//! Dotted-path helpers over `serde_json::Value`.
//!
//! Translators and appliers mutate payloads in place instead of decoding into
//! typed structs: unknown fields must survive byte-for-byte (serde_json is
//! built with `preserve_order`, so object key order is kept too).
//!
//! Path grammar: segments separated by `.`; a segment that parses as an
//! unsigned integer indexes into an array, anything else keys into an object.

use serde_json::{Map, Value};

/// Borrowing lookup. Returns `None` when any segment is missing or the shape
/// does not match the path.
pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        match current {
            Value::Object(map) => {
                current = map.get(segment)?;
            }
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                current = items.get(index)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

pub fn get_str<'a>(root: &'a Value, path: &str) -> Option<&'a str> {
    get(root, path).and_then(Value::as_str)
}

pub fn get_i64(root: &Value, path: &str) -> Option<i64> {
    get(root, path).and_then(Value::as_i64)
}

pub fn get_f64(root: &Value, path: &str) -> Option<f64> {
    get(root, path).and_then(Value::as_f64)
}

pub fn get_bool(root: &Value, path: &str) -> Option<bool> {
    get(root, path).and_then(Value::as_bool)
}

pub fn exists(root: &Value, path: &str) -> bool {
    get(root, path).is_some()
}

/// Writes `value` at `path`, creating intermediate objects as needed.
/// Existing non-object values along the way are replaced by objects; array
/// segments must already exist at the right length (arrays are never grown
/// implicitly).
pub fn set(root: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('.').collect();
    set_segments(root, &segments, value);
}

fn set_segments(current: &mut Value, segments: &[&str], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *current = value;
        return;
    };
    if let Ok(index) = head.parse::<usize>() {
        if let Value::Array(items) = current {
            if let Some(slot) = items.get_mut(index) {
                set_segments(slot, rest, value);
            }
            return;
        }
    }
    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    let map = current.as_object_mut().expect("object ensured above");
    let slot = map.entry(head.to_string()).or_insert(Value::Null);
    set_segments(slot, rest, value);
}

/// Removes the value at `path`, returning it when present.
pub fn remove(root: &mut Value, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = segments.split_last()?;
    let mut current = root;
    for segment in parents {
        match current {
            Value::Object(map) => {
                current = map.get_mut(*segment)?;
            }
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                current = items.get_mut(index)?;
            }
            _ => return None,
        }
    }
    match current {
        Value::Object(map) => map.shift_remove(*last),
        Value::Array(items) => {
            let index: usize = last.parse().ok()?;
            if index < items.len() {
                Some(items.remove(index))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Appends to the array at `path`, creating it when absent.
pub fn append(root: &mut Value, path: &str, value: Value) {
    match get_mut(root, path) {
        Some(Value::Array(items)) => items.push(value),
        Some(other) => {
            *other = Value::Array(vec![value]);
        }
        None => set(root, path, Value::Array(vec![value])),
    }
}

pub fn get_mut<'a>(root: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in path.split('.') {
        match current {
            Value::Object(map) => {
                current = map.get_mut(segment)?;
            }
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                current = items.get_mut(index)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_walks_objects_and_arrays() {
        let value = json!({"a": {"b": [{"c": 1}, {"c": 2}]}});
        assert_eq!(get_i64(&value, "a.b.1.c"), Some(2));
        assert!(get(&value, "a.b.2.c").is_none());
        assert!(get(&value, "a.x").is_none());
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut value = json!({});
        set(&mut value, "generationConfig.thinkingConfig.thinkingBudget", json!(1024));
        assert_eq!(
            get_i64(&value, "generationConfig.thinkingConfig.thinkingBudget"),
            Some(1024)
        );
    }

    #[test]
    fn set_into_existing_array_slot() {
        let mut value = json!({"tools": [{"name": "Read"}]});
        set(&mut value, "tools.0.name", json!("proxy_Read"));
        assert_eq!(get_str(&value, "tools.0.name"), Some("proxy_Read"));
    }

    #[test]
    fn remove_returns_the_value_and_keeps_siblings() {
        let mut value = json!({"thinking": {"type": "enabled", "budget_tokens": 512}, "model": "m"});
        let removed = remove(&mut value, "thinking");
        assert!(removed.is_some());
        assert_eq!(get_str(&value, "model"), Some("m"));
        assert!(!exists(&value, "thinking"));
    }

    #[test]
    fn preserves_unknown_field_order() {
        let raw = r#"{"zeta":1,"alpha":2,"nested":{"y":1,"x":2}}"#;
        let mut value: Value = serde_json::from_str(raw).expect("valid json");
        set(&mut value, "nested.x", json!(3));
        let out = serde_json::to_string(&value).expect("serialize");
        assert_eq!(out, r#"{"zeta":1,"alpha":2,"nested":{"y":1,"x":3}}"#);
    }

    #[test]
    fn append_creates_and_extends() {
        let mut value = json!({});
        append(&mut value, "betas", json!("a"));
        append(&mut value, "betas", json!("b"));
        assert_eq!(value, json!({"betas": ["a", "b"]}));
    }
}
