//! Schema-level matching of a value, used to pick `if` and `oneOf`/`anyOf`
//! branches. This is deliberately a subset of JSON Schema: enough to route a
//! value to a branch, not to validate it.
use regex::Regex;
use serde_json::{Map, Value};

pub fn matches(schema: &Value, value: Option<&Value>) -> bool {
    match schema {
        Value::Bool(b) => *b,
        Value::Object(s) => matches_object(s, value),
        _ => true,
    }
}

fn matches_object(s: &Map<String, Value>, value: Option<&Value>) -> bool {
    if let Some(t) = s.get("type") {
        let ok = match t {
            Value::String(t) => type_matches(t, value),
            Value::Array(ts) => ts.iter().filter_map(Value::as_str).any(|t| type_matches(t, value)),
            _ => true,
        };
        if !ok { return false; }
    }
    if let Some(c) = s.get("const") {
        if !value.is_some_and(|v| json_eq(v, c)) { return false; }
    }
    if let Some(Value::Array(options)) = s.get("enum") {
        if !value.is_some_and(|v| options.iter().any(|o| json_eq(v, o))) { return false; }
    }

    match value {
        Some(Value::Object(obj)) => {
            if let Some(Value::Object(props)) = s.get("properties") {
                for (k, sub) in props {
                    if let Some(v) = obj.get(k) {
                        if !matches(sub, Some(v)) { return false; }
                    }
                }
            }
            if let Some(Value::Array(required)) = s.get("required") {
                let missing = required.iter().filter_map(Value::as_str).any(|k| !obj.contains_key(k));
                if missing { return false; }
            }
        }
        Some(Value::Number(n)) => {
            let x = n.as_f64().unwrap_or(f64::NAN);
            let bound = |k: &str| s.get(k).and_then(Value::as_f64);
            if bound("minimum").is_some_and(|m| x < m) { return false; }
            if bound("maximum").is_some_and(|m| x > m) { return false; }
            if bound("exclusiveMinimum").is_some_and(|m| x <= m) { return false; }
            if bound("exclusiveMaximum").is_some_and(|m| x >= m) { return false; }
        }
        Some(Value::String(text)) => {
            let len = text.chars().count() as u64;
            if s.get("minLength").and_then(Value::as_u64).is_some_and(|m| len < m) { return false; }
            if s.get("maxLength").and_then(Value::as_u64).is_some_and(|m| len > m) { return false; }
            if let Some(Value::String(p)) = s.get("pattern") {
                // an invalid pattern never matches
                if !Regex::new(p).is_ok_and(|rx| rx.is_match(text)) { return false; }
            }
        }
        Some(Value::Array(xs)) => {
            let len = xs.len() as u64;
            if s.get("minItems").and_then(Value::as_u64).is_some_and(|m| len < m) { return false; }
            if s.get("maxItems").and_then(Value::as_u64).is_some_and(|m| len > m) { return false; }
            match s.get("items") {
                Some(Value::Array(tuple)) => {
                    if tuple.iter().zip(xs).any(|(sub, x)| !matches(sub, Some(x))) { return false; }
                }
                Some(sub) => {
                    if xs.iter().any(|x| !matches(sub, Some(x))) { return false; }
                }
                None => {}
            }
        }
        _ => {}
    }

    if let Some(not) = s.get("not") {
        if matches(not, value) { return false; }
    }
    if let Some(Value::Array(all)) = s.get("allOf") {
        if !all.iter().all(|sub| matches(sub, value)) { return false; }
    }
    if let Some(Value::Array(any)) = s.get("anyOf") {
        if !any.iter().any(|sub| matches(sub, value)) { return false; }
    }
    if let Some(Value::Array(one)) = s.get("oneOf") {
        if one.iter().filter(|sub| matches(sub, value)).count() != 1 { return false; }
    }
    true
}

fn type_matches(t: &str, value: Option<&Value>) -> bool {
    match (t, value) {
        (_, None) => false,
        ("null", Some(Value::Null)) => true,
        ("boolean", Some(Value::Bool(_))) => true,
        ("string", Some(Value::String(_))) => true,
        ("number", Some(Value::Number(_))) => true,
        ("integer", Some(Value::Number(n))) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
        ("array", Some(Value::Array(_))) => true,
        ("object", Some(Value::Object(_))) => true,
        _ => false,
    }
}

/// Structural equality where numbers compare by value.
pub fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => x.len() == y.len() && x.iter().zip(y).all(|(a, b)| json_eq(a, b)),
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| json_eq(v, w)))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn m(schema: Value, value: Value) -> bool {
        matches(&schema, Some(&value))
    }

    #[test]
    fn type_const_enum() {
        assert!(m(json!({ "type": "integer" }), json!(3)));
        assert!(m(json!({ "type": "integer" }), json!(3.0)));
        assert!(!m(json!({ "type": "integer" }), json!(3.5)));
        assert!(m(json!({ "type": ["string", "null"] }), json!(null)));
        assert!(m(json!({ "const": 1 }), json!(1.0)));
        assert!(!m(json!({ "enum": ["a", "b"] }), json!("c")));
        assert!(!matches(&json!({ "type": "string" }), None));
    }

    #[test]
    fn properties_and_required() {
        let s = json!({ "properties": { "kind": { "const": "pro" } }, "required": ["kind"] });
        assert!(m(s.clone(), json!({ "kind": "pro" })));
        assert!(!m(s.clone(), json!({ "kind": "basic" })));
        assert!(!m(s, json!({})));
        // absent properties are not checked
        assert!(m(json!({ "properties": { "kind": { "const": "pro" } } }), json!({})));
    }

    #[test]
    fn bounds_and_patterns() {
        assert!(!m(json!({ "minimum": 2 }), json!(1)));
        assert!(!m(json!({ "exclusiveMaximum": 2 }), json!(2)));
        assert!(m(json!({ "maxLength": 2, "pattern": "^a" }), json!("ab")));
        assert!(!m(json!({ "pattern": "(" }), json!("(")));
        assert!(!m(json!({ "minItems": 1 }), json!([])));
        assert!(m(json!({ "items": { "type": "number" } }), json!([1, 2])));
    }

    #[test]
    fn combinators() {
        assert!(!m(json!({ "not": { "type": "string" } }), json!("x")));
        assert!(m(json!({ "anyOf": [{ "type": "string" }, { "type": "number" }] }), json!(1)));
        assert!(!m(json!({ "oneOf": [{ "type": "number" }, { "minimum": 0 }] }), json!(1)));
        assert!(!matches(&json!(false), Some(&json!(1))));
    }
}
