//! Request matching logic.
//!
//! Decides whether one flow applies to one inbound request. Matching is a
//! pure computation with no side effects, safe to evaluate concurrently for
//! many flows against the same request.

use axum::http::HeaderMap;
use serde_json::{Map, Value};

use crate::config::Flow;

/// Returns true when the request satisfies every part of the flow's pattern:
/// method, path, body subset, and headers.
pub fn matches(
    flow: &Flow,
    method: &str,
    path: &str,
    headers: &HeaderMap,
    body: &Map<String, Value>,
) -> bool {
    let pattern = &flow.request;

    if method != pattern.method {
        return false;
    }
    if path != pattern.path {
        return false;
    }
    if let Some(expected) = &pattern.body {
        if !body_matches(expected, body) {
            return false;
        }
    }
    headers_match(pattern.headers.as_ref(), headers)
}

/// Subset containment: every key in the pattern must be present in the body
/// with an equal value, recursing through object-valued pattern entries.
/// Keys in the body that the pattern does not mention are ignored.
fn body_matches(pattern: &Map<String, Value>, body: &Map<String, Value>) -> bool {
    for (key, expected) in pattern {
        let Some(actual) = body.get(key) else {
            return false;
        };

        match expected {
            Value::Object(inner) => {
                let Value::Object(actual_inner) = actual else {
                    return false;
                };
                if !body_matches(inner, actual_inner) {
                    return false;
                }
            }
            _ => {
                if !leaf_equals(expected, actual) {
                    return false;
                }
            }
        }
    }
    true
}

/// Total equality for pattern leaves. Numbers compare by value; arrays and
/// mixed-type pairs are not comparable here and never match.
fn leaf_equals(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        _ => false,
    }
}

fn headers_match(pattern: Option<&std::collections::HashMap<String, String>>, headers: &HeaderMap) -> bool {
    let Some(pattern) = pattern else {
        return true;
    };

    for (name, expected) in pattern {
        let matched = headers
            .get(name.as_str())
            .and_then(|value| value.to_str().ok())
            .map(|value| value == expected)
            .unwrap_or(false);
        if !matched {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    fn flow(definition: &str) -> Flow {
        Flow::from_json(definition).unwrap()
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected a JSON object"),
        }
    }

    fn post_flow(body: Value) -> Flow {
        flow(&format!(
            r#"{{
                "request": {{ "method": "POST", "path": "/testPath1", "body": {} }},
                "response": {{}}
            }}"#,
            body
        ))
    }

    #[test]
    fn test_method_and_path_must_match() {
        let flow = flow(
            r#"{ "request": { "method": "POST", "path": "/testPath1" }, "response": {} }"#,
        );
        let body = Map::new();
        let headers = HeaderMap::new();

        assert!(matches(&flow, "POST", "/testPath1", &headers, &body));
        assert!(!matches(&flow, "GET", "/testPath1", &headers, &body));
        assert!(!matches(&flow, "POST", "/otherPath", &headers, &body));
    }

    #[test]
    fn test_absent_patterns_match_any_content() {
        let flow = flow(
            r#"{ "request": { "method": "POST", "path": "/p" }, "response": {} }"#,
        );
        let body = object(json!({ "anything": { "goes": [1, 2, 3] } }));
        let mut headers = HeaderMap::new();
        headers.insert("x-whatever", HeaderValue::from_static("yes"));

        assert!(matches(&flow, "POST", "/p", &headers, &body));
    }

    #[test]
    fn test_nested_subset_match() {
        let flow = post_flow(json!({ "user": { "username": "test_username" } }));
        let body = object(json!({
            "user": { "username": "test_username", "email": "jon@example.com" },
            "unrelated": 7
        }));

        assert!(matches(&flow, "POST", "/testPath1", &HeaderMap::new(), &body));
    }

    #[test]
    fn test_missing_required_key_fails() {
        let flow = post_flow(json!({ "user": { "username": "test_username" } }));
        let body = object(json!({ "user": { "email": "jon@example.com" } }));

        assert!(!matches(&flow, "POST", "/testPath1", &HeaderMap::new(), &body));
    }

    #[test]
    fn test_object_pattern_requires_object_value() {
        let flow = post_flow(json!({ "user": { "username": "x" } }));
        let body = object(json!({ "user": "not an object" }));

        assert!(!matches(&flow, "POST", "/testPath1", &HeaderMap::new(), &body));
    }

    #[test]
    fn test_leaf_value_equality() {
        let flow = post_flow(json!({ "count": 3, "active": true, "name": "jon" }));

        let body = object(json!({ "count": 3, "active": true, "name": "jon" }));
        assert!(matches(&flow, "POST", "/testPath1", &HeaderMap::new(), &body));

        let body = object(json!({ "count": 4, "active": true, "name": "jon" }));
        assert!(!matches(&flow, "POST", "/testPath1", &HeaderMap::new(), &body));
    }

    #[test]
    fn test_numbers_compare_by_value() {
        let flow = post_flow(json!({ "count": 3 }));
        let body = object(json!({ "count": 3.0 }));

        assert!(matches(&flow, "POST", "/testPath1", &HeaderMap::new(), &body));
    }

    #[test]
    fn test_array_pattern_leaf_never_matches() {
        let flow = post_flow(json!({ "tags": ["a", "b"] }));
        let body = object(json!({ "tags": ["a", "b"] }));

        assert!(!matches(&flow, "POST", "/testPath1", &HeaderMap::new(), &body));
    }

    #[test]
    fn test_mixed_type_leaf_never_matches() {
        let flow = post_flow(json!({ "count": "3" }));
        let body = object(json!({ "count": 3 }));

        assert!(!matches(&flow, "POST", "/testPath1", &HeaderMap::new(), &body));
    }

    #[test]
    fn test_header_matching_is_case_insensitive_on_name() {
        let flow = flow(
            r#"{
                "request": {
                    "method": "GET",
                    "path": "/p",
                    "headers": { "X-Api-Key": "abc" }
                },
                "response": {}
            }"#,
        );

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("abc"));
        assert!(matches(&flow, "GET", "/p", &headers, &Map::new()));

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("ABC"));
        assert!(!matches(&flow, "GET", "/p", &headers, &Map::new()));

        assert!(!matches(&flow, "GET", "/p", &HeaderMap::new(), &Map::new()));
    }
}
