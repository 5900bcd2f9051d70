//! Response and webhook payload composition.
//!
//! A payload is built by recursively merging a body template over an
//! optional copy of the request body, resolving placeholders along the way.
//! Object values containing the reserved `$each` key expand one request
//! array into a transformed output array.
//!
//! Composition never aborts a delivery: failed substitutions are logged and
//! left blank, unsupported template shapes stop early, and a serialization
//! fault degrades to an empty body.

use serde_json::{Map, Value};
use tracing::warn;

use crate::template::Resolver;

const EACH_KEY: &str = "$each";
const FIELD_KEY: &str = "$field";
const TO_KEY: &str = "$to";

/// Build the serialized JSON payload for one delivery.
///
/// When `include_request` is set the payload starts as a shallow copy of the
/// request body's top-level fields, so the template can override or extend
/// them.
pub fn build_payload(
    include_request: bool,
    template: &Map<String, Value>,
    request_body: &Map<String, Value>,
    resolver: &Resolver,
) -> Vec<u8> {
    let mut payload = Map::new();
    if include_request {
        for (key, value) in request_body {
            payload.insert(key.clone(), value.clone());
        }
    }

    merge_into(&mut payload, template, resolver);

    match serde_json::to_vec(&Value::Object(payload)) {
        Ok(bytes) => bytes,
        Err(error) => {
            warn!(%error, "unable to serialize payload");
            Vec::new()
        }
    }
}

/// Merge `source` into `dst` key by key.
///
/// Objects recurse (replacing a non-object destination), arrays merge
/// element-wise, strings resolve through the resolver, everything else is
/// copied literally.
fn merge_into(dst: &mut Map<String, Value>, source: &Map<String, Value>, resolver: &Resolver) {
    for (key, value) in source {
        match value {
            Value::Object(inner) => {
                if let Some(descriptor) = inner.get(EACH_KEY) {
                    let expanded = expand_array_mapping(descriptor, resolver);
                    dst.insert(key.clone(), Value::Array(expanded));
                    continue;
                }

                let entry = dst
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !entry.is_object() {
                    *entry = Value::Object(Map::new());
                }
                if let Value::Object(target) = entry {
                    merge_into(target, inner, resolver);
                }
            }
            Value::Array(items) => {
                let existing = match dst.get(key) {
                    Some(Value::Array(existing)) => existing.clone(),
                    _ => Vec::new(),
                };
                dst.insert(
                    key.clone(),
                    Value::Array(merge_arrays(&existing, items, resolver)),
                );
            }
            Value::String(text) => {
                dst.insert(key.clone(), resolve_or_blank(text, resolver));
            }
            _ => {
                dst.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Element-wise array merge. The output has exactly the source's length;
/// surplus elements of a pre-existing destination array are dropped.
fn merge_arrays(existing: &[Value], source: &[Value], resolver: &Resolver) -> Vec<Value> {
    let mut output = Vec::with_capacity(source.len());

    for (index, item) in source.iter().enumerate() {
        let merged = match item {
            Value::Object(inner) => {
                let mut target = match existing.get(index) {
                    Some(Value::Object(map)) => map.clone(),
                    _ => Map::new(),
                };
                merge_into(&mut target, inner, resolver);
                Value::Object(target)
            }
            Value::Array(nested) => {
                let prior = match existing.get(index) {
                    Some(Value::Array(prior)) => prior.as_slice(),
                    _ => &[],
                };
                Value::Array(merge_arrays(prior, nested, resolver))
            }
            Value::String(text) => resolve_or_blank(text, resolver),
            _ => item.clone(),
        };
        output.push(merged);
    }

    output
}

/// Expand an array-mapping descriptor: resolve `$field` to a source array
/// and build one output element per input element from the `$to` template,
/// preserving order.
fn expand_array_mapping(descriptor: &Value, resolver: &Resolver) -> Vec<Value> {
    let Some(descriptor) = descriptor.as_object() else {
        warn!("array mapping descriptor must be an object");
        return Vec::new();
    };
    let Some(field) = descriptor.get(FIELD_KEY).and_then(Value::as_str) else {
        warn!("array mapping descriptor is missing `$field`");
        return Vec::new();
    };
    let Some(to) = descriptor.get(TO_KEY) else {
        warn!("array mapping descriptor is missing `$to`");
        return Vec::new();
    };

    let source = match resolver.resolve(field) {
        Ok(Value::Array(items)) => items,
        Ok(_) => {
            warn!(field, "array mapping source is not an array");
            return Vec::new();
        }
        Err(error) => {
            warn!(field, %error, "unable to resolve array mapping source");
            return Vec::new();
        }
    };

    let mut output = Vec::with_capacity(source.len());
    for element in source {
        let child = resolver.with_iterator(element);
        match to {
            Value::Object(template) => {
                let mut built = Map::new();
                merge_into(&mut built, template, &child);
                output.push(Value::Object(built));
            }
            Value::String(text) => output.push(resolve_or_blank(text, &child)),
            Value::Array(_) => {
                warn!("array-valued `$to` templates are not supported, stopping expansion");
                break;
            }
            literal => output.push(literal.clone()),
        }
    }

    output
}

/// A failed substitution collapses to an empty string so the rest of the
/// payload still renders.
fn resolve_or_blank(text: &str, resolver: &Resolver) -> Value {
    match resolver.resolve(text) {
        Ok(value) => value,
        Err(error) => {
            warn!(placeholder = text, %error, "substitution left blank");
            Value::String(String::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected a JSON object"),
        }
    }

    fn build(include_request: bool, template: Value, body: Value) -> Value {
        let body = object(body);
        let resolver = Resolver::new(body.clone(), HeaderMap::new());
        let bytes = build_payload(include_request, &object(template), &body, &resolver);
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_empty_template_reproduces_request_body() {
        let body = json!({ "user": { "username": "test_username" }, "order": 1 });
        let result = build(true, json!({}), body.clone());
        assert_eq!(result, body);
    }

    #[test]
    fn test_template_without_request_body() {
        let result = build(
            false,
            json!({ "random": "response" }),
            json!({ "user": "jon" }),
        );
        assert_eq!(result, json!({ "random": "response" }));
    }

    #[test]
    fn test_nested_merge_extends_included_body() {
        let body = json!({
            "user": {
                "name": { "firstName": "Jon", "lastName": "Doe" },
                "order": 1
            }
        });
        let template = json!({
            "user": { "age": 35, "name": { "middle": "unknown" } },
            "hello": { "nested": "world", "againFirstName": "${{body.user.name.firstName}}" }
        });

        let result = build(true, template, body);
        assert_eq!(
            result,
            json!({
                "user": {
                    "name": { "firstName": "Jon", "lastName": "Doe", "middle": "unknown" },
                    "age": 35,
                    "order": 1
                },
                "hello": { "nested": "world", "againFirstName": "Jon" }
            })
        );
    }

    #[test]
    fn test_template_replaces_non_object_with_object() {
        let body = json!({ "user": "flat" });
        let template = json!({ "user": { "age": 35 } });

        let result = build(true, template, body);
        assert_eq!(result, json!({ "user": { "age": 35 } }));
    }

    #[test]
    fn test_array_merges_element_wise() {
        let body = json!({
            "user": { "name": { "firstName": "Jon", "lastName": "Doe" } },
            "info": [{ "random": "thing" }]
        });
        let template = json!({
            "info": [
                {
                    "user": {
                        "firstName": "${{body.user.name.firstName}}",
                        "lastName": "${{body.user.name.lastName}}"
                    }
                },
                "Jon Hardcoded",
                "${{body.user.name.lastName}}",
                42,
                true
            ]
        });

        let result = build(true, template, body);
        assert_eq!(
            result["info"],
            json!([
                { "random": "thing", "user": { "firstName": "Jon", "lastName": "Doe" } },
                "Jon Hardcoded",
                "Doe",
                42,
                true
            ])
        );
    }

    #[test]
    fn test_array_output_length_follows_template() {
        let body = json!({ "items": [1, 2, 3, 4] });
        let template = json!({ "items": ["a", "b"] });

        let result = build(true, template, body);
        assert_eq!(result["items"], json!(["a", "b"]));
    }

    #[test]
    fn test_string_values_resolve_natively() {
        let body = json!({ "user": { "age": 35 } });
        let template = json!({ "age": "${{body.user.age}}" });

        let result = build(false, template, body);
        assert_eq!(result, json!({ "age": 35 }));
    }

    #[test]
    fn test_failed_substitution_is_blank_and_build_continues() {
        let body = json!({});
        let template = json!({ "missing": "${{body.not.there}}", "ok": "fine" });

        let result = build(false, template, body);
        assert_eq!(result, json!({ "missing": "", "ok": "fine" }));
    }

    #[test]
    fn test_array_mapping_expands_per_element() {
        let body = json!({ "users": [{ "name": "A" }, { "name": "B" }] });
        let template = json!({
            "mapped": {
                "$each": {
                    "$field": "${{body.users}}",
                    "$to": { "mappedName": "${{iterator.name}}" }
                }
            }
        });

        let result = build(false, template, body);
        assert_eq!(
            result["mapped"],
            json!([{ "mappedName": "A" }, { "mappedName": "B" }])
        );
    }

    #[test]
    fn test_array_mapping_with_string_target() {
        let body = json!({ "users": [{ "name": "A" }, { "name": "B" }] });
        let template = json!({
            "names": {
                "$each": {
                    "$field": "${{body.users}}",
                    "$to": "user ${{iterator.name}}"
                }
            }
        });

        let result = build(false, template, body);
        assert_eq!(result["names"], json!(["user A", "user B"]));
    }

    #[test]
    fn test_array_mapping_with_literal_target() {
        let body = json!({ "users": [1, 2, 3] });
        let template = json!({
            "flags": {
                "$each": { "$field": "${{body.users}}", "$to": true }
            }
        });

        let result = build(false, template, body);
        assert_eq!(result["flags"], json!([true, true, true]));
    }

    #[test]
    fn test_array_mapping_over_non_array_yields_empty() {
        let body = json!({ "users": "not an array" });
        let template = json!({
            "mapped": {
                "$each": {
                    "$field": "${{body.users}}",
                    "$to": { "x": 1 }
                }
            }
        });

        let result = build(false, template, body);
        assert_eq!(result["mapped"], json!([]));
    }

    #[test]
    fn test_array_mapping_array_target_unsupported() {
        let body = json!({ "users": [1, 2] });
        let template = json!({
            "mapped": {
                "$each": { "$field": "${{body.users}}", "$to": ["x"] }
            }
        });

        let result = build(false, template, body);
        assert_eq!(result["mapped"], json!([]));
    }

    #[test]
    fn test_array_mapping_does_not_leak_iterator_to_siblings() {
        let body = json!({ "users": [{ "name": "A" }] });
        let template = json!({
            "mapped": {
                "$each": {
                    "$field": "${{body.users}}",
                    "$to": { "n": "${{iterator.name}}" }
                }
            },
            "sibling": "${{iterator.name}}"
        });

        let result = build(false, template, body);
        assert_eq!(result["mapped"], json!([{ "n": "A" }]));
        assert_eq!(result["sibling"], json!(""));
    }

    #[test]
    fn test_missing_each_field_yields_empty_array() {
        let body = json!({});
        let template = json!({
            "mapped": { "$each": { "$to": { "x": 1 } } }
        });

        let result = build(false, template, body);
        assert_eq!(result["mapped"], json!([]));
    }
}
