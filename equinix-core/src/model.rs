//! Model - Schema-driven conversion between API JSON and attribute values
//!
//! Parsing walks the schema, not the response: every declared attribute
//! gets a value, and fields the API leaves out become `Value::Null`.
//! Building walks the schema too and emits only configurable attributes.

use std::collections::HashMap;

use serde_json::{Map, Number};

use crate::resource::Value;
use crate::schema::{AttributeSchema, AttributeType, FieldNaming, ResourceSchema};

#[derive(Debug, Clone, Copy)]
enum Keys {
    /// API field names derived from the schema's naming convention
    Api(FieldNaming),
    /// Attribute names as written in configuration
    Attribute,
}

impl Keys {
    fn key(&self, attr: &AttributeSchema) -> String {
        match self {
            Keys::Api(naming) => attr.api_name(*naming),
            Keys::Attribute => attr.name.clone(),
        }
    }
}

/// Convert a value to JSON without schema information
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Int(n) => serde_json::Value::Number((*n).into()),
        Value::Float(f) => Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Map(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            serde_json::Value::Object(
                keys.into_iter()
                    .map(|k| (k.clone(), value_to_json(&map[k])))
                    .collect(),
            )
        }
        Value::Null => serde_json::Value::Null,
    }
}

/// Convert JSON to a value without schema information
pub fn value_from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
        },
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => Value::List(items.iter().map(value_from_json).collect()),
        serde_json::Value::Object(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), value_from_json(v)))
                .collect(),
        ),
    }
}

fn typed_from_json(attr_type: &AttributeType, json: &serde_json::Value, keys: Keys) -> Value {
    if json.is_null() {
        return Value::Null;
    }
    match attr_type {
        AttributeType::String | AttributeType::Enum(_) => match json {
            serde_json::Value::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
        },
        AttributeType::Int => match json {
            serde_json::Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .map(Value::Int)
                .unwrap_or(Value::Null),
            serde_json::Value::String(s) => s.parse().map(Value::Int).unwrap_or(Value::Null),
            _ => Value::Null,
        },
        AttributeType::Float => json.as_f64().map(Value::Float).unwrap_or(Value::Null),
        AttributeType::Bool => json.as_bool().map(Value::Bool).unwrap_or(Value::Null),
        AttributeType::Custom { base, .. } => typed_from_json(base, json, keys),
        AttributeType::List(inner) => match json.as_array() {
            Some(items) => Value::List(
                items
                    .iter()
                    .map(|item| typed_from_json(inner, item, keys))
                    .collect(),
            ),
            None => Value::Null,
        },
        AttributeType::Map(inner) => match json.as_object() {
            Some(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), typed_from_json(inner, v, keys)))
                    .collect(),
            ),
            None => Value::Null,
        },
        AttributeType::Object(attributes) => match json {
            serde_json::Value::Object(_) => {
                Value::Map(object_from_json(attributes.iter(), json, keys, false))
            }
            _ => Value::Null,
        },
    }
}

fn object_from_json<'a>(
    attributes: impl Iterator<Item = &'a AttributeSchema>,
    json: &serde_json::Value,
    keys: Keys,
    include_local: bool,
) -> HashMap<String, Value> {
    attributes
        .filter(|attr| include_local || !attr.local)
        .map(|attr| {
            let value = json
                .get(keys.key(attr))
                .map(|field| typed_from_json(&attr.attr_type, field, keys))
                .unwrap_or(Value::Null);
            (attr.name.clone(), value)
        })
        .collect()
}

fn typed_to_json(attr_type: &AttributeType, value: &Value, keys: Keys) -> serde_json::Value {
    match (attr_type, value) {
        (AttributeType::Object(attributes), Value::Map(map)) => {
            serde_json::Value::Object(object_to_json(attributes.iter(), map, keys))
        }
        (AttributeType::List(inner), Value::List(items)) => serde_json::Value::Array(
            items
                .iter()
                .map(|item| typed_to_json(inner, item, keys))
                .collect(),
        ),
        (AttributeType::Custom { base, .. }, v) => typed_to_json(base, v, keys),
        (_, v) => value_to_json(v),
    }
}

fn object_to_json<'a>(
    attributes: impl Iterator<Item = &'a AttributeSchema>,
    values: &HashMap<String, Value>,
    keys: Keys,
) -> Map<String, serde_json::Value> {
    let mut attributes: Vec<&AttributeSchema> = attributes
        .filter(|attr| !attr.local && attr.is_configurable())
        .collect();
    attributes.sort_by(|a, b| a.name.cmp(&b.name));

    let mut out = Map::new();
    for attr in attributes {
        if let Some(value) = values.get(&attr.name).filter(|v| !v.is_null()) {
            out.insert(keys.key(attr), typed_to_json(&attr.attr_type, value, keys));
        }
    }
    out
}

/// Parse an API response into attribute values. Local attributes are left out.
pub fn parse_response(schema: &ResourceSchema, json: &serde_json::Value) -> HashMap<String, Value> {
    object_from_json(
        schema.attributes.values(),
        json,
        Keys::Api(schema.naming),
        false,
    )
}

/// Parse a nested API object against a set of attribute schemas
pub fn parse_object(
    attributes: &[AttributeSchema],
    naming: FieldNaming,
    json: &serde_json::Value,
) -> HashMap<String, Value> {
    object_from_json(attributes.iter(), json, Keys::Api(naming), false)
}

/// Build an API request body from configured attribute values
pub fn build_request(schema: &ResourceSchema, values: &HashMap<String, Value>) -> serde_json::Value {
    serde_json::Value::Object(object_to_json(
        schema.attributes.values(),
        values,
        Keys::Api(schema.naming),
    ))
}

/// Build a nested API object (e.g. a single attribute's value)
pub fn build_value(attr: &AttributeSchema, naming: FieldNaming, value: &Value) -> serde_json::Value {
    typed_to_json(&attr.attr_type, value, Keys::Api(naming))
}

/// Parse configuration written with attribute names (e.g. a JSON file)
pub fn parse_config(schema: &ResourceSchema, json: &serde_json::Value) -> HashMap<String, Value> {
    let mut values = object_from_json(schema.attributes.values(), json, Keys::Attribute, true);
    values.retain(|_, v| !v.is_null());
    if let Some(map) = json.as_object() {
        // Unknown keys are kept so that validation can report them
        for (k, v) in map {
            if !schema.attributes.contains_key(k) {
                values.insert(k.clone(), value_from_json(v));
            }
        }
    }
    values
}

/// Render attribute values keyed by attribute name
pub fn attributes_to_json(values: &HashMap<String, Value>) -> serde_json::Value {
    value_to_json(&Value::Map(values.clone()))
}

/// Copy values the API never echoes back.
///
/// Local attributes always come from `previous`. Sensitive attributes come
/// from `previous` when the response left them null, recursively through
/// nested objects.
pub fn carry_forward(
    schema: &ResourceSchema,
    parsed: &mut HashMap<String, Value>,
    previous: &HashMap<String, Value>,
) {
    for attr in schema.attributes.values() {
        carry_attr(attr, parsed, previous);
    }
}

fn carry_attr(
    attr: &AttributeSchema,
    parsed: &mut HashMap<String, Value>,
    previous: &HashMap<String, Value>,
) {
    let Some(prev) = previous.get(&attr.name).filter(|v| !v.is_null()) else {
        return;
    };
    let current = parsed.entry(attr.name.clone()).or_insert(Value::Null);
    if attr.local || (attr.sensitive && current.is_null()) {
        *current = prev.clone();
        return;
    }
    match (&attr.attr_type, current, prev) {
        (AttributeType::Object(nested), Value::Map(cur_map), Value::Map(prev_map)) => {
            for nested_attr in nested {
                carry_attr(nested_attr, cur_map, prev_map);
            }
        }
        // Lists of objects are matched by position
        (AttributeType::List(inner), Value::List(cur_items), Value::List(prev_items)) => {
            if let AttributeType::Object(nested) = inner.as_ref() {
                for (cur, prev) in cur_items.iter_mut().zip(prev_items) {
                    if let (Value::Map(cur_map), Value::Map(prev_map)) = (cur, prev) {
                        for nested_attr in nested {
                            carry_attr(nested_attr, cur_map, prev_map);
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subscription_schema() -> ResourceSchema {
        ResourceSchema::new("equinix_fabric_stream_subscription")
            .attribute(AttributeSchema::new("stream_id", AttributeType::String).required().local())
            .attribute(AttributeSchema::new("name", AttributeType::String).required())
            .attribute(AttributeSchema::new("description", AttributeType::String).optional())
            .attribute(AttributeSchema::new("enabled", AttributeType::Bool).optional())
            .attribute(
                AttributeSchema::new(
                    "sink",
                    AttributeType::Object(vec![
                        AttributeSchema::new("uri", AttributeType::String).optional(),
                        AttributeSchema::new("batch_size_max", AttributeType::Int).optional(),
                        AttributeSchema::new(
                            "credential",
                            AttributeType::Object(vec![
                                AttributeSchema::new("type", AttributeType::String).required(),
                                AttributeSchema::new("access_token", AttributeType::String)
                                    .optional()
                                    .sensitive(),
                            ]),
                        )
                        .optional(),
                    ]),
                )
                .required(),
            )
            .attribute(AttributeSchema::new("uuid", AttributeType::String).computed())
            .attribute(
                AttributeSchema::new(
                    "event_selector",
                    AttributeType::Object(vec![
                        AttributeSchema::new("include", AttributeType::list_of(AttributeType::String))
                            .optional(),
                    ]),
                )
                .optional(),
            )
    }

    fn response() -> serde_json::Value {
        json!({
            "uuid": "sub-1",
            "name": "splunk",
            "enabled": true,
            "sink": {
                "uri": "https://splunk.example.com",
                "batchSizeMax": 50,
                "credential": {"type": "ACCESS_TOKEN"}
            }
        })
    }

    #[test]
    fn absent_fields_parse_as_null() {
        let values = parse_response(&subscription_schema(), &response());
        assert_eq!(values["name"], Value::string("splunk"));
        assert_eq!(values["enabled"], Value::Bool(true));
        assert_eq!(values["description"], Value::Null);
        assert_eq!(values["event_selector"], Value::Null);
        assert!(!values.contains_key("stream_id"));

        let sink = values["sink"].as_map().unwrap();
        assert_eq!(sink["batch_size_max"], Value::Int(50));
        assert_eq!(
            values["sink"].lookup("credential.access_token"),
            Some(&Value::Null)
        );
    }

    #[test]
    fn build_skips_computed_local_and_null() {
        let schema = subscription_schema();
        let mut values = parse_response(&schema, &response());
        values.insert("stream_id".to_string(), Value::string("stream-1"));

        let body = build_request(&schema, &values);
        assert_eq!(
            body,
            json!({
                "name": "splunk",
                "enabled": true,
                "sink": {
                    "uri": "https://splunk.example.com",
                    "batchSizeMax": 50,
                    "credential": {"type": "ACCESS_TOKEN"}
                }
            })
        );
    }

    #[test]
    fn parse_then_build_keeps_writable_fields() {
        let schema = subscription_schema();
        let request = json!({
            "name": "s",
            "description": "d",
            "enabled": false,
            "sink": {"uri": "https://x", "batchSizeMax": 10},
            "eventSelector": {"include": ["equinix.fabric.connection.*"]}
        });
        let values = parse_response(&schema, &request);
        assert_eq!(build_request(&schema, &values), request);
    }

    #[test]
    fn carry_forward_restores_secrets_and_local_values() {
        let schema = subscription_schema();
        let mut previous = HashMap::new();
        previous.insert("stream_id".to_string(), Value::string("stream-1"));
        let mut credential = HashMap::new();
        credential.insert("type".to_string(), Value::string("ACCESS_TOKEN"));
        credential.insert("access_token".to_string(), Value::string("secret"));
        let mut sink = HashMap::new();
        sink.insert("credential".to_string(), Value::Map(credential));
        previous.insert("sink".to_string(), Value::Map(sink));

        let mut parsed = parse_response(&schema, &response());
        carry_forward(&schema, &mut parsed, &previous);

        assert_eq!(parsed["stream_id"], Value::string("stream-1"));
        assert_eq!(
            parsed["sink"].lookup("credential.access_token"),
            Some(&Value::string("secret"))
        );
        assert_eq!(
            parsed["sink"].lookup("uri"),
            Some(&Value::string("https://splunk.example.com"))
        );
    }

    #[test]
    fn parse_config_uses_attribute_names() {
        let schema = subscription_schema();
        let values = parse_config(
            &schema,
            &json!({"stream_id": "s-1", "name": "n", "sink": {"batch_size_max": 5}, "bogus": 1}),
        );
        assert_eq!(values["stream_id"], Value::string("s-1"));
        assert_eq!(values["sink"].lookup("batch_size_max"), Some(&Value::Int(5)));
        assert_eq!(values["bogus"], Value::Int(1));
        assert!(!values.contains_key("description"));
    }

    #[test]
    fn json_round_trip_without_schema() {
        let json = json!({"a": [1, 2.5, "x", null, true]});
        assert_eq!(value_to_json(&value_from_json(&json)), json);
    }
}
