//! Translation of JSON-schema tool parameters into the Gemini schema dialect
//!
//! Gemini accepts an OpenAPI subset: upper-case type names, string-only
//! enums, mandatory `items` on arrays, and no `default`/`minimum`/`format`.

use serde_json::{json, Map, Value};

fn gemini_type(json_type: Option<&str>, has_properties: bool) -> &'static str {
    match json_type {
        Some("integer") => "INTEGER",
        Some("number") => "NUMBER",
        Some("boolean") => "BOOLEAN",
        Some("array") => "ARRAY",
        Some("object") => "OBJECT",
        Some(_) => "STRING",
        None if has_properties => "OBJECT",
        None => "STRING",
    }
}

/// Convert one JSON-schema node, recursing through properties and items
pub fn to_gemini_schema(schema: &Value) -> Value {
    let properties = schema.get("properties").and_then(Value::as_object);
    let type_name = gemini_type(
        schema.get("type").and_then(Value::as_str),
        properties.is_some(),
    );

    let mut out = Map::new();
    out.insert("type".into(), json!(type_name));

    if let Some(description) = schema.get("description").and_then(Value::as_str) {
        out.insert("description".into(), json!(description));
    }

    if let Some(values) = schema.get("enum").and_then(Value::as_array) {
        let values: Vec<Value> = values
            .iter()
            .map(|v| match v {
                Value::String(s) => json!(s),
                other => json!(other.to_string()),
            })
            .collect();
        out.insert("enum".into(), Value::Array(values));
    }

    match type_name {
        "OBJECT" => {
            if let Some(props) = properties {
                let converted: Map<String, Value> = props
                    .iter()
                    .map(|(name, prop)| (name.clone(), to_gemini_schema(prop)))
                    .collect();
                out.insert("properties".into(), Value::Object(converted));
            }
            let required: Vec<Value> = schema
                .get("required")
                .and_then(Value::as_array)
                .map(|r| r.iter().filter(|v| v.is_string()).cloned().collect())
                .unwrap_or_default();
            if !required.is_empty() {
                out.insert("required".into(), Value::Array(required));
            }
        }
        "ARRAY" => {
            let items = match schema.get("items") {
                Some(items) if items.is_object() => to_gemini_schema(items),
                _ => {
                    tracing::debug!("Array schema without items, defaulting to STRING");
                    json!({"type": "STRING"})
                }
            };
            out.insert("items".into(), items);
        }
        _ => {}
    }

    Value::Object(out)
}
