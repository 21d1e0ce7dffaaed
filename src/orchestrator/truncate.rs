//! Size ceiling for tool results sent back to the model

use serde_json::{json, Map, Value};

/// Serialized results longer than this are shrunk
pub const RESULT_CHAR_LIMIT: usize = 5000;

const POI_KEEP: usize = 10;
const POI_DESCRIPTION_MAX: usize = 100;
const STRING_KEEP: usize = 500;
const LIST_KEEP: usize = 20;
const PREVIEW_START: usize = 4000;

const POI_FIELDS: [(&str, fn() -> Value); 5] = [
    ("name", empty_string),
    ("category", empty_string),
    ("type", empty_string),
    ("location", empty_object),
    ("activity_id", empty_string),
];

fn empty_string() -> Value {
    Value::String(String::new())
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Serialize a tool result, shrinking it when it exceeds [`RESULT_CHAR_LIMIT`].
///
/// POI lists are cut and simplified first, then long strings and long lists
/// elsewhere. Lists keep fewer items until the result fits, and their
/// original length is always reported. If that is still not enough the
/// payload is replaced by a preview wrapper so the model always receives
/// valid JSON.
pub fn fit_tool_result(result: &Map<String, Value>) -> String {
    let full = Value::Object(result.clone()).to_string();
    let original_len = char_len(&full);
    if original_len <= RESULT_CHAR_LIMIT {
        return full;
    }

    let mut list_keep = LIST_KEEP;
    let fitted = loop {
        let shrunk = shrink(result, list_keep);
        let text = Value::Object(shrunk.clone()).to_string();
        if char_len(&text) <= RESULT_CHAR_LIMIT {
            break text;
        }
        if list_keep <= 1 {
            break hard_cut(&shrunk, &text);
        }
        list_keep /= 2;
    };
    tracing::warn!(original_len, fitted_len = char_len(&fitted), list_keep, "Truncated large tool result");
    fitted
}

fn shrink(result: &Map<String, Value>, list_keep: usize) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in result {
        match value {
            Value::Array(pois) if key == "pois" => {
                let kept: Vec<Value> = pois.iter().take(POI_KEEP).map(simplify_poi).collect();
                out.insert(
                    "note".into(),
                    json!(format!(
                        "Showing {} of {} POIs. Full details available on request.",
                        kept.len(),
                        pois.len()
                    )),
                );
                out.insert("total_found".into(), json!(pois.len()));
                out.insert(key.clone(), Value::Array(kept));
            }
            Value::String(text) => {
                out.insert(key.clone(), Value::String(cut_string(text)));
            }
            Value::Array(items) => {
                let kept: Vec<Value> = items.iter().take(list_keep).map(cut_element).collect();
                if items.len() > list_keep {
                    out.insert(format!("{key}_truncated"), Value::Bool(true));
                    out.insert(format!("{key}_total"), json!(items.len()));
                }
                out.insert(key.clone(), Value::Array(kept));
            }
            _ => {
                // A tool may report its own total_found; the POI count wins
                if !out.contains_key(key) {
                    out.insert(key.clone(), value.clone());
                }
            }
        }
    }
    out
}

fn cut_string(text: &str) -> String {
    if char_len(text) <= STRING_KEEP {
        return text.to_string();
    }
    let head: String = text.chars().take(STRING_KEEP).collect();
    format!("{head}... (truncated)")
}

/// Shorten a list element's own strings, one level deep
fn cut_element(item: &Value) -> Value {
    match item {
        Value::String(text) => Value::String(cut_string(text)),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| match v {
                    Value::String(text) => (k.clone(), Value::String(cut_string(text))),
                    other => (k.clone(), other.clone()),
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

fn is_count_metadata(key: &str) -> bool {
    key == "total_found" || key == "note" || key.ends_with("_total") || key.ends_with("_truncated")
}

fn hard_cut(shrunk: &Map<String, Value>, serialized: &str) -> String {
    let mut wrapper: Map<String, Value> = shrunk
        .iter()
        .filter(|(k, _)| is_count_metadata(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    wrapper.insert("truncated".into(), Value::Bool(true));

    let mut keep = PREVIEW_START;
    loop {
        let preview: String = serialized.chars().take(keep).collect();
        wrapper.insert("preview".into(), Value::String(preview));
        let wrapped = Value::Object(wrapper.clone()).to_string();
        if char_len(&wrapped) <= RESULT_CHAR_LIMIT || keep == 0 {
            return wrapped;
        }
        keep /= 2;
    }
}

fn simplify_poi(poi: &Value) -> Value {
    let mut simple = Map::new();
    for (field, default) in POI_FIELDS {
        simple.insert(field.into(), poi.get(field).cloned().unwrap_or_else(default));
    }
    if let Some(description) = poi.get("description").and_then(Value::as_str) {
        if char_len(description) < POI_DESCRIPTION_MAX {
            simple.insert("description".into(), Value::String(description.to_string()));
        }
    }
    Value::Object(simple)
}
