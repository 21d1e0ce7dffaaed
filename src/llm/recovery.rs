//! Recovery of tool calls a backend wrote as text instead of structured calls
//!
//! Shapes scanned, in priority order:
//! 1. `<function=name>{...}</function>`, `<function=name({...})</function>`,
//!    and the untagged `function=name{...}`
//! 2. bare `name{...}`
//! 3. bare `name({...})` or `name(key="v", n=5)`
//!
//! Every candidate must name an advertised tool and carry arguments that
//! decode to an object, first as strict JSON and then through the permissive
//! literal parser. Duplicates by (name, arguments) are dropped.

mod literal;

use super::types::ToolCall;
use crate::fingerprint::canonical_json;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::LazyLock;

static FUNCTION_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<?function=([A-Za-z_][A-Za-z0-9_]*)").expect("valid function marker regex")
});

static PYTHON_CALL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*\((.*)\)\s*;?$").expect("valid call line regex")
});

static FAILED_GENERATION_DOUBLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""failed_generation"\s*:\s*"((?:[^"\\]|\\.)*)""#)
        .expect("valid failed_generation regex")
});

static FAILED_GENERATION_SINGLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'failed_generation'\s*:\s*'([^']+)'").expect("valid failed_generation regex")
});

const CLOSING_TAG: &str = "</function>";

/// Id prefix for calls recovered from response text
pub const EXTRACTED_ID_PREFIX: &str = "call_extracted";
/// Id prefix for calls recovered from a rejected generation in an error body
pub const RECOVERED_ID_PREFIX: &str = "call_recovered";

#[derive(Debug)]
struct Candidate {
    start: usize,
    end: usize,
    name: String,
    args: String,
}

/// Recover tool calls from free text. Returns an empty list when nothing
/// usable is found.
pub fn recover_tool_calls(text: &str, tool_names: &[&str]) -> Vec<ToolCall> {
    build_calls(scan(text, tool_names), tool_names, EXTRACTED_ID_PREFIX)
}

/// Recover tool calls from a `failed_generation` payload.
///
/// The payload is a JSON `{name, arguments}` object, a JSON list of them,
/// or one Python-style call per line. If none of those match, the ordinary
/// text scan runs over it.
pub fn recover_from_failed_generation(payload: &str, tool_names: &[&str]) -> Vec<ToolCall> {
    let trimmed = payload.trim();
    let mut candidates = json_call_candidates(trimmed);

    if candidates.is_empty() {
        for line in trimmed.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(caps) = PYTHON_CALL_LINE.captures(line) {
                candidates.push(Candidate {
                    start: 0,
                    end: 0,
                    name: caps[1].to_string(),
                    args: caps[2].to_string(),
                });
            }
        }
    }

    if candidates.is_empty() {
        candidates = scan(trimmed, tool_names);
    }

    build_calls(candidates, tool_names, RECOVERED_ID_PREFIX)
}

/// Pull the `failed_generation` text out of a provider error body
pub fn extract_failed_generation(body: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let field = value
            .get("error")
            .and_then(|e| e.get("failed_generation"))
            .or_else(|| value.get("failed_generation"));
        if let Some(text) = field.and_then(Value::as_str) {
            return Some(text.to_string());
        }
    }

    if let Some(caps) = FAILED_GENERATION_DOUBLE.captures(body) {
        let raw = &caps[1];
        return Some(
            serde_json::from_str::<String>(&format!("\"{raw}\"")).unwrap_or_else(|_| raw.to_string()),
        );
    }

    FAILED_GENERATION_SINGLE
        .captures(body)
        .map(|caps| caps[1].to_string())
}

/// Decode argument text: strict JSON first, then the permissive parser
pub fn parse_arguments(args: &str) -> Option<Map<String, Value>> {
    let trimmed = args.trim();
    if trimmed.is_empty() {
        return Some(Map::new());
    }
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
        return Some(map);
    }
    if trimmed.starts_with('{') {
        match literal::parse_value(trimmed)? {
            Value::Object(map) => Some(map),
            _ => None,
        }
    } else {
        literal::parse_kwargs(trimmed)
    }
}

fn json_call_candidates(payload: &str) -> Vec<Candidate> {
    let items = match serde_json::from_str::<Value>(payload) {
        Ok(Value::Array(items)) => items,
        Ok(obj @ Value::Object(_)) => vec![obj],
        _ => return Vec::new(),
    };

    items
        .iter()
        .filter_map(|item| {
            let name = item.get("name")?.as_str()?.to_string();
            let args = match item.get("arguments").or_else(|| item.get("parameters")) {
                Some(Value::String(text)) => text.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            Some(Candidate {
                start: 0,
                end: 0,
                name,
                args,
            })
        })
        .collect()
}

fn scan(text: &str, tool_names: &[&str]) -> Vec<Candidate> {
    let mut found: Vec<Candidate> = Vec::new();

    for caps in FUNCTION_MARKER.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if covered(&found, whole.start()) {
            continue;
        }
        match marker_payload(text, whole.end()) {
            Some((args, end)) => found.push(Candidate {
                start: whole.start(),
                end,
                name: name.as_str().to_string(),
                args,
            }),
            None => tracing::debug!(tool = name.as_str(), "Unterminated function marker"),
        }
    }

    for open in ['{', '('] {
        for name in tool_names {
            for (pos, _) in text.match_indices(name) {
                if covered(&found, pos) || !word_starts_at(text, pos) {
                    continue;
                }
                let at = skip_ws(text, pos + name.len());
                if byte_at(text, at) != Some(open) {
                    continue;
                }
                let close = if open == '{' { '}' } else { ')' };
                let Some(end) = balanced_end(text, at, open, close) else {
                    tracing::debug!(tool = %name, "Unbalanced recovered call");
                    continue;
                };
                let args = if open == '{' {
                    text.get(at..end)
                } else {
                    text.get(at + 1..end - 1)
                };
                if let Some(args) = args {
                    found.push(Candidate {
                        start: pos,
                        end,
                        name: (*name).to_string(),
                        args: args.to_string(),
                    });
                }
            }
        }
    }

    // Execute in the order the model wrote them
    found.sort_by_key(|c| c.start);
    found
}

/// Read the argument payload that follows `function=name`.
/// Returns the argument text and the end of the whole span.
fn marker_payload(text: &str, after_name: usize) -> Option<(String, usize)> {
    let mut at = skip_ws(text, after_name);
    let tagged = byte_at(text, at) == Some('>');
    if tagged {
        at = skip_ws(text, at + 1);
    }

    let (args, end) = match byte_at(text, at) {
        Some('{') => {
            let end = balanced_end(text, at, '{', '}')?;
            (text.get(at..end)?.to_string(), end)
        }
        Some('(') => {
            let end = balanced_end(text, at, '(', ')')?;
            (text.get(at + 1..end - 1)?.to_string(), end)
        }
        _ if tagged => {
            let rel = text.get(at..)?.find(CLOSING_TAG)?;
            let args = text.get(at..at + rel)?.trim().to_string();
            return Some((args, at + rel + CLOSING_TAG.len()));
        }
        _ => return None,
    };

    Some((args, consume_closing(text, end)))
}

/// Extend a span over a trailing `>` and `</function>` if present
fn consume_closing(text: &str, mut end: usize) -> usize {
    let next = skip_ws(text, end);
    if byte_at(text, next) == Some('>') {
        end = next + 1;
    }
    let next = skip_ws(text, end);
    if text.get(next..).is_some_and(|rest| rest.starts_with(CLOSING_TAG)) {
        end = next + CLOSING_TAG.len();
    }
    end
}

fn build_calls(candidates: Vec<Candidate>, tool_names: &[&str], id_prefix: &str) -> Vec<ToolCall> {
    let mut seen = HashSet::new();
    let mut calls = Vec::new();

    for candidate in candidates {
        if !tool_names.contains(&candidate.name.as_str()) {
            tracing::warn!(tool = %candidate.name, "Dropping recovered call to unknown tool");
            continue;
        }
        let Some(arguments) = parse_arguments(&candidate.args) else {
            tracing::warn!(
                tool = %candidate.name,
                args = %candidate.args,
                "Could not parse recovered tool arguments"
            );
            continue;
        };
        let key = (
            candidate.name.clone(),
            canonical_json(&Value::Object(arguments.clone())),
        );
        if !seen.insert(key) {
            continue;
        }
        let id = format!("{id_prefix}_{}", calls.len());
        calls.push(ToolCall::new(id, candidate.name, arguments));
    }

    if !calls.is_empty() {
        tracing::info!(count = calls.len(), "Recovered tool calls from text");
    }
    calls
}

fn covered(found: &[Candidate], pos: usize) -> bool {
    found.iter().any(|c| pos >= c.start && pos < c.end)
}

fn byte_at(text: &str, at: usize) -> Option<char> {
    text.as_bytes().get(at).map(|b| char::from(*b))
}

fn skip_ws(text: &str, mut at: usize) -> usize {
    while text.as_bytes().get(at).is_some_and(u8::is_ascii_whitespace) {
        at += 1;
    }
    at
}

fn word_starts_at(text: &str, pos: usize) -> bool {
    pos == 0
        || !text
            .as_bytes()
            .get(pos - 1)
            .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_')
}

/// Index one past the bracket closing the one at `start`, skipping quoted text
fn balanced_end(text: &str, start: usize, open: char, close: char) -> Option<usize> {
    let bytes = text.as_bytes();
    let (open, close) = (u8::try_from(open).ok()?, u8::try_from(close).ok()?);
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'"' | b'\'' => quote = Some(b),
            _ if b == open => depth += 1,
            _ if b == close => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}
