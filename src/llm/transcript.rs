//! Re-rendering of tool turns for backends without a `tool` role
//!
//! Folding turns each `tool` message into a user turn of the form
//! `Function <name> returned: <result>`. Unfolding reverses that when the
//! originating assistant call is still in the transcript.
//!
//! Folding is lossy in two documented ways: results longer than
//! [`FOLDED_RESULT_LIMIT`] characters are cut, and NUL / U+FFFD characters
//! are stripped. Everything else round-trips byte for byte.

use super::types::{CanonicalMessage, Role};

/// Longest tool result carried into a folded turn, in characters
pub const FOLDED_RESULT_LIMIT: usize = 3000;

const TRUNCATION_SUFFIX: &str = "... (truncated for length)";
const MARKER_PREFIX: &str = "Function ";
const MARKER_INFIX: &str = " returned: ";
const UNKNOWN_TOOL: &str = "unknown_function";

/// Text of a folded tool result
pub fn folded_result_text(name: &str, content: &str) -> String {
    let cleaned: String = content
        .chars()
        .filter(|c| *c != '\0' && *c != '\u{fffd}')
        .collect();
    let body = if cleaned.chars().count() > FOLDED_RESULT_LIMIT {
        let mut cut: String = cleaned.chars().take(FOLDED_RESULT_LIMIT).collect();
        cut.push_str(TRUNCATION_SUFFIX);
        cut
    } else {
        cleaned
    };
    format!("{MARKER_PREFIX}{name}{MARKER_INFIX}{body}")
}

/// Split a folded turn into (tool name, result)
pub fn parse_folded(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix(MARKER_PREFIX)?;
    let (name, result) = rest.split_once(MARKER_INFIX)?;
    let valid_name = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid_name.then_some((name, result))
}

/// Name of the tool that produced `tool_call_id`, from earlier assistant turns
fn originating_name<'a>(history: &'a [CanonicalMessage], tool_call_id: &str) -> Option<&'a str> {
    history
        .iter()
        .rev()
        .filter(|m| m.role == Role::Assistant)
        .flat_map(|m| m.tool_calls.iter())
        .find(|call| call.id == tool_call_id)
        .map(|call| call.name.as_str())
}

/// Replace every `tool` message with a folded user turn
pub fn fold_tool_turns(messages: &[CanonicalMessage]) -> Vec<CanonicalMessage> {
    messages
        .iter()
        .enumerate()
        .map(|(idx, msg)| {
            if msg.role != Role::Tool {
                return msg.clone();
            }
            let name = msg
                .name
                .as_deref()
                .or_else(|| {
                    msg.tool_call_id
                        .as_deref()
                        .and_then(|id| originating_name(&messages[..idx], id))
                })
                .unwrap_or(UNKNOWN_TOOL);
            CanonicalMessage::user(folded_result_text(name, msg.text()))
        })
        .collect()
}

/// Restore folded user turns to `tool` messages where the call they answer
/// can still be identified. Unmatched folded turns stay user turns.
pub fn unfold_tool_turns(messages: &[CanonicalMessage]) -> Vec<CanonicalMessage> {
    let mut pending: Vec<(String, String)> = Vec::new();
    let mut out = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::Assistant => {
                pending.extend(msg.tool_calls.iter().map(|c| (c.id.clone(), c.name.clone())));
                out.push(msg.clone());
            }
            Role::Tool => {
                if let Some(id) = &msg.tool_call_id {
                    pending.retain(|(pending_id, _)| pending_id != id);
                }
                out.push(msg.clone());
            }
            Role::User => {
                let restored = parse_folded(msg.text()).and_then(|(name, result)| {
                    let idx = pending.iter().position(|(_, n)| n == name)?;
                    let (id, name) = pending.remove(idx);
                    Some(CanonicalMessage::tool_result(id, name, result))
                });
                out.push(restored.unwrap_or_else(|| msg.clone()));
            }
            Role::System => out.push(msg.clone()),
        }
    }

    out
}

/// Whether any message still carries the `tool` role
pub fn has_tool_turns(messages: &[CanonicalMessage]) -> bool {
    messages.iter().any(|m| m.role == Role::Tool)
}

/// Whether any user turn looks like a folded tool result
pub fn has_folded_turns(messages: &[CanonicalMessage]) -> bool {
    messages
        .iter()
        .any(|m| m.role == Role::User && parse_folded(m.text()).is_some())
}
