//! Message assembly for a turn

use crate::llm::{CanonicalMessage, Role};
use crate::session::HistoryEntry;
use serde_json::Value;

const DAYS: [&str; 3] = ["day_1", "day_2", "day_3"];
const SLOTS: [(&str, &str); 3] = [("morning", "Morning"), ("afternoon", "Afternoon"), ("evening", "Evening")];

/// Plain-text outline of an itinerary for the model
pub fn itinerary_summary(itinerary: Option<&Value>) -> String {
    let Some(itinerary) = itinerary.filter(|v| !is_empty_value(v)) else {
        return "No itinerary exists yet.".to_string();
    };

    let mut lines = Vec::new();
    for (idx, day_key) in DAYS.iter().enumerate() {
        let Some(day) = itinerary.get(day_key).filter(|d| !is_empty_value(d)) else {
            continue;
        };
        let activities: Vec<String> = SLOTS
            .iter()
            .flat_map(|(slot, label)| {
                slot_activities(day, slot)
                    .iter()
                    .map(move |act| {
                        let field = |key: &str| act.get(key).and_then(Value::as_str);
                        format!(
                            "  {label}: {} ({}-{})",
                            field("name").unwrap_or("Unknown"),
                            field("start_time").unwrap_or("?"),
                            field("end_time").unwrap_or("?"),
                        )
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        let day_num = idx + 1;
        if activities.is_empty() {
            lines.push(format!("Day {day_num}: No activities"));
        } else {
            lines.push(format!("Day {day_num}:"));
            lines.extend(activities);
        }
    }

    if lines.is_empty() {
        "Empty itinerary".to_string()
    } else {
        lines.join("\n")
    }
}

/// Slot entries are either a bare list or `{activities: [...]}`
fn slot_activities<'a>(day: &'a Value, slot: &str) -> &'a [Value] {
    match day.get(slot) {
        Some(Value::Array(items)) => items,
        Some(obj @ Value::Object(_)) => obj
            .get("activities")
            .and_then(Value::as_array)
            .map_or(&[][..], Vec::as_slice),
        _ => &[],
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// System message injected ahead of an edit request
pub fn edit_context(itinerary: &Value) -> String {
    format!(
        "Current itinerary structure:\n{}\n\nIMPORTANT: When editing this itinerary, you MUST call \
         build_itinerary again with the modified POI list. Do not just describe the changes in text.",
        itinerary_summary(Some(itinerary))
    )
}

/// System prompt, prior turns, optional edit context, then the new message
pub fn assemble_messages(
    system_prompt: &str,
    history: &[HistoryEntry],
    edit_itinerary: Option<&Value>,
    user_message: &str,
) -> Vec<CanonicalMessage> {
    let mut messages = Vec::with_capacity(history.len() + 3);
    messages.push(CanonicalMessage::system(system_prompt));
    messages.extend(history.iter().filter_map(|entry| match entry.role {
        Role::User => Some(CanonicalMessage::user(&entry.content)),
        Role::Assistant => Some(CanonicalMessage::assistant(&entry.content)),
        Role::System | Role::Tool => None,
    }));
    if let Some(itinerary) = edit_itinerary {
        messages.push(CanonicalMessage::system(edit_context(itinerary)));
    }
    messages.push(CanonicalMessage::user(user_message));
    messages
}
