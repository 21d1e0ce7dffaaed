//! Turn intent classification

/// Decides how a user message is treated before the model sees it
pub trait IntentPolicy: Send + Sync {
    /// The message asks to change an existing itinerary
    fn is_edit_request(&self, message: &str) -> bool;

    /// The message creates or edits an itinerary; such turns bypass the response cache
    fn is_itinerary_request(&self, message: &str) -> bool;
}

const EDIT_KEYWORDS: &[&str] = &["edit", "change", "modify", "remove", "delete", "add", "update", "cancel"];
const ITINERARY_KEYWORDS: &[&str] = &["plan", "itinerary", "trip", "day", "edit", "change", "modify"];

/// Case-insensitive substring matching against fixed keyword lists
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordIntentPolicy;

fn contains_any(message: &str, keywords: &[&str]) -> bool {
    let lower = message.to_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}

impl IntentPolicy for KeywordIntentPolicy {
    fn is_edit_request(&self, message: &str) -> bool {
        contains_any(message, EDIT_KEYWORDS)
    }

    fn is_itinerary_request(&self, message: &str) -> bool {
        contains_any(message, ITINERARY_KEYWORDS)
    }
}
