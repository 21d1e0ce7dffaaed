//! Built-in clarifying question generator

use super::{Tool, ToolError, ASK_CLARIFYING_QUESTION};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

pub(super) const QUESTION_TYPES: [&str; 7] = [
    "budget",
    "group_size",
    "arrival_time",
    "departure_time",
    "dietary",
    "accessibility",
    "accommodation",
];

const FALLBACK_QUESTION: &str = "Could you provide more details about your preferences?";

pub struct ClarifyingQuestionTool {
    city: String,
}

impl ClarifyingQuestionTool {
    pub fn new(city: impl Into<String>) -> Self {
        Self { city: city.into() }
    }

    fn template(&self, question_type: &str) -> String {
        let city = &self.city;
        match question_type {
            "budget" => "What's your budget range for this trip? (budget, mid-range, or luxury)".to_string(),
            "group_size" => "How many people will be traveling?".to_string(),
            "arrival_time" => format!("What time do you plan to arrive in {city}?"),
            "departure_time" => format!("What time do you need to depart from {city}?"),
            "dietary" => "Do you have any dietary restrictions or preferences?".to_string(),
            "accessibility" => "Do you have any accessibility requirements?".to_string(),
            "accommodation" => "Do you have a preferred area for accommodation?".to_string(),
            _ => FALLBACK_QUESTION.to_string(),
        }
    }
}

#[async_trait]
impl Tool for ClarifyingQuestionTool {
    fn name(&self) -> &str {
        ASK_CLARIFYING_QUESTION
    }

    async fn run(&self, args: Map<String, Value>) -> Result<Map<String, Value>, ToolError> {
        let question_type = args
            .get("question_type")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::Execution("missing required argument: question_type".to_string()))?;
        let context = args.get("context").and_then(Value::as_str).unwrap_or("").trim();

        let mut question = self.template(question_type);
        if !context.is_empty() {
            question = format!("{question} ({context})");
        }
        tracing::info!(question_type, "Generated clarifying question");

        let mut result = Map::new();
        result.insert("question".into(), json!(question));
        result.insert("question_type".into(), json!(question_type));
        Ok(result)
    }
}
