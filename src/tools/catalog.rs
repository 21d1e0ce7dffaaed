//! Advertised tool specifications

use crate::llm::ToolSpec;
use serde_json::json;

pub const SEARCH_POIS: &str = "search_pois";
pub const BUILD_ITINERARY: &str = "build_itinerary";
pub const RETRIEVE_CITY_GUIDANCE: &str = "retrieve_city_guidance";
pub const ASK_CLARIFYING_QUESTION: &str = "ask_clarifying_question";

const PACES: [&str; 3] = ["relaxed", "moderate", "packed"];

pub fn tool_specs(city: &str) -> Vec<ToolSpec> {
    vec![search_pois(city), build_itinerary(), retrieve_city_guidance(city), ask_clarifying_question()]
}

fn search_pois(city: &str) -> ToolSpec {
    ToolSpec {
        name: SEARCH_POIS.to_string(),
        description: format!(
            "Search for points of interest (POIs) in {city} based on user interests and constraints. \
             Use this to find attractions, restaurants, or activities. For multi-day trips, use \
             max_results=20 or more so there are enough POIs to build an itinerary."
        ),
        parameters: json!({
            "type": "object",
            "properties": {
                "interests": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "User interests (e.g., ['culture', 'food', 'history', 'shopping'])"
                },
                "constraints": {
                    "type": "object",
                    "properties": {
                        "budget": {
                            "type": "string",
                            "enum": ["budget", "mid-range", "luxury"],
                            "description": "Budget level"
                        },
                        "pace": {"type": "string", "enum": PACES, "description": "Travel pace preference"},
                        "indoor_only": {"type": "boolean", "description": "Only indoor activities"},
                        "accessibility": {"type": "boolean", "description": "Accessibility requirements"}
                    }
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of POIs to return (default: 30)",
                    "default": 30
                }
            },
            "required": ["interests"]
        }),
    }
}

fn build_itinerary() -> ToolSpec {
    ToolSpec {
        name: BUILD_ITINERARY.to_string(),
        description: "Build a structured day-wise itinerary from candidate POIs. Call this after \
                      search_pois. Pass the complete POI objects returned by search_pois (at least \
                      8-10 for a 2-day trip, 12-15 for a 3-day trip), including evening options such \
                      as restaurants, markets and night views. POIs are scheduled across morning, \
                      afternoon and evening slots based on pace and time constraints."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "candidate_pois": {
                    "type": "array",
                    "description": "Complete POI objects from search_pois results (id, name, location, visit_duration_minutes, distance_km, category)",
                    "items": {"type": "object"}
                },
                "duration_days": {
                    "type": "integer",
                    "description": "Number of days (1-3)",
                    "minimum": 1,
                    "maximum": 3
                },
                "date_range": {
                    "type": "object",
                    "properties": {
                        "start_date": {"type": "string", "format": "date"},
                        "end_date": {"type": "string", "format": "date"}
                    },
                    "description": "Travel dates"
                },
                "pace": {"type": "string", "enum": PACES, "description": "Travel pace"},
                "daily_start_time": {
                    "type": "string",
                    "description": "Daily start time (e.g., '09:00')",
                    "default": "09:00"
                },
                "daily_end_time": {
                    "type": "string",
                    "description": "Daily end time (e.g., '20:00')",
                    "default": "20:00"
                },
                "edit_mode": {
                    "type": "boolean",
                    "description": "Whether this is an edit to the existing itinerary",
                    "default": false
                },
                "edit_constraints": {
                    "type": "object",
                    "description": "Constraints for editing (if edit_mode is true)",
                    "properties": {
                        "target_day": {"type": "integer"},
                        "edit_type": {"type": "string"},
                        "preserve_activities": {
                            "type": "array",
                            "items": {"type": "string"},
                            "description": "Activity IDs to preserve during the edit"
                        }
                    }
                }
            },
            "required": ["candidate_pois", "duration_days", "pace"]
        }),
    }
}

fn retrieve_city_guidance(city: &str) -> ToolSpec {
    ToolSpec {
        name: RETRIEVE_CITY_GUIDANCE.to_string(),
        description: format!(
            "Retrieve {city} travel guidance, tips, and recommendations from the knowledge base. \
             Use this for explaining why an activity was chosen, questions about attractions, \
             safety tips, local etiquette, or any factual information about {city}. Do not answer \
             such questions without calling this function first."
        ),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Question about the city, an activity, or a topic"
                },
                "top_k": {
                    "type": "integer",
                    "description": "Number of results to retrieve (default: 5)",
                    "default": 5,
                    "minimum": 1,
                    "maximum": 10
                }
            },
            "required": ["query"]
        }),
    }
}

fn ask_clarifying_question() -> ToolSpec {
    ToolSpec {
        name: ASK_CLARIFYING_QUESTION.to_string(),
        description: "Generate a clarifying question when critical information is missing. Use \
                      sparingly, only for information needed to create a good itinerary."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "question_type": {
                    "type": "string",
                    "enum": super::clarify::QUESTION_TYPES,
                    "description": "Type of information needed"
                },
                "context": {"type": "string", "description": "Additional context for the question"}
            },
            "required": ["question_type"]
        }),
    }
}
