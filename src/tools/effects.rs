//! Session mutations implied by successful tool results

use super::{ASK_CLARIFYING_QUESTION, BUILD_ITINERARY, RETRIEVE_CITY_GUIDANCE, SEARCH_POIS};
use crate::session::{Citation, SessionEffect};
use serde_json::{Map, Value};

const DEFAULT_POI_SOURCE: &str = "OpenStreetMap";
const POI_SECTION: &str = "POI Data";

pub fn session_effects(tool: &str, result: &Map<String, Value>) -> Vec<SessionEffect> {
    match tool {
        BUILD_ITINERARY => match result.get("itinerary") {
            Some(itinerary) if !itinerary.is_null() => vec![SessionEffect::SetItinerary(itinerary.clone())],
            _ => {
                tracing::warn!(tool, keys = ?result.keys().collect::<Vec<_>>(), "Result has no itinerary");
                Vec::new()
            }
        },
        RETRIEVE_CITY_GUIDANCE => match result.get("citations").and_then(Value::as_array) {
            Some(items) => {
                let citations: Vec<Citation> = items
                    .iter()
                    .filter_map(|c| serde_json::from_value(c.clone()).ok())
                    .collect();
                non_empty(citations)
            }
            None => {
                tracing::warn!(tool, "Result has no citations");
                Vec::new()
            }
        },
        SEARCH_POIS => {
            let pois = result.get("pois").and_then(Value::as_array).map_or(&[][..], Vec::as_slice);
            non_empty(poi_citations(pois))
        }
        ASK_CLARIFYING_QUESTION => vec![SessionEffect::QuestionAsked],
        _ => Vec::new(),
    }
}

fn non_empty(citations: Vec<Citation>) -> Vec<SessionEffect> {
    if citations.is_empty() {
        Vec::new()
    } else {
        vec![SessionEffect::AddCitations(citations)]
    }
}

/// One citation per POI that links to its source, first occurrence of each url
fn poi_citations(pois: &[Value]) -> Vec<Citation> {
    let mut citations: Vec<Citation> = Vec::new();
    for poi in pois {
        let Some(url) = poi.get("source_url").and_then(Value::as_str).filter(|u| !u.is_empty()) else {
            continue;
        };
        if citations.iter().any(|c| c.url == url) {
            continue;
        }
        let source = poi
            .get("source")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_POI_SOURCE);
        citations.push(Citation {
            source: source.to_string(),
            url: url.to_string(),
            section: POI_SECTION.to_string(),
        });
    }
    citations
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn itinerary_result_replaces_itinerary() {
        let effects = session_effects(BUILD_ITINERARY, &map(json!({"itinerary": {"day_1": {}}})));
        assert_eq!(effects, [SessionEffect::SetItinerary(json!({"day_1": {}}))]);
        assert!(session_effects(BUILD_ITINERARY, &map(json!({"status": "ok"}))).is_empty());
    }

    #[test]
    fn guidance_citations_are_carried_over() {
        let result = map(json!({
            "answer": "Visit early.",
            "citations": [
                {"source": "Wikivoyage", "url": "https://wv/jaipur", "section": "See"},
                {"bogus": true}
            ]
        }));
        let effects = session_effects(RETRIEVE_CITY_GUIDANCE, &result);
        assert_eq!(
            effects,
            [SessionEffect::AddCitations(vec![Citation {
                source: "Wikivoyage".into(),
                url: "https://wv/jaipur".into(),
                section: "See".into(),
            }])]
        );
    }

    #[test]
    fn pois_become_deduplicated_citations() {
        let result = map(json!({"pois": [
            {"name": "Amber Fort", "source_url": "https://osm/1"},
            {"name": "Amber Fort again", "source_url": "https://osm/1"},
            {"name": "Hawa Mahal", "source": "Wikipedia", "source_url": "https://wiki/hawa"},
            {"name": "No link"}
        ]}));
        let effects = session_effects(SEARCH_POIS, &result);
        let [SessionEffect::AddCitations(citations)] = effects.as_slice() else {
            panic!("expected one citation effect, got {effects:?}");
        };
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].source, "OpenStreetMap");
        assert_eq!(citations[0].section, "POI Data");
        assert_eq!(citations[1].source, "Wikipedia");
    }

    #[test]
    fn clarifying_question_counts_and_unknown_tools_do_nothing() {
        assert_eq!(session_effects(ASK_CLARIFYING_QUESTION, &Map::new()), [SessionEffect::QuestionAsked]);
        assert!(session_effects("weather", &Map::new()).is_empty());
    }
}
