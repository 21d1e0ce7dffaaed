//! Property-based tests for recovery and message translation
//!
//! These tests verify invariants that must hold for any input:
//! - A well-formed text call is recovered exactly once, with its arguments
//! - Recovery is deterministic and re-recovering rendered calls is stable
//! - Text that never names an advertised tool yields no calls
//! - OpenAI-compatible messages survive both tool layouts unchanged
//! - Folding then unfolding restores tool ids when the calls are present

use super::openai_compat::{decode_message, encode_message, WireMessage};
use super::recovery::recover_tool_calls;
use super::transcript::{fold_tool_turns, unfold_tool_turns};
use super::types::{CanonicalMessage, ToolArguments, ToolCall};
use super::ToolResultLayout;
use proptest::prelude::*;
use serde_json::{Map, Value};

const TOOLS: [&str; 3] = ["search_pois", "build_itinerary", "retrieve_city_guidance"];

// ============================================================================
// Strategies
// ============================================================================

fn arb_tool_name() -> impl Strategy<Value = String> {
    prop::sample::select(TOOLS.to_vec()).prop_map(str::to_string)
}

/// Flat argument maps with string, integer and boolean values
fn arb_arguments() -> impl Strategy<Value = Map<String, Value>> {
    let value = prop_oneof![
        "[a-z ]{0,12}".prop_map(Value::from),
        (-1000i64..1000).prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        prop::collection::vec("[a-z]{1,8}", 0..4).prop_map(Value::from),
    ];
    prop::collection::btree_map("[a-z]{1,10}", value, 0..4).prop_map(|m| m.into_iter().collect())
}

fn arb_tool_call(idx: usize) -> impl Strategy<Value = ToolCall> {
    (arb_tool_name(), arb_arguments())
        .prop_map(move |(name, args)| ToolCall::new(format!("call_{idx}"), name, args))
}

/// Prose that cannot contain an advertised name (all of them need `_`)
fn arb_prose() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ,.!?(){}\\[\\]:\"']{0,200}"
}

fn arb_tool_content() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 {}:\",\\[\\]]{1,200}"
}

/// An assistant call batch followed by one result per call
fn arb_tool_turn() -> impl Strategy<Value = Vec<CanonicalMessage>> {
    (1usize..4)
        .prop_flat_map(|n| {
            let calls: Vec<_> = (0..n).map(arb_tool_call).collect();
            let contents = prop::collection::vec(arb_tool_content(), n);
            (calls, contents)
        })
        .prop_map(|(calls, contents)| {
            let mut messages = vec![
                CanonicalMessage::system("You plan trips."),
                CanonicalMessage::user("Plan something"),
                CanonicalMessage::assistant_tool_calls(None, calls.clone()),
            ];
            messages.extend(
                calls
                    .iter()
                    .zip(contents)
                    .map(|(call, content)| CanonicalMessage::tool_result(&call.id, &call.name, content)),
            );
            messages
        })
}

fn arb_layout() -> impl Strategy<Value = ToolResultLayout> {
    prop_oneof![Just(ToolResultLayout::Flat), Just(ToolResultLayout::Nested)]
}

fn render(call: &ToolCall) -> String {
    format!("{}{}", call.name, call.arguments.to_json_text())
}

fn through_wire(msg: &CanonicalMessage, layout: ToolResultLayout) -> Option<CanonicalMessage> {
    let wire = encode_message(msg, layout)?;
    let json = serde_json::to_value(&wire).ok()?;
    let wire: WireMessage = serde_json::from_value(json).ok()?;
    decode_message(wire)
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_bare_call_recovered_once(
        name in arb_tool_name(),
        args in arb_arguments(),
        prefix in "[A-Za-z ,.]{0,40}",
    ) {
        let text = format!("{prefix} {name}{}", Value::Object(args.clone()));
        let calls = recover_tool_calls(&text, &TOOLS);

        prop_assert_eq!(calls.len(), 1);
        prop_assert_eq!(&calls[0].name, &name);
        prop_assert_eq!(&calls[0].arguments, &ToolArguments::Parsed(args));
    }

    #[test]
    fn prop_recovery_is_stable(calls in prop::collection::vec(arb_tool_call(0), 1..4)) {
        let text = calls.iter().map(render).collect::<Vec<_>>().join("\n");
        let first = recover_tool_calls(&text, &TOOLS);
        let again = recover_tool_calls(&text, &TOOLS);
        prop_assert_eq!(&first, &again);

        let rerendered = first.iter().map(render).collect::<Vec<_>>().join("\n");
        let second = recover_tool_calls(&rerendered, &TOOLS);
        let strip = |calls: &[ToolCall]| -> Vec<(String, ToolArguments)> {
            calls.iter().map(|c| (c.name.clone(), c.arguments.clone())).collect()
        };
        prop_assert_eq!(strip(&first), strip(&second));
    }

    #[test]
    fn prop_no_fabricated_calls(text in arb_prose()) {
        prop_assert!(recover_tool_calls(&text, &TOOLS).is_empty());
    }

    #[test]
    fn prop_openai_messages_round_trip(turn in arb_tool_turn(), layout in arb_layout()) {
        for msg in &turn {
            let decoded = through_wire(msg, layout);
            prop_assert_eq!(decoded.as_ref(), Some(msg));
        }
    }

    #[test]
    fn prop_fold_unfold_restores_tool_links(turn in arb_tool_turn()) {
        let folded = fold_tool_turns(&turn);
        prop_assert!(folded.iter().all(|m| m.role != super::Role::Tool));
        prop_assert_eq!(unfold_tool_turns(&folded), turn);
    }
}
