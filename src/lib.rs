//! Tool-calling LLM orchestration for a trip-planning assistant
//!
//! A chat turn is assembled from the session history, sent through an
//! ordered chain of LLM backends, and looped through tool calls until the
//! model answers in text.

#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions
)]

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod fingerprint;
pub mod llm;
pub mod orchestrator;
pub mod session;
pub mod system_prompt;
pub mod tools;

#[cfg(test)]
mod testing;
