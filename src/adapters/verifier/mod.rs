//! AI Outcome Verifier Adapter
//!
//! - `llm`: chat completions client implementing `OutcomeVerifier`
//! - `prompt`: prompt builder and response parser

pub mod llm;
pub mod prompt;

pub use llm::{LlmSettings, LlmVerifier};
