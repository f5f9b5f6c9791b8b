//! Thread enrichment pipeline.
//!
//! Every record flows through:
//! 1. `transcript::build_transcript()` — canonical text rendering
//! 2. `gate::EligibilityGate::check()` — cheap token-budget check
//! 3. `LlmProvider::complete_with_tools()` — one forced function call
//! 4. `interpreter::interpret()` — typed enrichment or `unparsable` marker
//!
//! `dispatch::DispatchCoordinator` runs those units concurrently and hands
//! results back in submission order at each transaction boundary.

pub mod dispatch;
pub mod gate;
pub mod interpreter;
pub mod processor;
pub mod schema;
pub mod transcript;
pub mod types;
