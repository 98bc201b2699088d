//! Email processing pipeline.
//!
//! Every submitted email flows through:
//! 1. `GuardrailChecker::check()`: safety verdict; unsafe content stops here
//! 2. `Classifier::classify()`: Inquiry / Complaint / Feedback / Other
//! 3. `Summarizer::summarize()`: two-sentence summary
//! 4. `ReplyDrafter::draft_reply()`: formatted reply draft
//!
//! `Orchestrator` sequences the stages as a state machine.

pub mod classifier;
pub mod guardrail;
pub mod orchestrator;
pub mod prompt;
pub mod reply;
pub mod summarizer;
#[cfg(test)]
pub(crate) mod testing;
pub mod types;

pub use orchestrator::{Orchestrator, PipelineState, StageOutcome};
pub use types::{
    Category, EmailInput, GuardrailVerdict, ProcessedEmail, ProcessingResult, Reply,
    SafetyCategory, Severity, Stage, Summary,
};
