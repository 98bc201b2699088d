//! Classifier stage: one business category per email.
//!
//! Out-of-range answers fall back to `Other`. Only transport failures are errors.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::PipelineError;
use crate::llm::provider::LlmProvider;
use crate::pipeline::guardrail::DEFAULT_MAX_EMAIL_CHARS;
use crate::pipeline::prompt::{PromptTemplate, clip_for_prompt, invoke};
use crate::pipeline::types::{Category, Stage};

const CLASSIFY_PROMPT: PromptTemplate = PromptTemplate {
    stage: Stage::Classify,
    system: "You are an email classification engine. Categorize business emails into exactly \
             one of four categories:\n\n\
             - Inquiry: questions, requests for information, or help\n\
             - Complaint: issues, problems, or dissatisfaction\n\
             - Feedback: suggestions, opinions, or general feedback\n\
             - Other: anything that doesn't fit the above\n\n\
             Respond with ONLY the category name. No punctuation, no explanation.",
    user: "Email:\n{email}",
    temperature: 0.0,
    max_tokens: 16,
};

/// Assigns a `Category` to an email.
pub struct Classifier {
    llm: Arc<dyn LlmProvider>,
    max_email_chars: usize,
}

impl Classifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            max_email_chars: DEFAULT_MAX_EMAIL_CHARS,
        }
    }

    pub fn with_max_email_chars(mut self, max_email_chars: usize) -> Self {
        self.max_email_chars = max_email_chars;
        self
    }

    /// Classify `email_text`. Only transport failures are errors.
    pub async fn classify(&self, email_text: &str) -> Result<Category, PipelineError> {
        let email = clip_for_prompt(Stage::Classify, email_text, self.max_email_chars);
        let raw = invoke(self.llm.as_ref(), &CLASSIFY_PROMPT, &[("email", email)]).await?;

        let category = match parse_category(&raw) {
            Some(category) => category,
            None => {
                warn!(raw_response = %raw, "Unrecognized category label, falling back to Other");
                Category::Other
            }
        };

        info!(category = %category, "Email classified");
        Ok(category)
    }
}

/// Read a category label out of a short model answer.
///
/// Tolerates a `Category:` prefix, quotes, markdown emphasis and trailing
/// punctuation. Anything else is `None`.
fn parse_category(raw: &str) -> Option<Category> {
    let first_line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;

    let without_prefix = match first_line.split_once(':') {
        Some((key, value)) if key.trim().eq_ignore_ascii_case("category") => value,
        _ => first_line,
    };

    let cleaned = without_prefix
        .trim()
        .trim_matches(|c: char| matches!(c, '*' | '_' | '`' | '"' | '\'' | '.' | '!'))
        .trim();

    Category::from_label(cleaned)
}
