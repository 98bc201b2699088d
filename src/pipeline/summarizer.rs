//! Summarizer stage: two-sentence summary of an email.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::llm::provider::LlmProvider;
use crate::pipeline::guardrail::DEFAULT_MAX_EMAIL_CHARS;
use crate::pipeline::prompt::{PromptTemplate, clip_for_prompt, invoke};
use crate::pipeline::types::{Stage, Summary};

const SUMMARIZE_PROMPT: PromptTemplate = PromptTemplate {
    stage: Stage::Summarize,
    system: "You are an email summarization engine. Write a concise two-sentence summary of \
             a business email.\n\n\
             Rules:\n\
             - Capture the main points, context and intent\n\
             - Be professional and clear\n\
             - Exactly two sentences\n\n\
             Return only the summary, no additional commentary.",
    user: "Email:\n{email}",
    temperature: 0.2,
    max_tokens: 160,
};

/// Produces a `Summary` for an email.
pub struct Summarizer {
    llm: Arc<dyn LlmProvider>,
    max_email_chars: usize,
}

impl Summarizer {
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

    pub async fn summarize(&self, email_text: &str) -> Result<Summary, PipelineError> {
        let email = clip_for_prompt(Stage::Summarize, email_text, self.max_email_chars);
        let raw = invoke(self.llm.as_ref(), &SUMMARIZE_PROMPT, &[("email", email)]).await?;

        parse_summary(&raw).map_err(|reason| {
            warn!(raw_response = %raw, error = %reason, "Failed to parse summary");
            PipelineError::Parse {
                stage: Stage::Summarize,
                reason,
            }
        })
    }
}

/// Normalize the model's summary text. Empty output is an error.
fn parse_summary(raw: &str) -> Result<Summary, String> {
    let mut text = raw.trim();
    if let Some((key, value)) = text.split_once(':')
        && key.trim().eq_ignore_ascii_case("summary")
    {
        text = value.trim();
    }

    // Collapse internal line breaks; the summary renders on one line.
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        return Err("empty summary".to_string());
    }

    debug!(chars = text.len(), "Summary parsed");
    Ok(Summary(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{FailingLlm, FixedLlm};

    #[test]
    fn parse_plain_summary() {
        let summary = parse_summary("  Customer cannot log in. They need urgent help.  ").unwrap();
        assert_eq!(summary.as_str(), "Customer cannot log in. They need urgent help.");
    }

    #[test]
    fn parse_strips_prefix_and_newlines() {
        let summary = parse_summary("Summary: The order is late.\nThe customer wants a refund.").unwrap();
        assert_eq!(summary.as_str(), "The order is late. The customer wants a refund.");
    }

    #[test]
    fn parse_keeps_colons_inside_text() {
        let summary = parse_summary("Meeting at 10:30 is moved. Please confirm.").unwrap();
        assert_eq!(summary.as_str(), "Meeting at 10:30 is moved. Please confirm.");
    }

    #[test]
    fn parse_empty_fails() {
        assert!(parse_summary("   \n").is_err());
        assert!(parse_summary("Summary:   ").is_err());
    }

    #[tokio::test]
    async fn summarize_returns_summary() {
        let llm = Arc::new(FixedLlm::new("Customer cannot log in and needs urgent help."));
        let summarizer = Summarizer::new(llm.clone());

        let summary = summarizer.summarize("I can't log in!").await.unwrap();
        assert_eq!(summary.as_str(), "Customer cannot log in and needs urgent help.");
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn summarize_empty_response_is_parse_error() {
        let summarizer = Summarizer::new(Arc::new(FixedLlm::new("  ")));
        match summarizer.summarize("Hello").await {
            Err(PipelineError::Parse { stage, .. }) => assert_eq!(stage, Stage::Summarize),
            other => panic!("Expected Parse, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn summarize_transport_error_propagates() {
        let summarizer = Summarizer::new(Arc::new(FailingLlm));
        assert!(matches!(
            summarizer.summarize("Hello").await,
            Err(PipelineError::Transport { stage: Stage::Summarize, .. })
        ));
    }
}
