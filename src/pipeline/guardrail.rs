//! Guardrail stage: asks the model for a safety verdict before anything else runs.
//!
//! Fail-closed: a verdict that cannot be parsed is never treated as safe.
//! The whole email is always judged; text longer than the prompt limit is
//! checked in overlapping windows and any unsafe window blocks the email.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::llm::provider::LlmProvider;
use crate::pipeline::prompt::{PromptTemplate, chunk_chars, extract_json_object, invoke};
use crate::pipeline::types::{GuardrailVerdict, SafetyCategory, Severity, Stage};

/// Default cap on email characters sent in one prompt.
pub const DEFAULT_MAX_EMAIL_CHARS: usize = 8000;

/// Upper bound on how much adjacent guardrail windows share.
const MAX_WINDOW_OVERLAP_CHARS: usize = 200;

const GUARDRAIL_PROMPT: PromptTemplate = PromptTemplate {
    stage: Stage::Guardrail,
    system: "You are an email safety classifier. Decide whether an incoming email is safe to \
             process automatically.\n\n\
             Unsafe categories:\n\
             - \"hate\": attacks on people based on protected characteristics\n\
             - \"violence\": threats or incitement of violence\n\
             - \"sexual\": sexually explicit content\n\
             - \"self-harm\": encouragement or instructions for self-harm\n\
             - \"phishing\": attempts to obtain credentials or personal data, fake verification links\n\
             - \"scam\": fraudulent offers, advance-fee schemes, fake invoices\n\
             - \"harassment\": targeted abuse or intimidation\n\
             - \"spam\": unsolicited bulk promotion\n\n\
             Severity is one of \"low\", \"medium\", \"high\", \"critical\".\n\n\
             Respond with ONLY a JSON object:\n\
             {\"is_safe\": true, \"categories\": [], \"severity\": \"low\", \"reason\": \"...\"}\n\n\
             Rules:\n\
             - Ordinary customer emails, including angry complaints, are safe\n\
             - List every category that applies when unsafe\n\
             - Keep the reason to one sentence",
    user: "Email:\n{email}",
    temperature: 0.0,
    max_tokens: 256,
};

/// Sends email text to the safety prompt and parses the verdict.
pub struct GuardrailChecker {
    llm: Arc<dyn LlmProvider>,
    max_email_chars: usize,
}

impl GuardrailChecker {
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

    /// Judge `email_text`.
    ///
    /// Empty text is trivially safe and costs no model call. A response that
    /// cannot be parsed yields `PipelineError::GuardrailUndetermined`.
    pub async fn check(&self, email_text: &str) -> Result<GuardrailVerdict, PipelineError> {
        if email_text.trim().is_empty() {
            debug!("Empty email text, skipping guardrail call");
            return Ok(GuardrailVerdict::safe("Empty content"));
        }

        let overlap = MAX_WINDOW_OVERLAP_CHARS.min(self.max_email_chars / 4);
        let windows = chunk_chars(email_text, self.max_email_chars, overlap);
        if windows.len() > 1 {
            info!(
                chars = email_text.chars().count(),
                max_chars = self.max_email_chars,
                windows = windows.len(),
                "Email exceeds prompt limit, checking in windows"
            );
        }

        let mut first_safe = None;
        for (index, window) in windows.iter().enumerate() {
            let verdict = self.check_window(window).await?;
            if !verdict.is_safe {
                if windows.len() > 1 {
                    warn!(window = index, "Unsafe content found in email window");
                }
                return Ok(verdict);
            }
            first_safe.get_or_insert(verdict);
        }

        Ok(first_safe.unwrap_or_else(|| GuardrailVerdict::safe("No unsafe content detected")))
    }

    async fn check_window(&self, window: &str) -> Result<GuardrailVerdict, PipelineError> {
        let raw = invoke(self.llm.as_ref(), &GUARDRAIL_PROMPT, &[("email", window)]).await?;

        match parse_guardrail_response(&raw) {
            Ok(verdict) => {
                info!(
                    is_safe = verdict.is_safe,
                    categories = %verdict.category_list(),
                    severity = verdict.severity_label(),
                    "Guardrail verdict"
                );
                Ok(verdict)
            }
            Err(e) => {
                warn!(
                    raw_response = %raw,
                    error = %e,
                    "Failed to parse guardrail response, failing closed"
                );
                let reason = format!("guardrail response unreadable: {e}");
                Err(PipelineError::GuardrailUndetermined {
                    verdict: Box::new(GuardrailVerdict::undetermined(reason.clone())),
                    reason,
                })
            }
        }
    }
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GuardrailResponse {
    #[serde(alias = "safe", alias = "isSafe")]
    is_safe: Option<bool>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    reason: String,
}

/// Parse the guardrail JSON into a verdict.
fn parse_guardrail_response(raw: &str) -> Result<GuardrailVerdict, String> {
    let json_str = extract_json_object(raw);
    let response: GuardrailResponse =
        serde_json::from_str(&json_str).map_err(|e| format!("JSON parse error: {e}"))?;

    let is_safe = response
        .is_safe
        .ok_or_else(|| "missing is_safe field".to_string())?;

    let mut categories = BTreeSet::new();
    for label in &response.categories {
        match SafetyCategory::from_label(label) {
            Some(category) => {
                categories.insert(category);
            }
            None => debug!(label = %label, "Ignoring unknown guardrail category"),
        }
    }

    let severity = response.severity.as_deref().and_then(Severity::from_label);

    let reason = response.reason.trim().to_string();
    let reason = if !reason.is_empty() {
        reason
    } else if is_safe {
        "No unsafe content detected".to_string()
    } else if categories.is_empty() {
        "Flagged as unsafe".to_string()
    } else {
        format!(
            "Flagged as {}",
            categories
                .iter()
                .map(SafetyCategory::label)
                .collect::<Vec<_>>()
                .join(", ")
        )
    };

    Ok(GuardrailVerdict {
        is_safe,
        categories,
        severity,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{FailingLlm, FixedLlm};

    // ── Parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_safe_verdict() {
        let raw = r#"{"is_safe": true, "categories": [], "severity": "low", "reason": "Routine support request"}"#;
        let verdict = parse_guardrail_response(raw).unwrap();
        assert!(verdict.is_safe);
        assert!(verdict.categories.is_empty());
        assert_eq!(verdict.severity, Some(Severity::Low));
        assert_eq!(verdict.reason, "Routine support request");
    }

    #[test]
    fn parse_unsafe_verdict_with_categories() {
        let raw = r#"{"is_safe": false, "categories": ["phishing", "scam"], "severity": "high", "reason": "Fake verification link"}"#;
        let verdict = parse_guardrail_response(raw).unwrap();
        assert!(!verdict.is_safe);
        assert!(verdict.categories.contains(&SafetyCategory::Phishing));
        assert!(verdict.categories.contains(&SafetyCategory::Scam));
        assert_eq!(verdict.severity, Some(Severity::High));
    }

    #[test]
    fn parse_unknown_category_ignored() {
        let raw = r#"{"is_safe": false, "categories": ["malware", "Self_Harm"], "severity": "critical"}"#;
        let verdict = parse_guardrail_response(raw).unwrap();
        assert_eq!(verdict.categories.len(), 1);
        assert!(verdict.categories.contains(&SafetyCategory::SelfHarm));
    }

    #[test]
    fn parse_unsafe_without_reason_gets_default() {
        let raw = r#"{"is_safe": false, "categories": ["spam"]}"#;
        let verdict = parse_guardrail_response(raw).unwrap();
        assert_eq!(verdict.reason, "Flagged as spam");
        assert_eq!(verdict.severity, None);
    }

    #[test]
    fn parse_unknown_severity_is_unspecified() {
        let raw = r#"{"is_safe": false, "severity": "apocalyptic", "reason": "x"}"#;
        let verdict = parse_guardrail_response(raw).unwrap();
        assert_eq!(verdict.severity, None);
    }

    #[test]
    fn parse_accepts_camel_case_alias() {
        let raw = r#"{"isSafe": true}"#;
        assert!(parse_guardrail_response(raw).unwrap().is_safe);
    }

    #[test]
    fn parse_missing_is_safe_fails() {
        let raw = r#"{"categories": [], "reason": "looks fine"}"#;
        assert!(parse_guardrail_response(raw).is_err());
    }

    #[test]
    fn parse_prose_fails() {
        assert!(parse_guardrail_response("This email looks safe to me.").is_err());
    }

    #[test]
    fn parse_markdown_wrapped() {
        let raw = "```json\n{\"is_safe\": true, \"reason\": \"ok\"}\n```";
        assert!(parse_guardrail_response(raw).unwrap().is_safe);
    }

    // ── Checker with mock LLM ───────────────────────────────────────

    #[tokio::test]
    async fn check_returns_parsed_verdict() {
        let llm = Arc::new(FixedLlm::new(
            r#"{"is_safe": false, "categories": ["phishing"], "severity": "high", "reason": "Credential harvesting"}"#,
        ));
        let checker = GuardrailChecker::new(llm.clone());

        let verdict = checker.check("Verify your account at http://bank.example.co").await.unwrap();
        assert!(!verdict.is_safe);
        assert_eq!(verdict.reason, "Credential harvesting");
        assert_eq!(llm.calls(), 1);
        assert!(llm.last_user_prompt().contains("Verify your account"));
        assert!(llm.last_system_prompt().contains("phishing"));
    }

    #[tokio::test]
    async fn check_empty_text_skips_model() {
        let llm = Arc::new(FixedLlm::new("unused"));
        let checker = GuardrailChecker::new(llm.clone());

        let verdict = checker.check("   \n ").await.unwrap();
        assert!(verdict.is_safe);
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn check_unparseable_fails_closed() {
        let llm = Arc::new(FixedLlm::new("I think it's fine."));
        let checker = GuardrailChecker::new(llm);

        match checker.check("Hello there").await {
            Err(PipelineError::GuardrailUndetermined { verdict, reason }) => {
                assert!(!verdict.is_safe);
                assert!(verdict.severity.is_none());
                assert!(reason.contains("unreadable"));
            }
            other => panic!("Expected GuardrailUndetermined, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn check_transport_error_is_not_a_verdict() {
        let checker = GuardrailChecker::new(Arc::new(FailingLlm));
        match checker.check("Hello").await {
            Err(PipelineError::Transport { stage, .. }) => assert_eq!(stage, Stage::Guardrail),
            other => panic!("Expected Transport, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn check_long_email_judges_every_window() {
        let llm = Arc::new(FixedLlm::new(r#"{"is_safe": true, "reason": "fine"}"#));
        let checker = GuardrailChecker::new(llm.clone()).with_max_email_chars(10);

        // 25 chars, windows of 10 stepping by 8: [0,10) [8,18) [16,25)
        let text = "abcdefghijklmnopqrstuvwxy";
        let verdict = checker.check(text).await.unwrap();
        assert!(verdict.is_safe);
        assert_eq!(verdict.reason, "fine");
        assert_eq!(llm.calls(), 3);
        assert_eq!(llm.last_user_prompt(), "Email:\nqrstuvwxy");
    }

    #[tokio::test]
    async fn check_stops_at_first_unsafe_window() {
        let llm = Arc::new(FixedLlm::new(r#"{"is_safe": false, "categories": ["spam"]}"#));
        let checker = GuardrailChecker::new(llm.clone()).with_max_email_chars(10);

        let verdict = checker.check(&"z".repeat(50)).await.unwrap();
        assert!(!verdict.is_safe);
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn check_unreadable_window_fails_whole_email() {
        let llm = Arc::new(FixedLlm::new("no idea"));
        let checker = GuardrailChecker::new(llm.clone()).with_max_email_chars(10);

        let result = checker.check(&"z".repeat(50)).await;
        assert!(matches!(result, Err(PipelineError::GuardrailUndetermined { .. })));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn check_empty_model_answer_fails_closed() {
        let checker = GuardrailChecker::new(Arc::new(FixedLlm::new("")));
        assert!(matches!(
            checker.check("Hello").await,
            Err(PipelineError::GuardrailUndetermined { .. })
        ));
    }
}
