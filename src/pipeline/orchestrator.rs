//! Orchestrator: drives one email through the stage state machine.
//!
//! ```text
//! Pending → GuardrailCheck ─┬─ unsafe → Blocked
//!                           └─ safe   → Classifying → Summarizing → Drafting → Complete
//! any stage error → Failed
//! ```
//!
//! **Core invariant: nothing downstream of the guardrail runs on unsafe content.**
//! A request ends in exactly one of Complete, Blocked or Failed; no partial
//! result ever leaves this module.

use std::fmt;
use std::sync::Arc;

use tracing::{Instrument, error, info, info_span, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::flagging::{FlagEvent, FlagSink};
use crate::llm::provider::LlmProvider;
use crate::pipeline::classifier::Classifier;
use crate::pipeline::guardrail::GuardrailChecker;
use crate::pipeline::reply::ReplyDrafter;
use crate::pipeline::summarizer::Summarizer;
use crate::pipeline::types::{
    Category, EmailInput, GuardrailVerdict, ProcessedEmail, ProcessingResult, Reply, Summary,
};

// ── State machine ───────────────────────────────────────────────────

/// Where a request is in the pipeline.
#[derive(Debug)]
pub enum PipelineState {
    Pending,
    GuardrailCheck,
    Classifying,
    Summarizing { category: Category },
    Drafting { category: Category, summary: Summary },
    Blocked(GuardrailVerdict),
    Complete(ProcessedEmail),
    Failed(PipelineError),
}

/// Result of running one stage, fed back into the state machine.
#[derive(Debug)]
pub enum StageOutcome {
    Submitted,
    Verdict(GuardrailVerdict),
    Classified(Category),
    Summarized(Summary),
    Drafted(Reply),
    Error(PipelineError),
}

impl StageOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Verdict(_) => "verdict",
            Self::Classified(_) => "classified",
            Self::Summarized(_) => "summarized",
            Self::Drafted(_) => "drafted",
            Self::Error(_) => "error",
        }
    }

    fn from_result<T>(result: Result<T, PipelineError>, ok: impl FnOnce(T) -> Self) -> Self {
        match result {
            Ok(value) => ok(value),
            Err(e) => Self::Error(e),
        }
    }
}

impl PipelineState {
    /// Apply one stage outcome.
    ///
    /// An outcome the current state cannot accept lands in `Failed` with
    /// `InvalidTransition`.
    pub fn advance(self, outcome: StageOutcome) -> Self {
        use PipelineState as S;
        use StageOutcome as O;

        match (self, outcome) {
            (state, O::Error(e)) if !state.is_terminal() => S::Failed(e),
            (S::Pending, O::Submitted) => S::GuardrailCheck,
            (S::GuardrailCheck, O::Verdict(verdict)) => {
                if verdict.is_safe {
                    S::Classifying
                } else {
                    S::Blocked(verdict)
                }
            }
            (S::Classifying, O::Classified(category)) => S::Summarizing { category },
            (S::Summarizing { category }, O::Summarized(summary)) => {
                S::Drafting { category, summary }
            }
            (S::Drafting { category, summary }, O::Drafted(reply)) => {
                S::Complete(ProcessedEmail {
                    category,
                    summary,
                    reply,
                })
            }
            (state, outcome) => S::Failed(PipelineError::InvalidTransition {
                from: state.to_string(),
                outcome: outcome.label().to_string(),
            }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Blocked(_) | Self::Complete(_) | Self::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::GuardrailCheck => "guardrail_check",
            Self::Classifying => "classifying",
            Self::Summarizing { .. } => "summarizing",
            Self::Drafting { .. } => "drafting",
            Self::Blocked(_) => "blocked",
            Self::Complete(_) => "complete",
            Self::Failed(_) => "failed",
        }
    }

    /// Collapse a terminal state into what the caller sees.
    pub fn into_result(self) -> Result<ProcessingResult, PipelineError> {
        match self {
            Self::Complete(email) => Ok(ProcessingResult::Complete(email)),
            Self::Blocked(verdict) => Ok(ProcessingResult::Blocked { verdict }),
            Self::Failed(e) => Err(e),
            other => Err(PipelineError::InvalidTransition {
                from: other.to_string(),
                outcome: "finish".to_string(),
            }),
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Orchestrator ────────────────────────────────────────────────────

/// Runs guardrail → classify → summarize → reply for one email at a time.
///
/// Holds no per-request state; a single instance can serve concurrent requests.
pub struct Orchestrator {
    guardrail: GuardrailChecker,
    classifier: Classifier,
    summarizer: Summarizer,
    drafter: ReplyDrafter,
    flag_sink: Arc<dyn FlagSink>,
    parallel_analysis: bool,
}

impl Orchestrator {
    /// Create an orchestrator with default pipeline settings.
    pub fn new(llm: Arc<dyn LlmProvider>, flag_sink: Arc<dyn FlagSink>) -> Self {
        Self::with_config(llm, flag_sink, &PipelineConfig::default())
    }

    pub fn with_config(
        llm: Arc<dyn LlmProvider>,
        flag_sink: Arc<dyn FlagSink>,
        config: &PipelineConfig,
    ) -> Self {
        let max = config.max_email_chars;
        Self {
            guardrail: GuardrailChecker::new(Arc::clone(&llm)).with_max_email_chars(max),
            classifier: Classifier::new(Arc::clone(&llm)).with_max_email_chars(max),
            summarizer: Summarizer::new(Arc::clone(&llm)).with_max_email_chars(max),
            drafter: ReplyDrafter::new(llm).with_max_email_chars(max),
            flag_sink,
            parallel_analysis: config.parallel_analysis,
        }
    }

    /// Process one email to a complete or blocked result.
    pub async fn process(&self, email: &EmailInput) -> Result<ProcessingResult, PipelineError> {
        self.run(email).await.into_result()
    }

    /// Drive the state machine to a terminal state.
    pub async fn run(&self, email: &EmailInput) -> PipelineState {
        let span = info_span!("process_email", request_id = %email.id);
        async move {
            info!(chars = email.text.len(), "Processing email");

            if email.is_blank() {
                warn!("Rejecting empty email");
                return PipelineState::Pending.advance(StageOutcome::Error(PipelineError::EmptyInput));
            }

            let mut state = PipelineState::Pending.advance(StageOutcome::Submitted);
            loop {
                state = match state {
                    PipelineState::GuardrailCheck => {
                        let outcome = self.guardrail_stage(email).await;
                        state.advance(outcome)
                    }
                    PipelineState::Classifying if self.parallel_analysis => {
                        // Classifier and summarizer share no data; fan out, then
                        // feed both results through the normal transitions.
                        let joined = futures::future::try_join(
                            self.classifier.classify(&email.text),
                            self.summarizer.summarize(&email.text),
                        )
                        .await;
                        match joined {
                            Ok((category, summary)) => state
                                .advance(StageOutcome::Classified(category))
                                .advance(StageOutcome::Summarized(summary)),
                            Err(e) => state.advance(StageOutcome::Error(e)),
                        }
                    }
                    PipelineState::Classifying => {
                        let result = self.classifier.classify(&email.text).await;
                        state.advance(StageOutcome::from_result(result, StageOutcome::Classified))
                    }
                    PipelineState::Summarizing { .. } => {
                        let result = self.summarizer.summarize(&email.text).await;
                        state.advance(StageOutcome::from_result(result, StageOutcome::Summarized))
                    }
                    PipelineState::Drafting {
                        category,
                        ref summary,
                    } => {
                        let result = self.drafter.draft_reply(&email.text, category, summary).await;
                        state.advance(StageOutcome::from_result(result, StageOutcome::Drafted))
                    }
                    terminal => {
                        log_terminal(&terminal);
                        return terminal;
                    }
                };
            }
        }
        .instrument(span)
        .await
    }

    /// Run the guardrail; record a flag event when the email is blocked.
    async fn guardrail_stage(&self, email: &EmailInput) -> StageOutcome {
        match self.guardrail.check(&email.text).await {
            Ok(verdict) => {
                if !verdict.is_safe {
                    self.record_flag(email, &verdict).await;
                }
                StageOutcome::Verdict(verdict)
            }
            Err(e) => StageOutcome::Error(e),
        }
    }

    async fn record_flag(&self, email: &EmailInput, verdict: &GuardrailVerdict) {
        let event = FlagEvent::new(email, verdict.clone());
        if let Err(e) = self.flag_sink.record(&event).await {
            // The block stands even when the record cannot be written.
            warn!(error = %e, "Failed to record flagged email");
        }
    }
}

fn log_terminal(state: &PipelineState) {
    match state {
        PipelineState::Complete(email) => {
            info!(category = %email.category, "Email processed successfully");
        }
        PipelineState::Blocked(verdict) => {
            warn!(
                categories = %verdict.category_list(),
                severity = verdict.severity_label(),
                reason = %verdict.reason,
                "Email blocked by guardrail"
            );
        }
        PipelineState::Failed(e) => {
            error!(
                error = %e,
                stage = e.stage().map_or("none", |s| s.label()),
                "Email processing failed"
            );
        }
        other => {
            error!(state = %other, "Pipeline stopped in a non-terminal state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlagError;
    use crate::pipeline::testing::FailingLlm;
    use crate::pipeline::types::{SafetyCategory, Severity, Stage};
    use std::sync::Mutex;

    fn reply() -> Reply {
        Reply {
            subject: "Re: hello".into(),
            salutation: None,
            body: "Thanks.".into(),
            closing: None,
        }
    }

    fn unsafe_verdict() -> GuardrailVerdict {
        GuardrailVerdict {
            is_safe: false,
            categories: [SafetyCategory::Phishing].into_iter().collect(),
            severity: Some(Severity::High),
            reason: "fake login page".into(),
        }
    }

    // ── Transitions ─────────────────────────────────────────────────

    #[test]
    fn happy_path_transitions() {
        let state = PipelineState::Pending
            .advance(StageOutcome::Submitted)
            .advance(StageOutcome::Verdict(GuardrailVerdict::safe("ok")))
            .advance(StageOutcome::Classified(Category::Inquiry))
            .advance(StageOutcome::Summarized(Summary("Asks a question.".into())))
            .advance(StageOutcome::Drafted(reply()));

        match state {
            PipelineState::Complete(email) => {
                assert_eq!(email.category, Category::Inquiry);
                assert_eq!(email.summary.as_str(), "Asks a question.");
                assert_eq!(email.reply, reply());
            }
            other => panic!("Expected Complete, got {:?}", other),
        }
    }

    #[test]
    fn unsafe_verdict_blocks() {
        let state = PipelineState::GuardrailCheck.advance(StageOutcome::Verdict(unsafe_verdict()));
        assert!(matches!(state, PipelineState::Blocked(_)));
        assert!(state.is_terminal());
    }

    #[test]
    fn error_fails_any_running_state() {
        for state in [
            PipelineState::Pending,
            PipelineState::GuardrailCheck,
            PipelineState::Classifying,
            PipelineState::Summarizing {
                category: Category::Other,
            },
        ] {
            let next = state.advance(StageOutcome::Error(PipelineError::EmptyInput));
            assert!(matches!(next, PipelineState::Failed(PipelineError::EmptyInput)));
        }
    }

    #[test]
    fn out_of_order_outcome_is_invalid_transition() {
        let state = PipelineState::GuardrailCheck.advance(StageOutcome::Drafted(reply()));
        match state {
            PipelineState::Failed(PipelineError::InvalidTransition { from, outcome }) => {
                assert_eq!(from, "guardrail_check");
                assert_eq!(outcome, "drafted");
            }
            other => panic!("Expected InvalidTransition, got {:?}", other),
        }
    }

    #[test]
    fn terminal_state_rejects_further_outcomes() {
        let blocked = PipelineState::Blocked(unsafe_verdict());
        let next = blocked.advance(StageOutcome::Error(PipelineError::EmptyInput));
        assert!(matches!(
            next,
            PipelineState::Failed(PipelineError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn into_result_maps_terminals() {
        let blocked = PipelineState::Blocked(unsafe_verdict()).into_result().unwrap();
        assert!(blocked.is_blocked());

        let failed = PipelineState::Failed(PipelineError::EmptyInput).into_result();
        assert!(matches!(failed, Err(PipelineError::EmptyInput)));

        let pending = PipelineState::Pending.into_result();
        assert!(matches!(pending, Err(PipelineError::InvalidTransition { .. })));
    }

    // ── Orchestrator ────────────────────────────────────────────────

    struct CountingSink {
        events: Mutex<Vec<FlagEvent>>,
        fail: bool,
    }

    impl CountingSink {
        fn new(fail: bool) -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait::async_trait]
    impl FlagSink for CountingSink {
        async fn record(&self, event: &FlagEvent) -> Result<(), FlagError> {
            self.events.lock().unwrap().push(event.clone());
            if self.fail {
                return Err(FlagError::Io(std::io::Error::other("disk full")));
            }
            Ok(())
        }
    }

    /// Returns a canned reply per stage, keyed on the request's stage tag.
    struct StageLlm {
        guardrail: String,
    }

    #[async_trait::async_trait]
    impl LlmProvider for StageLlm {
        fn model_name(&self) -> &str {
            "mock-stage"
        }

        async fn complete(
            &self,
            request: crate::llm::provider::CompletionRequest,
        ) -> Result<crate::llm::provider::CompletionResponse, crate::error::LlmError> {
            let content = match request.metadata.get("stage").map(String::as_str) {
                Some("guardrail") => self.guardrail.clone(),
                Some("classify") => "Inquiry".to_string(),
                Some("summarize") => "Asks about pricing. Wants a quote.".to_string(),
                _ => "Subject: Pricing\n\nHello,\n\nHere is our pricing.\n\nBest regards,\nSales"
                    .to_string(),
            };
            Ok(crate::llm::provider::CompletionResponse {
                content,
                input_tokens: 0,
                output_tokens: 0,
            })
        }
    }

    #[tokio::test]
    async fn blocked_email_is_flagged_once() {
        let llm: Arc<dyn LlmProvider> = Arc::new(StageLlm {
            guardrail: r#"{"is_safe": false, "categories": ["phishing"], "severity": "high", "reason": "fake login"}"#.into(),
        });
        let sink = Arc::new(CountingSink::new(false));
        let orchestrator = Orchestrator::new(llm, sink.clone());

        let email = EmailInput::new("Click here to verify your password");
        let result = orchestrator.process(&email).await.unwrap();
        assert!(result.is_blocked());

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].request_id, email.id);
        assert_eq!(events[0].email_text, email.text);
    }

    #[tokio::test]
    async fn sink_failure_keeps_block() {
        let llm: Arc<dyn LlmProvider> = Arc::new(StageLlm {
            guardrail: r#"{"is_safe": false, "categories": ["scam"], "severity": "medium"}"#.into(),
        });
        let orchestrator = Orchestrator::new(llm, Arc::new(CountingSink::new(true)));

        let result = orchestrator.process(&EmailInput::new("You won a prize!")).await.unwrap();
        assert!(result.is_blocked());
        assert_eq!(result.reason(), Some("Flagged as scam"));
    }

    #[tokio::test]
    async fn safe_email_completes() {
        let llm: Arc<dyn LlmProvider> = Arc::new(StageLlm {
            guardrail: r#"{"is_safe": true}"#.into(),
        });
        let sink = Arc::new(CountingSink::new(false));
        let orchestrator = Orchestrator::new(llm, sink.clone());

        let state = orchestrator.run(&EmailInput::new("How much does it cost?")).await;
        match state {
            PipelineState::Complete(email) => {
                assert_eq!(email.category, Category::Inquiry);
                assert_eq!(email.reply.subject, "Pricing");
                assert_eq!(email.reply.closing.as_deref(), Some("Best regards,\nSales"));
            }
            other => panic!("Expected Complete, got {:?}", other),
        }
        assert!(sink.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_email_fails_without_model_call() {
        let orchestrator = Orchestrator::new(Arc::new(FailingLlm), Arc::new(CountingSink::new(false)));
        let state = orchestrator.run(&EmailInput::new("   ")).await;
        assert!(matches!(state, PipelineState::Failed(PipelineError::EmptyInput)));
    }

    #[tokio::test]
    async fn guardrail_transport_error_fails() {
        let orchestrator = Orchestrator::new(Arc::new(FailingLlm), Arc::new(CountingSink::new(false)));
        let err = orchestrator.process(&EmailInput::new("Hello")).await.unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Guardrail));
        assert!(err.user_message().contains("Network error"));
    }

    #[tokio::test]
    async fn parallel_mode_matches_sequential() {
        let make = |parallel| {
            let llm: Arc<dyn LlmProvider> = Arc::new(StageLlm {
                guardrail: r#"{"is_safe": true}"#.into(),
            });
            Orchestrator::with_config(
                llm,
                Arc::new(CountingSink::new(false)),
                &PipelineConfig {
                    parallel_analysis: parallel,
                    ..PipelineConfig::default()
                },
            )
        };
        let email = EmailInput::new("What are your prices?");

        let sequential = make(false).process(&email).await.unwrap();
        let parallel = make(true).process(&email).await.unwrap();
        assert_eq!(sequential, parallel);
    }
}
