//! Shared types for the email processing pipeline.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Input ───────────────────────────────────────────────────────────

/// One submitted email: subject and body as free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailInput {
    /// Per-request id, used in log spans and flag records.
    pub id: Uuid,
    /// Raw email text.
    pub text: String,
}

impl EmailInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

// ── Stages ──────────────────────────────────────────────────────────

/// One prompt-and-parse unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Guardrail,
    Classify,
    Summarize,
    Reply,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Guardrail => "guardrail",
            Self::Classify => "classify",
            Self::Summarize => "summarize",
            Self::Reply => "reply",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Guardrail verdict ───────────────────────────────────────────────

/// Kinds of unsafe content the guardrail can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SafetyCategory {
    Hate,
    Violence,
    Sexual,
    SelfHarm,
    Phishing,
    Scam,
    Harassment,
    Spam,
}

impl SafetyCategory {
    pub const ALL: [SafetyCategory; 8] = [
        Self::Hate,
        Self::Violence,
        Self::Sexual,
        Self::SelfHarm,
        Self::Phishing,
        Self::Scam,
        Self::Harassment,
        Self::Spam,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Hate => "hate",
            Self::Violence => "violence",
            Self::Sexual => "sexual",
            Self::SelfHarm => "self-harm",
            Self::Phishing => "phishing",
            Self::Scam => "scam",
            Self::Harassment => "harassment",
            Self::Spam => "spam",
        }
    }

    /// Lenient lookup: accepts `self-harm`, `self_harm`, `Self Harm`.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized: String = label
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == '_' || c == ' ' { '-' } else { c })
            .collect();
        Self::ALL.into_iter().find(|c| c.label() == normalized)
    }
}

impl fmt::Display for SafetyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How serious a guardrail finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "moderate" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Safety judgment for one email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailVerdict {
    pub is_safe: bool,
    pub categories: BTreeSet<SafetyCategory>,
    /// `None` means unspecified.
    pub severity: Option<Severity>,
    pub reason: String,
}

impl GuardrailVerdict {
    /// Verdict for content that needs no check (e.g. empty text).
    pub fn safe(reason: impl Into<String>) -> Self {
        Self {
            is_safe: true,
            categories: BTreeSet::new(),
            severity: None,
            reason: reason.into(),
        }
    }

    /// Fail-closed verdict used when the guardrail's answer cannot be read.
    pub fn undetermined(reason: impl Into<String>) -> Self {
        Self {
            is_safe: false,
            categories: BTreeSet::new(),
            severity: None,
            reason: reason.into(),
        }
    }

    /// Comma-separated category labels, or "unspecified".
    pub fn category_list(&self) -> String {
        if self.categories.is_empty() {
            "unspecified".to_string()
        } else {
            self.categories
                .iter()
                .map(SafetyCategory::label)
                .collect::<Vec<_>>()
                .join(", ")
        }
    }

    pub fn severity_label(&self) -> &'static str {
        self.severity.as_ref().map_or("unspecified", Severity::label)
    }
}

// ── Classification ──────────────────────────────────────────────────

/// Business category of an email. Exactly one per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Inquiry,
    Complaint,
    Feedback,
    Other,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Self::Inquiry,
        Self::Complaint,
        Self::Feedback,
        Self::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Inquiry => "Inquiry",
            Self::Complaint => "Complaint",
            Self::Feedback => "Feedback",
            Self::Other => "Other",
        }
    }

    /// Exact, case-insensitive label match.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(label))
    }

    /// Tone instruction handed to the reply prompt.
    pub fn tone_guidance(&self) -> &'static str {
        match self {
            Self::Inquiry => {
                "Be helpful and informative. Answer what can be answered and say what happens next."
            }
            Self::Complaint => {
                "Open with a sincere apology, acknowledge the specific problem, and commit to concrete next steps."
            }
            Self::Feedback => {
                "Thank the sender warmly for the feedback and say how it will be used."
            }
            Self::Other => "Keep a neutral, courteous tone and acknowledge the message.",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Summary ─────────────────────────────────────────────────────────

/// Short summary of an email (two sentences by instruction, not enforced).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary(pub String);

impl Summary {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Reply ───────────────────────────────────────────────────────────

/// Drafted reply, split into its parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub subject: String,
    pub salutation: Option<String>,
    pub body: String,
    pub closing: Option<String>,
}

impl Reply {
    /// Full reply text with line breaks preserved.
    pub fn render(&self) -> String {
        let mut parts = vec![format!("Subject: {}", self.subject)];
        if let Some(ref salutation) = self.salutation {
            parts.push(salutation.clone());
        }
        parts.push(self.body.clone());
        if let Some(ref closing) = self.closing {
            parts.push(closing.clone());
        }
        parts.join("\n\n")
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

// ── Result ──────────────────────────────────────────────────────────

/// Outcome of a fully processed, safe email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEmail {
    pub category: Category,
    pub summary: Summary,
    pub reply: Reply,
}

/// What the caller gets back for one email: a complete triple or a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessingResult {
    Complete(ProcessedEmail),
    Blocked { verdict: GuardrailVerdict },
}

impl ProcessingResult {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    pub fn category(&self) -> Option<Category> {
        match self {
            Self::Complete(email) => Some(email.category),
            Self::Blocked { .. } => None,
        }
    }

    pub fn reply(&self) -> Option<&Reply> {
        match self {
            Self::Complete(email) => Some(&email.reply),
            Self::Blocked { .. } => None,
        }
    }

    /// Guardrail reason when blocked.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Complete(_) => None,
            Self::Blocked { verdict } => Some(&verdict.reason),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Complete(_) => "complete",
            Self::Blocked { .. } => "blocked",
        }
    }
}

impl fmt::Display for ProcessingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete(email) => {
                writeln!(f, "Category: {}", email.category)?;
                writeln!(f, "Summary: {}", email.summary)?;
                writeln!(f, "Reply:")?;
                write!(f, "{}", email.reply.render())
            }
            Self::Blocked { verdict } => {
                writeln!(f, "This email was blocked by the safety check.")?;
                writeln!(f, "Categories: {}", verdict.category_list())?;
                writeln!(f, "Severity: {}", verdict.severity_label())?;
                write!(f, "Reason: {}", verdict.reason)
            }
        }
    }
}
