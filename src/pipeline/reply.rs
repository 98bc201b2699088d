//! Reply stage: drafts a reply from the email, its category and its summary,
//! then formats the draft into a `Reply`.
//!
//! Format step:
//! 1. Strip surrounding markdown fences
//! 2. Turn literal `\n` escapes into line breaks, trim line ends
//! 3. Split into subject / salutation / body / closing
//!
//! A draft without a `Subject:` line or without a body is a parse error.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::llm::provider::LlmProvider;
use crate::pipeline::guardrail::DEFAULT_MAX_EMAIL_CHARS;
use crate::pipeline::prompt::{PromptTemplate, clip_for_prompt, invoke};
use crate::pipeline::types::{Category, Reply, Stage, Summary};

const REPLY_PROMPT: PromptTemplate = PromptTemplate {
    stage: Stage::Reply,
    system: "You are a customer support reply writer. Draft a professional, contextually \
             appropriate reply to a business email.\n\n\
             Format the reply exactly like this:\n\
             Subject: <subject line>\n\n\
             <salutation>\n\n\
             <body paragraphs>\n\n\
             <closing>\n\n\
             Rules:\n\
             - Acknowledge the sender's message and address its specific content\n\
             - Follow the tone guidance you are given\n\
             - Provide next steps or solutions when applicable\n\
             - Do not invent order numbers, prices, or commitments not in the email\n\
             - Return only the reply, no additional commentary",
    user: "Category: {category}\n\
           Tone: {tone}\n\
           Summary: {summary}\n\n\
           Email:\n{email}",
    temperature: 0.4,
    max_tokens: 600,
};

static SUBJECT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[*_\s]*subject[*_\s]*:[*_\s]*(.*?)[*_\s]*$").unwrap());

static GREETING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(dear|hi|hello|hey|greetings|good (morning|afternoon|evening))\b[^,!?:]{0,40}[,!:]$",
    )
    .unwrap()
});

static SIGN_OFF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(best( regards| wishes)?|kind regards|warm regards|warmest regards|regards|sincerely|yours( truly| sincerely)?|many thanks|thanks( again)?|thank you|cheers|respectfully|all the best|with appreciation)[,!.]?$",
    )
    .unwrap()
});

/// Drafts a `Reply` for a classified, summarized email.
pub struct ReplyDrafter {
    llm: Arc<dyn LlmProvider>,
    max_email_chars: usize,
}

impl ReplyDrafter {
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

    pub async fn draft_reply(
        &self,
        email_text: &str,
        category: Category,
        summary: &Summary,
    ) -> Result<Reply, PipelineError> {
        let email = clip_for_prompt(Stage::Reply, email_text, self.max_email_chars);
        let raw = invoke(
            self.llm.as_ref(),
            &REPLY_PROMPT,
            &[
                ("category", category.label()),
                ("tone", category.tone_guidance()),
                ("summary", summary.as_str()),
                ("email", email),
            ],
        )
        .await?;

        let reply = parse_reply(&raw).map_err(|reason| {
            warn!(raw_response = %raw, error = %reason, "Failed to parse drafted reply");
            PipelineError::Parse {
                stage: Stage::Reply,
                reason,
            }
        })?;

        info!(
            subject = %reply.subject,
            has_salutation = reply.salutation.is_some(),
            has_closing = reply.closing.is_some(),
            "Reply drafted"
        );
        Ok(reply)
    }
}

// ── Formatting ──────────────────────────────────────────────────────

/// Clean up raw model output: fences, escaped newlines, trailing whitespace.
pub fn format_reply_text(raw: &str) -> String {
    let mut text = raw.trim();

    if text.starts_with("```") {
        // Drop the opening fence line (may carry a language tag).
        text = text.split_once('\n').map_or("", |(_, rest)| rest);
        text = text.trim_end();
        if let Some(stripped) = text.strip_suffix("```") {
            text = stripped;
        }
    }

    text.replace("\\n", "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Split formatted reply text into its parts.
fn parse_reply(raw: &str) -> Result<Reply, String> {
    let text = format_reply_text(raw);
    let lines: Vec<&str> = text.lines().collect();

    // Anything before the subject line is model chatter.
    let (subject_idx, subject) = lines
        .iter()
        .enumerate()
        .find_map(|(i, line)| {
            SUBJECT_LINE
                .captures(line)
                .map(|caps| (i, caps.get(1).map_or("", |m| m.as_str()).trim().to_string()))
        })
        .ok_or_else(|| "reply has no Subject: line".to_string())?;

    if subject.is_empty() {
        return Err("reply subject is empty".to_string());
    }

    let mut paragraphs = split_paragraphs(&lines[subject_idx + 1..]);

    // Salutation: first line of the first paragraph, if it is a greeting.
    let mut salutation = None;
    if let Some(first) = paragraphs.first_mut()
        && GREETING.is_match(first[0].trim())
    {
        salutation = Some(first.remove(0).trim().to_string());
        if first.is_empty() {
            paragraphs.remove(0);
        }
    }

    // Closing: from the first sign-off line in the last paragraph onwards.
    let mut closing = None;
    if let Some(last) = paragraphs.last_mut()
        && let Some(pos) = last.iter().position(|l| SIGN_OFF.is_match(l.trim()))
    {
        let tail: Vec<&str> = last.drain(pos..).collect();
        closing = Some(tail.join("\n"));
        if last.is_empty() {
            paragraphs.pop();
        }
    }

    let body = paragraphs
        .iter()
        .map(|p| p.join("\n"))
        .collect::<Vec<_>>()
        .join("\n\n");

    if body.trim().is_empty() {
        return Err("reply has no body".to_string());
    }

    Ok(Reply {
        subject,
        salutation,
        body,
        closing,
    })
}

/// Group lines into blank-line separated paragraphs.
fn split_paragraphs<'a>(lines: &[&'a str]) -> Vec<Vec<&'a str>> {
    let mut paragraphs = Vec::new();
    let mut current = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
        } else {
            current.push(*line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    paragraphs
}
