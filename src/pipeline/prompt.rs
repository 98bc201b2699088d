//! Prompt templates and the single backend call every stage goes through.

use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::Stage;

/// Metadata key carrying the stage name on every request.
pub const STAGE_METADATA_KEY: &str = "stage";

/// A stage prompt with `{field}` placeholders in the user half.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub stage: Stage,
    pub system: &'static str,
    pub user: &'static str,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl PromptTemplate {
    /// Substitute `{name}` placeholders. Unknown placeholders are left as-is;
    /// substituted values are never re-scanned.
    pub fn render_user(&self, fields: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(self.user.len() + 256);
        let mut rest = self.user;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => {
                    let name = &after[..close];
                    match fields.iter().find(|(key, _)| *key == name) {
                        Some((_, value)) => out.push_str(value),
                        None => {
                            out.push('{');
                            out.push_str(name);
                            out.push('}');
                        }
                    }
                    rest = &after[close + 1..];
                }
                None => {
                    out.push_str(&rest[open..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// Build the completion request for this template.
    pub fn request(&self, fields: &[(&str, &str)]) -> CompletionRequest {
        CompletionRequest::new(vec![
            ChatMessage::system(self.system),
            ChatMessage::user(self.render_user(fields)),
        ])
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens)
        .with_metadata(STAGE_METADATA_KEY, self.stage.label())
    }
}

/// Render `template` with `fields`, call the backend, and return the raw text.
///
/// Backend failures come back as `PipelineError::Transport` for the template's stage.
pub async fn invoke(
    llm: &dyn LlmProvider,
    template: &PromptTemplate,
    fields: &[(&str, &str)],
) -> Result<String, PipelineError> {
    let stage = template.stage;
    let request = template.request(fields);

    let response = llm
        .complete(request)
        .await
        .map_err(|source| PipelineError::Transport { stage, source })?;

    debug!(
        stage = %stage,
        model = llm.model_name(),
        input_tokens = response.input_tokens,
        output_tokens = response.output_tokens,
        "Stage call completed"
    );

    Ok(response.content)
}

/// Truncate email text to `max_chars` characters for prompting.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// `truncate_chars` for a stage prompt. Every cut is logged.
pub fn clip_for_prompt(stage: Stage, text: &str, max_chars: usize) -> &str {
    let clipped = truncate_chars(text, max_chars);
    if clipped.len() < text.len() {
        warn!(
            stage = %stage,
            chars = text.chars().count(),
            max_chars,
            "Email truncated for prompt"
        );
    }
    clipped
}

/// Split text into windows of at most `max_chars` characters that together
/// cover all of it. Each window starts `overlap` characters before the
/// previous one ended, so content across a boundary appears whole in one window.
pub fn chunk_chars(text: &str, max_chars: usize, overlap: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let step = max_chars.saturating_sub(overlap).max(1);

    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(idx, _)| idx)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = bounds.len() - 1;
    if char_count <= max_chars {
        return vec![text];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + max_chars).min(char_count);
        chunks.push(&text[bounds[start]..bounds[end]]);
        if end == char_count {
            break;
        }
        start += step;
    }
    chunks
}

/// Extract a JSON object from LLM output (handles markdown wrapping).
pub fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    // Already a JSON object
    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    // Wrapped in markdown code block
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    // Try to find object bounds
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
