//! Bridges rig-core's `CompletionModel` to our `LlmProvider` trait.

use async_trait::async_trait;
use rig::completion::{AssistantContent, CompletionModel, Message};

use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, Role,
};

/// Adapter wrapping any rig completion model.
pub struct RigAdapter<M> {
    model: M,
    model_name: String,
    provider: &'static str,
}

impl<M> RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    pub fn new(model: M, model_name: &str, provider: &'static str) -> Self {
        Self {
            model,
            model_name: model_name.to_string(),
            provider,
        }
    }
}

#[async_trait]
impl<M> LlmProvider for RigAdapter<M>
where
    M: CompletionModel + Send + Sync + 'static,
{
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let preamble = request.system_prompt();
        let mut history: Vec<Message> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(to_rig_message)
            .collect();

        // rig takes the final turn as the prompt and everything before it as history.
        let prompt = history.pop().ok_or_else(|| LlmError::RequestFailed {
            provider: self.provider.to_string(),
            reason: "request has no user or assistant message".to_string(),
        })?;

        let mut builder = self.model.completion_request(prompt).messages(history);
        if let Some(preamble) = preamble {
            builder = builder.preamble(preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(f64::from(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(u64::from(max_tokens));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_error(self.provider, &self.model_name, &e.to_string()))?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text(text) => Some(text.text.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        // Empty text is still an answer; each stage's parser decides what it means.
        if content.trim().is_empty() {
            tracing::debug!(
                provider = self.provider,
                model = %self.model_name,
                "Model returned no text"
            );
        }

        Ok(CompletionResponse {
            content,
            input_tokens: saturate(response.usage.input_tokens),
            output_tokens: saturate(response.usage.output_tokens),
        })
    }
}

fn to_rig_message(message: &ChatMessage) -> Message {
    match message.role {
        Role::Assistant => Message::assistant(message.content.clone()),
        Role::User | Role::System => Message::user(message.content.clone()),
    }
}

fn saturate(tokens: u64) -> u32 {
    u32::try_from(tokens).unwrap_or(u32::MAX)
}

/// Map a provider error string onto our error kinds.
///
/// rig flattens HTTP status into the message, so this goes by content.
pub(crate) fn classify_error(provider: &str, model: &str, message: &str) -> LlmError {
    let lower = message.to_lowercase();
    if lower.contains("401")
        || lower.contains("unauthorized")
        || lower.contains("api key")
        || lower.contains("api_key")
        || lower.contains("authentication")
    {
        LlmError::AuthFailed {
            provider: provider.to_string(),
        }
    } else if lower.contains("429") || lower.contains("rate limit") || lower.contains("rate_limit")
    {
        LlmError::RateLimited {
            provider: provider.to_string(),
            retry_after: None,
        }
    } else if lower.contains("model")
        && (lower.contains("not found") || lower.contains("does not exist"))
    {
        LlmError::ModelNotAvailable {
            provider: provider.to_string(),
            model: model.to_string(),
        }
    } else {
        LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: message.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_auth_errors() {
        let err = classify_error("openai", "test-model", "HTTP 401: Incorrect API key provided");
        assert!(matches!(err, LlmError::AuthFailed { .. }));
    }

    #[test]
    fn classify_rate_limit_errors() {
        let err = classify_error(
            "anthropic",
            "test-model",
            "ProviderError: 429 Too Many Requests (rate limit)",
        );
        assert!(matches!(err, LlmError::RateLimited { .. }));
    }

    #[test]
    fn classify_network_errors() {
        let err = classify_error(
            "openai",
            "test-model",
            "error sending request: connection refused",
        );
        match err {
            LlmError::RequestFailed { provider, reason } => {
                assert_eq!(provider, "openai");
                assert!(reason.contains("connection refused"));
            }
            other => panic!("Expected RequestFailed, got {:?}", other),
        }
    }

    #[test]
    fn classify_missing_model() {
        let err = classify_error("openai", "gpt-9", "The model `gpt-9` was not found");
        match err {
            LlmError::ModelNotAvailable { provider, model } => {
                assert_eq!(provider, "openai");
                assert_eq!(model, "gpt-9");
            }
            other => panic!("Expected ModelNotAvailable, got {:?}", other),
        }
        let err = classify_error("openai", "gpt-9", "The model `gpt-9` does not exist");
        assert!(matches!(err, LlmError::ModelNotAvailable { .. }));
    }

    #[test]
    fn saturate_clamps() {
        assert_eq!(saturate(12), 12);
        assert_eq!(saturate(u64::MAX), u32::MAX);
    }
}
