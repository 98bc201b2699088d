//! Mock LLM providers shared by the pipeline unit tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};

/// Returns the same text for every call and records each request.
pub(crate) struct FixedLlm {
    response: String,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl FixedLlm {
    pub(crate) fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// User message of the most recent request.
    pub(crate) fn last_user_prompt(&self) -> String {
        let requests = self.requests.lock().unwrap();
        let request = requests.last().expect("no request recorded");
        request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    pub(crate) fn last_system_prompt(&self) -> String {
        let requests = self.requests.lock().unwrap();
        let request = requests.last().expect("no request recorded");
        request.system_prompt().unwrap_or_default()
    }
}

#[async_trait]
impl LlmProvider for FixedLlm {
    fn model_name(&self) -> &str {
        "mock-fixed"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(request);
        Ok(CompletionResponse {
            content: self.response.clone(),
            input_tokens: 100,
            output_tokens: 50,
        })
    }
}

/// Fails every call with a network-style error.
pub(crate) struct FailingLlm;

#[async_trait]
impl LlmProvider for FailingLlm {
    fn model_name(&self) -> &str {
        "mock-failing"
    }

    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        Err(LlmError::RequestFailed {
            provider: "mock".into(),
            reason: "connection refused".into(),
        })
    }
}
