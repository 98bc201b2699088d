//! Error types for Email Assist.

use std::time::Duration;

use crate::pipeline::types::{GuardrailVerdict, Stage};

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Model {model} not available on provider {provider}")]
    ModelNotAvailable { provider: String, model: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },
}

/// Pipeline errors. Every variant is terminal for the request.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Email content cannot be empty")]
    EmptyInput,

    #[error("{stage} call failed: {source}")]
    Transport {
        stage: Stage,
        #[source]
        source: LlmError,
    },

    #[error("{stage} response could not be parsed: {reason}")]
    Parse { stage: Stage, reason: String },

    /// The guardrail answered but its verdict could not be read. Carries the
    /// fail-closed verdict so callers never treat the content as safe.
    #[error("Guardrail verdict undetermined: {reason}")]
    GuardrailUndetermined {
        verdict: Box<GuardrailVerdict>,
        reason: String,
    },

    #[error("Invalid pipeline transition from {from} on {outcome}")]
    InvalidTransition { from: String, outcome: String },
}

impl PipelineError {
    /// The stage that raised this error, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Transport { stage, .. } | Self::Parse { stage, .. } => Some(*stage),
            Self::GuardrailUndetermined { .. } => Some(Stage::Guardrail),
            Self::EmptyInput | Self::InvalidTransition { .. } => None,
        }
    }

    /// Single message suitable for showing to the person who submitted the email.
    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyInput => {
                "Email content cannot be empty. Please provide the email text to process."
                    .to_string()
            }
            Self::Transport { source, .. } => match source {
                LlmError::AuthFailed { .. } => {
                    "Invalid API key. Please check your API key and try again.".to_string()
                }
                LlmError::RateLimited { .. } => {
                    "Rate limit exceeded. Please wait a moment and try again.".to_string()
                }
                LlmError::RequestFailed { .. } => {
                    "Network error. Please check your internet connection and try again."
                        .to_string()
                }
                other => format!("An error occurred while processing the email: {other}"),
            },
            other => format!("An error occurred while processing the email: {other}"),
        }
    }
}

/// Flagging sink errors.
#[derive(Debug, thiserror::Error)]
pub enum FlagError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
