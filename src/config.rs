//! Configuration types.
//!
//! Everything is read from the environment:
//! - `EMAIL_ASSIST_BACKEND`: `openai` (default) or `anthropic`
//! - `OPENAI_API_KEY` / `ANTHROPIC_API_KEY`: key for the chosen backend
//! - `EMAIL_ASSIST_MODEL`: model name (backend default otherwise)
//! - `EMAIL_ASSIST_FLAG_DIR`: where blocked emails are recorded
//! - `EMAIL_ASSIST_PARALLEL`: classify and summarize concurrently
//! - `EMAIL_ASSIST_MAX_EMAIL_CHARS`: email characters per prompt

use std::path::PathBuf;

use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};
use crate::pipeline::guardrail::DEFAULT_MAX_EMAIL_CHARS;

/// Default directory for flag records.
pub const DEFAULT_FLAG_DIR: &str = "./flagged_emails";

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Issue classify and summarize concurrently.
    pub parallel_analysis: bool,
    /// Characters of email text sent to each stage.
    pub max_email_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parallel_analysis: false,
            max_email_chars: DEFAULT_MAX_EMAIL_CHARS,
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AssistConfig {
    pub llm: LlmConfig,
    pub flag_dir: PathBuf,
    pub pipeline: PipelineConfig,
}

impl AssistConfig {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match get("EMAIL_ASSIST_BACKEND") {
            Some(value) => value.parse::<LlmBackend>()?,
            None => LlmBackend::OpenAi,
        };

        let key_var = backend.api_key_var();
        let api_key = get(key_var).ok_or_else(|| ConfigError::MissingEnvVar(key_var.to_string()))?;

        let model = get("EMAIL_ASSIST_MODEL").unwrap_or_else(|| backend.default_model().to_string());

        let flag_dir = get("EMAIL_ASSIST_FLAG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_FLAG_DIR));

        let parallel_analysis = match get("EMAIL_ASSIST_PARALLEL") {
            Some(value) => parse_bool("EMAIL_ASSIST_PARALLEL", &value)?,
            None => false,
        };

        let max_email_chars = match get("EMAIL_ASSIST_MAX_EMAIL_CHARS") {
            Some(value) => match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "EMAIL_ASSIST_MAX_EMAIL_CHARS".to_string(),
                        message: format!("expected a positive integer, got '{value}'"),
                    });
                }
            },
            None => DEFAULT_MAX_EMAIL_CHARS,
        };

        Ok(Self {
            llm: LlmConfig {
                backend,
                api_key: secrecy::SecretString::from(api_key),
                model,
            },
            flag_dir,
            pipeline: PipelineConfig {
                parallel_analysis,
                max_email_chars,
            },
        })
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected a boolean, got '{other}'"),
        }),
    }
}
