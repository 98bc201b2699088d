//! Flagging sink for emails the guardrail blocked.
//!
//! The pipeline only needs `FlagSink::record`. `FileFlagSink` writes each
//! event as its own JSON file:
//! - `<dir>/flagged_<YYYYmmdd_HHMMSS>_<id8>.json`

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;
use uuid::Uuid;

use crate::error::FlagError;
use crate::pipeline::types::{EmailInput, GuardrailVerdict};

/// One blocked email. Re-submitting the same email yields a new event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagEvent {
    pub event_id: Uuid,
    /// Id of the request that was blocked.
    pub request_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub email_text: String,
    pub verdict: GuardrailVerdict,
}

impl FlagEvent {
    pub fn new(email: &EmailInput, verdict: GuardrailVerdict) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            request_id: email.id,
            timestamp: Utc::now(),
            email_text: email.text.clone(),
            verdict,
        }
    }
}

/// Somewhere blocked emails are recorded.
#[async_trait]
pub trait FlagSink: Send + Sync {
    async fn record(&self, event: &FlagEvent) -> Result<(), FlagError>;
}

/// Writes one JSON file per flag event under a directory.
pub struct FileFlagSink {
    dir: PathBuf,
}

impl FileFlagSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_stem(event: &FlagEvent) -> String {
        let id = event.event_id.simple().to_string();
        format!(
            "flagged_{}_{}",
            event.timestamp.format("%Y%m%d_%H%M%S"),
            &id[..8]
        )
    }

    /// Preferred file name for an event.
    pub fn file_name(event: &FlagEvent) -> String {
        format!("{}.json", Self::file_stem(event))
    }

    /// Write the event to a new file and return its path.
    ///
    /// Files are created with `create_new`; a taken name gets a `_<n>` suffix.
    pub async fn write(&self, event: &FlagEvent) -> Result<PathBuf, FlagError> {
        fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_string_pretty(event)?;
        let stem = Self::file_stem(event);

        let mut attempt = 1u32;
        loop {
            let name = if attempt == 1 {
                format!("{stem}.json")
            } else {
                format!("{stem}_{attempt}.json")
            };
            let path = self.dir.join(name);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(json.as_bytes()).await?;
                    file.flush().await?;
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[async_trait]
impl FlagSink for FileFlagSink {
    async fn record(&self, event: &FlagEvent) -> Result<(), FlagError> {
        let path = self.write(event).await?;
        info!(
            event_id = %event.event_id,
            request_id = %event.request_id,
            path = %path.display(),
            "Flagged email recorded"
        );
        Ok(())
    }
}
