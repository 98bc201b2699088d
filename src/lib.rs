//! Email Assist: guarded LLM pipeline that classifies, summarizes and drafts replies.

pub mod config;
pub mod error;
pub mod flagging;
pub mod llm;
pub mod pipeline;
pub mod samples;
