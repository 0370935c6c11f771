//! AI sampling boundary.
//!
//! Prompt execution is a host capability. The server only knows the
//! round-trip shape; when no client is wired in, AI tools fail with a
//! deterministic "sampling unavailable" envelope.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error text every AI tool surfaces when the host offers no sampling.
pub const SAMPLING_UNAVAILABLE: &str =
    "sampling unavailable: the connected client does not support AI sampling";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

impl PromptMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingReply {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Value>,
}

/// Opaque `(prompt messages) -> text` call exposed by the host.
#[async_trait]
pub trait SamplingClient: Send + Sync {
    async fn create_message(&self, messages: &[PromptMessage]) -> anyhow::Result<SamplingReply>;
}
