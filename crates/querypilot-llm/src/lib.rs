//! Chat-completion plumbing for Querypilot
//!
//! The agent only ever talks to a model through [`ChatProvider`]:
//!
//! ```text
//! ┌────────────────┐  ChatRequest   ┌──────────────────────────┐
//! │ querypilot-    │ ─────────────▶ │ ChatProvider             │
//! │ agent          │                │  • OpenAiCompatClient    │
//! │                │ ◀───────────── │  • mock::ScriptedProvider│
//! └────────────────┘ AssistantMessage└──────────────────────────┘
//! ```
//!
//! Every call takes a [`CancellationToken`]; providers must resolve promptly
//! with [`LlmError::Cancelled`] once it fires instead of waiting for the
//! network round-trip to finish.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub mod chat;
pub mod config;
pub mod json;
pub mod mock;
#[cfg(feature = "openai")]
pub mod providers;

pub use chat::{AssistantMessage, ChatMessage, ChatRequest, FunctionCall, Role, ToolCall, ToolSpec};
pub use config::{env_flag, env_number, ConfigError, LlmConfig};
pub use json::{parse_llm_json_object, truncate_preview};
pub use mock::ScriptedProvider;
#[cfg(feature = "openai")]
pub use providers::OpenAiCompatClient;

// ============================================================================
// Provider Interface
// ============================================================================

/// An OpenAI-compatible chat-completion backend.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Run one completion and return `choices[0].message`.
    async fn chat(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<AssistantMessage, LlmError>;

    fn model_info(&self) -> ModelInfo;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: String,
    pub supports_json_mode: bool,
    pub supports_tools: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Parsing error: {0}")]
    ParseError(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("LLM request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },
    #[error("LLM request cancelled")]
    Cancelled,
    #[error("LLM not configured: {0}")]
    NotConfigured(String),
}

impl LlmError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LlmError::Cancelled)
    }
}
