//! HTTP provider for OpenAI-compatible chat-completion endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::{AssistantMessage, ChatProvider, ChatRequest, LlmConfig, LlmError, ModelInfo};

pub struct OpenAiCompatClient {
    client: Client,
    config: LlmConfig,
}

impl OpenAiCompatClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, LlmError> {
        let config = LlmConfig::from_env().map_err(|e| LlmError::NotConfigured(e.to_string()))?;
        Self::new(config)
    }

    async fn send(&self, request: &ChatRequest) -> Result<AssistantMessage, LlmError> {
        let url = self.config.chat_completions_url();
        let body = request.to_openai_body(&self.config.model);

        tracing::debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "chat completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if response.status() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited {
                retry_after_ms: retry_after * 1000,
            });
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!(
                "{status}: {}",
                crate::truncate_preview(&error_text, 400)
            )));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| self.transport_error(e))?;
        AssistantMessage::from_openai_response(&data)
    }

    fn transport_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout {
                after_ms: self.config.timeout_secs * 1000,
            }
        } else if e.is_decode() {
            LlmError::InvalidResponse(e.to_string())
        } else {
            LlmError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiCompatClient {
    async fn chat(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<AssistantMessage, LlmError> {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        // Dropping the in-flight future aborts the HTTP request.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LlmError::Cancelled),
            result = self.send(&request) => result,
        }
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.config.model.clone(),
            supports_json_mode: true,
            supports_tools: true,
        }
    }
}
