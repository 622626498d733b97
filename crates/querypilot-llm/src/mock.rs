//! Scripted in-process provider for tests and offline runs.
//!
//! Replies are consumed in order; every request is recorded so tests can
//! assert on what the agent actually asked.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::{AssistantMessage, ChatProvider, ChatRequest, LlmError, ModelInfo};

#[derive(Debug, Clone)]
enum Scripted {
    Reply(AssistantMessage),
    Fail(LlmError),
}

#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ChatRequest>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait this long before answering each request (cancellable).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn reply(self, message: AssistantMessage) -> Self {
        self.script.lock().push_back(Scripted::Reply(message));
        self
    }

    pub fn reply_text(self, content: impl Into<String>) -> Self {
        self.reply(AssistantMessage::text(content))
    }

    /// Reply with `value` serialized as the message content.
    pub fn reply_json(self, value: Value) -> Self {
        self.reply(AssistantMessage::text(value.to_string()))
    }

    pub fn reply_tool_call(self, name: &str, arguments: Value) -> Self {
        self.reply(AssistantMessage::with_tool_call(name, arguments))
    }

    pub fn reply_function_call(self, name: &str, arguments: Value) -> Self {
        self.reply(AssistantMessage::with_function_call(name, arguments))
    }

    pub fn fail(self, error: LlmError) -> Self {
        self.script.lock().push_back(Scripted::Fail(error));
        self
    }

    /// Snapshot of every request received so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn chat(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<AssistantMessage, LlmError> {
        self.requests.lock().push(request);
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }

        if let Some(delay) = self.delay {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let next = self.script.lock().pop_front();
        match next {
            Some(Scripted::Reply(message)) => Ok(message),
            Some(Scripted::Fail(error)) => Err(error),
            None => Err(LlmError::Api("scripted provider has no replies left".to_string())),
        }
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: "scripted".to_string(),
            supports_json_mode: true,
            supports_tools: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatMessage;
    use serde_json::json;

    fn request(text: &str) -> ChatRequest {
        ChatRequest::new(vec![ChatMessage::user(text)])
    }

    #[tokio::test]
    async fn replies_in_order_and_records_requests() {
        let provider = ScriptedProvider::new()
            .reply_text("first")
            .reply_tool_call("execute_sql", json!({"sql": "SELECT 1"}))
            .fail(LlmError::RateLimited { retry_after_ms: 10 });
        let cancel = CancellationToken::new();

        let a = provider.chat(request("a"), &cancel).await.unwrap();
        assert_eq!(a.content_str(), "first");
        let b = provider.chat(request("b"), &cancel).await.unwrap();
        assert_eq!(b.tool_calls[0].function.name, "execute_sql");
        let c = provider.chat(request("c"), &cancel).await.unwrap_err();
        assert_eq!(c, LlmError::RateLimited { retry_after_ms: 10 });
        assert!(provider.chat(request("d"), &cancel).await.is_err());

        assert_eq!(provider.call_count(), 4);
        assert_eq!(provider.requests()[1].messages[0].content, "b");
        assert_eq!(provider.remaining(), 0);
    }

    #[tokio::test]
    async fn cancellation_interrupts_delay() {
        let provider = ScriptedProvider::new()
            .with_delay(Duration::from_secs(30))
            .reply_text("never");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = provider.chat(request("slow"), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(provider.remaining(), 1);
    }

    #[tokio::test]
    async fn already_cancelled_token_short_circuits() {
        let provider = ScriptedProvider::new().reply_text("unused");
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            provider.chat(request("x"), &cancel).await,
            Err(LlmError::Cancelled)
        );
        assert_eq!(provider.remaining(), 1);
    }
}
