//! Query rewriter: one structured model call that turns the question into an
//! intent/risk directive.
//!
//! Any failure short of cancellation degrades to [`RewriteResult::fallback`].
//! A directive with `need_clarification` set is a hard stop for the run.

use querypilot_llm::{parse_llm_json_object, ChatMessage, ChatProvider, ChatRequest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::SkillError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    DataQna,
    Profiling,
    SqlDebug,
    Workflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFlag {
    AmbiguousColumn,
    MultiplePossibleTables,
    TimeRangeMissing,
    NeedsSchemaDiscovery,
    #[serde(other)]
    Unknown,
}

/// `"auto"` or an explicit list of tables.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TableScope {
    #[default]
    Auto,
    Tables(Vec<String>),
}

impl TableScope {
    pub fn tables(&self) -> &[String] {
        match self {
            TableScope::Auto => &[],
            TableScope::Tables(t) => t,
        }
    }
}

impl Serialize for TableScope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TableScope::Auto => serializer.serialize_str("auto"),
            TableScope::Tables(t) => t.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for TableScope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::Array(items) => {
                let tables: Vec<String> = items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect();
                if tables.is_empty() {
                    TableScope::Auto
                } else {
                    TableScope::Tables(tables)
                }
            }
            Value::String(s) if !s.trim().eq_ignore_ascii_case("auto") && !s.trim().is_empty() => {
                TableScope::Tables(vec![s.trim().to_string()])
            }
            _ => TableScope::Auto,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewriteResult {
    pub task_type: TaskType,
    pub table_scope: TableScope,
    pub confidence: f64,
    #[serde(default)]
    pub risk_flags: Vec<RiskFlag>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    pub need_clarification: bool,
    #[serde(default)]
    pub clarifying_questions: Vec<String>,
}

impl RewriteResult {
    /// The safe default used whenever the model's directive is unusable.
    pub fn fallback() -> Self {
        Self {
            task_type: TaskType::DataQna,
            table_scope: TableScope::Auto,
            confidence: 0.5,
            risk_flags: vec![RiskFlag::Unknown],
            assumptions: Vec::new(),
            need_clarification: false,
            clarifying_questions: Vec::new(),
        }
    }

    /// Parse model text. `None` on any missing required field.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parsed: Self = parse_llm_json_object(text).ok()?;
        if !parsed.confidence.is_finite() {
            return None;
        }
        parsed.confidence = parsed.confidence.clamp(0.0, 1.0);
        parsed.risk_flags.sort();
        parsed.risk_flags.dedup();
        parsed.clarifying_questions.retain(|q| !q.trim().is_empty());
        if parsed.need_clarification && parsed.clarifying_questions.is_empty() {
            parsed
                .clarifying_questions
                .push("Could you say more precisely what you want to know?".to_string());
        }
        Some(parsed)
    }
}

const REWRITE_SYSTEM_PROMPT: &str = r#"You prepare data questions for a read-only SQL analyst.
Read the user's question and the schema, then return ONLY one JSON object:
{
  "taskType": "data_qna" | "profiling" | "sql_debug" | "workflow",
  "tableScope": "auto" | ["table", ...],
  "confidence": 0.0-1.0,
  "riskFlags": ["ambiguous_column" | "multiple_possible_tables" | "time_range_missing" | "needs_schema_discovery" | "unknown"],
  "assumptions": ["..."],
  "needClarification": true | false,
  "clarifyingQuestions": ["..."]
}
Set needClarification only when the question cannot be answered from the schema without asking the user."#;

pub async fn rewrite_query(
    provider: Option<&dyn ChatProvider>,
    user_input: &str,
    schema_digest: &str,
    cancel: &CancellationToken,
) -> Result<RewriteResult, SkillError> {
    let Some(provider) = provider else {
        return Ok(RewriteResult::fallback());
    };

    let request = ChatRequest::new(vec![
        ChatMessage::system(REWRITE_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Schema:\n{schema_digest}\n\nQuestion: {user_input}"
        )),
    ])
    .json_mode()
    .with_temperature(0.0);

    let reply = match provider.chat(request, cancel).await {
        Ok(reply) => reply,
        Err(e) if e.is_cancelled() => return Err(SkillError::Cancelled),
        Err(e) => {
            tracing::warn!(error = %e, "rewrite call failed; using default directive");
            return Ok(RewriteResult::fallback());
        }
    };

    Ok(RewriteResult::parse(reply.content_str()).unwrap_or_else(|| {
        tracing::warn!("rewrite reply was not a usable directive; using default");
        RewriteResult::fallback()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use querypilot_llm::{LlmError, ScriptedProvider};
    use serde_json::json;

    #[test]
    fn parses_full_directive() {
        let text = json!({
            "taskType": "data_qna",
            "tableScope": ["orders"],
            "confidence": 1.4,
            "riskFlags": ["time_range_missing", "made_up_flag", "time_range_missing"],
            "assumptions": ["last 30 days"],
            "needClarification": false,
            "clarifyingQuestions": []
        })
        .to_string();
        let r = RewriteResult::parse(&text).unwrap();
        assert_eq!(r.table_scope, TableScope::Tables(vec!["orders".into()]));
        assert_eq!(r.confidence, 1.0);
        assert_eq!(r.risk_flags, vec![RiskFlag::TimeRangeMissing, RiskFlag::Unknown]);
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let text = json!({"taskType": "data_qna", "tableScope": "auto"}).to_string();
        assert!(RewriteResult::parse(&text).is_none());
        assert!(RewriteResult::parse("sure, happy to help").is_none());
    }

    #[test]
    fn clarification_without_questions_gets_a_generic_one() {
        let text = r#"Result: {"taskType":"data_qna","tableScope":"auto","confidence":0.2,"needClarification":true}"#;
        let r = RewriteResult::parse(text).unwrap();
        assert!(r.need_clarification);
        assert_eq!(r.clarifying_questions.len(), 1);
    }

    #[tokio::test]
    async fn failures_fall_back_but_cancellation_propagates() {
        let cancel = CancellationToken::new();
        let provider = ScriptedProvider::new()
            .reply_text("not json")
            .fail(LlmError::Network("reset".into()))
            .fail(LlmError::Cancelled);

        for _ in 0..2 {
            let r = rewrite_query(Some(&provider), "q", "", &cancel).await.unwrap();
            assert_eq!(r, RewriteResult::fallback());
        }
        assert_eq!(
            rewrite_query(Some(&provider), "q", "", &cancel).await,
            Err(SkillError::Cancelled)
        );
    }

    #[tokio::test]
    async fn no_provider_means_default_directive() {
        let r = rewrite_query(None, "q", "", &CancellationToken::new()).await.unwrap();
        assert_eq!(r.risk_flags, vec![RiskFlag::Unknown]);
        assert_eq!(r.task_type, TaskType::DataQna);
    }
}
