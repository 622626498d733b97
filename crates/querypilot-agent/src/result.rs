//! The caller-facing outcome of one run.

use std::fmt;

use querypilot_sql::QueryArchetype;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ColumnInfo;
use crate::error::SkillError;

/// Closed set of run outcomes. Callers drive UI behavior from this alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    Success,
    NeedClarification,
    BudgetExceeded,
    PolicyDenied,
    ToolError,
    Cancelled,
    Unknown,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Success => "SUCCESS",
            StopReason::NeedClarification => "NEED_CLARIFICATION",
            StopReason::BudgetExceeded => "BUDGET_EXCEEDED",
            StopReason::PolicyDenied => "POLICY_DENIED",
            StopReason::ToolError => "TOOL_ERROR",
            StopReason::Cancelled => "CANCELLED",
            StopReason::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a successful skill execution produced, before the supervisor turns
/// it into a [`SkillResult`].
#[derive(Debug, Clone, PartialEq)]
pub struct SkillOutcome {
    pub tool: String,
    pub params: Value,
    /// Sanitized rows (JSON array of objects).
    pub rows: Value,
    pub row_count: usize,
    pub schema: Vec<ColumnInfo>,
    pub thought: Option<String>,
    pub query_type: Option<QueryArchetype>,
    pub llm_duration_ms: Option<u64>,
    pub query_duration_ms: Option<u64>,
    pub warnings: Vec<String>,
    pub repaired: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillResult {
    pub run_id: String,
    pub stop_reason: StopReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Vec<ColumnInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_type: Option<QueryArchetype>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clarifying_questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl SkillResult {
    fn empty(run_id: &str, stop_reason: StopReason, elapsed_ms: u64) -> Self {
        Self {
            run_id: run_id.to_string(),
            stop_reason,
            message: None,
            tool: None,
            params: None,
            result: None,
            schema: None,
            thought: None,
            query_type: None,
            llm_duration_ms: None,
            query_duration_ms: None,
            clarifying_questions: Vec::new(),
            warnings: Vec::new(),
            cancelled: false,
            elapsed_ms,
        }
    }

    pub fn success(run_id: &str, outcome: SkillOutcome, elapsed_ms: u64) -> Self {
        let mut result = Self::empty(run_id, StopReason::Success, elapsed_ms);
        result.message = Some(match outcome.row_count {
            1 => "Returned 1 row".to_string(),
            n => format!("Returned {n} rows"),
        });
        result.tool = Some(outcome.tool);
        result.params = Some(outcome.params);
        result.result = Some(outcome.rows);
        result.schema = Some(outcome.schema);
        result.thought = outcome.thought;
        result.query_type = outcome.query_type;
        result.llm_duration_ms = outcome.llm_duration_ms;
        result.query_duration_ms = outcome.query_duration_ms;
        result.warnings = outcome.warnings;
        result
    }

    /// A run that finished but took longer than its budget. The rows are
    /// kept; only the stop reason changes.
    pub fn over_budget(run_id: &str, outcome: SkillOutcome, elapsed_ms: u64, budget_ms: u64) -> Self {
        let mut result = Self::success(run_id, outcome, elapsed_ms);
        result.stop_reason = StopReason::BudgetExceeded;
        result.message = Some(format!(
            "Finished in {elapsed_ms}ms, over the {budget_ms}ms budget"
        ));
        result
    }

    pub fn from_error(run_id: &str, error: &SkillError, elapsed_ms: u64) -> Self {
        let mut result = Self::empty(run_id, error.stop_reason(), elapsed_ms);
        result.message = Some(error.user_message());
        if let SkillError::Clarification { questions, .. } = error {
            result.clarifying_questions = questions.clone();
        }
        if matches!(error, SkillError::Cancelled) {
            result.cancelled = true;
        }
        result
    }

    pub fn cancelled(run_id: &str, elapsed_ms: u64) -> Self {
        let mut result = Self::empty(run_id, StopReason::Cancelled, elapsed_ms);
        result.message = Some("The request was cancelled.".to_string());
        result.cancelled = true;
        result
    }

    /// The wall-clock budget fired before the run finished.
    pub fn timed_out(run_id: &str, elapsed_ms: u64, budget_ms: u64) -> Self {
        let mut result = Self::empty(run_id, StopReason::BudgetExceeded, elapsed_ms);
        result.message = Some(format!("Stopped after exceeding the {budget_ms}ms time budget"));
        result.cancelled = true;
        result
    }

    pub fn is_success(&self) -> bool {
        self.stop_reason == StopReason::Success
    }
}
