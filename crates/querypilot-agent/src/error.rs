//! Typed failures for one agent run.
//!
//! Each failure is categorized where it is raised. The supervisor maps
//! categories onto [`StopReason`]s through [`SkillError::stop_reason`] and
//! never inspects message text.

use std::sync::OnceLock;

use querypilot_llm::LlmError;
use querypilot_sql::PolicyError;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::result::StopReason;

// ============================================================================
// Engine errors
// ============================================================================

/// What kind of engine failure this was, decided once from the engine's
/// message when the error is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineErrorKind {
    MissingColumn { column: String },
    /// `TIMESTAMP WITH TIME ZONE - INTERVAL` style binder failures.
    IntervalBinder,
    Syntax,
    Other,
}

impl EngineErrorKind {
    pub fn infer(message: &str) -> Self {
        if let Some(caps) = missing_column_re().captures(message) {
            let column = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            return EngineErrorKind::MissingColumn { column };
        }
        if interval_binder_re().is_match(message) {
            return EngineErrorKind::IntervalBinder;
        }
        if syntax_re().is_match(message) {
            return EngineErrorKind::Syntax;
        }
        EngineErrorKind::Other
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineErrorKind::MissingColumn { .. } => "missing_column",
            EngineErrorKind::IntervalBinder => "interval_binder",
            EngineErrorKind::Syntax => "syntax",
            EngineErrorKind::Other => "other",
        }
    }
}

fn missing_column_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)column\s+(?:"([^"]+)"|([\p{L}\p{N}_.$]+))\s+(?:not\s+found|does\s+not\s+exist)"#,
        )
        .expect("missing column pattern is valid")
    })
}

fn interval_binder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?is)(?:no function matches|cannot (?:subtract|compare|apply)).*(?:TIMESTAMP WITH TIME ZONE|TIMESTAMPTZ|DATE).*INTERVAL",
        )
        .expect("interval binder pattern is valid")
    })
}

fn syntax_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)syntax error|parser error").expect("syntax pattern is valid")
    })
}

/// A failure reported by the query execution callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub message: String,
}

impl EngineError {
    /// Classify `message` and wrap it. Executors call this at the throw site.
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: EngineErrorKind::infer(&message),
            message,
        }
    }

    pub fn with_kind(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

// ============================================================================
// Skill errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SkillError {
    #[error("Need clarification: {message}")]
    Clarification {
        message: String,
        questions: Vec<String>,
    },
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("Query failed: {0}")]
    Engine(#[from] EngineError),
    #[error("Model output could not be used: {0}")]
    ModelOutput(String),
    #[error("The model could not answer: {0}")]
    CannotAnswer(String),
    #[error("Language model error: {0}")]
    Llm(LlmError),
    #[error("Run cancelled")]
    Cancelled,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<LlmError> for SkillError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Cancelled => SkillError::Cancelled,
            other => SkillError::Llm(other),
        }
    }
}

impl SkillError {
    pub fn clarification(message: impl Into<String>) -> Self {
        let message = message.into();
        SkillError::Clarification {
            questions: vec![message.clone()],
            message,
        }
    }

    pub fn stop_reason(&self) -> StopReason {
        match self {
            SkillError::Clarification { .. } => StopReason::NeedClarification,
            SkillError::Policy(_) => StopReason::PolicyDenied,
            SkillError::Engine(_)
            | SkillError::ModelOutput(_)
            | SkillError::CannotAnswer(_)
            | SkillError::Llm(_) => StopReason::ToolError,
            SkillError::Cancelled => StopReason::Cancelled,
            SkillError::Internal(_) => StopReason::Unknown,
        }
    }

    /// Short, row-free category name for telemetry.
    pub fn category(&self) -> &'static str {
        match self {
            SkillError::Clarification { .. } => "clarification",
            SkillError::Policy(_) => "policy",
            SkillError::Engine(e) => e.kind.as_str(),
            SkillError::ModelOutput(_) => "model_output",
            SkillError::CannotAnswer(_) => "cannot_answer",
            SkillError::Llm(LlmError::Timeout { .. }) => "llm_timeout",
            SkillError::Llm(_) => "llm",
            SkillError::Cancelled => "cancelled",
            SkillError::Internal(_) => "internal",
        }
    }

    /// Text safe to show the user: no SQL, and engine detail only when it
    /// names a missing column.
    pub fn user_message(&self) -> String {
        match self {
            SkillError::Clarification { message, .. } => message.clone(),
            SkillError::Policy(e) => format!(
                "Policy denied [{}]: the generated query is not allowed.",
                e.reason
            ),
            SkillError::Engine(e) => match &e.kind {
                EngineErrorKind::MissingColumn { column } => {
                    format!("The query referenced a column that does not exist: {column}")
                }
                EngineErrorKind::Syntax => "The generated query had a syntax error.".to_string(),
                EngineErrorKind::IntervalBinder => {
                    "The generated query used unsupported date arithmetic.".to_string()
                }
                EngineErrorKind::Other => "The query could not be executed.".to_string(),
            },
            SkillError::ModelOutput(reason) | SkillError::CannotAnswer(reason) => reason.clone(),
            SkillError::Llm(LlmError::Timeout { .. }) => {
                "The language model did not respond in time.".to_string()
            }
            SkillError::Llm(_) => "The language model request failed.".to_string(),
            SkillError::Cancelled => "The request was cancelled.".to_string(),
            SkillError::Internal(_) => "Something went wrong while answering.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use querypilot_sql::{validate_sql, SqlPolicy};

    #[test]
    fn infers_missing_column() {
        let e = EngineError::new(
            "Binder Error: Referenced column \"amout\" not found in FROM clause!\nCandidate bindings: \"amount\"",
        );
        assert_eq!(
            e.kind,
            EngineErrorKind::MissingColumn {
                column: "amout".into()
            }
        );

        let e = EngineError::new("ERROR: column order_total does not exist");
        assert_eq!(
            e.kind,
            EngineErrorKind::MissingColumn {
                column: "order_total".into()
            }
        );
    }

    #[test]
    fn infers_interval_binder_and_syntax() {
        let e = EngineError::new(
            "Binder Error: No function matches the given name and argument types '-(TIMESTAMP WITH TIME ZONE, INTERVAL)'",
        );
        assert_eq!(e.kind, EngineErrorKind::IntervalBinder);

        let e = EngineError::new("Parser Error: syntax error at or near \"FORM\"");
        assert_eq!(e.kind, EngineErrorKind::Syntax);

        let e = EngineError::new("Out of Memory Error: could not allocate block");
        assert_eq!(e.kind, EngineErrorKind::Other);
    }

    #[test]
    fn maps_categories_to_stop_reasons() {
        let policy_err = validate_sql("DELETE FROM orders", &SqlPolicy::new(["orders"], 10))
            .unwrap_err();
        assert_eq!(
            SkillError::from(policy_err).stop_reason(),
            StopReason::PolicyDenied
        );
        assert_eq!(
            SkillError::clarification("which column?").stop_reason(),
            StopReason::NeedClarification
        );
        assert_eq!(
            SkillError::CannotAnswer("no data".into()).stop_reason(),
            StopReason::ToolError
        );
        assert_eq!(
            SkillError::from(LlmError::Cancelled).stop_reason(),
            StopReason::Cancelled
        );
        assert_eq!(
            SkillError::from(LlmError::Timeout { after_ms: 5 }).stop_reason(),
            StopReason::ToolError
        );
        assert_eq!(
            SkillError::Internal("boom".into()).stop_reason(),
            StopReason::Unknown
        );
    }

    #[test]
    fn user_message_does_not_leak_engine_text() {
        let e = SkillError::from(EngineError::new(
            "Catalog Error: Table with name secret_payroll does not exist! SELECT * FROM secret_payroll",
        ));
        let msg = e.user_message();
        assert!(!msg.contains("secret_payroll"), "{msg}");
        assert!(!msg.contains("SELECT"), "{msg}");
    }
}
