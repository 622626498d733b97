//! Per-run context and the engine seam.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, SkillError};
use crate::skill_config::UserSkillConfig;
use crate::telemetry::TelemetrySink;

// ============================================================================
// Engine interface
// ============================================================================

/// One cell as produced by the analytical engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EngineValue {
    Null,
    Bool(bool),
    Int(i32),
    /// 64-bit integers; never emitted as JSON numbers.
    BigInt(i64),
    UBigInt(u64),
    HugeInt(i128),
    Double(f64),
    Text(String),
    /// Dates, times and timestamps, already rendered by the engine.
    Temporal(String),
    List(Vec<EngineValue>),
    Struct(Vec<(String, EngineValue)>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// Rows are positional and line up with `schema`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryOutput {
    pub schema: Vec<ColumnInfo>,
    pub rows: Vec<Vec<EngineValue>>,
}

impl QueryOutput {
    /// Cell `name` of row `row`, matching the column name case-insensitively.
    pub fn cell(&self, row: usize, name: &str) -> Option<&EngineValue> {
        let idx = self
            .schema
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))?;
        self.rows.get(row)?.get(idx)
    }
}

/// The query execution callback supplied by the host application.
///
/// Implementations report failures with [`EngineError::new`] so the kind is
/// classified once, where the message originates.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<QueryOutput, EngineError>;
}

// ============================================================================
// Runtime
// ============================================================================

/// Collaborators and cancellation for one run.
#[derive(Clone)]
pub struct SkillRuntime {
    pub run_id: String,
    pub executor: Arc<dyn QueryExecutor>,
    pub cancellation: CancellationToken,
    pub telemetry: TelemetrySink,
}

impl SkillRuntime {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Fail fast when the run has been aborted.
    pub fn check_cancelled(&self) -> Result<(), SkillError> {
        if self.is_cancelled() {
            Err(SkillError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run `sql` on the engine, racing the run's cancellation token.
    /// Returns the output and the engine time in milliseconds.
    pub async fn execute(&self, sql: &str) -> Result<(QueryOutput, u64), SkillError> {
        self.check_cancelled()?;
        let started = Instant::now();
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(SkillError::Cancelled),
            out = self.executor.execute(sql) => {
                let elapsed = started.elapsed().as_millis() as u64;
                out.map(|o| (o, elapsed)).map_err(SkillError::from)
            }
        }
    }
}

// ============================================================================
// Skill context
// ============================================================================

/// Binds an engine table to the file it was loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub table_name: String,
    pub source_file: String,
}

impl Attachment {
    pub fn new(table_name: impl Into<String>, source_file: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            source_file: source_file.into(),
        }
    }
}

/// Everything a skill may read during one run. Built once, never mutated.
#[derive(Clone)]
pub struct SkillContext {
    pub user_input: String,
    pub attachments: Vec<Attachment>,
    pub persona_id: Option<String>,
    pub schema_digest: String,
    pub max_rows: usize,
    pub industry: Option<String>,
    pub user_skill_config: Option<UserSkillConfig>,
    pub active_table: Option<String>,
    /// Tables the policy allowlist admits for this run.
    pub known_tables: Vec<String>,
    pub runtime: SkillRuntime,
}

impl SkillContext {
    /// The table a templated query should target: the active table, then
    /// the first rewriter-scoped table that is attached, then the first
    /// attachment, then the first known table.
    pub fn target_table(&self, scope: &[String]) -> Option<String> {
        if let Some(active) = self.active_table.as_deref().filter(|t| !t.trim().is_empty()) {
            return Some(active.trim().to_string());
        }
        let attached = |name: &str| {
            self.attachments
                .iter()
                .find(|a| a.table_name.eq_ignore_ascii_case(name))
                .map(|a| a.table_name.clone())
        };
        if let Some(t) = scope.iter().find_map(|s| attached(s.trim())) {
            return Some(t);
        }
        self.attachments
            .first()
            .map(|a| a.table_name.clone())
            .or_else(|| self.known_tables.first().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopExecutor;

    #[async_trait]
    impl QueryExecutor for NoopExecutor {
        async fn execute(&self, _sql: &str) -> Result<QueryOutput, EngineError> {
            Ok(QueryOutput::default())
        }
    }

    fn context(active: Option<&str>, attachments: &[&str]) -> SkillContext {
        SkillContext {
            user_input: String::new(),
            attachments: attachments
                .iter()
                .map(|t| Attachment::new(*t, format!("{t}.csv")))
                .collect(),
            persona_id: None,
            schema_digest: String::new(),
            max_rows: 10,
            industry: None,
            user_skill_config: None,
            active_table: active.map(str::to_string),
            known_tables: vec!["main_table_9".into()],
            runtime: SkillRuntime {
                run_id: "t".into(),
                executor: Arc::new(NoopExecutor),
                cancellation: CancellationToken::new(),
                telemetry: TelemetrySink::none(),
            },
        }
    }

    #[test]
    fn target_table_resolution_order() {
        let scope = vec!["Refunds".to_string()];
        assert_eq!(
            context(Some("orders"), &["refunds"]).target_table(&scope),
            Some("orders".into())
        );
        assert_eq!(
            context(None, &["orders", "refunds"]).target_table(&scope),
            Some("refunds".into())
        );
        assert_eq!(
            context(None, &["orders"]).target_table(&scope),
            Some("orders".into())
        );
        assert_eq!(
            context(None, &[]).target_table(&scope),
            Some("main_table_9".into())
        );
    }

    #[tokio::test]
    async fn execute_respects_cancelled_token() {
        let ctx = context(None, &[]);
        ctx.runtime.cancellation.cancel();
        assert_eq!(
            ctx.runtime.execute("SELECT 1").await.unwrap_err(),
            SkillError::Cancelled
        );
    }

    #[test]
    fn engine_values_serialize_with_type_tags() {
        let v = serde_json::to_value(EngineValue::BigInt(9_007_199_254_740_993)).unwrap();
        assert_eq!(v["type"], "big_int");
    }
}
