//! The end-to-end pipeline: one [`SkillResult`] per question, always.
//!
//! ```text
//!   QueryRequest ─┐
//!                 ▼
//!   ┌─────────────────────── supervise(budget, run token) ───────────────┐
//!   │ skill config ─▶ tables ─▶ schema digest ─▶ SkillContext ─▶ skill   │
//!   └────────────────────────────────────────────────────────────────────┘
//!                 │ Completed(Ok) / Completed(Err) / TimedOut / Cancelled
//!                 ▼
//!            SkillResult (stop reason)
//! ```
//!
//! Each run gets its own child cancellation token, so cancelling one run
//! never touches another, and a timed-out run's in-flight calls unwind
//! without the caller's token being cancelled.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use querypilot_llm::ChatProvider;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::context::{Attachment, QueryExecutor, SkillContext, SkillRuntime};
use crate::digest::{build_schema_digest, cap_chars, discover_tables, parse_digest};
use crate::error::SkillError;
use crate::result::{SkillOutcome, SkillResult, StopReason};
use crate::skill::{DataQnaSkill, Skill};
use crate::skill_config::{SkillConfigStore, UserSkillConfig};
use crate::supervisor::{supervise, Supervised};
use crate::telemetry::{TelemetryEvent, TelemetrySink};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub user_input: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub persona_id: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub active_table: Option<String>,
    /// A prebuilt digest; skips introspection when present.
    #[serde(default)]
    pub schema_digest: Option<String>,
}

impl QueryRequest {
    pub fn new(user_input: impl Into<String>) -> Self {
        Self {
            user_input: user_input.into(),
            ..Default::default()
        }
    }

    pub fn with_attachment(mut self, table_name: &str, source_file: &str) -> Self {
        self.attachments.push(Attachment::new(table_name, source_file));
        self
    }

    pub fn with_active_table(mut self, table: impl Into<String>) -> Self {
        self.active_table = Some(table.into());
        self
    }

    pub fn with_schema_digest(mut self, digest: impl Into<String>) -> Self {
        self.schema_digest = Some(digest.into());
        self
    }
}

pub struct QueryAgent {
    executor: Arc<dyn QueryExecutor>,
    provider: Option<Arc<dyn ChatProvider>>,
    skill_store: Option<Arc<dyn SkillConfigStore>>,
    skill: Option<Arc<dyn Skill>>,
    telemetry: TelemetrySink,
    config: AgentConfig,
}

impl QueryAgent {
    pub fn new(executor: Arc<dyn QueryExecutor>, config: AgentConfig) -> Self {
        Self {
            executor,
            provider: None,
            skill_store: None,
            skill: None,
            telemetry: TelemetrySink::none(),
            config,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn ChatProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_skill_store(mut self, store: Arc<dyn SkillConfigStore>) -> Self {
        self.skill_store = Some(store);
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetrySink) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Replace the default [`DataQnaSkill`].
    pub fn with_skill(mut self, skill: Arc<dyn Skill>) -> Self {
        self.skill = Some(skill);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn skill(&self) -> Arc<dyn Skill> {
        match &self.skill {
            Some(skill) => Arc::clone(skill),
            None => Arc::new(DataQnaSkill::new(self.provider.clone(), self.config.clone())),
        }
    }

    /// Answer one question. Errors, timeouts and cancellation all end up
    /// as a [`SkillResult`] with the matching stop reason.
    pub async fn run(&self, request: QueryRequest, cancel: &CancellationToken) -> SkillResult {
        let started = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let run_token = cancel.child_token();
        let budget_ms = self.config.max_duration_ms;

        self.telemetry.emit(TelemetryEvent::RunStart {
            run_id: run_id.clone(),
            started_at: Utc::now(),
            input_chars: request.user_input.chars().count(),
            attachments: request.attachments.len(),
        });
        tracing::info!(%run_id, budget_ms, "run started");

        let runtime = SkillRuntime {
            run_id: run_id.clone(),
            executor: Arc::clone(&self.executor),
            cancellation: run_token.clone(),
            telemetry: self.telemetry.clone(),
        };
        let supervised = supervise(
            self.config.max_duration(),
            &run_token,
            self.prepare_and_execute(&request, runtime),
        )
        .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &supervised {
            Supervised::Completed(Err(error)) => {
                if !matches!(error, SkillError::Clarification { .. }) {
                    self.telemetry.emit(TelemetryEvent::Error {
                        run_id: run_id.clone(),
                        category: error.category().to_string(),
                    });
                }
                tracing::debug!(%run_id, error = %error, "run failed");
            }
            Supervised::TimedOut => self.telemetry.emit(TelemetryEvent::Error {
                run_id: run_id.clone(),
                category: "timeout".to_string(),
            }),
            Supervised::Completed(Ok(_)) | Supervised::Cancelled => {}
        }
        let result = settle(&run_id, supervised, elapsed_ms, budget_ms);

        self.telemetry.emit(TelemetryEvent::RunEnd {
            run_id: run_id.clone(),
            stop_reason: result.stop_reason,
            elapsed_ms,
        });
        match result.stop_reason {
            StopReason::Success | StopReason::NeedClarification => {
                tracing::info!(%run_id, stop_reason = %result.stop_reason, elapsed_ms, "run finished")
            }
            _ => tracing::warn!(%run_id, stop_reason = %result.stop_reason, elapsed_ms, "run finished"),
        }
        result
    }

    async fn load_skill_config(&self) -> Option<UserSkillConfig> {
        let store = self.skill_store.as_ref()?;
        match store.load().await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "skill configuration unavailable; continuing without it");
                None
            }
        }
    }

    async fn resolve_tables(
        &self,
        request: &QueryRequest,
        runtime: &SkillRuntime,
    ) -> Result<Vec<String>, SkillError> {
        let mut tables: Vec<String> = request
            .attachments
            .iter()
            .map(|a| a.table_name.clone())
            .collect();
        if tables.is_empty() {
            tables = match discover_tables(runtime, &self.config.table_pattern).await {
                Ok(found) => found,
                Err(SkillError::Cancelled) => return Err(SkillError::Cancelled),
                Err(e) => {
                    tracing::warn!(run_id = %runtime.run_id, error = %e, "table discovery failed");
                    Vec::new()
                }
            };
        }
        if let Some(active) = request.active_table.as_deref().map(str::trim) {
            if !active.is_empty() && !tables.iter().any(|t| t.eq_ignore_ascii_case(active)) {
                tables.insert(0, active.to_string());
            }
        }
        Ok(tables)
    }

    async fn prepare_and_execute(
        &self,
        request: &QueryRequest,
        runtime: SkillRuntime,
    ) -> Result<SkillOutcome, SkillError> {
        let user_skill_config = self.load_skill_config().await;
        runtime.check_cancelled()?;

        let mut known_tables = self.resolve_tables(request, &runtime).await?;
        let schema_digest = match request.schema_digest.as_deref() {
            Some(digest) => cap_chars(digest, self.config.digest_max_chars),
            None => {
                build_schema_digest(&runtime, &known_tables, self.config.digest_max_chars).await?
            }
        };
        for parsed in parse_digest(&schema_digest) {
            if !known_tables.iter().any(|t| t.eq_ignore_ascii_case(&parsed.table)) {
                known_tables.push(parsed.table);
            }
        }
        runtime.telemetry.emit(TelemetryEvent::SchemaReady {
            run_id: runtime.run_id.clone(),
            tables: known_tables.len(),
            digest_chars: schema_digest.chars().count(),
        });

        let industry = request.industry.clone().or_else(|| {
            let config = user_skill_config.as_ref()?;
            known_tables
                .iter()
                .find_map(|t| config.table(t)?.industry.clone())
        });

        let ctx = SkillContext {
            user_input: request.user_input.clone(),
            attachments: request.attachments.clone(),
            persona_id: request.persona_id.clone(),
            schema_digest,
            max_rows: self.config.max_rows,
            industry,
            user_skill_config,
            active_table: request.active_table.clone(),
            known_tables,
            runtime,
        };
        let skill = self.skill();
        tracing::debug!(run_id = %ctx.runtime.run_id, skill = skill.name(), "executing skill");
        // Spawned so a panicking skill becomes an `UNKNOWN` result. If the
        // supervisor gives up first, the task unwinds at its next cancellation
        // check.
        let task = tokio::spawn(async move { skill.execute(&ctx).await });
        match task.await {
            Ok(result) => result,
            Err(e) => Err(SkillError::Internal(format!("skill task failed: {e}"))),
        }
    }
}

/// Map a supervised run to its result. A skill that finished after the
/// budget keeps its rows under `BUDGET_EXCEEDED`.
fn settle(
    run_id: &str,
    supervised: Supervised<Result<SkillOutcome, SkillError>>,
    elapsed_ms: u64,
    budget_ms: u64,
) -> SkillResult {
    match supervised {
        Supervised::Completed(Ok(outcome)) if elapsed_ms > budget_ms => {
            SkillResult::over_budget(run_id, outcome, elapsed_ms, budget_ms)
        }
        Supervised::Completed(Ok(outcome)) => SkillResult::success(run_id, outcome, elapsed_ms),
        Supervised::Completed(Err(error)) => SkillResult::from_error(run_id, &error, elapsed_ms),
        Supervised::TimedOut => SkillResult::timed_out(run_id, elapsed_ms, budget_ms),
        Supervised::Cancelled => SkillResult::cancelled(run_id, elapsed_ms),
    }
}
