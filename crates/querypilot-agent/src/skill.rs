//! Skills: pluggable classify → generate → execute strategies.
//!
//! [`DataQnaSkill`] is the default data question-answering skill:
//!
//! ```text
//! rewrite ──needClarification──▶ stop
//!    │
//!    ▼
//! classify ──template fits──▶ columns + default filters + metric ─▶ template SQL
//!    │                                  │ (trend without a time column: stop)
//!    │                                  ▼ (required column missing)
//!    └──────────────────────────▶ tool-calling executor (freeform SQL)
//! ```
//!
//! Every SQL string, templated or not, goes through the policy validator
//! before it reaches the engine.

use std::sync::Arc;

use async_trait::async_trait;
use querypilot_llm::ChatProvider;
use querypilot_sql::{
    build_template_sql, compile_filter, compile_metric_expression, MetricAggregate,
    QueryArchetype, SqlPolicy, TemplateColumns,
};

use crate::columns::{ColumnResolver, ColumnRole};
use crate::config::AgentConfig;
use crate::context::SkillContext;
use crate::digest::{column_hint, parse_digest, TableColumns};
use crate::error::SkillError;
use crate::executor::{outcome_from_run, run_validated, ToolCallingExecutor, TEMPLATE_TOOL};
use crate::result::SkillOutcome;
use crate::rewrite::rewrite_query;
use crate::router::{classify, QueryTypeClassification};
use crate::skill_config::TableSkillConfig;
use crate::telemetry::TelemetryEvent;

#[async_trait]
pub trait Skill: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &SkillContext) -> Result<SkillOutcome, SkillError>;
}

pub struct DataQnaSkill {
    provider: Option<Arc<dyn ChatProvider>>,
    config: AgentConfig,
}

impl DataQnaSkill {
    pub fn new(provider: Option<Arc<dyn ChatProvider>>, config: AgentConfig) -> Self {
        Self { provider, config }
    }

    fn policy(ctx: &SkillContext) -> SqlPolicy {
        SqlPolicy::new(ctx.known_tables.iter().cloned(), ctx.max_rows)
    }

    /// SQL for `archetype` over `table`, or `None` to fall back to freeform.
    fn template_sql(
        &self,
        ctx: &SkillContext,
        table: &str,
        archetype: QueryArchetype,
    ) -> Result<Option<String>, SkillError> {
        let columns = parse_digest(&ctx.schema_digest)
            .into_iter()
            .find(|t| t.table.eq_ignore_ascii_case(table))
            .unwrap_or_else(|| TableColumns {
                table: table.to_string(),
                columns: Vec::new(),
            });
        let table_config = ctx
            .user_skill_config
            .as_ref()
            .and_then(|c| c.table(table));
        let resolver = ColumnResolver::for_mapping(table_config.map(|c| &c.field_mapping));
        let resolve = |role| resolver.resolve(role, &columns, &ctx.user_input);

        let mut template = TemplateColumns::default();
        match archetype {
            QueryArchetype::KpiGrouped => template.dimension = resolve(ColumnRole::Dimension),
            QueryArchetype::TrendTime => {
                template.time = resolve(ColumnRole::Time);
                if template.time.is_none() {
                    let candidates = column_hint(&columns, archetype);
                    let message = if candidates.is_empty() {
                        format!("Which column of {table} holds the date or time for this trend?")
                    } else {
                        format!(
                            "Which column of {table} holds the date or time for this trend? Columns: {candidates}"
                        )
                    };
                    return Err(SkillError::Clarification {
                        message,
                        questions: vec!["Which time column should the trend use?".to_string()],
                    });
                }
            }
            QueryArchetype::Distribution => template.metric = resolve(ColumnRole::Amount),
            _ => {}
        }

        if let Some(cfg) = table_config {
            if matches!(
                archetype,
                QueryArchetype::KpiSingle | QueryArchetype::KpiGrouped | QueryArchetype::TrendTime
            ) {
                template.aggregate = configured_metric(cfg, &ctx.user_input);
            }
        }
        let where_clause = table_config.and_then(default_where_clause);

        Ok(build_template_sql(
            table,
            archetype,
            &template,
            ctx.max_rows,
            where_clause.as_deref(),
        ))
    }

    async fn run_template(
        &self,
        ctx: &SkillContext,
        policy: &SqlPolicy,
        sql: &str,
        classification: &QueryTypeClassification,
    ) -> Result<SkillOutcome, SkillError> {
        let runtime = &ctx.runtime;
        runtime.telemetry.emit(TelemetryEvent::ToolCall {
            run_id: runtime.run_id.clone(),
            tool: TEMPLATE_TOOL.to_string(),
        });
        let run = run_validated(runtime, policy, sql).await?;
        runtime.telemetry.emit(TelemetryEvent::ToolResult {
            run_id: runtime.run_id.clone(),
            tool: TEMPLATE_TOOL.to_string(),
            rows: run.output.rows.len(),
            duration_ms: run.duration_ms,
        });
        let mut outcome = outcome_from_run(TEMPLATE_TOOL, run);
        outcome.query_type = Some(classification.query_type);
        outcome.thought = Some(format!(
            "Answered with the {} template ({:.2} confidence)",
            classification.query_type, classification.confidence
        ));
        Ok(outcome)
    }
}

/// The mentioned metric's aggregate. An uncompilable metric is skipped.
fn configured_metric(cfg: &TableSkillConfig, input: &str) -> Option<MetricAggregate> {
    let (key, metric) = cfg.metric_mentioned_in(input)?;
    match compile_metric_expression(metric) {
        Ok(expression) => Some(MetricAggregate {
            alias: key.to_string(),
            expression,
        }),
        Err(e) => {
            tracing::warn!(metric = key, error = %e, "skipping uncompilable metric");
            None
        }
    }
}

/// Default filters ANDed together. Each invalid filter is dropped on its own.
fn default_where_clause(cfg: &TableSkillConfig) -> Option<String> {
    let clauses: Vec<String> = cfg
        .default_filters
        .iter()
        .filter_map(|f| match compile_filter(f) {
            Ok(clause) => Some(clause),
            Err(e) => {
                tracing::warn!(column = %f.column, error = %e, "skipping invalid default filter");
                None
            }
        })
        .collect();
    (!clauses.is_empty()).then(|| clauses.join(" AND "))
}

#[async_trait]
impl Skill for DataQnaSkill {
    fn name(&self) -> &'static str {
        "data_qna"
    }

    async fn execute(&self, ctx: &SkillContext) -> Result<SkillOutcome, SkillError> {
        let runtime = &ctx.runtime;
        let provider = self.provider.as_deref();
        runtime.check_cancelled()?;

        let directive =
            rewrite_query(provider, &ctx.user_input, &ctx.schema_digest, &runtime.cancellation)
                .await?;
        tracing::debug!(
            run_id = %runtime.run_id,
            task = ?directive.task_type,
            confidence = directive.confidence,
            "rewrite directive"
        );
        if directive.need_clarification {
            return Err(SkillError::Clarification {
                message: "The question needs more detail before it can be answered.".to_string(),
                questions: directive.clarifying_questions,
            });
        }

        let router_provider = if self.config.router_llm { provider } else { None };
        let classification = classify(
            &ctx.user_input,
            router_provider,
            Some(&ctx.schema_digest),
            &self.config.thresholds,
            &runtime.cancellation,
        )
        .await?;
        runtime.telemetry.emit(TelemetryEvent::Classified {
            run_id: runtime.run_id.clone(),
            query_type: classification.query_type,
            confidence: classification.confidence,
            method: classification.method,
        });

        let policy = Self::policy(ctx);
        let archetype = classification.query_type;
        if classification.confidence >= self.config.thresholds.template_min && archetype.has_template() {
            if let Some(table) = ctx.target_table(directive.table_scope.tables()) {
                match self.template_sql(ctx, &table, archetype)? {
                    Some(sql) => {
                        tracing::debug!(run_id = %runtime.run_id, %table, %archetype, "template path");
                        return self.run_template(ctx, &policy, &sql, &classification).await;
                    }
                    None => tracing::debug!(
                        run_id = %runtime.run_id,
                        %table,
                        %archetype,
                        "template needs a column the schema lacks; using freeform SQL"
                    ),
                }
            }
        }

        let provider = provider.ok_or_else(|| {
            SkillError::ModelOutput(
                "No language model is configured, and no template fits this question.".to_string(),
            )
        })?;
        let hint = (archetype != QueryArchetype::Unknown).then(|| {
            format!(
                "this looks like a {archetype} question ({:.2} confidence)",
                classification.confidence
            )
        });
        let mut outcome = ToolCallingExecutor::new(provider, self.config.mock_mode)
            .execute(ctx, &policy, hint.as_deref())
            .await?;
        if archetype != QueryArchetype::Unknown {
            outcome.query_type = Some(archetype);
        }
        Ok(outcome)
    }
}
