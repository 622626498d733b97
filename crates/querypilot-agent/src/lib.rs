//! Querypilot agent: natural-language questions in, bounded read-only SQL
//! answers out.
//!
//! ```text
//!                 ┌──────────────────── QueryAgent::run ────────────────────┐
//! question ─────▶ │ rewrite ─▶ classify ─▶ template SQL ─┐                  │
//!                 │                 └────▶ tool-calling ─┴▶ policy ─▶ engine │ ─▶ SkillResult
//!                 │                          executor        (repair once)  │
//!                 └──────────── budget timer + cancellation token ──────────┘
//! ```
//!
//! The crate owns no engine and no model. The host supplies a
//! [`QueryExecutor`], optionally a [`ChatProvider`](querypilot_llm::ChatProvider),
//! a [`SkillConfigStore`] and a [`TelemetrySink`].
//!
//! Every run ends in exactly one [`StopReason`]:
//!
//! | stop reason          | produced by                                       |
//! |----------------------|---------------------------------------------------|
//! | `SUCCESS`            | rows returned within budget                        |
//! | `NEED_CLARIFICATION` | rewriter gate, or a trend with no time column      |
//! | `BUDGET_EXCEEDED`    | budget timer fired, or success after the budget    |
//! | `POLICY_DENIED`      | SQL rejected by the policy validator               |
//! | `TOOL_ERROR`         | engine, model-output or refusal failures           |
//! | `CANCELLED`          | caller's token cancelled                           |
//! | `UNKNOWN`            | internal errors                                    |

pub mod columns;
pub mod config;
pub mod context;
pub mod digest;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod repair;
pub mod result;
pub mod rewrite;
pub mod router;
pub mod sanitize;
pub mod skill;
pub mod skill_config;
pub mod supervisor;
pub mod telemetry;

pub use columns::{ColumnResolver, ColumnRole, SemanticColumnSource};
pub use config::{AgentConfig, RouterThresholds};
pub use context::{
    Attachment, ColumnInfo, EngineValue, QueryExecutor, QueryOutput, SkillContext, SkillRuntime,
};
pub use error::{EngineError, EngineErrorKind, SkillError};
pub use executor::{ToolCallingExecutor, ToolInvocation, CANNOT_ANSWER_TOOL, EXECUTE_SQL_TOOL, TEMPLATE_TOOL};
pub use pipeline::{QueryAgent, QueryRequest};
pub use result::{SkillOutcome, SkillResult, StopReason};
pub use rewrite::{RewriteResult, RiskFlag, TableScope, TaskType};
pub use router::{ClassificationMethod, QueryTypeClassification};
pub use skill::{DataQnaSkill, Skill};
pub use skill_config::{
    FieldMapping, JsonFileSkillConfigStore, SkillConfigStore, StaticSkillConfigStore,
    TableSkillConfig, UserSkillConfig,
};
pub use telemetry::{TelemetryEvent, TelemetrySink};
