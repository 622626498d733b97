//! Single-shot SQL auto-repair.
//!
//! A repairable engine failure gets exactly one model-proposed patch. The
//! patch goes through the same policy check as any other SQL and runs once.
//! If anything about that fails, the caller reports the original error.

use std::time::Instant;

use querypilot_llm::{parse_llm_json_object, ChatMessage, ChatProvider, ChatRequest};
use querypilot_sql::SqlPolicy;
use serde::{Deserialize, Serialize};

use crate::context::SkillContext;
use crate::error::{EngineError, EngineErrorKind, SkillError};
use crate::executor::{run_validated, ValidatedRun};

pub fn is_repairable(kind: &EngineErrorKind) -> bool {
    matches!(
        kind,
        EngineErrorKind::MissingColumn { .. } | EngineErrorKind::Syntax | EngineErrorKind::IntervalBinder
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairProposal {
    #[serde(alias = "patched_sql", alias = "sql")]
    pub patched_sql: String,
    #[serde(default)]
    pub explanation: String,
}

#[derive(Debug, Clone)]
pub struct RepairedRun {
    pub run: ValidatedRun,
    pub proposal: RepairProposal,
    pub llm_duration_ms: u64,
}

const REPAIR_SYSTEM_PROMPT: &str = r#"You fix failing read-only SQL for an embedded analytical engine.
Return ONLY one JSON object: {"patchedSql": "...", "explanation": "..."}
Keep the query's intent. Use only columns listed in the schema.
For date arithmetic cast first: CAST(col AS TIMESTAMP) - INTERVAL '7 days'."#;

fn kind_hint(kind: &EngineErrorKind) -> String {
    match kind {
        EngineErrorKind::MissingColumn { column } => {
            format!("The column `{column}` does not exist; pick the closest real column.")
        }
        EngineErrorKind::IntervalBinder => {
            "Timestamp-with-time-zone minus interval is not supported; cast to TIMESTAMP first."
                .to_string()
        }
        EngineErrorKind::Syntax => "Fix the syntax error.".to_string(),
        EngineErrorKind::Other => String::new(),
    }
}

pub async fn request_repair(
    provider: &dyn ChatProvider,
    failing_sql: &str,
    error: &EngineError,
    schema_digest: &str,
    cancel: &tokio_util::sync::CancellationToken,
) -> Result<RepairProposal, SkillError> {
    let request = ChatRequest::new(vec![
        ChatMessage::system(REPAIR_SYSTEM_PROMPT),
        ChatMessage::user(format!(
            "Schema:\n{schema_digest}\n\nFailing SQL:\n{failing_sql}\n\nEngine error:\n{message}\n{hint}",
            message = error.message,
            hint = kind_hint(&error.kind),
        )),
    ])
    .json_mode()
    .with_temperature(0.0);

    let reply = provider.chat(request, cancel).await?;
    let proposal: RepairProposal = parse_llm_json_object(reply.content_str())
        .map_err(|e| SkillError::ModelOutput(format!("repair reply unusable: {e}")))?;
    if proposal.patched_sql.trim().is_empty() {
        return Err(SkillError::ModelOutput("repair reply had no SQL".to_string()));
    }
    Ok(proposal)
}

/// Ask for one patch and run it. No retries.
pub async fn attempt_repair(
    provider: &dyn ChatProvider,
    ctx: &SkillContext,
    policy: &SqlPolicy,
    failing_sql: &str,
    original: &EngineError,
) -> Result<RepairedRun, SkillError> {
    let runtime = &ctx.runtime;
    runtime.check_cancelled()?;
    tracing::info!(
        run_id = %runtime.run_id,
        kind = original.kind.as_str(),
        "attempting one auto-repair"
    );

    let started = Instant::now();
    let proposal = request_repair(
        provider,
        failing_sql,
        original,
        &ctx.schema_digest,
        &runtime.cancellation,
    )
    .await?;
    let llm_duration_ms = started.elapsed().as_millis() as u64;

    let run = run_validated(runtime, policy, &proposal.patched_sql).await?;
    Ok(RepairedRun {
        run,
        proposal,
        llm_duration_ms,
    })
}
