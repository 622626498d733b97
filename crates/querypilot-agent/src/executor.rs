//! Tool-calling executor: one model decision, one execution, at most one
//! repair.
//!
//! ```text
//! question ──▶ model (execute_sql | cannot_answer)
//!                 │
//!                 ▼ normalize reply shape
//!      function_call ─▶ tool_calls[] ─▶ JSON in content ─▶ (none: reason)
//!                 │
//!                 ▼
//!         policy ─▶ engine ──error──▶ repair once ─▶ policy ─▶ engine
//!                 │                        │
//!                 ▼                        ▼ (fails)
//!             sanitized rows         original error
//! ```

use std::sync::OnceLock;
use std::time::Instant;

use querypilot_llm::{
    parse_llm_json_object, truncate_preview, AssistantMessage, ChatMessage, ChatProvider,
    ChatRequest, FunctionCall, ToolSpec,
};
use querypilot_sql::{validate_sql, SqlPolicy};
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::context::{QueryOutput, SkillContext, SkillRuntime};
use crate::error::SkillError;
use crate::repair;
use crate::result::SkillOutcome;
use crate::sanitize::sanitize_rows;
use crate::telemetry::TelemetryEvent;

pub const EXECUTE_SQL_TOOL: &str = "execute_sql";
pub const CANNOT_ANSWER_TOOL: &str = "cannot_answer";
/// Reported as the tool for template-generated queries.
pub const TEMPLATE_TOOL: &str = "template_sql";

pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: EXECUTE_SQL_TOOL.to_string(),
            description: "Run one read-only SQL SELECT against the attached tables.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "sql": {"type": "string", "description": "A single SELECT or WITH query."},
                    "thought": {"type": "string", "description": "One sentence on why this query answers the question."}
                },
                "required": ["sql"]
            }),
        },
        ToolSpec {
            name: CANNOT_ANSWER_TOOL.to_string(),
            description: "Call when the question cannot be answered from these tables.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "reason": {"type": "string", "description": "What is missing, in the user's language."}
                },
                "required": ["reason"]
            }),
        },
    ]
}

// ============================================================================
// Reply normalization
// ============================================================================

/// The canonical tool call, whatever shape the provider used.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub tool: String,
    pub args: Map<String, Value>,
    pub thought: Option<String>,
}

type Extractor = fn(&AssistantMessage) -> Option<ToolInvocation>;

/// Tried in order; the first hit wins.
const EXTRACTORS: [(&str, Extractor); 3] = [
    ("function_call", from_function_call),
    ("tool_calls", from_tool_calls),
    ("content_json", from_content_json),
];

const THOUGHT_KEYS: &[&str] = &["thought", "explanation", "reasoning", "reason"];

fn string_field(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| map.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn invocation_from_call(call: &FunctionCall) -> Option<ToolInvocation> {
    let tool = call.name.trim();
    if tool.is_empty() {
        return None;
    }
    let args = call.arguments_object().unwrap_or_default();
    Some(ToolInvocation {
        tool: tool.to_string(),
        thought: string_field(&args, &["thought"]),
        args,
    })
}

fn from_function_call(msg: &AssistantMessage) -> Option<ToolInvocation> {
    msg.function_call.as_ref().and_then(invocation_from_call)
}

fn from_tool_calls(msg: &AssistantMessage) -> Option<ToolInvocation> {
    msg.tool_calls
        .iter()
        .find_map(|call| invocation_from_call(&call.function))
}

fn from_content_json(msg: &AssistantMessage) -> Option<ToolInvocation> {
    let value: Value = parse_llm_json_object(msg.content.as_deref()?).ok()?;
    let obj = value.as_object()?;
    let thought = string_field(obj, THOUGHT_KEYS);

    let nested = obj
        .get("function_call")
        .cloned()
        .or_else(|| obj.get("tool_calls")?.get(0)?.get("function").cloned())
        .and_then(|v| serde_json::from_value::<FunctionCall>(v).ok());
    if let Some(mut inv) = nested.as_ref().and_then(invocation_from_call) {
        inv.thought = inv.thought.or(thought);
        return Some(inv);
    }

    if let Some(tool) = string_field(obj, &["tool", "name", "function", "action"]) {
        let raw_args = ["args", "arguments", "parameters", "input"]
            .iter()
            .find_map(|k| obj.get(*k))
            .cloned()
            .unwrap_or(Value::Null);
        let args = FunctionCall::new(tool.clone(), raw_args)
            .arguments_object()
            .unwrap_or_default();
        return Some(ToolInvocation {
            thought: string_field(&args, &["thought"]).or(thought),
            tool,
            args,
        });
    }

    // Bare `{"sql": "..."}`.
    let sql = string_field(obj, &["sql"])?;
    let mut args = Map::new();
    args.insert("sql".to_string(), Value::String(sql));
    Some(ToolInvocation {
        tool: EXECUTE_SQL_TOOL.to_string(),
        args,
        thought,
    })
}

pub fn extract_tool_invocation(msg: &AssistantMessage) -> Option<ToolInvocation> {
    EXTRACTORS.iter().find_map(|(name, extract)| {
        let inv = extract(msg)?;
        tracing::debug!(extractor = *name, tool = %inv.tool, "normalized tool call");
        Some(inv)
    })
}

fn reason_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^\s*(?:thought|reason|explanation|原因|理由)\s*[:：]\s*(.+?)\s*$")
            .expect("reason pattern is valid")
    })
}

/// Best-effort human-readable reason from a reply that named no tool.
pub fn extract_reason(content: &str) -> String {
    let content = content.trim();
    if content.is_empty() {
        return "The model returned no answer.".to_string();
    }
    if let Ok(Value::Object(obj)) = parse_llm_json_object::<Value>(content) {
        if let Some(reason) = string_field(&obj, THOUGHT_KEYS) {
            return reason;
        }
    }
    if let Some(caps) = reason_line_re().captures(content) {
        return caps[1].to_string();
    }
    truncate_preview(content, 200)
}

// ============================================================================
// Validated execution
// ============================================================================

#[derive(Debug, Clone)]
pub struct ValidatedRun {
    pub sql: String,
    pub warnings: Vec<String>,
    pub output: QueryOutput,
    pub duration_ms: u64,
}

/// Policy first, then the engine. Nothing reaches the engine unvalidated.
pub async fn run_validated(
    runtime: &SkillRuntime,
    policy: &SqlPolicy,
    sql: &str,
) -> Result<ValidatedRun, SkillError> {
    let checked = validate_sql(sql, policy)?;
    tracing::debug!(run_id = %runtime.run_id, sql = %checked.normalized_sql, "executing");
    let (output, duration_ms) = runtime.execute(&checked.normalized_sql).await?;
    Ok(ValidatedRun {
        sql: checked.normalized_sql,
        warnings: checked.warnings,
        output,
        duration_ms,
    })
}

pub(crate) fn outcome_from_run(tool: &str, run: ValidatedRun) -> SkillOutcome {
    SkillOutcome {
        tool: tool.to_string(),
        params: json!({ "sql": run.sql }),
        rows: sanitize_rows(&run.output),
        row_count: run.output.rows.len(),
        schema: run.output.schema,
        thought: None,
        query_type: None,
        llm_duration_ms: None,
        query_duration_ms: Some(run.duration_ms),
        warnings: run.warnings,
        repaired: false,
    }
}

// ============================================================================
// Executor
// ============================================================================

pub struct ToolCallingExecutor<'a> {
    provider: &'a dyn ChatProvider,
    mock_mode: bool,
}

impl<'a> ToolCallingExecutor<'a> {
    pub fn new(provider: &'a dyn ChatProvider, mock_mode: bool) -> Self {
        Self {
            provider,
            mock_mode,
        }
    }

    fn system_prompt(ctx: &SkillContext, policy: &SqlPolicy, hint: Option<&str>) -> String {
        let mut prompt = format!(
            "You answer questions by writing one read-only SQL query for an embedded analytical engine.\n\
             Rules:\n\
             - Call {EXECUTE_SQL_TOOL} with exactly one SELECT (or WITH ... SELECT) statement.\n\
             - Only use these tables: {tables}.\n\
             - Return at most {max_rows} rows.\n\
             - Quote identifiers with double quotes when they contain spaces or non-ASCII characters.\n\
             - For relative dates cast timestamps first: CAST(col AS TIMESTAMP) - INTERVAL '7 days'.\n\
             - If the tables cannot answer the question, call {CANNOT_ANSWER_TOOL} with a short reason.\n\n\
             Schema:\n{digest}",
            tables = policy.allowed_tables.join(", "),
            max_rows = policy.max_rows,
            digest = ctx.schema_digest,
        );
        if let Some(industry) = ctx.industry.as_deref() {
            prompt.push_str(&format!("\n\nBusiness domain: {industry}"));
        }
        if let Some(hint) = hint {
            prompt.push_str(&format!("\n\nQuery shape hint: {hint}"));
        }
        prompt
    }

    pub async fn execute(
        &self,
        ctx: &SkillContext,
        policy: &SqlPolicy,
        hint: Option<&str>,
    ) -> Result<SkillOutcome, SkillError> {
        let runtime = &ctx.runtime;
        runtime.check_cancelled()?;

        let request = ChatRequest::new(vec![
            ChatMessage::system(Self::system_prompt(ctx, policy, hint)),
            ChatMessage::user(ctx.user_input.clone()),
        ])
        .with_tools(tool_specs())
        .with_temperature(0.0);

        let started = Instant::now();
        let reply = self.provider.chat(request, &runtime.cancellation).await?;
        let mut llm_ms = started.elapsed().as_millis() as u64;

        let Some(invocation) = extract_tool_invocation(&reply) else {
            return Err(SkillError::ModelOutput(extract_reason(reply.content_str())));
        };
        runtime.telemetry.emit(TelemetryEvent::ToolCall {
            run_id: runtime.run_id.clone(),
            tool: invocation.tool.clone(),
        });

        match invocation.tool.as_str() {
            CANNOT_ANSWER_TOOL => Err(SkillError::CannotAnswer(
                string_field(&invocation.args, &["reason"])
                    .or(invocation.thought)
                    .unwrap_or_else(|| "The model could not answer from these tables.".to_string()),
            )),
            EXECUTE_SQL_TOOL => {
                let sql = string_field(&invocation.args, &["sql", "query"]).ok_or_else(|| {
                    SkillError::ModelOutput(format!("the model called {EXECUTE_SQL_TOOL} without SQL"))
                })?;

                let (run, repair_note, repair_llm_ms) = match run_validated(runtime, policy, &sql).await {
                    Ok(run) => (run, None, 0),
                    Err(SkillError::Engine(original))
                        if !self.mock_mode && repair::is_repairable(&original.kind) =>
                    {
                        let attempt =
                            repair::attempt_repair(self.provider, ctx, policy, &sql, &original).await;
                        runtime.telemetry.emit(TelemetryEvent::RepairAttempt {
                            run_id: runtime.run_id.clone(),
                            error_kind: original.kind.as_str().to_string(),
                            succeeded: attempt.is_ok(),
                        });
                        match attempt {
                            Ok(repaired) => (
                                repaired.run,
                                Some(repaired.proposal.explanation),
                                repaired.llm_duration_ms,
                            ),
                            Err(SkillError::Cancelled) => return Err(SkillError::Cancelled),
                            Err(repair_error) => {
                                tracing::warn!(
                                    run_id = %runtime.run_id,
                                    error = %repair_error,
                                    "auto-repair failed; returning the original error"
                                );
                                return Err(SkillError::Engine(original));
                            }
                        }
                    }
                    Err(e) => return Err(e),
                };
                llm_ms += repair_llm_ms;

                runtime.telemetry.emit(TelemetryEvent::ToolResult {
                    run_id: runtime.run_id.clone(),
                    tool: EXECUTE_SQL_TOOL.to_string(),
                    rows: run.output.rows.len(),
                    duration_ms: run.duration_ms,
                });

                let mut outcome = outcome_from_run(EXECUTE_SQL_TOOL, run);
                outcome.thought = invocation.thought;
                outcome.llm_duration_ms = Some(llm_ms);
                if let Some(note) = repair_note {
                    outcome.repaired = true;
                    let note = note.trim();
                    outcome.warnings.push(if note.is_empty() {
                        "query auto-repaired".to_string()
                    } else {
                        format!("query auto-repaired: {note}")
                    });
                }
                Ok(outcome)
            }
            other => Err(SkillError::ModelOutput(format!(
                "the model called an unknown tool `{other}`"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_legacy_function_call_first() {
        let mut msg = AssistantMessage::with_function_call(
            "execute_sql",
            json!("{\"sql\": \"SELECT 1\", \"thought\": \"count\"}"),
        );
        msg.tool_calls = AssistantMessage::with_tool_call("cannot_answer", json!({})).tool_calls;
        let inv = extract_tool_invocation(&msg).unwrap();
        assert_eq!(inv.tool, "execute_sql");
        assert_eq!(inv.args["sql"], "SELECT 1");
        assert_eq!(inv.thought.as_deref(), Some("count"));
    }

    #[test]
    fn extracts_tool_calls_array() {
        let msg = AssistantMessage::with_tool_call("cannot_answer", json!({"reason": "no prices"}));
        let inv = extract_tool_invocation(&msg).unwrap();
        assert_eq!(inv.tool, "cannot_answer");
        assert_eq!(inv.args["reason"], "no prices");
    }

    #[test]
    fn extracts_json_embedded_in_content() {
        let msg = AssistantMessage::text(
            "Here you go:\n```json\n{\"tool\": \"execute_sql\", \"args\": {\"sql\": \"SELECT 2\"}, \"thought\": \"simple\"}\n```",
        );
        let inv = extract_tool_invocation(&msg).unwrap();
        assert_eq!(inv.tool, "execute_sql");
        assert_eq!(inv.args["sql"], "SELECT 2");
        assert_eq!(inv.thought.as_deref(), Some("simple"));

        let msg = AssistantMessage::text(r#"{"function_call": {"name": "execute_sql", "arguments": "{\"sql\":\"SELECT 3\"}"}}"#);
        assert_eq!(extract_tool_invocation(&msg).unwrap().args["sql"], "SELECT 3");

        let msg = AssistantMessage::text(r#"{"sql": "SELECT 4"}"#);
        let inv = extract_tool_invocation(&msg).unwrap();
        assert_eq!(inv.tool, "execute_sql");
        assert_eq!(inv.args["sql"], "SELECT 4");
    }

    #[test]
    fn plain_text_yields_no_invocation() {
        assert!(extract_tool_invocation(&AssistantMessage::text("I am not sure.")).is_none());
        assert!(extract_tool_invocation(&AssistantMessage::default()).is_none());
    }

    #[test]
    fn reason_extraction_prefers_json_then_labelled_line_then_snippet() {
        assert_eq!(
            extract_reason(r#"{"thought": "No revenue column exists."}"#),
            "No revenue column exists."
        );
        assert_eq!(
            extract_reason("Let me think.\nReason: the table has no dates\nSorry."),
            "the table has no dates"
        );
        assert_eq!(extract_reason("原因：没有金额字段"), "没有金额字段");
        assert_eq!(extract_reason("just prose"), "just prose");
        assert_eq!(extract_reason("   "), "The model returned no answer.");
    }
}
