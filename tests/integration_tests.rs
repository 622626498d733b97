//! Cross-crate checks for the Querypilot workspace
//!
//! These tests drive the agent the way a host application would:
//! - SQL layer ↔ agent: policy verdicts and template SQL agree
//! - skill config on disk → agent → engine
//! - run supervision around a custom skill
//!
//! Run with: cargo test --test integration_tests

use std::fs;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use querypilot_agent::{
    AgentConfig, ColumnInfo, EngineError, EngineValue, JsonFileSkillConfigStore, QueryAgent,
    QueryExecutor, QueryOutput, QueryRequest, Skill, SkillContext, SkillError, SkillOutcome,
    StopReason,
};
use querypilot_llm::ScriptedProvider;
use querypilot_sql::{build_template_sql, validate_sql, QueryArchetype, SqlPolicy, TemplateColumns};
use serde_json::json;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Fixture engine
// ============================================================================

/// Serves catalog queries for a single table and answers every other query
/// with one BIGINT cell.
struct FixtureEngine {
    table: &'static str,
    columns: Vec<ColumnInfo>,
    value: i64,
    log: Mutex<Vec<String>>,
}

impl FixtureEngine {
    fn orders(value: i64) -> Self {
        Self {
            table: "orders",
            columns: vec![
                ColumnInfo::new("order_id", "BIGINT"),
                ColumnInfo::new("amount", "DOUBLE"),
                ColumnInfo::new("status", "VARCHAR"),
                ColumnInfo::new("created_at", "TIMESTAMP"),
            ],
            value,
            log: Mutex::new(Vec::new()),
        }
    }

    fn data_queries(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|sql| !sql.contains("information_schema"))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl QueryExecutor for FixtureEngine {
    async fn execute(&self, sql: &str) -> Result<QueryOutput, EngineError> {
        self.log.lock().unwrap().push(sql.to_string());
        if sql.contains("information_schema.tables") {
            return Ok(QueryOutput {
                schema: vec![ColumnInfo::new("table_name", "VARCHAR")],
                rows: vec![vec![EngineValue::Text(self.table.to_string())]],
            });
        }
        if sql.contains("information_schema.columns") {
            return Ok(QueryOutput {
                schema: vec![
                    ColumnInfo::new("column_name", "VARCHAR"),
                    ColumnInfo::new("data_type", "VARCHAR"),
                ],
                rows: self
                    .columns
                    .iter()
                    .map(|c| {
                        vec![
                            EngineValue::Text(c.name.clone()),
                            EngineValue::Text(c.data_type.clone()),
                        ]
                    })
                    .collect(),
            });
        }
        Ok(QueryOutput {
            schema: vec![ColumnInfo::new("value", "BIGINT")],
            rows: vec![vec![EngineValue::BigInt(self.value)]],
        })
    }
}

fn directive() -> serde_json::Value {
    json!({
        "taskType": "data_qna",
        "tableScope": "auto",
        "confidence": 0.95,
        "needClarification": false
    })
}

// ============================================================================
// SQL layer ↔ agent
// ============================================================================

#[test]
fn every_template_passes_the_policy_with_a_single_limit() {
    let policy = SqlPolicy::new(["orders"], 200);
    let columns = TemplateColumns {
        dimension: Some("status".into()),
        time: Some("created_at".into()),
        metric: Some("amount".into()),
        aggregate: None,
    };
    for archetype in QueryArchetype::ALL.into_iter().filter(QueryArchetype::has_template) {
        let sql = build_template_sql("orders", archetype, &columns, 200, Some("\"status\" = 'paid'"))
            .unwrap_or_else(|| panic!("{archetype} should render"));
        let validated = validate_sql(&sql, &policy)
            .unwrap_or_else(|e| panic!("{archetype} template rejected: {e}\n{sql}"));
        assert_eq!(
            validated.normalized_sql.matches("LIMIT").count(),
            1,
            "{}",
            validated.normalized_sql
        );
    }
}

#[tokio::test]
async fn agent_agrees_with_the_standalone_validator() {
    let policy = SqlPolicy::new(["orders"], 500);
    let candidates = [
        "SELECT order_id, amount FROM orders",
        "select status, count(*) from orders group by status limit 20",
        "SELECT * FROM orders LIMIT 100000",
        "DROP TABLE orders",
        "SELECT * FROM orders; SELECT * FROM orders",
        "SELECT * FROM payroll",
        "UPDATE orders SET amount = 0",
        "SELECT * FROM read_csv_auto('/etc/passwd')",
        "SELECT id FROM orders LIMIT -1",
    ];

    for candidate in candidates {
        let engine = Arc::new(FixtureEngine::orders(1));
        let provider = Arc::new(
            ScriptedProvider::new()
                .reply_json(directive())
                .reply_tool_call("execute_sql", json!({ "sql": candidate })),
        );
        let agent = QueryAgent::new(engine.clone(), AgentConfig::default().with_router_llm(false))
            .with_provider(provider);

        let result = agent
            .run(
                QueryRequest::new("which customers churned after their first refund")
                    .with_attachment("orders", "orders.parquet"),
                &CancellationToken::new(),
            )
            .await;

        match validate_sql(candidate, &policy) {
            Ok(validated) => {
                assert_eq!(result.stop_reason, StopReason::Success, "{candidate}");
                assert_eq!(engine.data_queries(), vec![validated.normalized_sql], "{candidate}");
            }
            Err(denied) => {
                assert_eq!(result.stop_reason, StopReason::PolicyDenied, "{candidate}");
                assert!(engine.data_queries().is_empty(), "{candidate}");
                let message = result.message.unwrap_or_default();
                assert!(message.contains(denied.reason.code()), "{candidate}: {message}");
            }
        }
    }
}

// ============================================================================
// Host-facing runs
// ============================================================================

#[tokio::test]
async fn result_serializes_the_way_hosts_consume_it() {
    let engine = Arc::new(FixtureEngine::orders(7));
    let agent = QueryAgent::new(engine, AgentConfig::default());

    let result = agent
        .run(
            QueryRequest::new("统计订单总数").with_attachment("orders", "orders.csv"),
            &CancellationToken::new(),
        )
        .await;
    let body = serde_json::to_value(&result).unwrap();

    assert_eq!(body["stopReason"], "SUCCESS");
    assert_eq!(body["tool"], "template_sql");
    assert_eq!(body["queryType"], "kpi_single");
    assert_eq!(body["result"], json!([{"value": "7"}]));
    assert_eq!(body["cancelled"], false);
    assert!(body["runId"].as_str().is_some_and(|id| !id.is_empty()));
    assert!(body.get("clarifyingQuestions").is_none());
}

#[tokio::test]
async fn skill_config_file_shapes_the_generated_sql() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("skills.json");
    fs::write(
        &path,
        json!({
            "version": 1,
            "tables": {
                "orders": {
                    "fieldMapping": {"time": "created_at", "amount": "amount"},
                    "defaultFilters": [
                        {"column": "created_at", "op": ">=", "value": {"unit": "day", "amount": 7}}
                    ],
                    "metrics": {"gmv": {"aggregation": "sum", "column": "amount"}}
                }
            }
        })
        .to_string(),
    )
    .unwrap();

    let engine = Arc::new(FixtureEngine::orders(1200));
    let agent = QueryAgent::new(engine.clone(), AgentConfig::default())
        .with_skill_store(Arc::new(JsonFileSkillConfigStore::new(&path)));

    let result = agent
        .run(
            QueryRequest::new("统计gmv总额").with_attachment("orders", "orders.csv"),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.stop_reason, StopReason::Success);
    assert_eq!(
        engine.data_queries(),
        vec![
            r#"SELECT SUM("amount") AS "gmv" FROM orders WHERE "created_at" >= CAST(NOW() AS TIMESTAMP) - INTERVAL '7 day' LIMIT 500"#
                .to_string()
        ]
    );
}

#[tokio::test]
async fn missing_skill_config_file_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FixtureEngine::orders(3));
    let agent = QueryAgent::new(engine.clone(), AgentConfig::default())
        .with_skill_store(Arc::new(JsonFileSkillConfigStore::new(dir.path().join("absent.json"))));

    let result = agent
        .run(
            QueryRequest::new("how many orders in total").with_attachment("orders", "orders.csv"),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.stop_reason, StopReason::Success);
    assert_eq!(
        engine.data_queries(),
        vec!["SELECT COUNT(*) AS total_count FROM orders LIMIT 500".to_string()]
    );
}

// ============================================================================
// Supervision around custom skills
// ============================================================================

struct PanickingSkill;

#[async_trait]
impl Skill for PanickingSkill {
    fn name(&self) -> &'static str {
        "panicking"
    }

    async fn execute(&self, _ctx: &SkillContext) -> Result<SkillOutcome, SkillError> {
        panic!("skill bug");
    }
}

#[tokio::test]
async fn panicking_skill_becomes_unknown() {
    let agent = QueryAgent::new(Arc::new(FixtureEngine::orders(0)), AgentConfig::default())
        .with_skill(Arc::new(PanickingSkill));

    let result = agent
        .run(
            QueryRequest::new("anything").with_attachment("orders", "orders.csv"),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(result.stop_reason, StopReason::Unknown);
    assert!(result.result.is_none());
    assert!(!result.cancelled);
}

#[tokio::test]
async fn already_cancelled_token_runs_nothing() {
    let engine = Arc::new(FixtureEngine::orders(5));
    let agent = QueryAgent::new(engine.clone(), AgentConfig::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = agent
        .run(
            QueryRequest::new("统计订单总数").with_attachment("orders", "orders.csv"),
            &cancel,
        )
        .await;

    assert_eq!(result.stop_reason, StopReason::Cancelled);
    assert!(result.cancelled);
    assert!(engine.data_queries().is_empty());
}
