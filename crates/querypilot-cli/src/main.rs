//! Querypilot CLI
//!
//! Offline tooling over the pure layers of the pipeline:
//! - `validate`: run SQL through the read-only policy
//! - `classify`: route a question to a query archetype
//! - `filters`: compile a table's default filters and metrics from a skill config
//! - `template`: render the SQL template for an archetype

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use querypilot_agent::router::{classify_keywords, QueryTypeClassification};
use querypilot_agent::{
    JsonFileSkillConfigStore, RouterThresholds, SkillConfigStore, TableSkillConfig,
};
use querypilot_sql::{
    build_template_sql, compile_filter, compile_metric_expression, compile_where_clause,
    validate_sql, QueryArchetype, SqlPolicy, TemplateColumns,
};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "QUERYPILOT_LOG";

#[derive(Parser)]
#[command(name = "querypilot")]
#[command(author, version, about = "Querypilot: policy-enforced natural-language-to-SQL tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate SQL against the read-only policy and print the normalized form.
    ///
    /// SQL is taken from the argument, `--file`, or stdin.
    Validate {
        sql: Option<String>,
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Allowed tables (comma-separated)
        #[arg(long, value_delimiter = ',', required = true)]
        tables: Vec<String>,
        #[arg(long, default_value_t = 500)]
        max_rows: usize,
        #[arg(long)]
        json: bool,
    },

    /// Classify a question into a query archetype.
    Classify {
        question: String,
        /// Ask the configured model when keywords are not conclusive
        /// (requires the `openai` feature and OPENAI_API_KEY).
        #[arg(long)]
        llm: bool,
        #[arg(long)]
        json: bool,
    },

    /// Compile a table's default filters and metrics from a skill config file.
    Filters {
        /// Skill configuration JSON
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        table: String,
        #[arg(long)]
        json: bool,
    },

    /// Render the SQL template for an archetype.
    Template {
        #[arg(short, long)]
        table: String,
        /// kpi_single | kpi_grouped | trend_time | distribution | topn
        #[arg(short, long, value_parser = parse_archetype)]
        archetype: QueryArchetype,
        #[arg(long)]
        dimension: Option<String>,
        #[arg(long)]
        time: Option<String>,
        #[arg(long)]
        metric: Option<String>,
        /// Raw condition appended as WHERE
        #[arg(long = "where")]
        where_clause: Option<String>,
        #[arg(long, default_value_t = 500)]
        max_rows: usize,
        #[arg(long)]
        json: bool,
    },
}

fn parse_archetype(s: &str) -> Result<QueryArchetype, String> {
    QueryArchetype::parse(s).ok_or_else(|| {
        let known: Vec<&str> = QueryArchetype::ALL.iter().map(QueryArchetype::as_str).collect();
        format!("unknown archetype `{s}` (expected one of: {})", known.join(", "))
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    let ok = match cli.command {
        Commands::Validate {
            sql,
            file,
            tables,
            max_rows,
            json,
        } => cmd_validate(read_sql(sql, file.as_deref())?, &tables, max_rows, json)?,
        Commands::Classify {
            question,
            llm,
            json,
        } => {
            cmd_classify(&question, llm, json).await?;
            true
        }
        Commands::Filters {
            config,
            table,
            json,
        } => cmd_filters(&config, &table, json).await?,
        Commands::Template {
            table,
            archetype,
            dimension,
            time,
            metric,
            where_clause,
            max_rows,
            json,
        } => {
            let columns = TemplateColumns {
                dimension,
                time,
                metric,
                aggregate: None,
            };
            cmd_template(&table, archetype, &columns, max_rows, where_clause.as_deref(), json)?
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

// ============================================================================
// validate
// ============================================================================

fn read_sql(sql: Option<String>, file: Option<&Path>) -> Result<String> {
    match (sql, file) {
        (Some(sql), None) => Ok(sql),
        (None, Some(path)) => {
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
        }
        (None, None) => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf).context("reading SQL from stdin")?;
            Ok(buf)
        }
        (Some(_), Some(_)) => Err(anyhow!("pass SQL as an argument or with --file, not both")),
    }
}

fn cmd_validate(sql: String, tables: &[String], max_rows: usize, json: bool) -> Result<bool> {
    let policy = SqlPolicy::new(tables.iter().map(|t| t.trim().to_string()), max_rows);
    let outcome = validate_sql(&sql, &policy);

    if json {
        let value = match &outcome {
            Ok(r) => json!({"ok": true, "normalizedSql": r.normalized_sql, "warnings": r.warnings}),
            Err(e) => json!({
                "ok": false,
                "reason": e.reason.code(),
                "detail": e.detail,
                "tables": e.tables,
            }),
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(outcome.is_ok());
    }

    match outcome {
        Ok(r) => {
            eprintln!("{}", "ok".green().bold());
            for w in &r.warnings {
                eprintln!("{} {w}", "warning:".yellow().bold());
            }
            println!("{}", r.normalized_sql);
            Ok(true)
        }
        Err(e) => {
            eprintln!("{} {}", "denied".red().bold(), e);
            Ok(false)
        }
    }
}

// ============================================================================
// classify
// ============================================================================

#[cfg(feature = "openai")]
async fn classify_with_model(
    question: &str,
    thresholds: &RouterThresholds,
) -> Result<QueryTypeClassification> {
    let client = querypilot_llm::OpenAiCompatClient::from_env()?;
    let provider: &dyn querypilot_llm::ChatProvider = &client;
    let cancel = tokio_util::sync::CancellationToken::new();
    Ok(querypilot_agent::router::classify(question, Some(provider), None, thresholds, &cancel).await?)
}

#[cfg(not(feature = "openai"))]
async fn classify_with_model(
    _question: &str,
    _thresholds: &RouterThresholds,
) -> Result<QueryTypeClassification> {
    bail!("--llm needs a build with the `openai` feature")
}

async fn cmd_classify(question: &str, llm: bool, json: bool) -> Result<()> {
    let thresholds = RouterThresholds::default();
    let classification = if llm {
        classify_with_model(question, &thresholds).await?
    } else {
        classify_keywords(question, &thresholds)
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&classification)?);
        return Ok(());
    }
    println!(
        "{} {} ({:.2}, {:?})",
        "archetype".green().bold(),
        classification.query_type.as_str().bold(),
        classification.confidence,
        classification.method,
    );
    if !classification.matched_keywords.is_empty() {
        println!("  matched: {}", classification.matched_keywords.join(", "));
    }
    if classification.query_type.has_template() {
        println!("  template: yes");
    } else {
        println!("  template: no (freeform SQL)");
    }
    Ok(())
}

// ============================================================================
// filters
// ============================================================================

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct CompiledItem {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CompiledItem {
    fn new<E: std::fmt::Display>(name: String, compiled: Result<String, E>) -> Self {
        match compiled {
            Ok(sql) => Self {
                name,
                sql: Some(sql),
                error: None,
            },
            Err(e) => Self {
                name,
                sql: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct FiltersReport {
    table: String,
    filters: Vec<CompiledItem>,
    /// Only the filters that compiled, ANDed.
    where_clause: Option<String>,
    metrics: Vec<CompiledItem>,
}

impl FiltersReport {
    fn is_clean(&self) -> bool {
        self.filters.iter().chain(&self.metrics).all(|i| i.error.is_none())
    }
}

fn filters_report(table: &str, config: &TableSkillConfig) -> Result<FiltersReport> {
    let filters: Vec<CompiledItem> = config
        .default_filters
        .iter()
        .map(|f| CompiledItem::new(f.column.clone(), compile_filter(f)))
        .collect();
    let valid: Vec<_> = config
        .default_filters
        .iter()
        .filter(|f| compile_filter(f).is_ok())
        .cloned()
        .collect();
    let where_clause = compile_where_clause(&valid)?;
    let metrics = config
        .metrics
        .iter()
        .map(|(name, m)| CompiledItem::new(name.clone(), compile_metric_expression(m)))
        .collect();
    Ok(FiltersReport {
        table: table.to_string(),
        filters,
        where_clause,
        metrics,
    })
}

fn print_items(title: &str, items: &[CompiledItem]) {
    println!("{}", title.bold());
    if items.is_empty() {
        println!("  (none)");
    }
    for item in items {
        match (&item.sql, &item.error) {
            (Some(sql), _) => println!("  {} {}: {sql}", "ok".green(), item.name),
            (_, Some(err)) => println!("  {} {}: {err}", "error".red(), item.name),
            _ => {}
        }
    }
}

async fn cmd_filters(path: &Path, table: &str, json: bool) -> Result<bool> {
    let store = JsonFileSkillConfigStore::new(path);
    let config = store
        .load()
        .await?
        .ok_or_else(|| anyhow!("no skill config at {}", path.display()))?;
    let table_config = config
        .table(table)
        .ok_or_else(|| anyhow!("skill config has no entry for table `{table}`"))?;
    let report = filters_report(table, table_config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(report.is_clean());
    }
    print_items("Default filters", &report.filters);
    print_items("Metrics", &report.metrics);
    match &report.where_clause {
        Some(w) => println!("{} {w}", "WHERE".bold()),
        None => println!("{}", "no WHERE clause".dimmed()),
    }
    Ok(report.is_clean())
}

// ============================================================================
// template
// ============================================================================

fn missing_template_reason(archetype: QueryArchetype) -> String {
    match archetype {
        QueryArchetype::KpiGrouped => "kpi_grouped needs --dimension".to_string(),
        QueryArchetype::TrendTime => "trend_time needs --time".to_string(),
        QueryArchetype::Distribution => "distribution needs --metric".to_string(),
        other => format!("{other} has no template; it is answered with freeform SQL"),
    }
}

fn cmd_template(
    table: &str,
    archetype: QueryArchetype,
    columns: &TemplateColumns,
    max_rows: usize,
    where_clause: Option<&str>,
    json: bool,
) -> Result<bool> {
    let Some(sql) = build_template_sql(table, archetype, columns, max_rows, where_clause) else {
        bail!(missing_template_reason(archetype));
    };
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({"archetype": archetype, "sql": sql}))?
        );
    } else {
        println!("{sql}");
    }
    Ok(true)
}
