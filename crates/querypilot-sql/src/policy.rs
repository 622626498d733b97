//! Read-only SQL policy.
//!
//! Every statement that reaches the engine passes through [`validate_sql`],
//! whether it came from a template or from the model. The checks run in a
//! fixed order and the first failure wins:
//!
//! 1. strip comments, normalize `` `ident` `` quoting, rewrite
//!    `<timestamp> - INTERVAL` into `CAST(<timestamp> AS TIMESTAMP) - INTERVAL`
//!    (outside string literals)
//! 2. collapse whitespace; empty input is `EMPTY_SQL`
//! 3. more than one statement is `MULTI_STATEMENT` (one trailing `;` is fine)
//! 4. anything but `SELECT`/`WITH` is `NOT_SELECT`
//! 5. any write/DDL keyword as a whole word is `WRITE_KEYWORD`
//! 6. text `sqlparser` cannot parse is `UNPARSEABLE_SQL`; a parsed statement
//!    that is not a plain query (or writes via `SELECT INTO`) is `NOT_SELECT`
//! 7. any row source outside the allowlist is `TABLE_NOT_ALLOWED`: tables,
//!    table functions not in [`SAFE_TABLE_FUNCTIONS`], quoted file paths
//! 8. the top-level `LIMIT` is appended, or replaced with `max_rows` unless it
//!    is a single integer literal within the cap
//!
//! Validation is idempotent: feeding `normalized_sql` back in yields the same
//! text and no warnings.

use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use sqlparser::ast::{Expr, Query, SetExpr, Statement, Value};
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;

use crate::scan::{self, Token};
use crate::sources::{last_part, Source, Sources};

pub const WRITE_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "attach", "detach", "copy", "export",
    "pragma", "vacuum",
];

/// Table functions that only generate rows from their arguments. Any other
/// `FROM name(...)` can read files or remote data and is denied.
pub const SAFE_TABLE_FUNCTIONS: &[&str] = &["range", "generate_series", "unnest"];

/// Top-level keywords that end a `LIMIT` expression.
const LIMIT_TERMINATORS: &[&str] = &["offset", "fetch", "for"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyReason {
    EmptySql,
    MultiStatement,
    NotSelect,
    WriteKeyword,
    UnparseableSql,
    TableNotAllowed,
}

impl PolicyReason {
    pub fn code(&self) -> &'static str {
        match self {
            PolicyReason::EmptySql => "EMPTY_SQL",
            PolicyReason::MultiStatement => "MULTI_STATEMENT",
            PolicyReason::NotSelect => "NOT_SELECT",
            PolicyReason::WriteKeyword => "WRITE_KEYWORD",
            PolicyReason::UnparseableSql => "UNPARSEABLE_SQL",
            PolicyReason::TableNotAllowed => "TABLE_NOT_ALLOWED",
        }
    }
}

impl fmt::Display for PolicyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A policy rejection with a machine-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Policy denied [{reason}]: {detail}")]
pub struct PolicyError {
    pub reason: PolicyReason,
    pub detail: String,
    /// Offending sources, only populated for `TABLE_NOT_ALLOWED`.
    pub tables: Vec<String>,
}

impl PolicyError {
    fn new(reason: PolicyReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
            tables: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlPolicy {
    pub allowed_tables: Vec<String>,
    pub max_rows: usize,
}

impl SqlPolicy {
    pub fn new<I, S>(allowed_tables: I, max_rows: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_tables: allowed_tables.into_iter().map(Into::into).collect(),
            max_rows: max_rows.max(1),
        }
    }

    fn allows(&self, table: &str) -> bool {
        let wanted = table.to_lowercase();
        self.allowed_tables
            .iter()
            .any(|t| last_segment(t).to_lowercase() == wanted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlPolicyResult {
    pub normalized_sql: String,
    pub warnings: Vec<String>,
}

pub fn validate_sql(sql: &str, policy: &SqlPolicy) -> Result<SqlPolicyResult, PolicyError> {
    let mut warnings = Vec::new();

    let stripped = scan::strip_comments(sql);
    let (requoted, backticks) = scan::normalize_backticks(&stripped);
    if backticks > 0 {
        warnings.push(format!("normalized {backticks} backtick-quoted identifier(s)"));
    }
    let (rewritten, intervals) = rewrite_interval_arithmetic(&requoted);
    if intervals > 0 {
        warnings.push(format!(
            "cast {intervals} timestamp operand(s) before INTERVAL subtraction"
        ));
    }

    let collapsed = scan::collapse_whitespace(&rewritten);
    if collapsed.is_empty() {
        return Err(PolicyError::new(PolicyReason::EmptySql, "SQL is empty"));
    }

    let statement = collapsed
        .strip_suffix(';')
        .map(str::trim_end)
        .unwrap_or(collapsed.as_str());
    if statement.is_empty() {
        return Err(PolicyError::new(PolicyReason::EmptySql, "SQL is empty"));
    }

    let tokens = scan::tokenize(statement);
    if tokens.iter().any(|t| t.is_sym(';')) {
        return Err(PolicyError::new(
            PolicyReason::MultiStatement,
            "only a single statement is allowed",
        ));
    }

    let starts_ok = tokens
        .first()
        .is_some_and(|t| t.is_word("select") || t.is_word("with"));
    if !starts_ok {
        return Err(PolicyError::new(
            PolicyReason::NotSelect,
            "only SELECT or WITH queries are allowed",
        ));
    }

    if let Some(m) = write_keyword_re().find(statement) {
        return Err(PolicyError::new(
            PolicyReason::WriteKeyword,
            format!("write keyword `{}` is not allowed", m.as_str().to_uppercase()),
        ));
    }

    let parsed = parse_single_query(statement)?;
    let Statement::Query(query) = &parsed else {
        return Err(PolicyError::new(
            PolicyReason::NotSelect,
            "only SELECT or WITH queries are allowed",
        ));
    };

    let denied = disallowed_sources(&Sources::collect(&parsed), policy);
    if !denied.is_empty() {
        return Err(PolicyError {
            reason: PolicyReason::TableNotAllowed,
            detail: format!("table(s) not allowed: {}", denied.join(", ")),
            tables: denied,
        });
    }

    let normalized_sql = enforce_row_cap(statement, &tokens, query, policy.max_rows, &mut warnings);
    Ok(SqlPolicyResult {
        normalized_sql,
        warnings,
    })
}

/// Parse `statement` as exactly one read-only query.
fn parse_single_query(statement: &str) -> Result<Statement, PolicyError> {
    let mut statements = Parser::parse_sql(&DuckDbDialect {}, statement).map_err(|e| {
        PolicyError::new(
            PolicyReason::UnparseableSql,
            format!("SQL could not be parsed: {e}"),
        )
    })?;
    if statements.len() > 1 {
        return Err(PolicyError::new(
            PolicyReason::MultiStatement,
            "only a single statement is allowed",
        ));
    }
    let Some(parsed) = statements.pop() else {
        return Err(PolicyError::new(PolicyReason::EmptySql, "SQL is empty"));
    };
    match &parsed {
        Statement::Query(query) if selects_into(&query.body) => Err(PolicyError::new(
            PolicyReason::NotSelect,
            "SELECT INTO writes a table and is not allowed",
        )),
        Statement::Query(_) => Ok(parsed),
        _ => Err(PolicyError::new(
            PolicyReason::NotSelect,
            "only SELECT or WITH queries are allowed",
        )),
    }
}

fn selects_into(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_some(),
        SetExpr::Query(query) => selects_into(&query.body),
        SetExpr::SetOperation { left, right, .. } => selects_into(left) || selects_into(right),
        _ => false,
    }
}

/// Sources the policy refuses, in order of appearance, case-insensitively
/// deduplicated.
fn disallowed_sources(sources: &Sources, policy: &SqlPolicy) -> Vec<String> {
    let mut seen = HashSet::new();
    sources
        .items()
        .iter()
        .filter_map(|source| match source {
            Source::Table(name) if sources.is_cte(name) => None,
            Source::Table(name) => {
                let table = last_part(name);
                (!policy.allows(&table)).then_some(table)
            }
            Source::Function(name) => {
                let function = last_part(name);
                let safe = name.0.len() == 1
                    && SAFE_TABLE_FUNCTIONS.contains(&function.to_lowercase().as_str());
                (!safe).then_some(function)
            }
            Source::File(path) => Some(path.clone()),
            Source::Other(text) => Some(text.clone()),
        })
        .filter(|offender| seen.insert(offender.to_lowercase()))
        .collect()
}

fn write_keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let pattern = format!(r"(?i)\b(?:{})\b", WRITE_KEYWORDS.join("|"));
        Regex::new(&pattern).expect("write keyword pattern is valid")
    })
}

fn interval_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?i)((?:(?:"[^"]+"|[\p{L}_][\p{L}\p{N}_$]*)\s*\.\s*)*(?:"[^"]+"|[\p{L}_][\p{L}\p{N}_$]*)(?:\s*\(\s*\))?)\s*-\s*INTERVAL\b"#,
        )
        .expect("interval pattern is valid")
    })
}

/// Some engines reject `TIMESTAMP WITH TIME ZONE - INTERVAL` (and `DATE -
/// INTERVAL` in some positions) at bind time. Casting the left operand first
/// sidesteps the whole error class. String literals are left untouched.
fn rewrite_interval_arithmetic(sql: &str) -> (String, usize) {
    let mut count = 0usize;
    let out = scan::map_outside_literals(sql, |code| {
        interval_re()
            .replace_all(code, |caps: &Captures<'_>| {
                let operand = &caps[1];
                if is_timestamp_like(operand) {
                    count += 1;
                    format!("CAST({operand} AS TIMESTAMP) - INTERVAL")
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned()
    });
    (out, count)
}

fn is_timestamp_like(operand: &str) -> bool {
    let bare = operand.trim_end_matches(|c: char| c == ')' || c == '(' || c.is_whitespace());
    let last = last_segment(bare).to_lowercase();
    matches!(
        last.as_str(),
        "now" | "today" | "current_timestamp" | "current_date" | "localtimestamp"
    ) || last.contains("time")
        || last.contains("date")
        || last.ends_with("_at")
        || last.ends_with("_ts")
        || last.contains("时间")
        || last.contains("日期")
}

/// Last dot-separated segment with quotes removed.
fn last_segment(name: &str) -> String {
    let tokens = scan::tokenize(name);
    tokens
        .iter()
        .rev()
        .find(|t| t.is_name())
        .map(Token::unquoted)
        .unwrap_or_else(|| name.trim().to_string())
}

/// Catalog tables `sql` reads, last name segment with quotes removed, in
/// order of first appearance. CTE names, table functions and file paths are
/// not tables. Unparseable SQL reads nothing.
pub fn referenced_table_names(sql: &str) -> Vec<String> {
    let Ok(statements) = Parser::parse_sql(&DuckDbDialect {}, sql) else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    statements
        .iter()
        .flat_map(|statement| Sources::collect(statement).tables())
        .filter(|table| seen.insert(table.to_lowercase()))
        .collect()
}

/// Byte span of the top-level `LIMIT` clause: the end of the keyword and the
/// end of its expression (the next top-level `OFFSET`/`FETCH`/`FOR`, or the
/// end of the statement).
fn top_level_limit(tokens: &[Token<'_>], statement_len: usize) -> Option<(usize, usize)> {
    let mut depth = 0i32;
    let mut span: Option<(usize, usize)> = None;
    for tok in tokens {
        if tok.is_sym('(') {
            depth += 1;
        } else if tok.is_sym(')') {
            depth -= 1;
        } else if depth == 0 && tok.is_word("limit") {
            span = Some((tok.end, statement_len));
        } else if depth == 0 && LIMIT_TERMINATORS.iter().any(|w| tok.is_word(w)) {
            if let Some((_, end)) = span.as_mut() {
                if *end == statement_len {
                    *end = tok.start;
                }
            }
        }
    }
    span
}

fn enforce_row_cap(
    statement: &str,
    tokens: &[Token<'_>],
    query: &Query,
    max_rows: usize,
    warnings: &mut Vec<String>,
) -> String {
    let span = top_level_limit(tokens, statement.len());
    let Some((keyword_end, value_end)) = span.filter(|_| query.fetch.is_none()) else {
        if query.fetch.is_some() || query.limit.is_some() {
            warnings.push(format!("row limit wrapped in an outer LIMIT {max_rows}"));
            return format!("SELECT * FROM ({statement}) AS capped LIMIT {max_rows}");
        }
        warnings.push(format!("LIMIT {max_rows} appended"));
        return format!("{statement} LIMIT {max_rows}");
    };

    let literal = match &query.limit {
        Some(Expr::Value(Value::Number(n, _))) => n.parse::<u64>().ok(),
        _ => None,
    };
    match literal {
        Some(n) if n <= max_rows as u64 => return statement.to_string(),
        Some(n) => warnings.push(format!("LIMIT {n} exceeds the row cap; clamped to {max_rows}")),
        None => warnings.push(format!(
            "invalid LIMIT `{}` replaced with {max_rows}",
            statement[keyword_end..value_end].trim()
        )),
    }

    let head = &statement[..keyword_end];
    let tail = statement[value_end..].trim_start();
    if tail.is_empty() {
        format!("{head} {max_rows}")
    } else {
        format!("{head} {max_rows} {tail}")
    }
}
