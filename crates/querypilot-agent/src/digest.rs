//! Schema digest: compact, size-bounded table/column context for the model.
//!
//! ```text
//! Table: orders
//! Columns: order_id (BIGINT), paid_at (TIMESTAMP), amount (DECIMAL(18,2))
//!
//! Table: refunds
//! Columns: (unavailable)
//! ```
//!
//! The digest is only ever prompt context. It is never executed.

use querypilot_sql::{quote_literal, QueryArchetype};

use crate::context::{ColumnInfo, EngineValue, QueryOutput, SkillRuntime};
use crate::error::SkillError;

const UNAVAILABLE: &str = "(unavailable)";

/// One table parsed back out of a digest.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableColumns {
    pub table: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableColumns {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name.trim()))
    }
}

/// Tables whose name matches `pattern` (SQL `LIKE`).
pub async fn discover_tables(
    runtime: &SkillRuntime,
    pattern: &str,
) -> Result<Vec<String>, SkillError> {
    let sql = format!(
        "SELECT table_name FROM information_schema.tables WHERE table_name LIKE {} ORDER BY table_name",
        quote_literal(pattern)
    );
    let (output, _) = runtime.execute(&sql).await?;
    Ok((0..output.rows.len())
        .filter_map(|row| text_cell(&output, row, "table_name", 0))
        .collect())
}

/// Build the digest for `tables`, one introspection query per table.
///
/// A table whose introspection fails gets a placeholder block; only
/// cancellation aborts the whole digest.
pub async fn build_schema_digest(
    runtime: &SkillRuntime,
    tables: &[String],
    max_chars: usize,
) -> Result<String, SkillError> {
    let mut blocks = Vec::with_capacity(tables.len());
    for table in tables {
        let sql = format!(
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_name = {} ORDER BY ordinal_position",
            quote_literal(table)
        );
        let columns = match runtime.execute(&sql).await {
            Ok((output, _)) => normalize_columns(&output),
            Err(SkillError::Cancelled) => return Err(SkillError::Cancelled),
            Err(e) => {
                tracing::warn!(table = %table, error = %e, "schema introspection failed");
                Vec::new()
            }
        };
        blocks.push(render_block(table, &columns));
    }
    Ok(cap_chars(&blocks.join("\n\n"), max_chars))
}

fn normalize_columns(output: &QueryOutput) -> Vec<ColumnInfo> {
    (0..output.rows.len())
        .filter_map(|row| {
            let name = text_cell(output, row, "column_name", 0)?;
            let data_type =
                text_cell(output, row, "data_type", 1).unwrap_or_else(|| "UNKNOWN".to_string());
            Some(ColumnInfo::new(name, data_type.to_uppercase()))
        })
        .collect()
}

/// Cell as text, by column name or else by position.
fn text_cell(output: &QueryOutput, row: usize, name: &str, fallback_idx: usize) -> Option<String> {
    let value = output
        .cell(row, name)
        .or_else(|| output.rows.get(row)?.get(fallback_idx))?;
    match value {
        EngineValue::Text(s) | EngineValue::Temporal(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        _ => None,
    }
}

pub fn render_block(table: &str, columns: &[ColumnInfo]) -> String {
    let list = if columns.is_empty() {
        UNAVAILABLE.to_string()
    } else {
        columns
            .iter()
            .map(|c| format!("{} ({})", c.name, c.data_type))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("Table: {table}\nColumns: {list}")
}

/// Truncate to at most `max_chars` characters, marking the cut with `…`.
pub fn cap_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(1);
    let mut out: String = text.chars().take(keep).collect();
    out.push('…');
    out
}

/// Parse a digest back into per-table column lists. Unknown lines are
/// ignored; a truncated trailing column is dropped.
pub fn parse_digest(digest: &str) -> Vec<TableColumns> {
    let mut tables: Vec<TableColumns> = Vec::new();
    for line in digest.lines() {
        let line = line.trim();
        if let Some(name) = line.strip_prefix("Table:") {
            tables.push(TableColumns {
                table: name.trim().to_string(),
                columns: Vec::new(),
            });
        } else if let Some(list) = line.strip_prefix("Columns:") {
            let Some(current) = tables.last_mut() else {
                continue;
            };
            if list.trim() == UNAVAILABLE {
                continue;
            }
            current.columns.extend(split_top_level(list).filter_map(parse_column));
        }
    }
    tables
}

fn split_top_level(list: &str) -> impl Iterator<Item = &str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (idx, ch) in list.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&list[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&list[start..]);
    parts.into_iter()
}

fn parse_column(item: &str) -> Option<ColumnInfo> {
    let item = item.trim();
    let body = item.strip_suffix(')')?;
    let open = body.find(" (")?;
    let name = body[..open].trim();
    let data_type = body[open + 2..].trim();
    (!name.is_empty() && !data_type.is_empty()).then(|| ColumnInfo::new(name, data_type))
}

/// One-line hint listing which columns a template needs, for clarification
/// messages.
pub fn column_hint(table: &TableColumns, archetype: QueryArchetype) -> String {
    let wanted: Vec<&str> = table
        .columns
        .iter()
        .filter(|c| match archetype {
            QueryArchetype::TrendTime => {
                let t = c.data_type.to_ascii_uppercase();
                t.contains("DATE") || t.contains("TIME")
            }
            _ => true,
        })
        .map(|c| c.name.as_str())
        .take(8)
        .collect();
    if wanted.is_empty() {
        table
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .take(8)
            .collect::<Vec<_>>()
            .join(", ")
    } else {
        wanted.join(", ")
    }
}
