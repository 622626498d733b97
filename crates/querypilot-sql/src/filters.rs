//! Declarative filters and metrics → SQL fragments.
//!
//! Filters and metrics come from user-authored skill configuration. The
//! policy validator only checks model output for write/DDL and allowlist
//! problems, so this module is the only thing standing between a config
//! value and the engine: every identifier goes through [`quote_ident`] and
//! every value through [`quote_literal`] or a numeric renderer.

use serde::{Deserialize, Serialize};

use crate::quote::{quote_ident, quote_literal};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("filter column is empty")]
    EmptyColumn,
    #[error("operator `{op}` cannot take {shape} value (column {column})")]
    IncompatibleValue {
        column: String,
        op: &'static str,
        shape: &'static str,
    },
    #[error("`{op}` needs at least one value (column {column})")]
    EmptyList { column: String, op: &'static str },
    #[error("relative time amount must be positive (column {column})")]
    InvalidAmount { column: String },
    #[error("non-finite number in filter on column {column}")]
    NonFiniteNumber { column: String },
    #[error("metric aggregation `{aggregation}` needs a column")]
    MissingMetricColumn { aggregation: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not_in")]
    NotIn,
    #[serde(rename = "contains")]
    Contains,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::In => "in",
            FilterOp::NotIn => "not_in",
            FilterOp::Contains => "contains",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Day,
    Week,
    Month,
    Year,
}

impl TimeUnit {
    fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Day => "day",
            TimeUnit::Week => "week",
            TimeUnit::Month => "month",
            TimeUnit::Year => "year",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeDirection {
    #[default]
    Past,
    Future,
}

/// `amount` units before (past) or after (future) now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelativeTimeValue {
    pub unit: TimeUnit,
    pub amount: u32,
    #[serde(default)]
    pub direction: TimeDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Relative(RelativeTimeValue),
    List(Vec<ScalarValue>),
    Scalar(ScalarValue),
}

impl FilterValue {
    fn shape(&self) -> &'static str {
        match self {
            FilterValue::Relative(_) => "a relative-time",
            FilterValue::List(_) => "a list",
            FilterValue::Scalar(_) => "a scalar",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterExpr {
    pub column: String,
    pub op: FilterOp,
    pub value: FilterValue,
}

impl FilterExpr {
    pub fn new(column: impl Into<String>, op: FilterOp, value: FilterValue) -> Self {
        Self {
            column: column.into(),
            op,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Count,
    CountDistinct,
    Avg,
    Min,
    Max,
}

impl Aggregation {
    fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Count => "count",
            Aggregation::CountDistinct => "count_distinct",
            Aggregation::Avg => "avg",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
        }
    }
}

/// A named business metric from the user's skill configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub aggregation: Aggregation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterExpr>,
}

fn render_scalar(column: &str, value: &ScalarValue) -> Result<String, FilterError> {
    match value {
        ScalarValue::Bool(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
        ScalarValue::Int(i) => Ok(i.to_string()),
        ScalarValue::Float(f) if f.is_finite() => Ok(format!("{f:?}")),
        ScalarValue::Float(_) => Err(FilterError::NonFiniteNumber {
            column: column.to_string(),
        }),
        ScalarValue::Text(s) => Ok(quote_literal(s)),
    }
}

fn render_relative(column: &str, value: &RelativeTimeValue) -> Result<String, FilterError> {
    if value.amount == 0 {
        return Err(FilterError::InvalidAmount {
            column: column.to_string(),
        });
    }
    let sign = match value.direction {
        TimeDirection::Past => '-',
        TimeDirection::Future => '+',
    };
    Ok(format!(
        "NOW() {sign} INTERVAL '{} {}'",
        value.amount,
        value.unit.as_str()
    ))
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Compile one filter into a `column OP value` clause.
pub fn compile_filter(filter: &FilterExpr) -> Result<String, FilterError> {
    let column = filter.column.trim();
    if column.is_empty() {
        return Err(FilterError::EmptyColumn);
    }
    let ident = quote_ident(column);
    let incompatible = || FilterError::IncompatibleValue {
        column: column.to_string(),
        op: filter.op.as_str(),
        shape: filter.value.shape(),
    };

    match (filter.op, &filter.value) {
        (FilterOp::In | FilterOp::NotIn, FilterValue::List(items)) => {
            if items.is_empty() {
                return Err(FilterError::EmptyList {
                    column: column.to_string(),
                    op: filter.op.as_str(),
                });
            }
            let rendered = items
                .iter()
                .map(|v| render_scalar(column, v))
                .collect::<Result<Vec<_>, _>>()?;
            let keyword = if filter.op == FilterOp::In {
                "IN"
            } else {
                "NOT IN"
            };
            Ok(format!("{ident} {keyword} ({})", rendered.join(", ")))
        }
        (FilterOp::In | FilterOp::NotIn, _) | (_, FilterValue::List(_)) => Err(incompatible()),
        (FilterOp::Contains, FilterValue::Scalar(value)) => {
            let needle = match value {
                ScalarValue::Text(s) => s.clone(),
                ScalarValue::Float(f) if !f.is_finite() => {
                    return Err(FilterError::NonFiniteNumber {
                        column: column.to_string(),
                    })
                }
                other => render_scalar(column, other)?,
            };
            Ok(format!(
                "CAST({ident} AS VARCHAR) ILIKE {} ESCAPE '\\'",
                quote_literal(&format!("%{}%", escape_like(&needle)))
            ))
        }
        (FilterOp::Contains, FilterValue::Relative(_)) => Err(incompatible()),
        (op, FilterValue::Scalar(value)) => Ok(format!(
            "{ident} {} {}",
            op.as_str(),
            render_scalar(column, value)?
        )),
        (op, FilterValue::Relative(value)) => Ok(format!(
            "{ident} {} {}",
            op.as_str(),
            render_relative(column, value)?
        )),
    }
}

/// Compile a filter list into one `AND`-joined condition (no `WHERE`).
/// An empty list compiles to `None`.
pub fn compile_where_clause(filters: &[FilterExpr]) -> Result<Option<String>, FilterError> {
    if filters.is_empty() {
        return Ok(None);
    }
    let clauses = filters
        .iter()
        .map(compile_filter)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(clauses.join(" AND ")))
}

/// Compile a metric into an aggregate expression, e.g.
/// `SUM("amount") FILTER (WHERE "status" = 'paid')`.
pub fn compile_metric_expression(metric: &MetricDefinition) -> Result<String, FilterError> {
    let column = metric
        .column
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    let base = match (metric.aggregation, column) {
        (Aggregation::Count, None) => "COUNT(*)".to_string(),
        (Aggregation::Count, Some(c)) => format!("COUNT({})", quote_ident(c)),
        (Aggregation::CountDistinct, Some(c)) => format!("COUNT(DISTINCT {})", quote_ident(c)),
        (Aggregation::Sum, Some(c)) => format!("SUM({})", quote_ident(c)),
        (Aggregation::Avg, Some(c)) => format!("AVG({})", quote_ident(c)),
        (Aggregation::Min, Some(c)) => format!("MIN({})", quote_ident(c)),
        (Aggregation::Max, Some(c)) => format!("MAX({})", quote_ident(c)),
        (agg, None) => {
            return Err(FilterError::MissingMetricColumn {
                aggregation: agg.as_str(),
            })
        }
    };
    match compile_where_clause(&metric.filters)? {
        Some(cond) => Ok(format!("{base} FILTER (WHERE {cond})")),
        None => Ok(base),
    }
}
