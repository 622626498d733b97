//! Per-archetype SQL templates.
//!
//! A template either produces a complete statement or returns `None`. `None`
//! is not an error: it tells the caller to fall back to freeform generation
//! (missing required column, or an archetype with no template).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::quote::{quote_ident, render_ident};

/// Analytical query shapes with a known-safe SQL template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryArchetype {
    KpiSingle,
    KpiGrouped,
    TrendTime,
    Distribution,
    #[serde(rename = "topn")]
    TopN,
    Comparison,
    Unknown,
}

impl QueryArchetype {
    /// Known archetypes in tie-break order.
    pub const ALL: [QueryArchetype; 6] = [
        QueryArchetype::KpiSingle,
        QueryArchetype::KpiGrouped,
        QueryArchetype::TrendTime,
        QueryArchetype::Distribution,
        QueryArchetype::TopN,
        QueryArchetype::Comparison,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryArchetype::KpiSingle => "kpi_single",
            QueryArchetype::KpiGrouped => "kpi_grouped",
            QueryArchetype::TrendTime => "trend_time",
            QueryArchetype::Distribution => "distribution",
            QueryArchetype::TopN => "topn",
            QueryArchetype::Comparison => "comparison",
            QueryArchetype::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .chain([QueryArchetype::Unknown])
            .find(|a| a.as_str() == s)
    }

    /// `true` when a template exists for this archetype at all.
    pub fn has_template(&self) -> bool {
        !matches!(self, QueryArchetype::Comparison | QueryArchetype::Unknown)
    }
}

impl fmt::Display for QueryArchetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A precompiled aggregate, typically from a configured metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricAggregate {
    pub alias: String,
    pub expression: String,
}

/// Columns a template may need. Which ones are required depends on the
/// archetype.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateColumns {
    pub dimension: Option<String>,
    pub time: Option<String>,
    pub metric: Option<String>,
    pub aggregate: Option<MetricAggregate>,
}

fn where_part(where_clause: Option<&str>) -> String {
    match where_clause.map(str::trim).filter(|w| !w.is_empty()) {
        Some(w) => format!(" WHERE {w}"),
        None => String::new(),
    }
}

fn non_empty(col: &Option<String>) -> Option<&str> {
    col.as_deref().map(str::trim).filter(|c| !c.is_empty())
}

pub fn build_template_sql(
    table: &str,
    archetype: QueryArchetype,
    columns: &TemplateColumns,
    max_rows: usize,
    where_clause: Option<&str>,
) -> Option<String> {
    let table = render_ident(table.trim());
    let filter = where_part(where_clause);
    let max_rows = max_rows.max(1);

    match archetype {
        QueryArchetype::KpiSingle => {
            let select = match &columns.aggregate {
                Some(agg) => format!("{} AS {}", agg.expression, quote_ident(&agg.alias)),
                None => "COUNT(*) AS total_count".to_string(),
            };
            Some(format!(
                "SELECT {select} FROM {table}{filter} LIMIT {max_rows}"
            ))
        }
        QueryArchetype::KpiGrouped => {
            let dim = render_ident(non_empty(&columns.dimension)?);
            let (value, alias) = match &columns.aggregate {
                Some(agg) => (agg.expression.clone(), quote_ident(&agg.alias)),
                None => ("COUNT(*)".to_string(), "row_count".to_string()),
            };
            Some(format!(
                "SELECT {dim}, {value} AS {alias} FROM {table}{filter} \
                 GROUP BY {dim} ORDER BY {alias} DESC LIMIT {max_rows}"
            ))
        }
        QueryArchetype::TrendTime => {
            let time = render_ident(non_empty(&columns.time)?);
            let (value, alias) = match &columns.aggregate {
                Some(agg) => (agg.expression.clone(), quote_ident(&agg.alias)),
                None => ("COUNT(*)".to_string(), "row_count".to_string()),
            };
            Some(format!(
                "SELECT DATE_TRUNC('day', CAST({time} AS TIMESTAMP)) AS day_bucket, {value} AS {alias} \
                 FROM {table}{filter} GROUP BY 1 ORDER BY 1 LIMIT {max_rows}"
            ))
        }
        QueryArchetype::Distribution => {
            let m = render_ident(non_empty(&columns.metric)?);
            Some(format!(
                "SELECT AVG({m}) AS mean_value, MEDIAN({m}) AS median_value, \
                 STDDEV_SAMP({m}) AS stddev_value, MIN({m}) AS min_value, MAX({m}) AS max_value \
                 FROM {table}{filter} LIMIT {max_rows}"
            ))
        }
        QueryArchetype::TopN => Some(format!("SELECT * FROM {table}{filter} LIMIT {max_rows}")),
        QueryArchetype::Comparison | QueryArchetype::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kpi_single_counts_rows() {
        let sql = build_template_sql(
            "orders",
            QueryArchetype::KpiSingle,
            &TemplateColumns::default(),
            100,
            None,
        );
        assert_eq!(
            sql.as_deref(),
            Some("SELECT COUNT(*) AS total_count FROM orders LIMIT 100")
        );
    }

    #[test]
    fn kpi_single_uses_metric_and_where() {
        let cols = TemplateColumns {
            aggregate: Some(MetricAggregate {
                alias: "gmv".into(),
                expression: "SUM(\"amount\")".into(),
            }),
            ..Default::default()
        };
        let sql = build_template_sql(
            "orders",
            QueryArchetype::KpiSingle,
            &cols,
            10,
            Some("\"status\" = 'paid'"),
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT SUM(\"amount\") AS \"gmv\" FROM orders WHERE \"status\" = 'paid' LIMIT 10"
        );
    }

    #[test]
    fn grouped_requires_dimension() {
        assert!(build_template_sql(
            "orders",
            QueryArchetype::KpiGrouped,
            &TemplateColumns::default(),
            10,
            None
        )
        .is_none());

        let cols = TemplateColumns {
            dimension: Some("city".into()),
            ..Default::default()
        };
        assert_eq!(
            build_template_sql("orders", QueryArchetype::KpiGrouped, &cols, 10, None).unwrap(),
            "SELECT city, COUNT(*) AS row_count FROM orders GROUP BY city ORDER BY row_count DESC LIMIT 10"
        );
    }

    #[test]
    fn trend_requires_time_column() {
        assert!(build_template_sql(
            "orders",
            QueryArchetype::TrendTime,
            &TemplateColumns::default(),
            10,
            None
        )
        .is_none());

        let cols = TemplateColumns {
            time: Some("order time".into()),
            ..Default::default()
        };
        let sql = build_template_sql("orders", QueryArchetype::TrendTime, &cols, 10, None).unwrap();
        assert!(sql.starts_with("SELECT DATE_TRUNC('day', CAST(\"order time\" AS TIMESTAMP)) AS day_bucket"));
        assert!(sql.ends_with("GROUP BY 1 ORDER BY 1 LIMIT 10"));
    }

    #[test]
    fn distribution_requires_metric() {
        let cols = TemplateColumns {
            metric: Some("amount".into()),
            ..Default::default()
        };
        let sql = build_template_sql("orders", QueryArchetype::Distribution, &cols, 1, None).unwrap();
        assert!(sql.contains("MEDIAN(amount) AS median_value"));
        assert!(build_template_sql(
            "orders",
            QueryArchetype::Distribution,
            &TemplateColumns::default(),
            1,
            None
        )
        .is_none());
    }

    #[test]
    fn comparison_and_unknown_have_no_template() {
        for a in [QueryArchetype::Comparison, QueryArchetype::Unknown] {
            assert!(!a.has_template());
            assert!(build_template_sql("t", a, &TemplateColumns::default(), 5, None).is_none());
        }
    }

    #[test]
    fn archetype_names_round_trip_through_serde() {
        for a in QueryArchetype::ALL {
            let json = serde_json::to_value(a).unwrap();
            assert_eq!(json.as_str(), Some(a.as_str()));
            assert_eq!(QueryArchetype::parse(a.as_str()), Some(a));
        }
    }
}
