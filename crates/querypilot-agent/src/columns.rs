//! Semantic column resolution.
//!
//! A template needs "the time column" or "the amount column", not a name.
//! Sources answer that question in order: the user's declared field mapping
//! first, then name/type heuristics over the digest. Both sit behind
//! [`SemanticColumnSource`] so callers never care which one answered.

use serde::{Deserialize, Serialize};

use crate::digest::TableColumns;
use crate::skill_config::FieldMapping;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    OrderId,
    UserId,
    Time,
    Amount,
    Dimension,
}

pub trait SemanticColumnSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// A column of `table` playing `role`, if this source knows one.
    fn resolve(&self, role: ColumnRole, table: &TableColumns, input: &str) -> Option<String>;
}

// ============================================================================
// Mapping source
// ============================================================================

/// Columns the user declared in their skill configuration.
#[derive(Debug, Clone, Default)]
pub struct MappingColumnSource {
    mapping: FieldMapping,
}

impl MappingColumnSource {
    pub fn new(mapping: FieldMapping) -> Self {
        Self { mapping }
    }
}

impl SemanticColumnSource for MappingColumnSource {
    fn name(&self) -> &'static str {
        "mapping"
    }

    fn resolve(&self, role: ColumnRole, table: &TableColumns, _input: &str) -> Option<String> {
        let declared = match role {
            ColumnRole::OrderId => &self.mapping.order_id,
            ColumnRole::UserId => &self.mapping.user_id,
            ColumnRole::Time => &self.mapping.time,
            ColumnRole::Amount => &self.mapping.amount,
            ColumnRole::Dimension => &self.mapping.dimension,
        };
        let declared = declared.as_deref().map(str::trim).filter(|c| !c.is_empty())?;
        if table.columns.is_empty() {
            return Some(declared.to_string());
        }
        // A stale mapping pointing at a dropped column is ignored.
        table.column(declared).map(|c| c.name.clone())
    }
}

// ============================================================================
// Heuristic source
// ============================================================================

const TIME_HINTS: &[&str] = &[
    "time", "date", "_at", "timestamp", "created", "day", "dt", "时间", "日期",
];
const AMOUNT_HINTS: &[&str] = &[
    "amount", "price", "revenue", "gmv", "sales", "total", "金额", "价格", "销售额", "收入",
];
const ORDER_ID_HINTS: &[&str] = &["order_id", "orderid", "order_no", "订单号", "订单id", "订单编号"];
const USER_ID_HINTS: &[&str] = &[
    "user_id", "userid", "customer_id", "buyer_id", "uid", "用户id", "客户id", "会员id",
];
const DIMENSION_HINTS: &[&str] = &[
    "city", "region", "province", "country", "category", "channel", "status", "type", "segment",
    "城市", "地区", "省份", "类别", "品类", "渠道", "状态",
];

/// Guesses from column names and types when nothing was declared.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicColumnSource;

fn is_temporal_type(data_type: &str) -> bool {
    let t = data_type.to_ascii_uppercase();
    t.contains("DATE") || t.contains("TIME")
}

fn is_numeric_type(data_type: &str) -> bool {
    let t = data_type.to_ascii_uppercase();
    ["INT", "DECIMAL", "NUMERIC", "DOUBLE", "FLOAT", "REAL"]
        .iter()
        .any(|k| t.contains(k))
}

fn is_text_type(data_type: &str) -> bool {
    let t = data_type.to_ascii_uppercase();
    t.contains("CHAR") || t.contains("TEXT") || t.contains("STRING") || t == "ENUM"
}

fn name_has_hint(name: &str, hints: &[&str]) -> bool {
    let lower = name.to_lowercase();
    hints.iter().any(|h| lower.contains(h))
}

impl HeuristicColumnSource {
    /// A column whose name appears verbatim in the question, longest first.
    fn mentioned<'a>(
        table: &'a TableColumns,
        input: &str,
        accept: impl Fn(&str) -> bool,
    ) -> Option<&'a str> {
        let haystack = input.to_lowercase();
        table
            .columns
            .iter()
            .filter(|c| c.name.chars().count() >= 2 && accept(&c.data_type))
            .filter(|c| haystack.contains(&c.name.to_lowercase()))
            .max_by_key(|c| c.name.chars().count())
            .map(|c| c.name.as_str())
    }
}

impl SemanticColumnSource for HeuristicColumnSource {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn resolve(&self, role: ColumnRole, table: &TableColumns, input: &str) -> Option<String> {
        let cols = &table.columns;
        let found = match role {
            ColumnRole::Time => Self::mentioned(table, input, is_temporal_type)
                .or_else(|| {
                    cols.iter()
                        .find(|c| is_temporal_type(&c.data_type))
                        .map(|c| c.name.as_str())
                })
                .or_else(|| {
                    cols.iter()
                        .find(|c| name_has_hint(&c.name, TIME_HINTS))
                        .map(|c| c.name.as_str())
                }),
            ColumnRole::Amount => Self::mentioned(table, input, is_numeric_type).or_else(|| {
                cols.iter()
                    .find(|c| is_numeric_type(&c.data_type) && name_has_hint(&c.name, AMOUNT_HINTS))
                    .map(|c| c.name.as_str())
            }),
            ColumnRole::OrderId => cols
                .iter()
                .find(|c| name_has_hint(&c.name, ORDER_ID_HINTS))
                .map(|c| c.name.as_str()),
            ColumnRole::UserId => cols
                .iter()
                .find(|c| name_has_hint(&c.name, USER_ID_HINTS))
                .map(|c| c.name.as_str()),
            ColumnRole::Dimension => Self::mentioned(table, input, |t| !is_temporal_type(t))
                .filter(|name| {
                    !name_has_hint(name, ORDER_ID_HINTS) && !name_has_hint(name, USER_ID_HINTS)
                })
                .or_else(|| {
                    cols.iter()
                        .find(|c| is_text_type(&c.data_type) && name_has_hint(&c.name, DIMENSION_HINTS))
                        .map(|c| c.name.as_str())
                }),
        };
        found.map(str::to_string)
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Consults sources in order; the first answer wins.
pub struct ColumnResolver {
    sources: Vec<Box<dyn SemanticColumnSource>>,
}

impl ColumnResolver {
    pub fn new(sources: Vec<Box<dyn SemanticColumnSource>>) -> Self {
        Self { sources }
    }

    /// Declared mapping (if any), then heuristics.
    pub fn for_mapping(mapping: Option<&FieldMapping>) -> Self {
        let mut sources: Vec<Box<dyn SemanticColumnSource>> = Vec::new();
        if let Some(mapping) = mapping {
            sources.push(Box::new(MappingColumnSource::new(mapping.clone())));
        }
        sources.push(Box::new(HeuristicColumnSource));
        Self::new(sources)
    }

    pub fn resolve(&self, role: ColumnRole, table: &TableColumns, input: &str) -> Option<String> {
        self.sources.iter().find_map(|source| {
            let found = source.resolve(role, table, input)?;
            tracing::debug!(source = source.name(), ?role, column = %found, "resolved column");
            Some(found)
        })
    }
}
