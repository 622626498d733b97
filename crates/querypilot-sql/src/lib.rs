//! Querypilot SQL layer
//!
//! Everything in this crate is pure: no engine, no network, no async. It is
//! the part of the pipeline that decides what SQL is *allowed* to reach the
//! analytical engine and how config-authored fragments are rendered.
//!
//! ```text
//! ┌──────────────────────┐     ┌──────────────────────┐
//! │ user skill config    │     │ model-generated SQL  │
//! │ (filters, metrics)   │     │ (freeform tool call) │
//! └──────────┬───────────┘     └──────────┬───────────┘
//!            │ filters                    │
//!            ▼                            │
//! ┌──────────────────────┐                │
//! │ templates            │                │
//! │ (per archetype)      │                │
//! └──────────┬───────────┘                │
//!            └──────────────┬─────────────┘
//!                           ▼
//!                ┌──────────────────────┐
//!                │ policy               │
//!                │ read-only, 1 stmt,   │
//!                │ allowlist, row cap   │
//!                └──────────┬───────────┘
//!                           ▼
//!                       execution
//! ```
//!
//! - [`policy`]: static validation + normalization of candidate SQL, on the
//!   `sqlparser` AST.
//! - [`filters`]: `FilterExpr` / `MetricDefinition` → injection-safe fragments.
//! - [`templates`]: per-archetype SQL builders.
//! - [`quote`]: identifier and literal quoting shared by the above.

pub mod filters;
pub mod policy;
pub mod quote;
mod scan;
mod sources;
pub mod templates;

pub use filters::{
    compile_filter, compile_metric_expression, compile_where_clause, Aggregation, FilterError,
    FilterExpr, FilterOp, FilterValue, MetricDefinition, RelativeTimeValue, ScalarValue,
    TimeDirection, TimeUnit,
};
pub use policy::{validate_sql, PolicyError, PolicyReason, SqlPolicy, SqlPolicyResult};
pub use quote::{quote_ident, quote_literal, render_ident};
pub use templates::{build_template_sql, MetricAggregate, QueryArchetype, TemplateColumns};
