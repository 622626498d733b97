//! Row sources of a parsed statement.
//!
//! The walk follows `FROM`/`JOIN` items, derived tables, set operations and
//! CTE bodies. Subqueries inside expressions are reached through the AST
//! visitor, and `visit_relations` catches table names in positions the walk
//! does not model.

use std::collections::HashSet;
use std::ops::ControlFlow;

use sqlparser::ast::{
    visit_expressions, visit_relations, Expr, ObjectName, Query, SetExpr, Statement, TableFactor,
    TableWithJoins,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Source {
    /// A catalog table or view, possibly schema-qualified.
    Table(ObjectName),
    /// `name(args)` in a `FROM`/`JOIN` position.
    Function(ObjectName),
    /// A quoted path read directly, e.g. `FROM '/data/x.csv'`.
    File(String),
    /// Any other row source (`TABLE t`, `PIVOT`, ...) as written.
    Other(String),
}

#[derive(Debug, Default)]
pub(crate) struct Sources {
    ctes: HashSet<String>,
    seen: HashSet<ObjectName>,
    items: Vec<Source>,
}

impl Sources {
    pub fn collect(statement: &Statement) -> Self {
        let mut sources = Self::default();
        if let Statement::Query(query) = statement {
            sources.walk_query(query);
        }

        let _ = visit_expressions(statement, |expr| {
            if let Expr::Subquery(query)
            | Expr::InSubquery { subquery: query, .. }
            | Expr::Exists { subquery: query, .. } = expr
            {
                sources.walk_query(query);
            }
            ControlFlow::<()>::Continue(())
        });

        let _ = visit_relations(statement, |name| {
            if sources.seen.insert(name.clone()) {
                sources.items.push(Source::Table(name.clone()));
            }
            ControlFlow::<()>::Continue(())
        });

        sources
    }

    /// Every source in order of appearance, duplicates included.
    pub fn items(&self) -> &[Source] {
        &self.items
    }

    /// `true` for an unqualified name bound by a `WITH` clause.
    pub fn is_cte(&self, name: &ObjectName) -> bool {
        matches!(name.0.as_slice(), [only] if self.ctes.contains(&only.value.to_lowercase()))
    }

    /// Catalog tables, last name segment, CTEs excluded, first spelling kept.
    pub fn tables(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.items
            .iter()
            .filter_map(|source| match source {
                Source::Table(name) if !self.is_cte(name) => Some(last_part(name)),
                _ => None,
            })
            .filter(|table| seen.insert(table.to_lowercase()))
            .collect()
    }

    fn walk_query(&mut self, query: &Query) {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.ctes.insert(cte.alias.name.value.to_lowercase());
                self.walk_query(&cte.query);
            }
        }
        self.walk_set_expr(&query.body);
    }

    fn walk_set_expr(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => {
                for item in &select.from {
                    self.walk_from(item);
                }
            }
            SetExpr::Query(query) => self.walk_query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.walk_set_expr(left);
                self.walk_set_expr(right);
            }
            SetExpr::Values(_) => {}
            other => self.items.push(Source::Other(other.to_string())),
        }
    }

    fn walk_from(&mut self, item: &TableWithJoins) {
        self.walk_factor(&item.relation);
        for join in &item.joins {
            self.walk_factor(&join.relation);
        }
    }

    fn walk_factor(&mut self, factor: &TableFactor) {
        match factor {
            TableFactor::Table { name, args, .. } => {
                self.seen.insert(name.clone());
                let source = if name.0.iter().any(|part| part.quote_style == Some('\'')) {
                    Source::File(
                        name.0
                            .iter()
                            .map(|part| part.value.as_str())
                            .collect::<Vec<_>>()
                            .join("."),
                    )
                } else if args.is_some() {
                    Source::Function(name.clone())
                } else {
                    Source::Table(name.clone())
                };
                self.items.push(source);
            }
            TableFactor::Derived { subquery, .. } => self.walk_query(subquery),
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.walk_from(table_with_joins),
            // Rows come from the argument expressions alone.
            TableFactor::UNNEST { .. } => {}
            other => self.items.push(Source::Other(other.to_string())),
        }
    }
}

/// Last segment of a possibly qualified name, quotes removed.
pub(crate) fn last_part(name: &ObjectName) -> String {
    name.0
        .last()
        .map(|part| part.value.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::dialect::DuckDbDialect;
    use sqlparser::parser::Parser;

    fn sources(sql: &str) -> Sources {
        let statements = Parser::parse_sql(&DuckDbDialect {}, sql).unwrap();
        Sources::collect(&statements[0])
    }

    #[test]
    fn tables_come_from_every_nesting_level() {
        let s = sources(
            "WITH r AS (SELECT * FROM refunds) \
             SELECT * FROM (SELECT * FROM orders) o \
             JOIN r ON r.id = o.id \
             WHERE o.uid IN (SELECT id FROM users) \
             AND EXISTS (SELECT 1 FROM audit) \
             UNION ALL SELECT * FROM archive",
        );
        assert_eq!(s.tables(), vec!["refunds", "orders", "archive", "users", "audit"]);
    }

    #[test]
    fn functions_and_files_are_kept_apart_from_tables() {
        let s = sources("SELECT * FROM read_csv('x.csv'), 'y.parquet', orders");
        assert_eq!(s.tables(), vec!["orders"]);
        assert!(matches!(&s.items()[0], Source::Function(name) if last_part(name) == "read_csv"));
        assert_eq!(s.items()[1], Source::File("y.parquet".to_string()));
    }
}
