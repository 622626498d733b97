//! Property tests for the read-only SQL policy.
//!
//! 1. Write/DDL keywords are rejected regardless of case and spacing
//! 2. The row cap is appended or clamped; signed and computed limits are
//!    replaced whole
//! 3. Normalization is idempotent
//! 4. Tables outside the allowlist are named exactly

use proptest::prelude::*;
use querypilot_sql::policy::WRITE_KEYWORDS;
use querypilot_sql::{validate_sql, PolicyReason, SqlPolicy};

// ============================================================================
// Strategies
// ============================================================================

fn write_keyword_strategy() -> impl Strategy<Value = String> {
    (prop::sample::select(WRITE_KEYWORDS.to_vec()), any::<u64>()).prop_map(|(kw, mask)| {
        kw.chars()
            .enumerate()
            .map(|(i, c)| {
                if mask & (1 << (i % 64)) != 0 {
                    c.to_ascii_uppercase()
                } else {
                    c
                }
            })
            .collect()
    })
}

fn whitespace_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(prop_oneof![Just(' '), Just('\t'), Just('\n')], 1..4)
        .prop_map(|v| v.into_iter().collect())
}

fn column_strategy() -> impl Strategy<Value = String> {
    "c_[a-z]{1,8}".prop_map(|s| s)
}

/// `LIMIT` expressions that are not a single non-negative integer literal.
fn computed_limit_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        (0u64..1_000_000).prop_map(|n| format!("-{n}")),
        (0u64..1_000_000).prop_map(|n| format!("- {n}")),
        (0u64..1_000, 1u64..1_000_000).prop_map(|(a, b)| format!("{a}+{b}")),
        (1u64..1_000, 1u64..1_000_000).prop_map(|(a, b)| format!("{a} * {b}")),
        (1u64..100, 1u64..100).prop_map(|(a, b)| format!("({a} - {b})")),
    ]
}

fn allowed() -> SqlPolicy {
    SqlPolicy::new(["orders", "users"], 200)
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn write_keywords_always_rejected(
        kw in write_keyword_strategy(),
        before in whitespace_strategy(),
        after in whitespace_strategy(),
        col in column_strategy(),
    ) {
        let sql = format!("SELECT {col} FROM orders WHERE{before}{kw}{after}{col} = 1");
        let err = validate_sql(&sql, &allowed()).unwrap_err();
        prop_assert_eq!(err.reason, PolicyReason::WriteKeyword);
    }

    #[test]
    fn missing_limit_is_appended(col in column_strategy(), max_rows in 1usize..10_000) {
        let policy = SqlPolicy::new(["orders"], max_rows);
        let out = validate_sql(&format!("SELECT {col} FROM orders"), &policy).unwrap();
        let expected_suffix = format!("LIMIT {max_rows}");
        prop_assert!(out.normalized_sql.ends_with(&expected_suffix));
    }

    #[test]
    fn oversized_limit_is_clamped(
        col in column_strategy(),
        max_rows in 1usize..1_000,
        extra in 1u64..1_000_000,
    ) {
        let policy = SqlPolicy::new(["orders"], max_rows);
        let requested = max_rows as u64 + extra;
        let out = validate_sql(&format!("select {col} from orders limit {requested}"), &policy).unwrap();
        let expected = format!("select {col} from orders limit {max_rows}");
        prop_assert_eq!(out.normalized_sql, expected);
    }

    #[test]
    fn computed_limit_is_replaced_with_the_cap(
        col in column_strategy(),
        max_rows in 1usize..1_000,
        expr in computed_limit_strategy(),
        offset in prop::option::of(0u64..100),
    ) {
        let policy = SqlPolicy::new(["orders"], max_rows);
        let offset = offset.map(|o| format!(" OFFSET {o}")).unwrap_or_default();
        let sql = format!("SELECT {col} FROM orders LIMIT {expr}{offset}");

        let first = validate_sql(&sql, &policy).unwrap();
        let expected = format!("SELECT {col} FROM orders LIMIT {max_rows}{offset}");
        prop_assert_eq!(&first.normalized_sql, &expected);

        let second = validate_sql(&first.normalized_sql, &policy).unwrap();
        prop_assert_eq!(&second.normalized_sql, &first.normalized_sql);
        prop_assert!(second.warnings.is_empty(), "{:?}", second.warnings);
    }

    #[test]
    fn validation_is_idempotent(
        col in column_strategy(),
        limit in prop::option::of(0u64..1_000),
        ws in whitespace_strategy(),
        comment in prop::bool::ANY,
    ) {
        let mut sql = format!("SELECT{ws}`{col}`,{ws}created_at - INTERVAL '1 day' FROM orders");
        if let Some(n) = limit {
            sql.push_str(&format!(" LIMIT {n}"));
        }
        if comment {
            sql.push_str(" -- trailing note");
        }
        let first = validate_sql(&sql, &allowed()).unwrap();
        let second = validate_sql(&first.normalized_sql, &allowed()).unwrap();
        prop_assert_eq!(&second.normalized_sql, &first.normalized_sql);
        prop_assert!(second.warnings.is_empty(), "{:?}", second.warnings);
    }

    #[test]
    fn disallowed_tables_are_named_exactly(
        bad in prop::collection::btree_set("t_[a-z]{2,6}", 1..4),
    ) {
        let bad: Vec<String> = bad.into_iter().collect();
        let joins: String = bad
            .iter()
            .map(|t| format!(" JOIN {t} ON {t}.id = orders.id"))
            .collect();
        let sql = format!("SELECT * FROM orders{joins}");
        let err = validate_sql(&sql, &allowed()).unwrap_err();
        prop_assert_eq!(err.reason, PolicyReason::TableNotAllowed);
        prop_assert_eq!(err.tables, bad);
    }
}
