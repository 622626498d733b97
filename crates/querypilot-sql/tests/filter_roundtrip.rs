//! Filters compiled from configuration must survive the policy validator.

use proptest::prelude::*;
use querypilot_sql::{
    build_template_sql, compile_where_clause, validate_sql, FilterExpr, FilterOp, FilterValue,
    QueryArchetype, RelativeTimeValue, ScalarValue, SqlPolicy, TemplateColumns, TimeDirection,
    TimeUnit,
};

fn scalar_strategy() -> impl Strategy<Value = ScalarValue> {
    prop_oneof![
        any::<bool>().prop_map(ScalarValue::Bool),
        any::<i64>().prop_map(ScalarValue::Int),
        (-1.0e9f64..1.0e9).prop_map(ScalarValue::Float),
        "v_[a-z0-9_]{0,12}".prop_map(ScalarValue::Text),
        // Quotes, semicolons and comment markers must stay inside the literal.
        prop::sample::select(vec!["it's", "a;b", "x -- y", "/* z */", "50%_off", "back\\slash", "\"q\""])
            .prop_map(|s| ScalarValue::Text(s.to_string())),
    ]
}

fn relative_strategy() -> impl Strategy<Value = RelativeTimeValue> {
    (
        prop_oneof![
            Just(TimeUnit::Day),
            Just(TimeUnit::Week),
            Just(TimeUnit::Month),
            Just(TimeUnit::Year)
        ],
        1u32..400,
        prop_oneof![Just(TimeDirection::Past), Just(TimeDirection::Future)],
    )
        .prop_map(|(unit, amount, direction)| RelativeTimeValue {
            unit,
            amount,
            direction,
        })
}

fn filter_strategy() -> impl Strategy<Value = FilterExpr> {
    let column = "col_[a-z]{1,6}";
    prop_oneof![
        (
            column,
            prop_oneof![
                Just(FilterOp::Eq),
                Just(FilterOp::Ne),
                Just(FilterOp::Gt),
                Just(FilterOp::Ge),
                Just(FilterOp::Lt),
                Just(FilterOp::Le),
                Just(FilterOp::Contains)
            ],
            scalar_strategy()
        )
            .prop_map(|(c, op, v)| FilterExpr::new(c, op, FilterValue::Scalar(v))),
        (
            column,
            prop_oneof![Just(FilterOp::In), Just(FilterOp::NotIn)],
            prop::collection::vec(scalar_strategy(), 1..5)
        )
            .prop_map(|(c, op, v)| FilterExpr::new(c, op, FilterValue::List(v))),
        (
            column,
            prop_oneof![Just(FilterOp::Ge), Just(FilterOp::Lt)],
            relative_strategy()
        )
            .prop_map(|(c, op, v)| FilterExpr::new(c, op, FilterValue::Relative(v))),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn compiled_filters_pass_policy(filters in prop::collection::vec(filter_strategy(), 1..5)) {
        let clause = compile_where_clause(&filters).unwrap().unwrap();
        let policy = SqlPolicy::new(["orders"], 50);

        let trivial = format!("SELECT 1 FROM orders WHERE {clause}");
        let out = validate_sql(&trivial, &policy);
        prop_assert!(out.is_ok(), "{trivial}: {:?}", out);

        let templated = build_template_sql(
            "orders",
            QueryArchetype::KpiSingle,
            &TemplateColumns::default(),
            50,
            Some(&clause),
        )
        .unwrap();
        let out = validate_sql(&templated, &policy);
        prop_assert!(out.is_ok(), "{templated}: {:?}", out);
    }
}
