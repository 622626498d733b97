//! Engine values → JSON that survives any consumer.
//!
//! JSON numbers are doubles in most clients, so every 64-bit-or-wider
//! integer leaves the pipeline as a decimal string, however small its value.

use serde_json::{Map, Number, Value};

use crate::context::{EngineValue, QueryOutput};

pub fn sanitize_value(value: &EngineValue) -> Value {
    match value {
        EngineValue::Null => Value::Null,
        EngineValue::Bool(b) => Value::Bool(*b),
        EngineValue::Int(i) => Value::from(*i),
        EngineValue::BigInt(i) => Value::String(i.to_string()),
        EngineValue::UBigInt(u) => Value::String(u.to_string()),
        EngineValue::HugeInt(i) => Value::String(i.to_string()),
        EngineValue::Double(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        EngineValue::Text(s) | EngineValue::Temporal(s) => Value::String(s.clone()),
        EngineValue::List(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        EngineValue::Struct(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), sanitize_value(v)))
                .collect(),
        ),
    }
}

/// Rows as an array of `{column: value}` objects.
pub fn sanitize_rows(output: &QueryOutput) -> Value {
    Value::Array(
        output
            .rows
            .iter()
            .map(|row| {
                let mut obj = Map::new();
                for (idx, column) in output.schema.iter().enumerate() {
                    let cell = row.get(idx).map(sanitize_value).unwrap_or(Value::Null);
                    obj.insert(column.name.clone(), cell);
                }
                Value::Object(obj)
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ColumnInfo;
    use serde_json::json;

    #[test]
    fn wide_integers_become_strings_recursively() {
        let v = EngineValue::Struct(vec![
            ("id".into(), EngineValue::BigInt(9_007_199_254_740_993)),
            (
                "parts".into(),
                EngineValue::List(vec![EngineValue::BigInt(1), EngineValue::Int(2)]),
            ),
            ("big".into(), EngineValue::HugeInt(i128::MIN)),
        ]);
        assert_eq!(
            sanitize_value(&v),
            json!({
                "id": "9007199254740993",
                "parts": ["1", 2],
                "big": "-170141183460469231731687303715884105728"
            })
        );
    }

    #[test]
    fn non_finite_doubles_become_null() {
        assert_eq!(sanitize_value(&EngineValue::Double(f64::NAN)), Value::Null);
        assert_eq!(sanitize_value(&EngineValue::Double(1.5)), json!(1.5));
    }

    #[test]
    fn rows_are_keyed_by_schema() {
        let out = QueryOutput {
            schema: vec![ColumnInfo::new("total_count", "BIGINT"), ColumnInfo::new("city", "VARCHAR")],
            rows: vec![
                vec![EngineValue::BigInt(42), EngineValue::Text("Shanghai".into())],
                vec![EngineValue::BigInt(7)],
            ],
        };
        assert_eq!(
            sanitize_rows(&out),
            json!([
                {"total_count": "42", "city": "Shanghai"},
                {"total_count": "7", "city": null}
            ])
        );
    }
}
