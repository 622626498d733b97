use proptest::prelude::*;
use querypilot_llm::json::first_json_object;
use querypilot_llm::{parse_llm_json_object, AssistantMessage};
use serde_json::{json, Map, Value};

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        // Braces and quotes inside strings must not confuse the scanner.
        "[a-z{}\\[\\]\" ,:]{0,12}".prop_map(Value::from),
    ]
}

fn object() -> impl Strategy<Value = Value> {
    let inner = prop::collection::btree_map("[a-z]{1,8}", leaf(), 0..4)
        .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>()));
    prop::collection::btree_map("[a-zA-Z_]{1,10}", prop_oneof![leaf(), inner], 1..6)
        .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>()))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn object_is_found_inside_prose_and_fences(
        obj in object(),
        prefix in "[a-zA-Z .,:!\n]{0,40}",
        suffix in "[a-zA-Z .,:!\n]{0,40}",
        fenced in any::<bool>(),
    ) {
        let body = if fenced {
            format!("```json\n{obj}\n```")
        } else {
            obj.to_string()
        };
        let text = format!("{prefix}{body}{suffix}");
        let parsed: Value = parse_llm_json_object(&text).unwrap();
        prop_assert_eq!(parsed, obj);
    }

    #[test]
    fn text_without_braces_is_a_parse_error(text in "[a-zA-Z .,:!\n]{1,80}") {
        prop_assert!(parse_llm_json_object::<Map<String, Value>>(&text).is_err());
    }
}

#[test]
fn first_of_two_objects_wins() {
    let text = r#"Plan: {"step": 1} then {"step": 2}"#;
    assert_eq!(first_json_object(text), Some(r#"{"step": 1}"#));
    let v: Value = parse_llm_json_object(text).unwrap();
    assert_eq!(v, json!({"step": 1}));
}

#[test]
fn openai_tool_call_with_string_arguments_decodes() {
    let body = json!({
        "id": "chatcmpl-1",
        "choices": [{
            "index": 0,
            "finish_reason": "tool_calls",
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_abc",
                    "type": "function",
                    "function": {
                        "name": "execute_sql",
                        "arguments": "{\"sql\": \"SELECT COUNT(*) FROM orders\"}"
                    }
                }]
            }
        }]
    });
    let msg = AssistantMessage::from_openai_response(&body).unwrap();
    assert!(msg.content.is_none());
    let call = &msg.tool_calls[0];
    assert_eq!(call.id.as_deref(), Some("call_abc"));
    let args = call.function.arguments_object().unwrap();
    assert_eq!(args["sql"], "SELECT COUNT(*) FROM orders");
}
