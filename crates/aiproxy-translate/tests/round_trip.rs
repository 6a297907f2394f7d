//! Cross-format conversion properties exercised through the public dispatch.

use aiproxy_common::json;
use aiproxy_translate::{translate_request, Format};
use serde_json::Value;

fn parse(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).expect("translated payload is json")
}

/// OpenAI -> Claude -> OpenAI keeps the role sequence and text content for
/// text-only conversations.
#[test]
fn openai_claude_round_trip_preserves_roles_and_text() {
    let payload = serde_json::json!({
        "model": "claude-sonnet-4-5",
        "max_tokens": 512,
        "messages": [
            {"role": "user", "content": "first question"},
            {"role": "assistant", "content": "first answer"},
            {"role": "user", "content": "second question"},
        ],
    });
    let payload_bytes = serde_json::to_vec(&payload).expect("payload");

    let claude = translate_request(
        Format::OpenAI,
        Format::Claude,
        "claude-sonnet-4-5",
        &payload_bytes,
        false,
    );
    let back = translate_request(
        Format::Claude,
        Format::OpenAI,
        "claude-sonnet-4-5",
        &claude,
        false,
    );
    let back = parse(&back);

    let original_messages = payload["messages"].as_array().expect("messages");
    let round_tripped = back["messages"].as_array().expect("messages");
    // The Claude->OpenAI direction prepends one system message; everything
    // after it must match the original conversation.
    let offset = round_tripped.len() - original_messages.len();
    for (index, original) in original_messages.iter().enumerate() {
        let result = &round_tripped[offset + index];
        assert_eq!(
            json::get_str(result, "role"),
            json::get_str(original, "role"),
            "role at {index}"
        );
        let original_text = json::get_str(original, "content").expect("text");
        let result_text = match json::get(result, "content") {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Array(parts)) => parts
                .iter()
                .filter_map(|part| json::get_str(part, "text"))
                .collect::<Vec<_>>()
                .join(""),
            other => panic!("unexpected content shape: {other:?}"),
        };
        assert_eq!(result_text.trim(), original_text.trim(), "text at {index}");
    }
}

/// Tool-call ids survive OpenAI -> Claude -> OpenAI.
#[test]
fn openai_claude_round_trip_preserves_tool_call_ids() {
    let payload = serde_json::json!({
        "model": "claude-sonnet-4-5",
        "messages": [
            {"role": "user", "content": "read the file"},
            {"role": "assistant", "tool_calls": [{
                "id": "call_abc123", "type": "function",
                "function": {"name": "read_file", "arguments": "{\"path\":\"x\"}"},
            }]},
            {"role": "tool", "tool_call_id": "call_abc123", "content": "contents"},
        ],
    });
    let payload_bytes = serde_json::to_vec(&payload).expect("payload");

    let claude = translate_request(
        Format::OpenAI,
        Format::Claude,
        "claude-sonnet-4-5",
        &payload_bytes,
        true,
    );
    let claude_value = parse(&claude);
    assert_eq!(
        json::get_str(&claude_value, "messages.1.content.0.id"),
        Some("call_abc123")
    );

    let back = parse(&translate_request(
        Format::Claude,
        Format::OpenAI,
        "claude-sonnet-4-5",
        &claude,
        true,
    ));
    let messages = back["messages"].as_array().expect("messages");
    let tool_call_id = messages
        .iter()
        .find_map(|message| json::get_str(message, "tool_calls.0.id"));
    assert_eq!(tool_call_id, Some("call_abc123"));
    let tool_result_id = messages
        .iter()
        .find_map(|message| json::get_str(message, "tool_call_id"));
    assert_eq!(tool_result_id, Some("call_abc123"));
}

/// Unknown fields in the payload survive an identity translation untouched.
#[test]
fn identity_translation_preserves_unknown_fields_and_order() {
    let raw = br#"{"model":"m","zzz_custom":{"b":1,"a":2},"messages":[],"vendor_extension":true}"#;
    let out = translate_request(Format::Claude, Format::Claude, "m", raw, false);
    assert_eq!(out, raw.to_vec());
}

/// The Gemini CLI envelope wraps and unwraps without touching the body.
#[test]
fn gemini_envelope_round_trip() {
    let gemini = serde_json::json!({
        "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
        "generationConfig": {"temperature": 0.5, "customKnob": 3},
    });
    let bytes = serde_json::to_vec(&gemini).expect("payload");
    let wrapped = translate_request(Format::Gemini, Format::GeminiCli, "gemini-2.5-pro", &bytes, false);
    let wrapped_value = parse(&wrapped);
    assert_eq!(json::get_str(&wrapped_value, "model"), Some("gemini-2.5-pro"));
    assert_eq!(wrapped_value["request"], gemini);

    let unwrapped = translate_request(
        Format::GeminiCli,
        Format::Gemini,
        "gemini-2.5-pro",
        &wrapped,
        false,
    );
    assert_eq!(parse(&unwrapped), gemini);
}
