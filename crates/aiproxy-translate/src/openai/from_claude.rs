//! Anthropic Messages clients talking to an OpenAI-compatible upstream.

use aiproxy_common::json;
use aiproxy_thinking::convert_budget_to_level;
use serde_json::{json, Map, Value};

use crate::claude::finish_to_stop_reason;
use crate::sse::{event_block, parse_line, SseLine};
use crate::StreamState;

/// Tool-argument hint injected ahead of the caller's system prompt; several
/// OpenAI-compatible upstreams drift into single-quoted JSON without it.
const TOOL_JSON_HINT: &str = "Use ANY tool, the parameters MUST accord with RFC 8259 \
(The JavaScript Object Notation (JSON) Data Interchange Format), the keys and value \
MUST be enclosed in double quotes.";

/// Claude messages request -> OpenAI chat request.
pub fn translate_request(model: &str, body: &Value, stream: bool) -> Value {
    let mut out = Value::Object(Map::new());
    json::set(&mut out, "model", json!(model));

    if let Some(max_tokens) = json::get_i64(body, "max_tokens") {
        json::set(&mut out, "max_tokens", json!(max_tokens));
    }
    if let Some(temperature) = json::get_f64(body, "temperature") {
        json::set(&mut out, "temperature", json!(temperature));
    } else if let Some(top_p) = json::get_f64(body, "top_p") {
        json::set(&mut out, "top_p", json!(top_p));
    }
    if let Some(Value::Array(stops)) = json::get(body, "stop_sequences") {
        if stops.len() == 1 {
            json::set(&mut out, "stop", stops[0].clone());
        } else if !stops.is_empty() {
            json::set(&mut out, "stop", json!(stops));
        }
    }
    json::set(&mut out, "stream", json!(stream));

    match json::get_str(body, "thinking.type") {
        Some("enabled") => {
            let budget = json::get_i64(body, "thinking.budget_tokens").unwrap_or(-1);
            if let Some(effort) = convert_budget_to_level(budget) {
                json::set(&mut out, "reasoning_effort", json!(effort));
            }
        }
        Some("disabled") => {
            json::set(&mut out, "reasoning_effort", json!("none"));
        }
        _ => {}
    }

    let mut messages: Vec<Value> = Vec::new();
    let mut system_content = vec![json!({"type": "text", "text": TOOL_JSON_HINT})];
    match json::get(body, "system") {
        Some(Value::String(system)) if !system.is_empty() => {
            system_content.push(json!({"type": "text", "text": system}));
        }
        Some(Value::Array(parts)) => {
            for part in parts {
                if json::get_str(part, "type") == Some("text") {
                    system_content.push(json!({
                        "type": "text",
                        "text": json::get_str(part, "text").unwrap_or_default(),
                    }));
                }
            }
        }
        _ => {}
    }
    messages.push(json!({"role": "system", "content": system_content}));

    if let Some(Value::Array(source_messages)) = json::get(body, "messages") {
        for message in source_messages {
            let role = json::get_str(message, "role").unwrap_or("user");
            match json::get(message, "content") {
                Some(Value::String(text)) => {
                    messages.push(json!({"role": role, "content": text}));
                }
                Some(Value::Array(content)) => {
                    let mut items: Vec<Value> = Vec::new();
                    let mut tool_calls: Vec<Value> = Vec::new();
                    for part in content {
                        match json::get_str(part, "type") {
                            Some("text") => {
                                let text = json::get_str(part, "text").unwrap_or_default();
                                if !text.trim().is_empty() {
                                    items.push(json!({"type": "text", "text": text}));
                                }
                            }
                            Some("image") => {
                                if let Some(image) = claude_image_to_openai(part) {
                                    items.push(image);
                                }
                            }
                            Some("tool_use") => {
                                let arguments = part
                                    .get("input")
                                    .map(|input| serde_json::to_string(input).unwrap_or_default())
                                    .unwrap_or_else(|| "{}".to_string());
                                tool_calls.push(json!({
                                    "id": json::get_str(part, "id").unwrap_or_default(),
                                    "type": "function",
                                    "function": {
                                        "name": json::get_str(part, "name").unwrap_or_default(),
                                        "arguments": arguments,
                                    },
                                }));
                            }
                            Some("tool_result") => {
                                let text = match json::get(part, "content") {
                                    Some(Value::String(text)) => text.clone(),
                                    Some(Value::Array(parts)) => parts
                                        .iter()
                                        .filter_map(|p| json::get_str(p, "text"))
                                        .collect::<Vec<_>>()
                                        .join(""),
                                    Some(other) => serde_json::to_string(other).unwrap_or_default(),
                                    None => String::new(),
                                };
                                messages.push(json!({
                                    "role": "tool",
                                    "tool_call_id": json::get_str(part, "tool_use_id").unwrap_or_default(),
                                    "content": text,
                                }));
                            }
                            _ => {}
                        }
                    }
                    if !items.is_empty() {
                        messages.push(json!({"role": role, "content": items}));
                    }
                    if role == "assistant" && !tool_calls.is_empty() {
                        messages.push(json!({"role": "assistant", "tool_calls": tool_calls}));
                    }
                }
                _ => {}
            }
        }
    }
    json::set(&mut out, "messages", Value::Array(messages));

    if let Some(Value::Array(tools)) = json::get(body, "tools") {
        let converted: Vec<Value> = tools
            .iter()
            .filter_map(|tool| {
                let schema = tool.get("input_schema")?;
                Some(json!({"type": "function", "function": {
                    "name": json::get_str(tool, "name").unwrap_or_default(),
                    "description": json::get_str(tool, "description").unwrap_or_default(),
                    "parameters": schema.clone(),
                }}))
            })
            .collect();
        if !converted.is_empty() {
            json::set(&mut out, "tools", Value::Array(converted));
        }
    }

    if let Some(choice_type) = json::get_str(body, "tool_choice.type") {
        match choice_type {
            "any" => json::set(&mut out, "tool_choice", json!("required")),
            "tool" => {
                let name = json::get_str(body, "tool_choice.name").unwrap_or_default();
                json::set(
                    &mut out,
                    "tool_choice",
                    json!({"type": "function", "function": {"name": name}}),
                );
            }
            _ => json::set(&mut out, "tool_choice", json!("auto")),
        }
    }

    if let Some(user) = json::get_str(body, "metadata.user_id") {
        json::set(&mut out, "user", json!(user));
    }

    out
}

fn claude_image_to_openai(part: &Value) -> Option<Value> {
    let url = match json::get_str(part, "source.type") {
        Some("base64") => {
            let media_type = json::get_str(part, "source.media_type")
                .unwrap_or("application/octet-stream");
            let data = json::get_str(part, "source.data")?;
            format!("data:{media_type};base64,{data}")
        }
        Some("url") => json::get_str(part, "source.url")?.to_string(),
        _ => return None,
    };
    Some(json!({"type": "image_url", "image_url": {"url": url}}))
}

/// OpenAI chat completion -> Claude message.
pub fn translate_response(model: &str, body: &Value) -> Value {
    let mut content: Vec<Value> = Vec::new();
    if let Some(reasoning) = json::get_str(body, "choices.0.message.reasoning_content") {
        if !reasoning.is_empty() {
            content.push(json!({"type": "thinking", "thinking": reasoning, "signature": ""}));
        }
    }
    if let Some(text) = json::get_str(body, "choices.0.message.content") {
        if !text.is_empty() {
            content.push(json!({"type": "text", "text": text}));
        }
    }
    if let Some(Value::Array(tool_calls)) = json::get(body, "choices.0.message.tool_calls") {
        for call in tool_calls {
            let arguments = json::get_str(call, "function.arguments").unwrap_or("{}");
            let input: Value = serde_json::from_str(arguments).unwrap_or(json!({}));
            content.push(json!({
                "type": "tool_use",
                "id": json::get_str(call, "id").unwrap_or_default(),
                "name": json::get_str(call, "function.name").unwrap_or_default(),
                "input": input,
            }));
        }
    }

    let finish = json::get_str(body, "choices.0.finish_reason").unwrap_or("stop");
    json!({
        "id": json::get_str(body, "id").unwrap_or_default(),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": finish_to_stop_reason(finish),
        "stop_sequence": Value::Null,
        "usage": {
            "input_tokens": json::get_i64(body, "usage.prompt_tokens").unwrap_or(0),
            "output_tokens": json::get_i64(body, "usage.completion_tokens").unwrap_or(0),
        },
    })
}

/// OpenAI chat completion chunk -> Claude SSE event(s).
pub fn translate_stream(model: &str, line: &[u8], state: &mut StreamState) -> Vec<String> {
    let chunk = match parse_line(line) {
        SseLine::Data(value) => value,
        SseLine::Done => return finish_stream(state),
        _ => return Vec::new(),
    };

    state.ensure_identity("msg_");
    let mut blocks = Vec::new();
    if !state.started {
        state.started = true;
        blocks.push(event_block(
            "message_start",
            &json!({"type": "message_start", "message": {
                "id": state.response_id,
                "type": "message",
                "role": "assistant",
                "model": model,
                "content": [],
                "stop_reason": Value::Null,
                "usage": {"input_tokens": 0, "output_tokens": 0},
            }}),
        ));
    }

    if let Some(prompt) = json::get_i64(&chunk, "usage.prompt_tokens") {
        state.input_tokens = prompt;
    }
    if let Some(completion) = json::get_i64(&chunk, "usage.completion_tokens") {
        state.output_tokens = completion;
    }
    if let Some(finish) = json::get_str(&chunk, "choices.0.finish_reason") {
        state.finish_reason = finish.to_string();
    }

    if let Some(reasoning) = json::get_str(&chunk, "choices.0.delta.reasoning_content") {
        if !reasoning.is_empty() {
            ensure_block(state, &mut blocks, "thinking");
            blocks.push(event_block(
                "content_block_delta",
                &json!({"type": "content_block_delta", "index": state.block_index,
                        "delta": {"type": "thinking_delta", "thinking": reasoning}}),
            ));
        }
    }
    if let Some(text) = json::get_str(&chunk, "choices.0.delta.content") {
        if !text.is_empty() {
            ensure_block(state, &mut blocks, "text");
            blocks.push(event_block(
                "content_block_delta",
                &json!({"type": "content_block_delta", "index": state.block_index,
                        "delta": {"type": "text_delta", "text": text}}),
            ));
        }
    }
    if let Some(Value::Array(tool_calls)) = json::get(&chunk, "choices.0.delta.tool_calls") {
        for call in tool_calls {
            let index = json::get_i64(call, "index").unwrap_or(0);
            if let Some(name) = json::get_str(call, "function.name") {
                // New tool call: close whatever was open and start a block.
                close_block(state, &mut blocks);
                state.tool_indexes.insert(index, state.block_index);
                blocks.push(event_block(
                    "content_block_start",
                    &json!({"type": "content_block_start", "index": state.block_index,
                            "content_block": {"type": "tool_use",
                                              "id": json::get_str(call, "id").unwrap_or_default(),
                                              "name": name, "input": {}}}),
                ));
                state.open_block = Some("tool_use".to_string());
            }
            if let Some(arguments) = json::get_str(call, "function.arguments") {
                if !arguments.is_empty() {
                    let block_index =
                        state.tool_indexes.get(&index).copied().unwrap_or(state.block_index);
                    blocks.push(event_block(
                        "content_block_delta",
                        &json!({"type": "content_block_delta", "index": block_index,
                                "delta": {"type": "input_json_delta", "partial_json": arguments}}),
                    ));
                }
            }
        }
    }
    blocks
}

fn ensure_block(state: &mut StreamState, blocks: &mut Vec<String>, kind: &str) {
    if state.open_block.as_deref() == Some(kind) {
        return;
    }
    close_block(state, blocks);
    let content_block = match kind {
        "thinking" => json!({"type": "thinking", "thinking": "", "signature": ""}),
        _ => json!({"type": "text", "text": ""}),
    };
    blocks.push(event_block(
        "content_block_start",
        &json!({"type": "content_block_start", "index": state.block_index,
                "content_block": content_block}),
    ));
    state.open_block = Some(kind.to_string());
}

fn close_block(state: &mut StreamState, blocks: &mut Vec<String>) {
    if state.open_block.take().is_some() {
        blocks.push(event_block(
            "content_block_stop",
            &json!({"type": "content_block_stop", "index": state.block_index}),
        ));
        state.block_index += 1;
    }
}

fn finish_stream(state: &mut StreamState) -> Vec<String> {
    if state.finished {
        return Vec::new();
    }
    state.finished = true;
    let mut blocks = Vec::new();
    close_block(state, &mut blocks);
    blocks.push(event_block(
        "message_delta",
        &json!({"type": "message_delta",
                "delta": {"stop_reason": finish_to_stop_reason(&state.finish_reason),
                          "stop_sequence": Value::Null},
                "usage": {"input_tokens": state.input_tokens,
                          "output_tokens": state.output_tokens}}),
    ));
    blocks.push(event_block("message_stop", &json!({"type": "message_stop"})));
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_roles_text_and_tool_ids() {
        let claude_request = json!({
            "system": [{"type": "text", "text": "stay factual"}],
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": "read a file"}]},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "on it"},
                    {"type": "tool_use", "id": "toolu_7", "name": "Read", "input": {"path": "x"}},
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_7", "content": "data"},
                ]},
            ],
            "max_tokens": 100,
        });
        let openai = translate_request("gpt-5", &claude_request, false);
        // Roles survive in order: system, user, assistant(text), assistant(tools), tool.
        assert_eq!(json::get_str(&openai, "messages.0.role"), Some("system"));
        assert_eq!(json::get_str(&openai, "messages.1.role"), Some("user"));
        assert_eq!(json::get_str(&openai, "messages.2.role"), Some("assistant"));
        assert_eq!(json::get_str(&openai, "messages.3.role"), Some("assistant"));
        assert_eq!(
            json::get_str(&openai, "messages.3.tool_calls.0.id"),
            Some("toolu_7")
        );
        assert_eq!(json::get_str(&openai, "messages.4.role"), Some("tool"));
        assert_eq!(
            json::get_str(&openai, "messages.4.tool_call_id"),
            Some("toolu_7")
        );
    }

    #[test]
    fn thinking_budget_maps_to_effort() {
        let body = json!({"messages": [], "thinking": {"type": "enabled", "budget_tokens": 8192}});
        let out = translate_request("gpt-5", &body, false);
        assert_eq!(json::get_str(&out, "reasoning_effort"), Some("medium"));
        let disabled = json!({"messages": [], "thinking": {"type": "disabled"}});
        let out = translate_request("gpt-5", &disabled, false);
        assert_eq!(json::get_str(&out, "reasoning_effort"), Some("none"));
    }

    #[test]
    fn response_builds_claude_message() {
        let body = json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {
                "role": "assistant",
                "content": "hi",
                "tool_calls": [{"id": "c1", "type": "function",
                                "function": {"name": "read", "arguments": "{\"p\":1}"}}],
            }, "finish_reason": "tool_calls"}],
            "usage": {"prompt_tokens": 7, "completion_tokens": 8},
        });
        let out = translate_response("m", &body);
        assert_eq!(json::get_str(&out, "stop_reason"), Some("tool_use"));
        assert_eq!(json::get_str(&out, "content.0.text"), Some("hi"));
        assert_eq!(json::get_str(&out, "content.1.type"), Some("tool_use"));
        assert_eq!(json::get_i64(&out, "content.1.input.p"), Some(1));
        assert_eq!(json::get_i64(&out, "usage.input_tokens"), Some(7));
    }

    #[test]
    fn stream_translates_chunks_to_claude_events() {
        let mut state = StreamState::default();
        let mut out = Vec::new();
        for line in [
            br#"data: {"choices":[{"index":0,"delta":{"role":"assistant","content":"he"}}]}"#.as_slice(),
            br#"data: {"choices":[{"index":0,"delta":{"content":"y"}}]}"#.as_slice(),
            br#"data: {"choices":[{"index":0,"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":1,"completion_tokens":2}}"#.as_slice(),
            b"data: [DONE]".as_slice(),
        ] {
            out.extend(translate_stream("m", line, &mut state));
        }
        let joined = out.concat();
        assert!(joined.contains("message_start"));
        assert!(joined.contains("\"text\":\"he\""));
        assert!(joined.contains("\"stop_reason\":\"end_turn\""));
        assert!(joined.contains("message_stop"));
    }
}
