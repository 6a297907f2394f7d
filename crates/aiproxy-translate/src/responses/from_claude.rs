//! Anthropic Messages clients talking to a Responses (Codex) upstream.

use aiproxy_common::json;
use aiproxy_thinking::convert_budget_to_level;
use serde_json::{json, Map, Value};

use crate::sse::{event_block, parse_line, SseLine};
use crate::StreamState;

/// Claude messages request -> Responses request.
pub fn translate_request(model: &str, body: &Value, stream: bool) -> Value {
    let mut out = Value::Object(Map::new());
    json::set(&mut out, "model", json!(model));
    json::set(&mut out, "stream", json!(stream));
    json::set(&mut out, "store", json!(false));

    match json::get(body, "system") {
        Some(Value::String(system)) if !system.is_empty() => {
            json::set(&mut out, "instructions", json!(system));
        }
        Some(Value::Array(parts)) => {
            let text: String = parts
                .iter()
                .filter(|part| json::get_str(part, "type") == Some("text"))
                .filter_map(|part| json::get_str(part, "text"))
                .collect::<Vec<_>>()
                .join("\n\n");
            if !text.is_empty() {
                json::set(&mut out, "instructions", json!(text));
            }
        }
        _ => {}
    }

    let mut input: Vec<Value> = Vec::new();
    if let Some(Value::Array(messages)) = json::get(body, "messages") {
        for message in messages {
            let role = json::get_str(message, "role").unwrap_or("user");
            match json::get(message, "content") {
                Some(Value::String(text)) => {
                    let part_type = if role == "assistant" { "output_text" } else { "input_text" };
                    input.push(json!({"type": "message", "role": role,
                                      "content": [{"type": part_type, "text": text}]}));
                }
                Some(Value::Array(content)) => {
                    let mut text_parts: Vec<Value> = Vec::new();
                    for part in content {
                        match json::get_str(part, "type") {
                            Some("text") => {
                                let part_type =
                                    if role == "assistant" { "output_text" } else { "input_text" };
                                text_parts.push(json!({
                                    "type": part_type,
                                    "text": json::get_str(part, "text").unwrap_or_default(),
                                }));
                            }
                            Some("image") => {
                                if let Some(url) = claude_image_url(part) {
                                    text_parts.push(json!({"type": "input_image", "image_url": url}));
                                }
                            }
                            Some("tool_use") => {
                                let arguments = part
                                    .get("input")
                                    .map(|input| serde_json::to_string(input).unwrap_or_default())
                                    .unwrap_or_else(|| "{}".to_string());
                                input.push(json!({
                                    "type": "function_call",
                                    "call_id": json::get_str(part, "id").unwrap_or_default(),
                                    "name": json::get_str(part, "name").unwrap_or_default(),
                                    "arguments": arguments,
                                }));
                            }
                            Some("tool_result") => {
                                let output = match json::get(part, "content") {
                                    Some(Value::String(text)) => text.clone(),
                                    Some(Value::Array(items)) => items
                                        .iter()
                                        .filter_map(|item| json::get_str(item, "text"))
                                        .collect::<Vec<_>>()
                                        .join(""),
                                    Some(other) => serde_json::to_string(other).unwrap_or_default(),
                                    None => String::new(),
                                };
                                input.push(json!({
                                    "type": "function_call_output",
                                    "call_id": json::get_str(part, "tool_use_id").unwrap_or_default(),
                                    "output": output,
                                }));
                            }
                            _ => {}
                        }
                    }
                    if !text_parts.is_empty() {
                        input.push(json!({"type": "message", "role": role, "content": text_parts}));
                    }
                }
                _ => {}
            }
        }
    }
    json::set(&mut out, "input", Value::Array(input));

    if let Some(Value::Array(tools)) = json::get(body, "tools") {
        let converted: Vec<Value> = tools
            .iter()
            .filter_map(|tool| {
                let schema = tool.get("input_schema")?;
                Some(json!({
                    "type": "function",
                    "name": json::get_str(tool, "name").unwrap_or_default(),
                    "description": json::get_str(tool, "description").unwrap_or_default(),
                    "parameters": schema.clone(),
                }))
            })
            .collect();
        if !converted.is_empty() {
            json::set(&mut out, "tools", Value::Array(converted));
        }
    }
    match json::get_str(body, "tool_choice.type") {
        Some("any") => json::set(&mut out, "tool_choice", json!("required")),
        Some("tool") => {
            let name = json::get_str(body, "tool_choice.name").unwrap_or_default();
            json::set(&mut out, "tool_choice", json!({"type": "function", "name": name}));
        }
        Some("auto") => json::set(&mut out, "tool_choice", json!("auto")),
        _ => {}
    }

    if let Some(max_tokens) = json::get_i64(body, "max_tokens") {
        json::set(&mut out, "max_output_tokens", json!(max_tokens));
    }
    if let Some(temperature) = json::get_f64(body, "temperature") {
        json::set(&mut out, "temperature", json!(temperature));
    }
    match json::get_str(body, "thinking.type") {
        Some("enabled") => {
            let budget = json::get_i64(body, "thinking.budget_tokens").unwrap_or(-1);
            if let Some(effort) = convert_budget_to_level(budget) {
                json::set(&mut out, "reasoning.effort", json!(effort));
                json::set(&mut out, "reasoning.summary", json!("auto"));
            }
        }
        Some("disabled") => {
            json::set(&mut out, "reasoning.effort", json!("none"));
        }
        _ => {}
    }

    out
}

fn claude_image_url(part: &Value) -> Option<String> {
    match json::get_str(part, "source.type") {
        Some("base64") => {
            let media_type =
                json::get_str(part, "source.media_type").unwrap_or("application/octet-stream");
            let data = json::get_str(part, "source.data")?;
            Some(format!("data:{media_type};base64,{data}"))
        }
        Some("url") => json::get_str(part, "source.url").map(str::to_string),
        _ => None,
    }
}

/// Responses envelope -> Claude message.
pub fn translate_response(model: &str, body: &Value) -> Value {
    let mut content: Vec<Value> = Vec::new();
    let mut saw_tool_call = false;
    if let Some(Value::Array(output)) = json::get(body, "output") {
        for item in output {
            match json::get_str(item, "type") {
                Some("reasoning") => {
                    let text: String = match json::get(item, "summary") {
                        Some(Value::Array(summary)) => summary
                            .iter()
                            .filter_map(|part| json::get_str(part, "text"))
                            .collect::<Vec<_>>()
                            .join(""),
                        _ => String::new(),
                    };
                    if !text.is_empty() {
                        content.push(json!({"type": "thinking", "thinking": text, "signature": ""}));
                    }
                }
                Some("message") => {
                    if let Some(Value::Array(parts)) = json::get(item, "content") {
                        for part in parts {
                            if json::get_str(part, "type") == Some("output_text") {
                                content.push(json!({
                                    "type": "text",
                                    "text": json::get_str(part, "text").unwrap_or_default(),
                                }));
                            }
                        }
                    }
                }
                Some("function_call") => {
                    saw_tool_call = true;
                    let arguments = json::get_str(item, "arguments").unwrap_or("{}");
                    let parsed: Value = serde_json::from_str(arguments).unwrap_or(json!({}));
                    content.push(json!({
                        "type": "tool_use",
                        "id": json::get_str(item, "call_id").unwrap_or_default(),
                        "name": json::get_str(item, "name").unwrap_or_default(),
                        "input": parsed,
                    }));
                }
                _ => {}
            }
        }
    }

    let stop_reason = if saw_tool_call {
        "tool_use"
    } else if json::get_str(body, "status") == Some("incomplete") {
        "max_tokens"
    } else {
        "end_turn"
    };
    json!({
        "id": json::get_str(body, "id").unwrap_or_default(),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": Value::Null,
        "usage": {
            "input_tokens": json::get_i64(body, "usage.input_tokens").unwrap_or(0),
            "output_tokens": json::get_i64(body, "usage.output_tokens").unwrap_or(0),
        },
    })
}

/// Responses SSE event -> Claude SSE event(s).
pub fn translate_stream(model: &str, line: &[u8], state: &mut StreamState) -> Vec<String> {
    let event = match parse_line(line) {
        SseLine::Data(value) => value,
        SseLine::Done => return Vec::new(),
        _ => return Vec::new(),
    };

    state.ensure_identity("msg_");
    let mut blocks = Vec::new();
    match json::get_str(&event, "type") {
        Some("response.created") => {
            if let Some(id) = json::get_str(&event, "response.id") {
                state.response_id = id.to_string();
            }
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
        Some("response.output_item.added") => match json::get_str(&event, "item.type") {
            Some("function_call") => {
                close_block(state, &mut blocks);
                state.tool_count += 1;
                blocks.push(event_block(
                    "content_block_start",
                    &json!({"type": "content_block_start", "index": state.block_index,
                            "content_block": {"type": "tool_use",
                                              "id": json::get_str(&event, "item.call_id").unwrap_or_default(),
                                              "name": json::get_str(&event, "item.name").unwrap_or_default(),
                                              "input": {}}}),
                ));
                state.open_block = Some("tool_use".to_string());
            }
            Some("reasoning") => ensure_block(state, &mut blocks, "thinking"),
            Some("message") => ensure_block(state, &mut blocks, "text"),
            _ => {}
        },
        Some("response.output_text.delta") => {
            ensure_block(state, &mut blocks, "text");
            blocks.push(event_block(
                "content_block_delta",
                &json!({"type": "content_block_delta", "index": state.block_index,
                        "delta": {"type": "text_delta",
                                  "text": json::get_str(&event, "delta").unwrap_or_default()}}),
            ));
        }
        Some("response.reasoning_summary_text.delta") | Some("response.reasoning_text.delta") => {
            ensure_block(state, &mut blocks, "thinking");
            blocks.push(event_block(
                "content_block_delta",
                &json!({"type": "content_block_delta", "index": state.block_index,
                        "delta": {"type": "thinking_delta",
                                  "thinking": json::get_str(&event, "delta").unwrap_or_default()}}),
            ));
        }
        Some("response.function_call_arguments.delta") => {
            blocks.push(event_block(
                "content_block_delta",
                &json!({"type": "content_block_delta", "index": state.block_index,
                        "delta": {"type": "input_json_delta",
                                  "partial_json": json::get_str(&event, "delta").unwrap_or_default()}}),
            ));
        }
        Some("response.output_item.done") => {
            close_block(state, &mut blocks);
        }
        Some("response.completed") | Some("response.incomplete") => {
            if !state.finished {
                state.finished = true;
                close_block(state, &mut blocks);
                let stop_reason = if state.tool_count > 0 {
                    "tool_use"
                } else if json::get_str(&event, "type") == Some("response.incomplete") {
                    "max_tokens"
                } else {
                    "end_turn"
                };
                blocks.push(event_block(
                    "message_delta",
                    &json!({"type": "message_delta",
                            "delta": {"stop_reason": stop_reason, "stop_sequence": Value::Null},
                            "usage": {
                                "input_tokens": json::get_i64(&event, "response.usage.input_tokens").unwrap_or(0),
                                "output_tokens": json::get_i64(&event, "response.usage.output_tokens").unwrap_or(0),
                            }}),
                ));
                blocks.push(event_block("message_stop", &json!({"type": "message_stop"})));
            }
        }
        _ => {}
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_maps_claude_messages_to_input() {
        let body = json!({
            "system": "sys",
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": "q"}]},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "t1", "name": "read", "input": {"p": 1}},
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "t1", "content": "out"},
                ]},
            ],
            "thinking": {"type": "enabled", "budget_tokens": 30_000},
            "max_tokens": 9,
        });
        let out = translate_request("gpt-5-codex", &body, true);
        assert_eq!(json::get_str(&out, "instructions"), Some("sys"));
        assert_eq!(json::get_str(&out, "input.1.type"), Some("function_call"));
        assert_eq!(json::get_str(&out, "input.2.type"), Some("function_call_output"));
        assert_eq!(json::get_str(&out, "reasoning.effort"), Some("xhigh"));
        assert_eq!(json::get_i64(&out, "max_output_tokens"), Some(9));
    }

    #[test]
    fn stream_translates_into_claude_events() {
        let mut state = StreamState::default();
        let mut out = Vec::new();
        for line in [
            br#"data: {"type":"response.created","response":{"id":"r"}}"#.as_slice(),
            br#"data: {"type":"response.output_item.added","output_index":0,"item":{"type":"message"}}"#.as_slice(),
            br#"data: {"type":"response.output_text.delta","output_index":0,"delta":"hey"}"#.as_slice(),
            br#"data: {"type":"response.output_item.done","output_index":0}"#.as_slice(),
            br#"data: {"type":"response.completed","response":{"id":"r","usage":{"input_tokens":1,"output_tokens":2}}}"#.as_slice(),
        ] {
            out.extend(translate_stream("m", line, &mut state));
        }
        let joined = out.concat();
        assert!(joined.contains("message_start"));
        assert!(joined.contains("\"text\":\"hey\""));
        assert!(joined.contains("\"stop_reason\":\"end_turn\""));
        assert!(joined.contains("message_stop"));
    }
}
