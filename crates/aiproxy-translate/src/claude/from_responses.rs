//! OpenAI Responses (Codex) clients talking to a Claude upstream.

use aiproxy_common::json;
use aiproxy_thinking::convert_level_to_budget;
use serde_json::{json, Map, Value};

use crate::sse::{data_block, parse_line, SseLine};
use crate::{cache_signature, StreamState};

const DEFAULT_MAX_TOKENS: i64 = 4096;

/// Responses request -> Claude messages request.
pub fn translate_request(model: &str, body: &Value, stream: bool) -> Value {
    let mut out = Map::new();
    out.insert("model".to_string(), json!(model));
    let max_tokens = json::get_i64(body, "max_output_tokens").unwrap_or(DEFAULT_MAX_TOKENS);
    out.insert("max_tokens".to_string(), json!(max_tokens));
    let mut out = Value::Object(out);

    if let Some(temperature) = json::get_f64(body, "temperature") {
        json::set(&mut out, "temperature", json!(temperature));
    }
    if let Some(top_p) = json::get_f64(body, "top_p") {
        json::set(&mut out, "top_p", json!(top_p));
    }
    json::set(&mut out, "stream", json!(stream));

    if let Some(instructions) = json::get_str(body, "instructions") {
        if !instructions.trim().is_empty() {
            json::set(&mut out, "system", json!([{"type": "text", "text": instructions}]));
        }
    }

    if let Some(effort) = json::get_str(body, "reasoning.effort") {
        match effort {
            "none" => json::set(&mut out, "thinking", json!({"type": "disabled"})),
            "auto" => json::set(&mut out, "thinking", json!({"type": "enabled"})),
            level => {
                if let Some(budget) = convert_level_to_budget(level) {
                    json::set(
                        &mut out,
                        "thinking",
                        json!({"type": "enabled", "budget_tokens": budget}),
                    );
                }
            }
        }
    }

    let mut messages: Vec<Value> = Vec::new();
    match json::get(body, "input") {
        Some(Value::String(text)) => {
            messages.push(json!({"role": "user", "content": [{"type": "text", "text": text}]}));
        }
        Some(Value::Array(items)) => {
            for item in items {
                translate_input_item(item, &mut messages);
            }
        }
        _ => {}
    }
    json::set(&mut out, "messages", Value::Array(messages));

    if let Some(Value::Array(tools)) = json::get(body, "tools") {
        let converted: Vec<Value> = tools
            .iter()
            .filter(|tool| json::get_str(tool, "type") == Some("function"))
            .map(|tool| {
                json!({
                    "name": json::get_str(tool, "name").unwrap_or_default(),
                    "description": json::get_str(tool, "description").unwrap_or_default(),
                    "input_schema": tool.get("parameters").cloned().unwrap_or(json!({"type": "object"})),
                })
            })
            .collect();
        if !converted.is_empty() {
            json::set(&mut out, "tools", Value::Array(converted));
        }
    }

    match json::get(body, "tool_choice") {
        Some(Value::String(choice)) => match choice.as_str() {
            "required" => json::set(&mut out, "tool_choice", json!({"type": "any"})),
            "none" => {}
            _ => json::set(&mut out, "tool_choice", json!({"type": "auto"})),
        },
        Some(choice @ Value::Object(_)) => {
            if let Some(name) = json::get_str(choice, "name") {
                json::set(&mut out, "tool_choice", json!({"type": "tool", "name": name}));
            }
        }
        _ => {}
    }

    out
}

fn translate_input_item(item: &Value, messages: &mut Vec<Value>) {
    match json::get_str(item, "type") {
        Some("message") | None => {
            let role = match json::get_str(item, "role") {
                Some("assistant") => "assistant",
                _ => "user",
            };
            let mut parts: Vec<Value> = Vec::new();
            match json::get(item, "content") {
                Some(Value::String(text)) => {
                    parts.push(json!({"type": "text", "text": text}));
                }
                Some(Value::Array(content)) => {
                    for part in content {
                        match json::get_str(part, "type") {
                            Some("input_text") | Some("output_text") | Some("text") => {
                                let text = json::get_str(part, "text").unwrap_or_default();
                                parts.push(json!({"type": "text", "text": text}));
                            }
                            Some("input_image") => {
                                if let Some(image) = image_part(part) {
                                    parts.push(image);
                                }
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
            if !parts.is_empty() {
                messages.push(json!({"role": role, "content": parts}));
            }
        }
        Some("function_call") => {
            let arguments = json::get_str(item, "arguments").unwrap_or("{}");
            let input: Value = serde_json::from_str(arguments).unwrap_or(json!({}));
            messages.push(json!({
                "role": "assistant",
                "content": [{
                    "type": "tool_use",
                    "id": json::get_str(item, "call_id").unwrap_or_default(),
                    "name": json::get_str(item, "name").unwrap_or_default(),
                    "input": input,
                }],
            }));
        }
        Some("function_call_output") => {
            let output = match json::get(item, "output") {
                Some(Value::String(text)) => text.clone(),
                Some(other) => serde_json::to_string(other).unwrap_or_default(),
                None => String::new(),
            };
            messages.push(json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": json::get_str(item, "call_id").unwrap_or_default(),
                    "content": output,
                }],
            }));
        }
        _ => {}
    }
}

fn image_part(part: &Value) -> Option<Value> {
    let url = json::get_str(part, "image_url")?;
    if let Some(rest) = url.strip_prefix("data:") {
        let (media_type, data) = rest.split_once(";base64,")?;
        return Some(json!({
            "type": "image",
            "source": {"type": "base64", "media_type": media_type, "data": data},
        }));
    }
    Some(json!({"type": "image", "source": {"type": "url", "url": url}}))
}

/// Claude unary message -> Responses response envelope.
pub fn translate_response(model: &str, body: &Value) -> Value {
    let id = json::get_str(body, "id").unwrap_or_default();
    let mut output: Vec<Value> = Vec::new();
    let mut text = String::new();
    if let Some(Value::Array(content)) = json::get(body, "content") {
        for part in content {
            match json::get_str(part, "type") {
                Some("thinking") => {
                    output.push(json!({
                        "type": "reasoning",
                        "id": format!("rs_{id}"),
                        "summary": [{
                            "type": "summary_text",
                            "text": json::get_str(part, "thinking").unwrap_or_default(),
                        }],
                    }));
                }
                Some("text") => text.push_str(json::get_str(part, "text").unwrap_or_default()),
                Some("tool_use") => {
                    let arguments = part
                        .get("input")
                        .map(|input| serde_json::to_string(input).unwrap_or_default())
                        .unwrap_or_else(|| "{}".to_string());
                    output.push(json!({
                        "type": "function_call",
                        "id": format!("fc_{}", json::get_str(part, "id").unwrap_or_default()),
                        "call_id": json::get_str(part, "id").unwrap_or_default(),
                        "name": json::get_str(part, "name").unwrap_or_default(),
                        "arguments": arguments,
                        "status": "completed",
                    }));
                }
                _ => {}
            }
        }
    }
    if !text.is_empty() {
        output.push(json!({
            "type": "message",
            "id": format!("msg_{id}"),
            "status": "completed",
            "role": "assistant",
            "content": [{"type": "output_text", "annotations": [], "text": text}],
        }));
    }

    let input_tokens = json::get_i64(body, "usage.input_tokens").unwrap_or(0);
    let output_tokens = json::get_i64(body, "usage.output_tokens").unwrap_or(0);
    json!({
        "id": id,
        "object": "response",
        "created_at": time::OffsetDateTime::now_utc().unix_timestamp(),
        "status": "completed",
        "model": model,
        "output": output,
        "usage": {
            "input_tokens": input_tokens,
            "output_tokens": output_tokens,
            "total_tokens": input_tokens + output_tokens,
        },
    })
}

/// Claude SSE line -> Responses SSE event(s).
pub fn translate_stream(model: &str, line: &[u8], state: &mut StreamState) -> Vec<String> {
    let event = match parse_line(line) {
        SseLine::Data(value) => value,
        SseLine::Done => return flush_completed(model, state),
        _ => return Vec::new(),
    };

    state.ensure_identity("resp_");
    let mut blocks = Vec::new();
    match json::get_str(&event, "type") {
        Some("message_start") => {
            if let Some(id) = json::get_str(&event, "message.id") {
                state.response_id = format!("resp_{id}");
            }
            state.input_tokens = json::get_i64(&event, "message.usage.input_tokens").unwrap_or(0);
            state.started = true;
            blocks.push(data_block(&json!({
                "type": "response.created",
                "response": envelope(model, state, "in_progress", Value::Array(Vec::new())),
            })));
        }
        Some("content_block_start") => {
            let index = json::get_i64(&event, "index").unwrap_or(0);
            match json::get_str(&event, "content_block.type") {
                Some("tool_use") => {
                    let id = json::get_str(&event, "content_block.id").unwrap_or_default().to_string();
                    let name = json::get_str(&event, "content_block.name").unwrap_or_default().to_string();
                    state.tool_ids.insert(index, id.clone());
                    state.tool_names.insert(index, name.clone());
                    state.tool_args.insert(index, String::new());
                    state.open_block = Some("tool_use".to_string());
                    blocks.push(data_block(&json!({
                        "type": "response.output_item.added",
                        "output_index": state.output_index,
                        "item": {
                            "type": "function_call",
                            "id": format!("fc_{id}"),
                            "call_id": id,
                            "name": name,
                            "arguments": "",
                        },
                    })));
                }
                Some("thinking") => {
                    state.open_block = Some("thinking".to_string());
                    blocks.push(data_block(&json!({
                        "type": "response.output_item.added",
                        "output_index": state.output_index,
                        "item": {"type": "reasoning", "id": format!("rs_{}", state.response_id), "summary": []},
                    })));
                }
                _ => {
                    state.open_block = Some("text".to_string());
                    blocks.push(data_block(&json!({
                        "type": "response.output_item.added",
                        "output_index": state.output_index,
                        "item": {
                            "type": "message",
                            "id": format!("msg_{}", state.response_id),
                            "status": "in_progress",
                            "role": "assistant",
                            "content": [],
                        },
                    })));
                }
            }
        }
        Some("content_block_delta") => {
            let index = json::get_i64(&event, "index").unwrap_or(0);
            match json::get_str(&event, "delta.type") {
                Some("text_delta") => {
                    let text = json::get_str(&event, "delta.text").unwrap_or_default();
                    state.text.push_str(text);
                    blocks.push(data_block(&json!({
                        "type": "response.output_text.delta",
                        "output_index": state.output_index,
                        "content_index": 0,
                        "delta": text,
                    })));
                }
                Some("thinking_delta") => {
                    let text = json::get_str(&event, "delta.thinking").unwrap_or_default();
                    state.thinking_text.push_str(text);
                    blocks.push(data_block(&json!({
                        "type": "response.reasoning_summary_text.delta",
                        "output_index": state.output_index,
                        "summary_index": 0,
                        "delta": text,
                    })));
                }
                Some("signature_delta") => {
                    let signature = json::get_str(&event, "delta.signature").unwrap_or_default();
                    state.thinking_signature = signature.to_string();
                    cache_signature(model, &state.thinking_text, signature);
                }
                Some("input_json_delta") => {
                    let partial = json::get_str(&event, "delta.partial_json").unwrap_or_default();
                    state.tool_args.entry(index).or_default().push_str(partial);
                    blocks.push(data_block(&json!({
                        "type": "response.function_call_arguments.delta",
                        "output_index": state.output_index,
                        "delta": partial,
                    })));
                }
                _ => {}
            }
        }
        Some("content_block_stop") => {
            let index = json::get_i64(&event, "index").unwrap_or(0);
            match state.open_block.take().as_deref() {
                Some("text") => {
                    blocks.push(data_block(&json!({
                        "type": "response.output_text.done",
                        "output_index": state.output_index,
                        "content_index": 0,
                        "text": state.text,
                    })));
                    blocks.push(data_block(&json!({
                        "type": "response.output_item.done",
                        "output_index": state.output_index,
                        "item": {
                            "type": "message",
                            "id": format!("msg_{}", state.response_id),
                            "status": "completed",
                            "role": "assistant",
                            "content": [{"type": "output_text", "annotations": [], "text": state.text}],
                        },
                    })));
                    state.text.clear();
                }
                Some("tool_use") => {
                    let id = state.tool_ids.get(&index).cloned().unwrap_or_default();
                    let name = state.tool_names.get(&index).cloned().unwrap_or_default();
                    let arguments = state.tool_args.get(&index).cloned().unwrap_or_default();
                    blocks.push(data_block(&json!({
                        "type": "response.output_item.done",
                        "output_index": state.output_index,
                        "item": {
                            "type": "function_call",
                            "id": format!("fc_{id}"),
                            "call_id": id,
                            "name": name,
                            "arguments": arguments,
                            "status": "completed",
                        },
                    })));
                }
                _ => {}
            }
            state.output_index += 1;
        }
        Some("message_delta") => {
            if let Some(stop_reason) = json::get_str(&event, "delta.stop_reason") {
                state.finish_reason = stop_reason.to_string();
            }
            if let Some(output) = json::get_i64(&event, "usage.output_tokens") {
                state.output_tokens = output;
            }
        }
        Some("message_stop") => {
            blocks.extend(flush_completed(model, state));
        }
        _ => {}
    }
    blocks
}

fn flush_completed(model: &str, state: &mut StreamState) -> Vec<String> {
    if state.finished {
        return Vec::new();
    }
    state.finished = true;
    state.ensure_identity("resp_");
    vec![data_block(&json!({
        "type": "response.completed",
        "response": envelope(model, state, "completed", Value::Array(Vec::new())),
    }))]
}

fn envelope(model: &str, state: &StreamState, status: &str, output: Value) -> Value {
    json!({
        "id": state.response_id,
        "object": "response",
        "created_at": state.created_at,
        "status": status,
        "model": model,
        "output": output,
        "usage": {
            "input_tokens": state.input_tokens,
            "output_tokens": state.output_tokens,
            "total_tokens": state.input_tokens + state.output_tokens,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_maps_input_items() {
        let body = json!({
            "model": "gpt-5",
            "instructions": "be terse",
            "max_output_tokens": 2048,
            "input": [
                {"type": "message", "role": "user",
                 "content": [{"type": "input_text", "text": "hi"}]},
                {"type": "function_call", "call_id": "call_9", "name": "read",
                 "arguments": "{\"p\":1}"},
                {"type": "function_call_output", "call_id": "call_9", "output": "ok"},
            ],
            "reasoning": {"effort": "low"},
        });
        let out = translate_request("claude-sonnet-4-5", &body, false);
        assert_eq!(json::get_str(&out, "system.0.text"), Some("be terse"));
        assert_eq!(json::get_i64(&out, "max_tokens"), Some(2048));
        assert_eq!(json::get_str(&out, "messages.0.content.0.text"), Some("hi"));
        assert_eq!(json::get_str(&out, "messages.1.content.0.type"), Some("tool_use"));
        assert_eq!(
            json::get_str(&out, "messages.2.content.0.tool_use_id"),
            Some("call_9")
        );
        assert_eq!(json::get_i64(&out, "thinking.budget_tokens"), Some(1024));
    }

    #[test]
    fn response_emits_output_items() {
        let body = json!({
            "id": "msg_1",
            "content": [
                {"type": "thinking", "thinking": "mull", "signature": "s"},
                {"type": "text", "text": "answer"},
                {"type": "tool_use", "id": "toolu_1", "name": "read", "input": {}},
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 1, "output_tokens": 2},
        });
        let out = translate_response("m", &body);
        assert_eq!(json::get_str(&out, "object"), Some("response"));
        assert_eq!(json::get_str(&out, "output.0.type"), Some("reasoning"));
        assert_eq!(json::get_str(&out, "output.1.type"), Some("function_call"));
        assert_eq!(json::get_str(&out, "output.2.type"), Some("message"));
        assert_eq!(json::get_i64(&out, "usage.total_tokens"), Some(3));
    }

    #[test]
    fn stream_emits_created_text_and_completed() {
        let mut state = StreamState::default();
        let mut out = Vec::new();
        for line in [
            br#"data: {"type":"message_start","message":{"id":"1","usage":{"input_tokens":1}}}"#.as_slice(),
            br#"data: {"type":"content_block_start","index":0,"content_block":{"type":"text"}}"#.as_slice(),
            br#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"ok"}}"#.as_slice(),
            br#"data: {"type":"content_block_stop","index":0}"#.as_slice(),
            br#"data: {"type":"message_stop"}"#.as_slice(),
        ] {
            out.extend(translate_stream("m", line, &mut state));
        }
        assert!(out[0].contains("response.created"));
        assert!(out.iter().any(|b| b.contains("response.output_text.delta")));
        assert!(out.last().map(String::as_str).unwrap_or_default().contains("response.completed"));
    }
}
