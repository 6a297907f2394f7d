//! OpenAI Chat Completions clients talking to a Claude upstream.

use aiproxy_common::json;
use aiproxy_thinking::convert_level_to_budget;
use serde_json::{json, Map, Value};

use crate::sse::{data_block, parse_line, SseLine, DONE_BLOCK};
use crate::{cache_signature, StreamState};

use super::stop_reason_to_finish;

const DEFAULT_MAX_TOKENS: i64 = 4096;

/// OpenAI chat request -> Claude messages request.
pub fn translate_request(model: &str, body: &Value, stream: bool) -> Value {
    let mut out = Map::new();
    out.insert("model".to_string(), json!(model));
    let max_tokens = json::get_i64(body, "max_tokens")
        .or_else(|| json::get_i64(body, "max_completion_tokens"))
        .unwrap_or(DEFAULT_MAX_TOKENS);
    out.insert("max_tokens".to_string(), json!(max_tokens));
    let mut out = Value::Object(out);

    if let Some(temperature) = json::get_f64(body, "temperature") {
        json::set(&mut out, "temperature", json!(temperature));
    }
    if let Some(top_p) = json::get_f64(body, "top_p") {
        json::set(&mut out, "top_p", json!(top_p));
    }
    match json::get(body, "stop") {
        Some(Value::String(stop)) => json::set(&mut out, "stop_sequences", json!([stop])),
        Some(Value::Array(stops)) => json::set(&mut out, "stop_sequences", json!(stops)),
        _ => {}
    }
    json::set(&mut out, "stream", json!(stream));

    if let Some(effort) = json::get_str(body, "reasoning_effort") {
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

    let mut system_parts: Vec<Value> = Vec::new();
    let mut messages: Vec<Value> = Vec::new();
    if let Some(Value::Array(source_messages)) = json::get(body, "messages") {
        for message in source_messages {
            let role = json::get_str(message, "role").unwrap_or("user");
            match role {
                "system" | "developer" => {
                    collect_text_parts(message.get("content"), &mut system_parts);
                }
                "tool" => {
                    let tool_result = json!({
                        "type": "tool_result",
                        "tool_use_id": json::get_str(message, "tool_call_id").unwrap_or_default(),
                        "content": content_to_text(message.get("content")),
                    });
                    // Fold consecutive tool results into one user turn.
                    if let Some(last) = messages.last_mut() {
                        if json::get_str(last, "role") == Some("user")
                            && json::get_str(last, "content.0.type") == Some("tool_result")
                        {
                            json::append(last, "content", tool_result);
                            continue;
                        }
                    }
                    messages.push(json!({"role": "user", "content": [tool_result]}));
                }
                "assistant" => {
                    let mut parts: Vec<Value> = Vec::new();
                    collect_content_parts(message.get("content"), &mut parts);
                    if let Some(Value::Array(tool_calls)) = message.get("tool_calls") {
                        for call in tool_calls {
                            parts.push(tool_call_to_tool_use(call));
                        }
                    }
                    if !parts.is_empty() {
                        messages.push(json!({"role": "assistant", "content": parts}));
                    }
                }
                _ => {
                    let mut parts: Vec<Value> = Vec::new();
                    collect_content_parts(message.get("content"), &mut parts);
                    if !parts.is_empty() {
                        messages.push(json!({"role": "user", "content": parts}));
                    }
                }
            }
        }
    }
    if !system_parts.is_empty() {
        json::set(&mut out, "system", Value::Array(system_parts));
    }
    json::set(&mut out, "messages", Value::Array(messages));

    if let Some(Value::Array(tools)) = json::get(body, "tools") {
        let converted: Vec<Value> = tools
            .iter()
            .filter_map(|tool| {
                let function = tool.get("function")?;
                Some(json!({
                    "name": json::get_str(function, "name").unwrap_or_default(),
                    "description": json::get_str(function, "description").unwrap_or_default(),
                    "input_schema": function.get("parameters").cloned().unwrap_or(json!({"type": "object"})),
                }))
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
            if let Some(name) = json::get_str(choice, "function.name") {
                json::set(&mut out, "tool_choice", json!({"type": "tool", "name": name}));
            }
        }
        _ => {}
    }

    out
}

fn collect_text_parts(content: Option<&Value>, parts: &mut Vec<Value>) {
    match content {
        Some(Value::String(text)) if !text.trim().is_empty() => {
            parts.push(json!({"type": "text", "text": text}));
        }
        Some(Value::Array(items)) => {
            for item in items {
                if let Some(text) = json::get_str(item, "text") {
                    if !text.trim().is_empty() {
                        parts.push(json!({"type": "text", "text": text}));
                    }
                }
            }
        }
        _ => {}
    }
}

fn collect_content_parts(content: Option<&Value>, parts: &mut Vec<Value>) {
    match content {
        Some(Value::String(text)) => {
            if !text.is_empty() {
                parts.push(json!({"type": "text", "text": text}));
            }
        }
        Some(Value::Array(items)) => {
            for item in items {
                match json::get_str(item, "type") {
                    Some("text") => {
                        let text = json::get_str(item, "text").unwrap_or_default();
                        parts.push(json!({"type": "text", "text": text}));
                    }
                    Some("image_url") => {
                        if let Some(part) = image_url_to_claude(item) {
                            parts.push(part);
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

/// `data:` URIs become base64 sources, anything else a URL source.
fn image_url_to_claude(item: &Value) -> Option<Value> {
    let url = json::get_str(item, "image_url.url")?;
    if let Some(rest) = url.strip_prefix("data:") {
        let (media_type, data) = rest.split_once(";base64,")?;
        return Some(json!({
            "type": "image",
            "source": {"type": "base64", "media_type": media_type, "data": data},
        }));
    }
    Some(json!({
        "type": "image",
        "source": {"type": "url", "url": url},
    }))
}

fn tool_call_to_tool_use(call: &Value) -> Value {
    let arguments = json::get_str(call, "function.arguments").unwrap_or("{}");
    let input: Value = serde_json::from_str(arguments).unwrap_or(json!({}));
    json!({
        "type": "tool_use",
        "id": json::get_str(call, "id").unwrap_or_default(),
        "name": json::get_str(call, "function.name").unwrap_or_default(),
        "input": input,
    })
}

fn content_to_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| json::get_str(item, "text"))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

/// Claude unary message -> OpenAI chat completion.
pub fn translate_response(model: &str, body: &Value) -> Value {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls: Vec<Value> = Vec::new();
    if let Some(Value::Array(content)) = json::get(body, "content") {
        for part in content {
            match json::get_str(part, "type") {
                Some("text") => text.push_str(json::get_str(part, "text").unwrap_or_default()),
                Some("thinking") => {
                    reasoning.push_str(json::get_str(part, "thinking").unwrap_or_default())
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
                _ => {}
            }
        }
    }

    let mut message = json!({"role": "assistant", "content": text});
    if !reasoning.is_empty() {
        json::set(&mut message, "reasoning_content", json!(reasoning));
    }
    if !tool_calls.is_empty() {
        json::set(&mut message, "tool_calls", Value::Array(tool_calls));
    }

    let stop_reason = json::get_str(body, "stop_reason").unwrap_or("end_turn");
    json!({
        "id": json::get_str(body, "id").unwrap_or_default(),
        "object": "chat.completion",
        "created": time::OffsetDateTime::now_utc().unix_timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": stop_reason_to_finish(stop_reason),
        }],
        "usage": {
            "prompt_tokens": json::get_i64(body, "usage.input_tokens").unwrap_or(0),
            "completion_tokens": json::get_i64(body, "usage.output_tokens").unwrap_or(0),
            "total_tokens": json::get_i64(body, "usage.input_tokens").unwrap_or(0)
                + json::get_i64(body, "usage.output_tokens").unwrap_or(0),
        },
    })
}

/// Claude SSE line -> OpenAI chat completion chunk(s).
pub fn translate_stream(model: &str, line: &[u8], state: &mut StreamState) -> Vec<String> {
    let event = match parse_line(line) {
        SseLine::Data(value) => value,
        SseLine::Done => {
            if state.finished {
                return Vec::new();
            }
            state.finished = true;
            return vec![DONE_BLOCK.to_string()];
        }
        _ => return Vec::new(),
    };

    state.ensure_identity("chatcmpl-");
    let mut blocks = Vec::new();
    match json::get_str(&event, "type") {
        Some("message_start") => {
            if let Some(id) = json::get_str(&event, "message.id") {
                state.response_id = id.to_string();
            }
            state.input_tokens = json::get_i64(&event, "message.usage.input_tokens").unwrap_or(0);
            state.started = true;
            blocks.push(chunk(state, model, json!({"role": "assistant", "content": ""}), None, None));
        }
        Some("content_block_start") => {
            let index = json::get_i64(&event, "index").unwrap_or(0);
            match json::get_str(&event, "content_block.type") {
                Some("tool_use") => {
                    let tool_index = state.tool_count;
                    state.tool_count += 1;
                    let id = json::get_str(&event, "content_block.id").unwrap_or_default().to_string();
                    let name = json::get_str(&event, "content_block.name").unwrap_or_default().to_string();
                    state.tool_indexes.insert(index, tool_index);
                    state.tool_ids.insert(index, id.clone());
                    blocks.push(chunk(
                        state,
                        model,
                        json!({"tool_calls": [{
                            "index": tool_index,
                            "id": id,
                            "type": "function",
                            "function": {"name": name, "arguments": ""},
                        }]}),
                        None,
                        None,
                    ));
                }
                Some("thinking") => state.open_block = Some("thinking".to_string()),
                _ => state.open_block = Some("text".to_string()),
            }
        }
        Some("content_block_delta") => {
            let index = json::get_i64(&event, "index").unwrap_or(0);
            match json::get_str(&event, "delta.type") {
                Some("text_delta") => {
                    let text = json::get_str(&event, "delta.text").unwrap_or_default();
                    blocks.push(chunk(state, model, json!({"content": text}), None, None));
                }
                Some("thinking_delta") => {
                    let text = json::get_str(&event, "delta.thinking").unwrap_or_default();
                    state.thinking_text.push_str(text);
                    blocks.push(chunk(state, model, json!({"reasoning_content": text}), None, None));
                }
                Some("signature_delta") => {
                    let signature = json::get_str(&event, "delta.signature").unwrap_or_default();
                    state.thinking_signature = signature.to_string();
                    cache_signature(model, &state.thinking_text, signature);
                }
                Some("input_json_delta") => {
                    let partial = json::get_str(&event, "delta.partial_json").unwrap_or_default();
                    let tool_index = state.tool_indexes.get(&index).copied().unwrap_or(0);
                    blocks.push(chunk(
                        state,
                        model,
                        json!({"tool_calls": [{
                            "index": tool_index,
                            "function": {"arguments": partial},
                        }]}),
                        None,
                        None,
                    ));
                }
                _ => {}
            }
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
            let finish = stop_reason_to_finish(&state.finish_reason);
            let usage = json!({
                "prompt_tokens": state.input_tokens,
                "completion_tokens": state.output_tokens,
                "total_tokens": state.input_tokens + state.output_tokens,
            });
            blocks.push(chunk(state, model, json!({}), Some(finish), Some(usage)));
            state.finished = true;
            blocks.push(DONE_BLOCK.to_string());
        }
        _ => {}
    }
    blocks
}

fn chunk(
    state: &StreamState,
    model: &str,
    delta: Value,
    finish_reason: Option<&str>,
    usage: Option<Value>,
) -> String {
    let mut payload = json!({
        "id": state.response_id,
        "object": "chat.completion.chunk",
        "created": state.created_at,
        "model": model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason.map(Value::from).unwrap_or(Value::Null),
        }],
    });
    if let Some(usage) = usage {
        json::set(&mut payload, "usage", usage);
    }
    data_block(&payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_maps_messages_tools_and_images() {
        let body = json!({
            "model": "x",
            "max_tokens": 1024,
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": [
                    {"type": "text", "text": "what is this"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,aGk="}},
                ]},
                {"role": "assistant", "tool_calls": [
                    {"id": "call_1", "type": "function",
                     "function": {"name": "read", "arguments": "{\"path\":\"a\"}"}},
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "data"},
            ],
            "tools": [{"type": "function", "function": {
                "name": "read", "description": "reads", "parameters": {"type": "object"}}}],
            "tool_choice": "required",
        });
        let out = translate_request("claude-sonnet-4-5", &body, true);
        assert_eq!(json::get_str(&out, "model"), Some("claude-sonnet-4-5"));
        assert_eq!(json::get_str(&out, "system.0.text"), Some("be brief"));
        assert_eq!(json::get_str(&out, "messages.0.content.1.type"), Some("image"));
        assert_eq!(
            json::get_str(&out, "messages.0.content.1.source.media_type"),
            Some("image/png")
        );
        assert_eq!(json::get_str(&out, "messages.1.content.0.type"), Some("tool_use"));
        assert_eq!(json::get_str(&out, "messages.1.content.0.id"), Some("call_1"));
        assert_eq!(json::get_str(&out, "messages.2.content.0.type"), Some("tool_result"));
        assert_eq!(json::get_str(&out, "tools.0.name"), Some("read"));
        assert_eq!(json::get_str(&out, "tool_choice.type"), Some("any"));
        assert_eq!(json::get_bool(&out, "stream"), Some(true));
    }

    #[test]
    fn reasoning_effort_becomes_thinking() {
        let body = json!({"messages": [], "reasoning_effort": "medium"});
        let out = translate_request("claude-sonnet-4-5", &body, false);
        assert_eq!(json::get_str(&out, "thinking.type"), Some("enabled"));
        assert_eq!(json::get_i64(&out, "thinking.budget_tokens"), Some(8192));
    }

    #[test]
    fn response_maps_tool_use_and_usage() {
        let body = json!({
            "id": "msg_1",
            "content": [
                {"type": "text", "text": "hello"},
                {"type": "tool_use", "id": "toolu_1", "name": "read", "input": {"path": "a"}},
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 10, "output_tokens": 5},
        });
        let out = translate_response("m", &body);
        assert_eq!(json::get_str(&out, "choices.0.finish_reason"), Some("tool_calls"));
        assert_eq!(json::get_str(&out, "choices.0.message.content"), Some("hello"));
        assert_eq!(
            json::get_str(&out, "choices.0.message.tool_calls.0.function.name"),
            Some("read")
        );
        assert_eq!(json::get_i64(&out, "usage.total_tokens"), Some(15));
    }

    #[test]
    fn stream_round_trip_produces_chunks_and_done() {
        let mut state = StreamState::default();
        let mut out = Vec::new();
        for line in [
            br#"data: {"type":"message_start","message":{"id":"msg_1","usage":{"input_tokens":3}}}"#.as_slice(),
            br#"data: {"type":"content_block_start","index":0,"content_block":{"type":"text"}}"#.as_slice(),
            br#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#.as_slice(),
            br#"data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":2}}"#.as_slice(),
            br#"data: {"type":"message_stop"}"#.as_slice(),
        ] {
            out.extend(translate_stream("m", line, &mut state));
        }
        assert!(out.iter().any(|b| b.contains("\"content\":\"hi\"")));
        assert!(out.iter().any(|b| b.contains("\"finish_reason\":\"stop\"")));
        assert_eq!(out.last().map(String::as_str), Some(DONE_BLOCK));
        // A later [DONE] flush does not duplicate the terminator.
        assert!(translate_stream("m", b"[DONE]", &mut state).is_empty());
    }
}
