//! OpenAI Chat Completions clients talking to a Responses (Codex) upstream.

use aiproxy_common::json;
use serde_json::{json, Map, Value};

use crate::sse::{data_block, parse_line, SseLine, DONE_BLOCK};
use crate::StreamState;

/// OpenAI chat request -> Responses request.
pub fn translate_request(model: &str, body: &Value, stream: bool) -> Value {
    let mut out = Value::Object(Map::new());
    json::set(&mut out, "model", json!(model));
    json::set(&mut out, "stream", json!(stream));
    json::set(&mut out, "store", json!(false));

    let mut instructions: Vec<String> = Vec::new();
    let mut input: Vec<Value> = Vec::new();
    if let Some(Value::Array(messages)) = json::get(body, "messages") {
        for message in messages {
            match json::get_str(message, "role") {
                Some("system") | Some("developer") => {
                    let text = flatten_text(message.get("content"));
                    if !text.is_empty() {
                        instructions.push(text);
                    }
                }
                Some("assistant") => {
                    let text = flatten_text(message.get("content"));
                    if !text.is_empty() {
                        input.push(json!({"type": "message", "role": "assistant",
                                          "content": [{"type": "output_text", "text": text}]}));
                    }
                    if let Some(Value::Array(tool_calls)) = message.get("tool_calls") {
                        for call in tool_calls {
                            input.push(json!({
                                "type": "function_call",
                                "call_id": json::get_str(call, "id").unwrap_or_default(),
                                "name": json::get_str(call, "function.name").unwrap_or_default(),
                                "arguments": json::get_str(call, "function.arguments").unwrap_or("{}"),
                            }));
                        }
                    }
                }
                Some("tool") => {
                    input.push(json!({
                        "type": "function_call_output",
                        "call_id": json::get_str(message, "tool_call_id").unwrap_or_default(),
                        "output": flatten_text(message.get("content")),
                    }));
                }
                _ => {
                    let mut content: Vec<Value> = Vec::new();
                    match json::get(message, "content") {
                        Some(Value::String(text)) => {
                            content.push(json!({"type": "input_text", "text": text}));
                        }
                        Some(Value::Array(items)) => {
                            for item in items {
                                match json::get_str(item, "type") {
                                    Some("text") => content.push(json!({
                                        "type": "input_text",
                                        "text": json::get_str(item, "text").unwrap_or_default(),
                                    })),
                                    Some("image_url") => {
                                        if let Some(url) = json::get_str(item, "image_url.url") {
                                            content.push(json!({
                                                "type": "input_image",
                                                "image_url": url,
                                            }));
                                        }
                                    }
                                    _ => {}
                                }
                            }
                        }
                        _ => {}
                    }
                    if !content.is_empty() {
                        input.push(json!({"type": "message", "role": "user", "content": content}));
                    }
                }
            }
        }
    }
    if !instructions.is_empty() {
        json::set(&mut out, "instructions", json!(instructions.join("\n\n")));
    }
    json::set(&mut out, "input", Value::Array(input));

    if let Some(Value::Array(tools)) = json::get(body, "tools") {
        let converted: Vec<Value> = tools
            .iter()
            .filter_map(|tool| {
                let function = tool.get("function")?;
                Some(json!({
                    "type": "function",
                    "name": json::get_str(function, "name").unwrap_or_default(),
                    "description": json::get_str(function, "description").unwrap_or_default(),
                    "parameters": function.get("parameters").cloned().unwrap_or(json!({"type": "object"})),
                }))
            })
            .collect();
        if !converted.is_empty() {
            json::set(&mut out, "tools", Value::Array(converted));
        }
    }
    match json::get(body, "tool_choice") {
        Some(Value::String(choice)) => json::set(&mut out, "tool_choice", json!(choice)),
        Some(choice @ Value::Object(_)) => {
            if let Some(name) = json::get_str(choice, "function.name") {
                json::set(&mut out, "tool_choice", json!({"type": "function", "name": name}));
            }
        }
        _ => {}
    }

    if let Some(max_tokens) = json::get_i64(body, "max_tokens")
        .or_else(|| json::get_i64(body, "max_completion_tokens"))
    {
        json::set(&mut out, "max_output_tokens", json!(max_tokens));
    }
    if let Some(temperature) = json::get_f64(body, "temperature") {
        json::set(&mut out, "temperature", json!(temperature));
    }
    if let Some(effort) = json::get_str(body, "reasoning_effort") {
        json::set(&mut out, "reasoning.effort", json!(effort));
        json::set(&mut out, "reasoning.summary", json!("auto"));
    }

    out
}

fn flatten_text(content: Option<&Value>) -> String {
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

/// Responses envelope -> OpenAI chat completion.
pub fn translate_response(model: &str, body: &Value) -> Value {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls: Vec<Value> = Vec::new();
    if let Some(Value::Array(output)) = json::get(body, "output") {
        for item in output {
            match json::get_str(item, "type") {
                Some("message") => {
                    if let Some(Value::Array(content)) = json::get(item, "content") {
                        for part in content {
                            if json::get_str(part, "type") == Some("output_text") {
                                text.push_str(json::get_str(part, "text").unwrap_or_default());
                            }
                        }
                    }
                }
                Some("reasoning") => {
                    if let Some(Value::Array(summary)) = json::get(item, "summary") {
                        for part in summary {
                            reasoning.push_str(json::get_str(part, "text").unwrap_or_default());
                        }
                    }
                }
                Some("function_call") => {
                    tool_calls.push(json!({
                        "id": json::get_str(item, "call_id").unwrap_or_default(),
                        "type": "function",
                        "function": {
                            "name": json::get_str(item, "name").unwrap_or_default(),
                            "arguments": json::get_str(item, "arguments").unwrap_or("{}"),
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
    let finish = if tool_calls.is_empty() {
        if json::get_str(body, "status") == Some("incomplete") {
            "length"
        } else {
            "stop"
        }
    } else {
        json::set(&mut message, "tool_calls", Value::Array(tool_calls));
        "tool_calls"
    };

    let input_tokens = json::get_i64(body, "usage.input_tokens").unwrap_or(0);
    let output_tokens = json::get_i64(body, "usage.output_tokens").unwrap_or(0);
    json!({
        "id": format!("chatcmpl-{}", json::get_str(body, "id").unwrap_or("0")),
        "object": "chat.completion",
        "created": json::get_i64(body, "created_at")
            .unwrap_or_else(|| time::OffsetDateTime::now_utc().unix_timestamp()),
        "model": model,
        "choices": [{"index": 0, "message": message, "finish_reason": finish}],
        "usage": {
            "prompt_tokens": input_tokens,
            "completion_tokens": output_tokens,
            "total_tokens": input_tokens + output_tokens,
        },
    })
}

/// Responses SSE event -> OpenAI chat completion chunk(s).
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
        Some("response.created") => {
            if let Some(id) = json::get_str(&event, "response.id") {
                state.response_id = format!("chatcmpl-{id}");
            }
            state.started = true;
            blocks.push(chunk(state, model, json!({"role": "assistant", "content": ""}), None, None));
        }
        Some("response.output_item.added") => {
            if json::get_str(&event, "item.type") == Some("function_call") {
                let index = state.tool_count;
                state.tool_count += 1;
                let output_index = json::get_i64(&event, "output_index").unwrap_or(0);
                state.tool_indexes.insert(output_index, index);
                blocks.push(chunk(
                    state,
                    model,
                    json!({"tool_calls": [{
                        "index": index,
                        "id": json::get_str(&event, "item.call_id").unwrap_or_default(),
                        "type": "function",
                        "function": {
                            "name": json::get_str(&event, "item.name").unwrap_or_default(),
                            "arguments": "",
                        },
                    }]}),
                    None,
                    None,
                ));
            }
        }
        Some("response.output_text.delta") => {
            let text = json::get_str(&event, "delta").unwrap_or_default();
            blocks.push(chunk(state, model, json!({"content": text}), None, None));
        }
        Some("response.reasoning_summary_text.delta")
        | Some("response.reasoning_text.delta") => {
            let text = json::get_str(&event, "delta").unwrap_or_default();
            blocks.push(chunk(state, model, json!({"reasoning_content": text}), None, None));
        }
        Some("response.function_call_arguments.delta") => {
            let output_index = json::get_i64(&event, "output_index").unwrap_or(0);
            let index = state.tool_indexes.get(&output_index).copied().unwrap_or(0);
            let delta = json::get_str(&event, "delta").unwrap_or_default();
            blocks.push(chunk(
                state,
                model,
                json!({"tool_calls": [{"index": index, "function": {"arguments": delta}}]}),
                None,
                None,
            ));
        }
        Some("response.completed") | Some("response.incomplete") => {
            state.input_tokens = json::get_i64(&event, "response.usage.input_tokens").unwrap_or(0);
            state.output_tokens =
                json::get_i64(&event, "response.usage.output_tokens").unwrap_or(0);
            let finish = if state.tool_count > 0 {
                "tool_calls"
            } else if json::get_str(&event, "type") == Some("response.incomplete") {
                "length"
            } else {
                "stop"
            };
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
    fn request_builds_input_items() {
        let body = json!({
            "messages": [
                {"role": "system", "content": "be kind"},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "yo", "tool_calls": [{
                    "id": "c1", "type": "function",
                    "function": {"name": "read", "arguments": "{}"}}]},
                {"role": "tool", "tool_call_id": "c1", "content": "done"},
            ],
            "tools": [{"type": "function", "function": {"name": "read", "parameters": {}}}],
            "reasoning_effort": "high",
            "max_tokens": 55,
        });
        let out = translate_request("gpt-5", &body, true);
        assert_eq!(json::get_str(&out, "instructions"), Some("be kind"));
        assert_eq!(json::get_str(&out, "input.0.content.0.type"), Some("input_text"));
        assert_eq!(json::get_str(&out, "input.1.content.0.type"), Some("output_text"));
        assert_eq!(json::get_str(&out, "input.2.type"), Some("function_call"));
        assert_eq!(json::get_str(&out, "input.3.type"), Some("function_call_output"));
        assert_eq!(json::get_str(&out, "tools.0.name"), Some("read"));
        assert_eq!(json::get_str(&out, "reasoning.effort"), Some("high"));
        assert_eq!(json::get_i64(&out, "max_output_tokens"), Some(55));
    }

    #[test]
    fn response_collects_output() {
        let body = json!({
            "id": "r1",
            "status": "completed",
            "output": [
                {"type": "reasoning", "summary": [{"type": "summary_text", "text": "hm"}]},
                {"type": "message", "content": [{"type": "output_text", "text": "hi"}]},
                {"type": "function_call", "call_id": "c9", "name": "read", "arguments": "{}"},
            ],
            "usage": {"input_tokens": 3, "output_tokens": 4},
        });
        let out = translate_response("m", &body);
        assert_eq!(json::get_str(&out, "choices.0.message.content"), Some("hi"));
        assert_eq!(
            json::get_str(&out, "choices.0.message.reasoning_content"),
            Some("hm")
        );
        assert_eq!(json::get_str(&out, "choices.0.finish_reason"), Some("tool_calls"));
    }

    #[test]
    fn stream_translates_events() {
        let mut state = StreamState::default();
        let mut out = Vec::new();
        for line in [
            br#"data: {"type":"response.created","response":{"id":"r1"}}"#.as_slice(),
            br#"data: {"type":"response.output_text.delta","output_index":0,"delta":"ok"}"#.as_slice(),
            br#"data: {"type":"response.completed","response":{"id":"r1","usage":{"input_tokens":1,"output_tokens":2}}}"#.as_slice(),
        ] {
            out.extend(translate_stream("m", line, &mut state));
        }
        let joined = out.concat();
        assert!(joined.contains("\"content\":\"ok\""));
        assert!(joined.contains("\"finish_reason\":\"stop\""));
        assert!(out.last().map(String::as_str) == Some(DONE_BLOCK));
    }
}
