//! OpenAI Responses (Codex) clients talking to a Chat-Completions upstream.

use aiproxy_common::json;
use serde_json::{json, Map, Value};

use crate::sse::{data_block, parse_line, SseLine};
use crate::StreamState;

/// Responses request -> OpenAI chat request.
pub fn translate_request(model: &str, body: &Value, stream: bool) -> Value {
    let mut out = Value::Object(Map::new());
    json::set(&mut out, "model", json!(model));
    json::set(&mut out, "stream", json!(stream));

    let mut messages: Vec<Value> = Vec::new();
    if let Some(instructions) = json::get_str(body, "instructions") {
        if !instructions.trim().is_empty() {
            messages.push(json!({"role": "system", "content": instructions}));
        }
    }

    match json::get(body, "input") {
        Some(Value::String(text)) => messages.push(json!({"role": "user", "content": text})),
        Some(Value::Array(items)) => {
            for item in items {
                match json::get_str(item, "type") {
                    Some("message") | None => {
                        let role = json::get_str(item, "role").unwrap_or("user");
                        let text = match json::get(item, "content") {
                            Some(Value::String(text)) => text.clone(),
                            Some(Value::Array(content)) => content
                                .iter()
                                .filter_map(|part| json::get_str(part, "text"))
                                .collect::<Vec<_>>()
                                .join(""),
                            _ => String::new(),
                        };
                        if !text.is_empty() {
                            messages.push(json!({"role": role, "content": text}));
                        }
                    }
                    Some("function_call") => {
                        messages.push(json!({"role": "assistant", "tool_calls": [{
                            "id": json::get_str(item, "call_id").unwrap_or_default(),
                            "type": "function",
                            "function": {
                                "name": json::get_str(item, "name").unwrap_or_default(),
                                "arguments": json::get_str(item, "arguments").unwrap_or("{}"),
                            },
                        }]}));
                    }
                    Some("function_call_output") => {
                        let output = match json::get(item, "output") {
                            Some(Value::String(text)) => text.clone(),
                            Some(other) => serde_json::to_string(other).unwrap_or_default(),
                            None => String::new(),
                        };
                        messages.push(json!({
                            "role": "tool",
                            "tool_call_id": json::get_str(item, "call_id").unwrap_or_default(),
                            "content": output,
                        }));
                    }
                    _ => {}
                }
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
                json!({"type": "function", "function": {
                    "name": json::get_str(tool, "name").unwrap_or_default(),
                    "description": json::get_str(tool, "description").unwrap_or_default(),
                    "parameters": tool.get("parameters").cloned().unwrap_or(json!({"type": "object"})),
                }})
            })
            .collect();
        if !converted.is_empty() {
            json::set(&mut out, "tools", Value::Array(converted));
        }
    }

    if let Some(max_tokens) = json::get_i64(body, "max_output_tokens") {
        json::set(&mut out, "max_tokens", json!(max_tokens));
    }
    if let Some(temperature) = json::get_f64(body, "temperature") {
        json::set(&mut out, "temperature", json!(temperature));
    }
    if let Some(effort) = json::get_str(body, "reasoning.effort") {
        json::set(&mut out, "reasoning_effort", json!(effort));
    }
    match json::get(body, "tool_choice") {
        Some(Value::String(choice)) => json::set(&mut out, "tool_choice", json!(choice)),
        Some(choice @ Value::Object(_)) => {
            if let Some(name) = json::get_str(choice, "name") {
                json::set(
                    &mut out,
                    "tool_choice",
                    json!({"type": "function", "function": {"name": name}}),
                );
            }
        }
        _ => {}
    }

    out
}

/// OpenAI chat completion -> Responses envelope.
pub fn translate_response(model: &str, body: &Value) -> Value {
    let id = json::get_str(body, "id").unwrap_or("0");
    let mut output: Vec<Value> = Vec::new();
    if let Some(reasoning) = json::get_str(body, "choices.0.message.reasoning_content") {
        if !reasoning.is_empty() {
            output.push(json!({
                "type": "reasoning",
                "id": format!("rs_{id}"),
                "summary": [{"type": "summary_text", "text": reasoning}],
            }));
        }
    }
    if let Some(Value::Array(tool_calls)) = json::get(body, "choices.0.message.tool_calls") {
        for call in tool_calls {
            let call_id = json::get_str(call, "id").unwrap_or_default();
            output.push(json!({
                "type": "function_call",
                "id": format!("fc_{call_id}"),
                "call_id": call_id,
                "name": json::get_str(call, "function.name").unwrap_or_default(),
                "arguments": json::get_str(call, "function.arguments").unwrap_or("{}"),
                "status": "completed",
            }));
        }
    }
    if let Some(text) = json::get_str(body, "choices.0.message.content") {
        if !text.is_empty() {
            output.push(json!({
                "type": "message",
                "id": format!("msg_{id}"),
                "status": "completed",
                "role": "assistant",
                "content": [{"type": "output_text", "annotations": [], "text": text}],
            }));
        }
    }

    let input_tokens = json::get_i64(body, "usage.prompt_tokens").unwrap_or(0);
    let output_tokens = json::get_i64(body, "usage.completion_tokens").unwrap_or(0);
    json!({
        "id": format!("resp_{id}"),
        "object": "response",
        "created_at": json::get_i64(body, "created")
            .unwrap_or_else(|| time::OffsetDateTime::now_utc().unix_timestamp()),
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

/// OpenAI chat completion chunk -> Responses SSE event(s).
pub fn translate_stream(model: &str, line: &[u8], state: &mut StreamState) -> Vec<String> {
    let chunk = match parse_line(line) {
        SseLine::Data(value) => value,
        SseLine::Done => return finish(model, state),
        _ => return Vec::new(),
    };

    state.ensure_identity("resp_");
    let mut blocks = Vec::new();
    if !state.started {
        state.started = true;
        blocks.push(data_block(&json!({
            "type": "response.created",
            "response": envelope(model, state, "in_progress"),
        })));
    }

    if let Some(prompt) = json::get_i64(&chunk, "usage.prompt_tokens") {
        state.input_tokens = prompt;
    }
    if let Some(completion) = json::get_i64(&chunk, "usage.completion_tokens") {
        state.output_tokens = completion;
    }
    if let Some(finish_reason) = json::get_str(&chunk, "choices.0.finish_reason") {
        state.finish_reason = finish_reason.to_string();
    }

    if let Some(reasoning) = json::get_str(&chunk, "choices.0.delta.reasoning_content") {
        if !reasoning.is_empty() {
            blocks.push(data_block(&json!({
                "type": "response.reasoning_summary_text.delta",
                "output_index": state.output_index,
                "summary_index": 0,
                "delta": reasoning,
            })));
        }
    }
    if let Some(text) = json::get_str(&chunk, "choices.0.delta.content") {
        if !text.is_empty() {
            if state.open_block.is_none() {
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
            state.text.push_str(text);
            blocks.push(data_block(&json!({
                "type": "response.output_text.delta",
                "output_index": state.output_index,
                "content_index": 0,
                "delta": text,
            })));
        }
    }
    if let Some(Value::Array(tool_calls)) = json::get(&chunk, "choices.0.delta.tool_calls") {
        for call in tool_calls {
            let index = json::get_i64(call, "index").unwrap_or(0);
            if let Some(name) = json::get_str(call, "function.name") {
                state.tool_names.insert(index, name.to_string());
                state
                    .tool_ids
                    .insert(index, json::get_str(call, "id").unwrap_or(name).to_string());
                state.tool_args.insert(index, String::new());
                let call_id = state.tool_ids[&index].clone();
                blocks.push(data_block(&json!({
                    "type": "response.output_item.added",
                    "output_index": state.output_index + 1 + index,
                    "item": {
                        "type": "function_call",
                        "id": format!("fc_{call_id}"),
                        "call_id": call_id,
                        "name": name,
                        "arguments": "",
                    },
                })));
            }
            if let Some(arguments) = json::get_str(call, "function.arguments") {
                if !arguments.is_empty() {
                    state.tool_args.entry(index).or_default().push_str(arguments);
                    blocks.push(data_block(&json!({
                        "type": "response.function_call_arguments.delta",
                        "output_index": state.output_index + 1 + index,
                        "delta": arguments,
                    })));
                }
            }
        }
    }
    blocks
}

fn finish(model: &str, state: &mut StreamState) -> Vec<String> {
    if state.finished {
        return Vec::new();
    }
    state.finished = true;
    state.ensure_identity("resp_");
    let mut blocks = Vec::new();
    if state.open_block.take().is_some() {
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
    }
    let mut indexes: Vec<i64> = state.tool_args.keys().copied().collect();
    indexes.sort_unstable();
    for index in indexes {
        let call_id = state.tool_ids.remove(&index).unwrap_or_default();
        blocks.push(data_block(&json!({
            "type": "response.output_item.done",
            "output_index": state.output_index + 1 + index,
            "item": {
                "type": "function_call",
                "id": format!("fc_{call_id}"),
                "call_id": call_id,
                "name": state.tool_names.remove(&index).unwrap_or_default(),
                "arguments": state.tool_args.remove(&index).unwrap_or_default(),
                "status": "completed",
            },
        })));
    }
    blocks.push(data_block(&json!({
        "type": "response.completed",
        "response": envelope(model, state, "completed"),
    })));
    blocks
}

fn envelope(model: &str, state: &StreamState, status: &str) -> Value {
    json!({
        "id": state.response_id,
        "object": "response",
        "created_at": state.created_at,
        "status": status,
        "model": model,
        "output": [],
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
    fn request_flattens_input_items() {
        let body = json!({
            "instructions": "inst",
            "input": [
                {"type": "message", "role": "user",
                 "content": [{"type": "input_text", "text": "go"}]},
                {"type": "function_call", "call_id": "c1", "name": "read", "arguments": "{}"},
                {"type": "function_call_output", "call_id": "c1", "output": "done"},
            ],
            "tools": [{"type": "function", "name": "read", "parameters": {}}],
            "reasoning": {"effort": "high"},
        });
        let out = translate_request("glm-4.6", &body, true);
        assert_eq!(json::get_str(&out, "messages.0.role"), Some("system"));
        assert_eq!(json::get_str(&out, "messages.1.content"), Some("go"));
        assert_eq!(json::get_str(&out, "messages.2.tool_calls.0.id"), Some("c1"));
        assert_eq!(json::get_str(&out, "messages.3.role"), Some("tool"));
        assert_eq!(json::get_str(&out, "tools.0.function.name"), Some("read"));
        assert_eq!(json::get_str(&out, "reasoning_effort"), Some("high"));
    }

    #[test]
    fn response_and_stream_shapes() {
        let body = json!({
            "id": "x",
            "created": 123,
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "hello"},
                         "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 2},
        });
        let out = translate_response("m", &body);
        assert_eq!(json::get_str(&out, "output.0.type"), Some("message"));
        assert_eq!(json::get_i64(&out, "created_at"), Some(123));

        let mut state = StreamState::default();
        let mut events = Vec::new();
        for line in [
            br#"data: {"choices":[{"index":0,"delta":{"content":"ok"}}]}"#.as_slice(),
            b"data: [DONE]".as_slice(),
        ] {
            events.extend(translate_stream("m", line, &mut state));
        }
        let joined = events.concat();
        assert!(joined.contains("response.created"));
        assert!(joined.contains("response.output_text.delta"));
        assert!(joined.contains("response.completed"));
    }
}
