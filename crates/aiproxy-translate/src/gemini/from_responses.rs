//! OpenAI Responses (Codex) clients talking to a Gemini upstream.

use aiproxy_common::json;
use aiproxy_thinking::convert_level_to_budget;
use serde_json::{json, Map, Value};

use crate::sse::{data_block, parse_line, SseLine};
use crate::{Format, StreamState};

use super::default_safety_settings;

/// Responses request -> Gemini generateContent request.
pub fn translate_request(_model: &str, body: &Value, _stream: bool) -> Value {
    let mut out = Value::Object(Map::new());

    if let Some(instructions) = json::get_str(body, "instructions") {
        if !instructions.trim().is_empty() {
            json::set(
                &mut out,
                "systemInstruction",
                json!({"role": "user", "parts": [{"text": instructions}]}),
            );
        }
    }

    let mut contents: Vec<Value> = Vec::new();
    match json::get(body, "input") {
        Some(Value::String(text)) => {
            contents.push(json!({"role": "user", "parts": [{"text": text}]}));
        }
        Some(Value::Array(items)) => {
            for item in items {
                match json::get_str(item, "type") {
                    Some("message") | None => {
                        let role = match json::get_str(item, "role") {
                            Some("assistant") => "model",
                            _ => "user",
                        };
                        let mut parts: Vec<Value> = Vec::new();
                        match json::get(item, "content") {
                            Some(Value::String(text)) => parts.push(json!({"text": text})),
                            Some(Value::Array(content)) => {
                                for part in content {
                                    match json::get_str(part, "type") {
                                        Some("input_text") | Some("output_text") | Some("text") => {
                                            parts.push(json!({
                                                "text": json::get_str(part, "text").unwrap_or_default()
                                            }));
                                        }
                                        Some("input_image") => {
                                            if let Some(url) = json::get_str(part, "image_url") {
                                                if let Some(rest) = url.strip_prefix("data:") {
                                                    if let Some((mime, data)) =
                                                        rest.split_once(";base64,")
                                                    {
                                                        parts.push(json!({"inlineData": {
                                                            "mimeType": mime, "data": data,
                                                        }}));
                                                    }
                                                } else {
                                                    parts.push(json!({"fileData": {"fileUri": url}}));
                                                }
                                            }
                                        }
                                        _ => {}
                                    }
                                }
                            }
                            _ => {}
                        }
                        if !parts.is_empty() {
                            contents.push(json!({"role": role, "parts": parts}));
                        }
                    }
                    Some("function_call") => {
                        let arguments = json::get_str(item, "arguments").unwrap_or("{}");
                        let args: Value = serde_json::from_str(arguments).unwrap_or(json!({}));
                        contents.push(json!({"role": "model", "parts": [{"functionCall": {
                            "id": json::get_str(item, "call_id").unwrap_or_default(),
                            "name": json::get_str(item, "name").unwrap_or_default(),
                            "args": args,
                        }}]}));
                    }
                    Some("function_call_output") => {
                        let id = json::get_str(item, "call_id").unwrap_or_default();
                        let output = match json::get(item, "output") {
                            Some(Value::String(text)) => json!(text),
                            Some(other) => other.clone(),
                            None => Value::Null,
                        };
                        contents.push(json!({"role": "user", "parts": [{"functionResponse": {
                            "id": id,
                            "name": id,
                            "response": {"result": output},
                        }}]}));
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
    json::set(&mut out, "contents", Value::Array(contents));

    if let Some(Value::Array(tools)) = json::get(body, "tools") {
        let declarations: Vec<Value> = tools
            .iter()
            .filter(|tool| json::get_str(tool, "type") == Some("function"))
            .map(|tool| {
                json!({
                    "name": json::get_str(tool, "name").unwrap_or_default(),
                    "description": json::get_str(tool, "description").unwrap_or_default(),
                    "parameters": tool.get("parameters").cloned().unwrap_or(json!({"type": "object"})),
                })
            })
            .collect();
        if !declarations.is_empty() {
            json::set(&mut out, "tools", json!([{"functionDeclarations": declarations}]));
        }
    }

    if let Some(max_tokens) = json::get_i64(body, "max_output_tokens") {
        json::set(&mut out, "generationConfig.maxOutputTokens", json!(max_tokens));
    }
    if let Some(temperature) = json::get_f64(body, "temperature") {
        json::set(&mut out, "generationConfig.temperature", json!(temperature));
    }
    if let Some(top_p) = json::get_f64(body, "top_p") {
        json::set(&mut out, "generationConfig.topP", json!(top_p));
    }
    if let Some(effort) = json::get_str(body, "reasoning.effort") {
        let budget = match effort {
            "none" => Some(0),
            "auto" => Some(-1),
            level => convert_level_to_budget(level),
        };
        if let Some(budget) = budget {
            json::set(&mut out, "generationConfig.thinkingConfig.thinkingBudget", json!(budget));
            json::set(
                &mut out,
                "generationConfig.thinkingConfig.includeThoughts",
                json!(budget != 0),
            );
        }
    }

    json::set(&mut out, "safetySettings", default_safety_settings());
    out
}

/// Gemini unary response -> Responses envelope.
pub fn translate_response(model: &str, body: &Value) -> Value {
    let id = json::get_str(body, "responseId").unwrap_or("0");
    let mut output: Vec<Value> = Vec::new();
    let mut text = String::new();
    let mut reasoning = String::new();
    if let Some(Value::Array(parts)) = json::get(body, "candidates.0.content.parts") {
        for part in parts {
            if json::get_bool(part, "thought") == Some(true) {
                reasoning.push_str(json::get_str(part, "text").unwrap_or_default());
            } else if let Some(part_text) = json::get_str(part, "text") {
                text.push_str(part_text);
            } else if let Some(call) = part.get("functionCall") {
                let name = json::get_str(call, "name").unwrap_or_default();
                let call_id = json::get_str(call, "id").unwrap_or(name);
                output.push(json!({
                    "type": "function_call",
                    "id": format!("fc_{call_id}"),
                    "call_id": call_id,
                    "name": name,
                    "arguments": serde_json::to_string(call.get("args").unwrap_or(&json!({})))
                        .unwrap_or_default(),
                    "status": "completed",
                }));
            }
        }
    }
    if !reasoning.is_empty() {
        output.insert(
            0,
            json!({
                "type": "reasoning",
                "id": format!("rs_{id}"),
                "summary": [{"type": "summary_text", "text": reasoning}],
            }),
        );
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

    let input_tokens = json::get_i64(body, "usageMetadata.promptTokenCount").unwrap_or(0);
    let output_tokens = json::get_i64(body, "usageMetadata.candidatesTokenCount").unwrap_or(0);
    json!({
        "id": format!("resp_{id}"),
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

/// Gemini streaming chunk -> Responses SSE event(s).
pub fn translate_stream(
    model: &str,
    line: &[u8],
    state: &mut StreamState,
    envelope: Format,
) -> Vec<String> {
    let chunk = match parse_line(line) {
        SseLine::Data(value) => crate::envelope::unwrap_response(value, envelope),
        SseLine::Done => return finish(model, state),
        _ => return Vec::new(),
    };

    state.ensure_identity("resp_");
    let mut blocks = Vec::new();
    if !state.started {
        state.started = true;
        blocks.push(data_block(&json!({
            "type": "response.created",
            "response": response_envelope(model, state, "in_progress"),
        })));
    }

    if let Some(prompt) = json::get_i64(&chunk, "usageMetadata.promptTokenCount") {
        state.input_tokens = prompt;
    }
    if let Some(candidates) = json::get_i64(&chunk, "usageMetadata.candidatesTokenCount") {
        state.output_tokens = candidates;
    }
    if let Some(finish_reason) = json::get_str(&chunk, "candidates.0.finishReason") {
        state.finish_reason = finish_reason.to_string();
    }

    if let Some(Value::Array(parts)) = json::get(&chunk, "candidates.0.content.parts") {
        for part in parts {
            if json::get_bool(part, "thought") == Some(true) {
                let text = json::get_str(part, "text").unwrap_or_default();
                if !text.is_empty() {
                    state.thinking_text.push_str(text);
                    blocks.push(data_block(&json!({
                        "type": "response.reasoning_summary_text.delta",
                        "output_index": state.output_index,
                        "summary_index": 0,
                        "delta": text,
                    })));
                }
            } else if let Some(text) = json::get_str(part, "text") {
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
            } else if let Some(call) = part.get("functionCall") {
                close_message_item(state, &mut blocks);
                let name = json::get_str(call, "name").unwrap_or_default();
                let call_id = json::get_str(call, "id").unwrap_or(name);
                let arguments = serde_json::to_string(call.get("args").unwrap_or(&json!({})))
                    .unwrap_or_default();
                blocks.push(data_block(&json!({
                    "type": "response.output_item.added",
                    "output_index": state.output_index,
                    "item": {
                        "type": "function_call",
                        "id": format!("fc_{call_id}"),
                        "call_id": call_id,
                        "name": name,
                        "arguments": "",
                    },
                })));
                blocks.push(data_block(&json!({
                    "type": "response.function_call_arguments.delta",
                    "output_index": state.output_index,
                    "delta": arguments,
                })));
                blocks.push(data_block(&json!({
                    "type": "response.output_item.done",
                    "output_index": state.output_index,
                    "item": {
                        "type": "function_call",
                        "id": format!("fc_{call_id}"),
                        "call_id": call_id,
                        "name": name,
                        "arguments": arguments,
                        "status": "completed",
                    },
                })));
                state.output_index += 1;
            }
        }
    }
    blocks
}

fn close_message_item(state: &mut StreamState, blocks: &mut Vec<String>) {
    if state.open_block.take().is_none() {
        return;
    }
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
    state.output_index += 1;
}

fn finish(model: &str, state: &mut StreamState) -> Vec<String> {
    if state.finished {
        return Vec::new();
    }
    state.finished = true;
    state.ensure_identity("resp_");
    let mut blocks = Vec::new();
    close_message_item(state, &mut blocks);
    blocks.push(data_block(&json!({
        "type": "response.completed",
        "response": response_envelope(model, state, "completed"),
    })));
    blocks
}

fn response_envelope(model: &str, state: &StreamState, status: &str) -> Value {
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
    fn request_maps_items_to_contents() {
        let body = json!({
            "instructions": "inst",
            "input": [
                {"type": "message", "role": "user",
                 "content": [{"type": "input_text", "text": "hi"}]},
                {"type": "function_call", "call_id": "c1", "name": "read", "arguments": "{}"},
                {"type": "function_call_output", "call_id": "c1", "output": "done"},
            ],
            "max_output_tokens": 64,
        });
        let out = translate_request("gemini-2.5-pro", &body, false);
        assert_eq!(json::get_str(&out, "systemInstruction.parts.0.text"), Some("inst"));
        assert_eq!(json::get_str(&out, "contents.0.parts.0.text"), Some("hi"));
        assert_eq!(
            json::get_str(&out, "contents.1.parts.0.functionCall.name"),
            Some("read")
        );
        assert_eq!(
            json::get_str(&out, "contents.2.parts.0.functionResponse.id"),
            Some("c1")
        );
        assert_eq!(json::get_i64(&out, "generationConfig.maxOutputTokens"), Some(64));
    }

    #[test]
    fn stream_ends_with_completed() {
        let mut state = StreamState::default();
        let mut out = Vec::new();
        for line in [
            br#"data: {"candidates":[{"content":{"parts":[{"text":"ok"}]},"index":0}]}"#.as_slice(),
            b"[DONE]".as_slice(),
        ] {
            out.extend(translate_stream("m", line, &mut state, Format::Gemini));
        }
        let joined = out.concat();
        assert!(joined.contains("response.created"));
        assert!(joined.contains("response.output_text.delta"));
        assert!(joined.contains("response.output_text.done"));
        assert!(joined.contains("response.completed"));
    }
}
