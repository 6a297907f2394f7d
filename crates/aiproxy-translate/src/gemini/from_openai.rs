//! OpenAI Chat Completions clients talking to a Gemini upstream.

use aiproxy_common::json;
use aiproxy_thinking::convert_level_to_budget;
use serde_json::{json, Map, Value};

use crate::sse::{data_block, parse_line, SseLine, DONE_BLOCK};
use crate::{Format, StreamState};

use super::{default_safety_settings, finish_to_openai};

/// OpenAI chat request -> Gemini generateContent request.
pub fn translate_request(_model: &str, body: &Value, _stream: bool) -> Value {
    let mut out = Value::Object(Map::new());

    let mut system_parts: Vec<Value> = Vec::new();
    let mut contents: Vec<Value> = Vec::new();
    if let Some(Value::Array(messages)) = json::get(body, "messages") {
        for message in messages {
            match json::get_str(message, "role") {
                Some("system") | Some("developer") => {
                    push_text_parts(message.get("content"), &mut system_parts);
                }
                Some("assistant") => {
                    let mut parts: Vec<Value> = Vec::new();
                    push_content_parts(message.get("content"), &mut parts);
                    if let Some(Value::Array(tool_calls)) = message.get("tool_calls") {
                        for call in tool_calls {
                            let arguments = json::get_str(call, "function.arguments").unwrap_or("{}");
                            let args: Value = serde_json::from_str(arguments).unwrap_or(json!({}));
                            let mut part = json!({"functionCall": {
                                "name": json::get_str(call, "function.name").unwrap_or_default(),
                                "args": args,
                            }});
                            if let Some(id) = json::get_str(call, "id") {
                                json::set(&mut part, "functionCall.id", json!(id));
                            }
                            parts.push(part);
                        }
                    }
                    if !parts.is_empty() {
                        contents.push(json!({"role": "model", "parts": parts}));
                    }
                }
                Some("tool") => {
                    let id = json::get_str(message, "tool_call_id").unwrap_or_default();
                    let text = match json::get(message, "content") {
                        Some(Value::String(text)) => text.clone(),
                        Some(other) => serde_json::to_string(other).unwrap_or_default(),
                        None => String::new(),
                    };
                    contents.push(json!({"role": "user", "parts": [{"functionResponse": {
                        "id": id,
                        "name": id,
                        "response": {"result": text},
                    }}]}));
                }
                _ => {
                    let mut parts: Vec<Value> = Vec::new();
                    push_content_parts(message.get("content"), &mut parts);
                    if !parts.is_empty() {
                        contents.push(json!({"role": "user", "parts": parts}));
                    }
                }
            }
        }
    }
    if !system_parts.is_empty() {
        json::set(&mut out, "systemInstruction", json!({"role": "user", "parts": system_parts}));
    }
    json::set(&mut out, "contents", Value::Array(contents));

    if let Some(Value::Array(tools)) = json::get(body, "tools") {
        let declarations: Vec<Value> = tools
            .iter()
            .filter_map(|tool| {
                let function = tool.get("function")?;
                Some(json!({
                    "name": json::get_str(function, "name").unwrap_or_default(),
                    "description": json::get_str(function, "description").unwrap_or_default(),
                    "parameters": function.get("parameters").cloned().unwrap_or(json!({"type": "object"})),
                }))
            })
            .collect();
        if !declarations.is_empty() {
            json::set(&mut out, "tools", json!([{"functionDeclarations": declarations}]));
        }
    }

    match json::get(body, "tool_choice") {
        Some(Value::String(choice)) => match choice.as_str() {
            "required" => json::set(&mut out, "toolConfig", json!({"functionCallingConfig": {"mode": "ANY"}})),
            "none" => json::set(&mut out, "toolConfig", json!({"functionCallingConfig": {"mode": "NONE"}})),
            _ => json::set(&mut out, "toolConfig", json!({"functionCallingConfig": {"mode": "AUTO"}})),
        },
        Some(choice @ Value::Object(_)) => {
            if let Some(name) = json::get_str(choice, "function.name") {
                json::set(
                    &mut out,
                    "toolConfig",
                    json!({"functionCallingConfig": {"mode": "ANY", "allowedFunctionNames": [name]}}),
                );
            }
        }
        _ => {}
    }

    if let Some(temperature) = json::get_f64(body, "temperature") {
        json::set(&mut out, "generationConfig.temperature", json!(temperature));
    }
    if let Some(top_p) = json::get_f64(body, "top_p") {
        json::set(&mut out, "generationConfig.topP", json!(top_p));
    }
    if let Some(max_tokens) = json::get_i64(body, "max_tokens")
        .or_else(|| json::get_i64(body, "max_completion_tokens"))
    {
        json::set(&mut out, "generationConfig.maxOutputTokens", json!(max_tokens));
    }
    match json::get(body, "stop") {
        Some(Value::String(stop)) => {
            json::set(&mut out, "generationConfig.stopSequences", json!([stop]))
        }
        Some(Value::Array(stops)) => {
            json::set(&mut out, "generationConfig.stopSequences", json!(stops))
        }
        _ => {}
    }
    if let Some(effort) = json::get_str(body, "reasoning_effort") {
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

fn push_text_parts(content: Option<&Value>, parts: &mut Vec<Value>) {
    match content {
        Some(Value::String(text)) if !text.is_empty() => parts.push(json!({"text": text})),
        Some(Value::Array(items)) => {
            for item in items {
                if let Some(text) = json::get_str(item, "text") {
                    parts.push(json!({"text": text}));
                }
            }
        }
        _ => {}
    }
}

fn push_content_parts(content: Option<&Value>, parts: &mut Vec<Value>) {
    match content {
        Some(Value::String(text)) => {
            if !text.is_empty() {
                parts.push(json!({"text": text}));
            }
        }
        Some(Value::Array(items)) => {
            for item in items {
                match json::get_str(item, "type") {
                    Some("text") => {
                        parts.push(json!({"text": json::get_str(item, "text").unwrap_or_default()}));
                    }
                    Some("image_url") => {
                        if let Some(url) = json::get_str(item, "image_url.url") {
                            if let Some(rest) = url.strip_prefix("data:") {
                                if let Some((mime, data)) = rest.split_once(";base64,") {
                                    parts.push(json!({"inlineData": {"mimeType": mime, "data": data}}));
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
}

/// Gemini unary response -> OpenAI chat completion.
pub fn translate_response(model: &str, body: &Value) -> Value {
    let mut text = String::new();
    let mut reasoning = String::new();
    let mut tool_calls: Vec<Value> = Vec::new();
    if let Some(Value::Array(parts)) = json::get(body, "candidates.0.content.parts") {
        for part in parts {
            if json::get_bool(part, "thought") == Some(true) {
                reasoning.push_str(json::get_str(part, "text").unwrap_or_default());
            } else if let Some(part_text) = json::get_str(part, "text") {
                text.push_str(part_text);
            } else if let Some(call) = part.get("functionCall") {
                let name = json::get_str(call, "name").unwrap_or_default();
                tool_calls.push(json!({
                    "id": json::get_str(call, "id").unwrap_or(name),
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": serde_json::to_string(call.get("args").unwrap_or(&json!({})))
                            .unwrap_or_default(),
                    },
                }));
            }
        }
    }

    let mut message = json!({"role": "assistant", "content": text});
    if !reasoning.is_empty() {
        json::set(&mut message, "reasoning_content", json!(reasoning));
    }
    let saw_tool_call = !tool_calls.is_empty();
    if saw_tool_call {
        json::set(&mut message, "tool_calls", Value::Array(tool_calls));
    }

    let finish = json::get_str(body, "candidates.0.finishReason").unwrap_or("STOP");
    let prompt = json::get_i64(body, "usageMetadata.promptTokenCount").unwrap_or(0);
    let completion = json::get_i64(body, "usageMetadata.candidatesTokenCount").unwrap_or(0);
    json!({
        "id": format!("chatcmpl-{}", json::get_str(body, "responseId").unwrap_or("0")),
        "object": "chat.completion",
        "created": time::OffsetDateTime::now_utc().unix_timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": message,
            "finish_reason": finish_to_openai(finish, saw_tool_call),
        }],
        "usage": {
            "prompt_tokens": prompt,
            "completion_tokens": completion,
            "total_tokens": prompt + completion,
        },
    })
}

/// Gemini streaming chunk -> OpenAI chat completion chunk(s).
pub fn translate_stream(
    model: &str,
    line: &[u8],
    state: &mut StreamState,
    envelope: Format,
) -> Vec<String> {
    let chunk_value = match parse_line(line) {
        SseLine::Data(value) => crate::envelope::unwrap_response(value, envelope),
        SseLine::Done => {
            if state.finished {
                return Vec::new();
            }
            state.finished = true;
            let finish = finish_to_openai(&state.finish_reason, state.tool_count > 0);
            let usage = json!({
                "prompt_tokens": state.input_tokens,
                "completion_tokens": state.output_tokens,
                "total_tokens": state.input_tokens + state.output_tokens,
            });
            return vec![
                chunk(state, model, json!({}), Some(finish), Some(usage)),
                DONE_BLOCK.to_string(),
            ];
        }
        _ => return Vec::new(),
    };

    state.ensure_identity("chatcmpl-");
    let mut blocks = Vec::new();
    if !state.started {
        state.started = true;
        blocks.push(chunk(state, model, json!({"role": "assistant", "content": ""}), None, None));
    }

    if let Some(prompt) = json::get_i64(&chunk_value, "usageMetadata.promptTokenCount") {
        state.input_tokens = prompt;
    }
    if let Some(candidates) = json::get_i64(&chunk_value, "usageMetadata.candidatesTokenCount") {
        state.output_tokens = candidates;
    }
    if let Some(finish) = json::get_str(&chunk_value, "candidates.0.finishReason") {
        state.finish_reason = finish.to_string();
    }

    if let Some(Value::Array(parts)) = json::get(&chunk_value, "candidates.0.content.parts") {
        for part in parts {
            if json::get_bool(part, "thought") == Some(true) {
                let text = json::get_str(part, "text").unwrap_or_default();
                if !text.is_empty() {
                    blocks.push(chunk(state, model, json!({"reasoning_content": text}), None, None));
                }
            } else if let Some(text) = json::get_str(part, "text") {
                blocks.push(chunk(state, model, json!({"content": text}), None, None));
            } else if let Some(call) = part.get("functionCall") {
                let index = state.tool_count;
                state.tool_count += 1;
                let name = json::get_str(call, "name").unwrap_or_default();
                blocks.push(chunk(
                    state,
                    model,
                    json!({"tool_calls": [{
                        "index": index,
                        "id": json::get_str(call, "id").unwrap_or(name),
                        "type": "function",
                        "function": {
                            "name": name,
                            "arguments": serde_json::to_string(call.get("args").unwrap_or(&json!({})))
                                .unwrap_or_default(),
                        },
                    }]}),
                    None,
                    None,
                ));
            }
        }
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
    fn request_maps_roles_and_tools() {
        let body = json!({
            "messages": [
                {"role": "system", "content": "sys"},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "tool_calls": [{
                    "id": "c1", "type": "function",
                    "function": {"name": "read", "arguments": "{\"p\":1}"},
                }]},
                {"role": "tool", "tool_call_id": "c1", "content": "out"},
            ],
            "tools": [{"type": "function", "function": {"name": "read", "parameters": {}}}],
            "tool_choice": "required",
            "max_tokens": 128,
        });
        let out = translate_request("gemini-2.5-pro", &body, false);
        assert_eq!(json::get_str(&out, "systemInstruction.parts.0.text"), Some("sys"));
        assert_eq!(json::get_str(&out, "contents.1.role"), Some("model"));
        assert_eq!(
            json::get_str(&out, "contents.1.parts.0.functionCall.name"),
            Some("read")
        );
        assert_eq!(
            json::get_str(&out, "contents.2.parts.0.functionResponse.id"),
            Some("c1")
        );
        assert_eq!(
            json::get_str(&out, "toolConfig.functionCallingConfig.mode"),
            Some("ANY")
        );
        assert_eq!(json::get_i64(&out, "generationConfig.maxOutputTokens"), Some(128));
    }

    #[test]
    fn stream_emits_tool_calls_and_done() {
        let mut state = StreamState::default();
        let mut out = Vec::new();
        for line in [
            br#"data: {"candidates":[{"content":{"parts":[{"text":"a"}]},"index":0}]}"#.as_slice(),
            br#"data: {"candidates":[{"content":{"parts":[{"functionCall":{"name":"read","args":{}}}]},"finishReason":"STOP","index":0}],"usageMetadata":{"promptTokenCount":1,"candidatesTokenCount":2}}"#.as_slice(),
            b"[DONE]".as_slice(),
        ] {
            out.extend(translate_stream("m", line, &mut state, Format::Gemini));
        }
        let joined = out.concat();
        assert!(joined.contains("\"content\":\"a\""));
        assert!(joined.contains("\"tool_calls\""));
        assert!(joined.contains("\"finish_reason\":\"tool_calls\""));
        assert!(out.last().map(String::as_str) == Some(DONE_BLOCK));
    }
}
