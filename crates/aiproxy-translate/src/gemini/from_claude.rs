//! Anthropic Messages clients talking to a Gemini upstream.

use aiproxy_common::json;
use serde_json::{json, Map, Value};

use crate::sse::{event_block, parse_line, SseLine};
use crate::{cache_signature, get_cached_signature, StreamState, GEMINI_SKIP_SIGNATURE};

use super::{default_safety_settings, finish_to_claude};

/// Claude messages request -> Gemini generateContent request.
pub fn translate_request(model: &str, body: &Value, _stream: bool) -> Value {
    let mut out = Value::Object(Map::new());

    if let Some(Value::Array(system)) = json::get(body, "system") {
        let parts: Vec<Value> = system
            .iter()
            .filter(|part| json::get_str(part, "type") == Some("text"))
            .filter_map(|part| json::get_str(part, "text"))
            .map(|text| json!({"text": text}))
            .collect();
        if !parts.is_empty() {
            json::set(&mut out, "systemInstruction", json!({"role": "user", "parts": parts}));
        }
    } else if let Some(system) = json::get_str(body, "system") {
        if !system.is_empty() {
            json::set(
                &mut out,
                "systemInstruction",
                json!({"role": "user", "parts": [{"text": system}]}),
            );
        }
    }

    let mut contents: Vec<Value> = Vec::new();
    if let Some(Value::Array(messages)) = json::get(body, "messages") {
        for message in messages {
            let role = match json::get_str(message, "role") {
                Some("assistant") => "model",
                _ => "user",
            };
            let mut parts: Vec<Value> = Vec::new();
            match json::get(message, "content") {
                Some(Value::String(text)) => {
                    if !text.is_empty() {
                        parts.push(json!({"text": text}));
                    }
                }
                Some(Value::Array(content)) => {
                    for part in content {
                        convert_claude_part(model, part, &mut parts);
                    }
                }
                _ => {}
            }
            if !parts.is_empty() {
                contents.push(json!({"role": role, "parts": parts}));
            }
        }
    }
    json::set(&mut out, "contents", Value::Array(contents));

    if let Some(Value::Array(tools)) = json::get(body, "tools") {
        let declarations: Vec<Value> = tools
            .iter()
            .filter_map(|tool| {
                // Built-in server tools carry a type and have no schema to map.
                let schema = tool.get("input_schema")?;
                Some(json!({
                    "name": json::get_str(tool, "name").unwrap_or_default(),
                    "description": json::get_str(tool, "description").unwrap_or_default(),
                    "parameters": schema.clone(),
                }))
            })
            .collect();
        if !declarations.is_empty() {
            json::set(&mut out, "tools", json!([{"functionDeclarations": declarations}]));
        }
    }

    match json::get_str(body, "tool_choice.type") {
        Some("any") => json::set(
            &mut out,
            "toolConfig",
            json!({"functionCallingConfig": {"mode": "ANY"}}),
        ),
        Some("tool") => {
            let name = json::get_str(body, "tool_choice.name").unwrap_or_default();
            json::set(
                &mut out,
                "toolConfig",
                json!({"functionCallingConfig": {"mode": "ANY", "allowedFunctionNames": [name]}}),
            );
        }
        Some("auto") => json::set(
            &mut out,
            "toolConfig",
            json!({"functionCallingConfig": {"mode": "AUTO"}}),
        ),
        _ => {}
    }

    if let Some(temperature) = json::get_f64(body, "temperature") {
        json::set(&mut out, "generationConfig.temperature", json!(temperature));
    }
    if let Some(top_p) = json::get_f64(body, "top_p") {
        json::set(&mut out, "generationConfig.topP", json!(top_p));
    }
    if let Some(top_k) = json::get_i64(body, "top_k") {
        json::set(&mut out, "generationConfig.topK", json!(top_k));
    }
    if let Some(max_tokens) = json::get_i64(body, "max_tokens") {
        json::set(&mut out, "generationConfig.maxOutputTokens", json!(max_tokens));
    }
    if let Some(Value::Array(stops)) = json::get(body, "stop_sequences") {
        json::set(&mut out, "generationConfig.stopSequences", json!(stops));
    }
    if json::get_str(body, "thinking.type") == Some("enabled") {
        if let Some(budget) = json::get_i64(body, "thinking.budget_tokens") {
            json::set(
                &mut out,
                "generationConfig.thinkingConfig.thinkingBudget",
                json!(budget),
            );
            json::set(
                &mut out,
                "generationConfig.thinkingConfig.includeThoughts",
                json!(true),
            );
        }
    }

    json::set(&mut out, "safetySettings", default_safety_settings());
    out
}

fn convert_claude_part(model: &str, part: &Value, parts: &mut Vec<Value>) {
    match json::get_str(part, "type") {
        Some("text") => {
            let text = json::get_str(part, "text").unwrap_or_default();
            if !text.is_empty() {
                parts.push(json!({"text": text}));
            }
        }
        Some("thinking") => {
            let text = json::get_str(part, "thinking").unwrap_or_default();
            let signature = match json::get_str(part, "signature") {
                Some(signature) => signature.to_string(),
                None => {
                    let cached = get_cached_signature(model, text);
                    if cached.is_empty() {
                        GEMINI_SKIP_SIGNATURE.to_string()
                    } else {
                        cached
                    }
                }
            };
            let mut thought = json!({"thought": true});
            if !text.is_empty() {
                json::set(&mut thought, "text", json!(text));
            }
            json::set(&mut thought, "thoughtSignature", json!(signature));
            parts.push(thought);
        }
        Some("tool_use") => {
            let mut call = json!({"functionCall": {
                "name": json::get_str(part, "name").unwrap_or_default(),
                "args": part.get("input").cloned().unwrap_or(json!({})),
            }});
            if let Some(id) = json::get_str(part, "id") {
                json::set(&mut call, "functionCall.id", json!(id));
            }
            parts.push(call);
        }
        Some("tool_result") => {
            let id = json::get_str(part, "tool_use_id").unwrap_or_default();
            let result = match json::get(part, "content") {
                Some(Value::String(text)) => json!(text),
                Some(Value::Array(items)) if items.len() == 1 => items[0].clone(),
                Some(other) => other.clone(),
                None => Value::Null,
            };
            parts.push(json!({"functionResponse": {
                "id": id,
                "name": id,
                "response": {"result": result},
            }}));
        }
        Some("image") => {
            if json::get_str(part, "source.type") == Some("base64") {
                parts.push(json!({"inlineData": {
                    "mimeType": json::get_str(part, "source.media_type").unwrap_or_default(),
                    "data": json::get_str(part, "source.data").unwrap_or_default(),
                }}));
            }
        }
        _ => {}
    }
}

/// Gemini unary response -> Claude message.
pub fn translate_response(model: &str, body: &Value) -> Value {
    let mut content: Vec<Value> = Vec::new();
    let mut saw_tool_call = false;
    if let Some(Value::Array(parts)) = json::get(body, "candidates.0.content.parts") {
        for part in parts {
            if json::get_bool(part, "thought") == Some(true) {
                let text = json::get_str(part, "text").unwrap_or_default();
                if let Some(signature) = json::get_str(part, "thoughtSignature") {
                    cache_signature(model, text, signature);
                }
                content.push(json!({
                    "type": "thinking",
                    "thinking": text,
                    "signature": json::get_str(part, "thoughtSignature").unwrap_or_default(),
                }));
            } else if let Some(text) = json::get_str(part, "text") {
                content.push(json!({"type": "text", "text": text}));
            } else if let Some(call) = part.get("functionCall") {
                saw_tool_call = true;
                let name = json::get_str(call, "name").unwrap_or_default();
                let id = json::get_str(call, "id").unwrap_or(name);
                content.push(json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": call.get("args").cloned().unwrap_or(json!({})),
                }));
            }
        }
    }

    let finish = json::get_str(body, "candidates.0.finishReason").unwrap_or("STOP");
    let input = json::get_i64(body, "usageMetadata.promptTokenCount").unwrap_or(0);
    let output = json::get_i64(body, "usageMetadata.candidatesTokenCount").unwrap_or(0);
    json!({
        "id": json::get_str(body, "responseId").unwrap_or_default(),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": finish_to_claude(finish, saw_tool_call),
        "stop_sequence": Value::Null,
        "usage": {"input_tokens": input, "output_tokens": output},
    })
}

/// Gemini streaming chunk -> Claude SSE event(s).
///
/// Claude framing needs explicit block boundaries, so the state machine
/// closes and opens `content_block` events as the upstream part kind flips.
pub fn translate_stream(
    model: &str,
    line: &[u8],
    state: &mut StreamState,
    envelope: crate::Format,
) -> Vec<String> {
    let chunk = match parse_line(line) {
        SseLine::Data(value) => crate::envelope::unwrap_response(value, envelope),
        SseLine::Done => return finish_stream(state),
        _ => return Vec::new(),
    };

    let mut blocks = Vec::new();
    state.ensure_identity("msg_");
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

    if let Some(prompt) = json::get_i64(&chunk, "usageMetadata.promptTokenCount") {
        state.input_tokens = prompt;
    }
    if let Some(candidates) = json::get_i64(&chunk, "usageMetadata.candidatesTokenCount") {
        state.output_tokens = candidates;
    }
    if let Some(finish) = json::get_str(&chunk, "candidates.0.finishReason") {
        state.finish_reason = finish.to_string();
    }

    if let Some(Value::Array(parts)) = json::get(&chunk, "candidates.0.content.parts") {
        for part in parts {
            if json::get_bool(part, "thought") == Some(true) {
                ensure_block(state, &mut blocks, "thinking");
                let text = json::get_str(part, "text").unwrap_or_default();
                state.thinking_text.push_str(text);
                if !text.is_empty() {
                    blocks.push(event_block(
                        "content_block_delta",
                        &json!({"type": "content_block_delta", "index": state.block_index,
                                "delta": {"type": "thinking_delta", "thinking": text}}),
                    ));
                }
                if let Some(signature) = json::get_str(part, "thoughtSignature") {
                    cache_signature(model, &state.thinking_text, signature);
                    blocks.push(event_block(
                        "content_block_delta",
                        &json!({"type": "content_block_delta", "index": state.block_index,
                                "delta": {"type": "signature_delta", "signature": signature}}),
                    ));
                }
            } else if let Some(text) = json::get_str(part, "text") {
                ensure_block(state, &mut blocks, "text");
                blocks.push(event_block(
                    "content_block_delta",
                    &json!({"type": "content_block_delta", "index": state.block_index,
                            "delta": {"type": "text_delta", "text": text}}),
                ));
            } else if let Some(call) = part.get("functionCall") {
                close_block(state, &mut blocks);
                state.finish_reason = "TOOL_USE".to_string();
                let name = json::get_str(call, "name").unwrap_or_default();
                let id = json::get_str(call, "id").unwrap_or(name);
                blocks.push(event_block(
                    "content_block_start",
                    &json!({"type": "content_block_start", "index": state.block_index,
                            "content_block": {"type": "tool_use", "id": id, "name": name, "input": {}}}),
                ));
                let args = call.get("args").cloned().unwrap_or(json!({}));
                blocks.push(event_block(
                    "content_block_delta",
                    &json!({"type": "content_block_delta", "index": state.block_index,
                            "delta": {"type": "input_json_delta",
                                      "partial_json": serde_json::to_string(&args).unwrap_or_default()}}),
                ));
                blocks.push(event_block(
                    "content_block_stop",
                    &json!({"type": "content_block_stop", "index": state.block_index}),
                ));
                state.block_index += 1;
                state.open_block = None;
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
    let saw_tool_call = state.finish_reason == "TOOL_USE";
    blocks.push(event_block(
        "message_delta",
        &json!({"type": "message_delta",
                "delta": {"stop_reason": finish_to_claude(&state.finish_reason, saw_tool_call),
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
    fn request_maps_system_tools_and_thinking() {
        let body = json!({
            "system": [{"type": "text", "text": "sys"}],
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": "hi"}]},
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "hm", "signature": "sig"},
                    {"type": "tool_use", "id": "t1", "name": "read", "input": {"p": 1}},
                ]},
            ],
            "tools": [{"name": "read", "description": "d", "input_schema": {"type": "object"}}],
            "tool_choice": {"type": "tool", "name": "read"},
            "max_tokens": 900,
            "thinking": {"type": "enabled", "budget_tokens": 2048},
        });
        let out = translate_request("gemini-2.5-pro", &body, true);
        assert_eq!(json::get_str(&out, "systemInstruction.parts.0.text"), Some("sys"));
        assert_eq!(json::get_str(&out, "contents.1.role"), Some("model"));
        assert_eq!(json::get_bool(&out, "contents.1.parts.0.thought"), Some(true));
        assert_eq!(
            json::get_str(&out, "contents.1.parts.1.functionCall.name"),
            Some("read")
        );
        assert_eq!(
            json::get_str(&out, "tools.0.functionDeclarations.0.name"),
            Some("read")
        );
        assert_eq!(
            json::get_str(&out, "toolConfig.functionCallingConfig.allowedFunctionNames.0"),
            Some("read")
        );
        assert_eq!(json::get_i64(&out, "generationConfig.maxOutputTokens"), Some(900));
        assert_eq!(
            json::get_i64(&out, "generationConfig.thinkingConfig.thinkingBudget"),
            Some(2048)
        );
        assert!(json::exists(&out, "safetySettings"));
    }

    #[test]
    fn thinking_part_without_signature_uses_skip_sentinel() {
        let body = json!({
            "messages": [{"role": "assistant", "content": [
                {"type": "thinking", "thinking": "unseen text"},
            ]}],
        });
        let out = translate_request("gemini-2.5-pro", &body, false);
        assert_eq!(
            json::get_str(&out, "contents.0.parts.0.thoughtSignature"),
            Some(GEMINI_SKIP_SIGNATURE)
        );
    }

    #[test]
    fn response_maps_function_call_to_tool_use() {
        let body = json!({
            "responseId": "r1",
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "ok"},
                    {"functionCall": {"id": "fc1", "name": "read", "args": {"p": 1}}},
                ]},
                "finishReason": "STOP",
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 6},
        });
        let out = translate_response("m", &body);
        assert_eq!(json::get_str(&out, "stop_reason"), Some("tool_use"));
        assert_eq!(json::get_str(&out, "content.1.type"), Some("tool_use"));
        assert_eq!(json::get_i64(&out, "usage.output_tokens"), Some(6));
    }

    #[test]
    fn stream_opens_and_closes_blocks() {
        let mut state = StreamState::default();
        let mut out = Vec::new();
        for line in [
            br#"data: {"candidates":[{"content":{"parts":[{"thought":true,"text":"hm"}]},"index":0}]}"#.as_slice(),
            br#"data: {"candidates":[{"content":{"parts":[{"text":"hi"}]},"index":0}],"usageMetadata":{"promptTokenCount":1,"candidatesTokenCount":2}}"#.as_slice(),
            br#"data: {"candidates":[{"content":{"parts":[]},"finishReason":"STOP","index":0}]}"#.as_slice(),
            b"[DONE]".as_slice(),
        ] {
            out.extend(translate_stream("m", line, &mut state, crate::Format::Gemini));
        }
        let joined = out.concat();
        assert!(joined.contains("message_start"));
        assert!(joined.contains("thinking_delta"));
        assert!(joined.contains("text_delta"));
        assert!(joined.contains("message_stop"));
        // thinking block closed before text block opened
        let stop_idx = joined.find("content_block_stop").expect("block stop");
        let text_idx = joined.find("text_delta").expect("text delta");
        assert!(stop_idx < text_idx);
    }
}
