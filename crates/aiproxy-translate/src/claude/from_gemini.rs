//! Gemini clients talking to a Claude upstream.

use aiproxy_common::json;
use serde_json::{json, Map, Value};

use crate::sse::{data_block, parse_line, SseLine};
use crate::{cache_signature, get_cached_signature, StreamState};

use super::stop_reason_to_gemini_finish;

const DEFAULT_MAX_TOKENS: i64 = 4096;

/// Gemini generateContent request -> Claude messages request.
pub fn translate_request(model: &str, body: &Value, stream: bool) -> Value {
    let mut out = Map::new();
    out.insert("model".to_string(), json!(model));
    let max_tokens =
        json::get_i64(body, "generationConfig.maxOutputTokens").unwrap_or(DEFAULT_MAX_TOKENS);
    out.insert("max_tokens".to_string(), json!(max_tokens));
    let mut out = Value::Object(out);

    if let Some(temperature) = json::get_f64(body, "generationConfig.temperature") {
        json::set(&mut out, "temperature", json!(temperature));
    }
    if let Some(top_p) = json::get_f64(body, "generationConfig.topP") {
        json::set(&mut out, "top_p", json!(top_p));
    }
    if let Some(Value::Array(stops)) = json::get(body, "generationConfig.stopSequences") {
        json::set(&mut out, "stop_sequences", json!(stops));
    }
    json::set(&mut out, "stream", json!(stream));

    if let Some(budget) = json::get_i64(body, "generationConfig.thinkingConfig.thinkingBudget") {
        let thinking = match budget {
            0 => json!({"type": "disabled"}),
            -1 => json!({"type": "enabled"}),
            other => json!({"type": "enabled", "budget_tokens": other}),
        };
        json::set(&mut out, "thinking", thinking);
    }

    if let Some(Value::Array(parts)) = json::get(body, "systemInstruction.parts") {
        let texts: Vec<Value> = parts
            .iter()
            .filter_map(|part| json::get_str(part, "text"))
            .map(|text| json!({"type": "text", "text": text}))
            .collect();
        if !texts.is_empty() {
            json::set(&mut out, "system", Value::Array(texts));
        }
    }

    let mut messages: Vec<Value> = Vec::new();
    if let Some(Value::Array(contents)) = json::get(body, "contents") {
        for content in contents {
            let role = match json::get_str(content, "role") {
                Some("model") => "assistant",
                _ => "user",
            };
            let mut parts_out: Vec<Value> = Vec::new();
            if let Some(Value::Array(parts)) = json::get(content, "parts") {
                for part in parts {
                    if json::get_bool(part, "thought") == Some(true) {
                        let text = json::get_str(part, "text").unwrap_or_default();
                        let signature = match json::get_str(part, "thoughtSignature") {
                            Some(signature) => signature.to_string(),
                            None => get_cached_signature(model, text),
                        };
                        let mut block = json!({"type": "thinking", "thinking": text});
                        if !signature.is_empty() {
                            json::set(&mut block, "signature", json!(signature));
                        }
                        parts_out.push(block);
                    } else if let Some(text) = json::get_str(part, "text") {
                        parts_out.push(json!({"type": "text", "text": text}));
                    } else if let Some(call) = part.get("functionCall") {
                        let id = json::get_str(call, "id")
                            .unwrap_or_else(|| json::get_str(call, "name").unwrap_or_default());
                        parts_out.push(json!({
                            "type": "tool_use",
                            "id": id,
                            "name": json::get_str(call, "name").unwrap_or_default(),
                            "input": call.get("args").cloned().unwrap_or(json!({})),
                        }));
                    } else if let Some(response) = part.get("functionResponse") {
                        let id = json::get_str(response, "id")
                            .unwrap_or_else(|| json::get_str(response, "name").unwrap_or_default());
                        let payload = response
                            .get("response")
                            .and_then(|r| r.get("result").or(Some(r)))
                            .cloned()
                            .unwrap_or(Value::Null);
                        let content_text = match payload {
                            Value::String(text) => text,
                            other => serde_json::to_string(&other).unwrap_or_default(),
                        };
                        parts_out.push(json!({
                            "type": "tool_result",
                            "tool_use_id": id,
                            "content": content_text,
                        }));
                    } else if let Some(inline) = part.get("inlineData") {
                        parts_out.push(json!({
                            "type": "image",
                            "source": {
                                "type": "base64",
                                "media_type": json::get_str(inline, "mimeType")
                                    .or_else(|| json::get_str(inline, "mime_type"))
                                    .unwrap_or("application/octet-stream"),
                                "data": json::get_str(inline, "data").unwrap_or_default(),
                            },
                        }));
                    }
                }
            }
            if !parts_out.is_empty() {
                messages.push(json!({"role": role, "content": parts_out}));
            }
        }
    }
    json::set(&mut out, "messages", Value::Array(messages));

    if let Some(Value::Array(tools)) = json::get(body, "tools") {
        let mut converted: Vec<Value> = Vec::new();
        for tool in tools {
            if let Some(Value::Array(declarations)) = json::get(tool, "functionDeclarations") {
                for declaration in declarations {
                    let schema = declaration
                        .get("parameters")
                        .or_else(|| declaration.get("parametersJsonSchema"))
                        .cloned()
                        .unwrap_or(json!({"type": "object"}));
                    converted.push(json!({
                        "name": json::get_str(declaration, "name").unwrap_or_default(),
                        "description": json::get_str(declaration, "description").unwrap_or_default(),
                        "input_schema": schema,
                    }));
                }
            }
        }
        if !converted.is_empty() {
            json::set(&mut out, "tools", Value::Array(converted));
        }
    }

    match json::get_str(body, "toolConfig.functionCallingConfig.mode") {
        Some("ANY") => json::set(&mut out, "tool_choice", json!({"type": "any"})),
        Some("AUTO") => json::set(&mut out, "tool_choice", json!({"type": "auto"})),
        _ => {}
    }

    out
}

/// Claude unary message -> Gemini generateContent response.
pub fn translate_response(model: &str, body: &Value) -> Value {
    let mut parts: Vec<Value> = Vec::new();
    if let Some(Value::Array(content)) = json::get(body, "content") {
        for part in content {
            match json::get_str(part, "type") {
                Some("text") => {
                    parts.push(json!({"text": json::get_str(part, "text").unwrap_or_default()}));
                }
                Some("thinking") => {
                    let mut thought = json!({
                        "thought": true,
                        "text": json::get_str(part, "thinking").unwrap_or_default(),
                    });
                    if let Some(signature) = json::get_str(part, "signature") {
                        json::set(&mut thought, "thoughtSignature", json!(signature));
                    }
                    parts.push(thought);
                }
                Some("tool_use") => {
                    parts.push(json!({"functionCall": {
                        "id": json::get_str(part, "id").unwrap_or_default(),
                        "name": json::get_str(part, "name").unwrap_or_default(),
                        "args": part.get("input").cloned().unwrap_or(json!({})),
                    }}));
                }
                _ => {}
            }
        }
    }

    let input = json::get_i64(body, "usage.input_tokens").unwrap_or(0);
    let output = json::get_i64(body, "usage.output_tokens").unwrap_or(0);
    let stop_reason = json::get_str(body, "stop_reason").unwrap_or("end_turn");
    json!({
        "candidates": [{
            "content": {"role": "model", "parts": parts},
            "finishReason": stop_reason_to_gemini_finish(stop_reason),
            "index": 0,
        }],
        "usageMetadata": {
            "promptTokenCount": input,
            "candidatesTokenCount": output,
            "totalTokenCount": input + output,
        },
        "modelVersion": model,
        "responseId": json::get_str(body, "id").unwrap_or_default(),
    })
}

/// Claude SSE line -> Gemini streaming chunk(s).
pub fn translate_stream(model: &str, line: &[u8], state: &mut StreamState) -> Vec<String> {
    let event = match parse_line(line) {
        SseLine::Data(value) => value,
        SseLine::Done => {
            state.finished = true;
            return Vec::new();
        }
        _ => return Vec::new(),
    };

    let mut blocks = Vec::new();
    match json::get_str(&event, "type") {
        Some("message_start") => {
            if let Some(id) = json::get_str(&event, "message.id") {
                state.response_id = id.to_string();
            }
            state.input_tokens = json::get_i64(&event, "message.usage.input_tokens").unwrap_or(0);
            state.started = true;
        }
        Some("content_block_start") => {
            let index = json::get_i64(&event, "index").unwrap_or(0);
            if json::get_str(&event, "content_block.type") == Some("tool_use") {
                state.tool_ids.insert(
                    index,
                    json::get_str(&event, "content_block.id").unwrap_or_default().to_string(),
                );
                state.tool_names.insert(
                    index,
                    json::get_str(&event, "content_block.name").unwrap_or_default().to_string(),
                );
                state.tool_args.insert(index, String::new());
                state.open_block = Some("tool_use".to_string());
            } else {
                state.open_block = Some(
                    json::get_str(&event, "content_block.type").unwrap_or("text").to_string(),
                );
            }
        }
        Some("content_block_delta") => {
            let index = json::get_i64(&event, "index").unwrap_or(0);
            match json::get_str(&event, "delta.type") {
                Some("text_delta") => {
                    let text = json::get_str(&event, "delta.text").unwrap_or_default();
                    blocks.push(chunk(model, state, json!({"text": text})));
                }
                Some("thinking_delta") => {
                    let text = json::get_str(&event, "delta.thinking").unwrap_or_default();
                    state.thinking_text.push_str(text);
                    blocks.push(chunk(model, state, json!({"thought": true, "text": text})));
                }
                Some("signature_delta") => {
                    let signature = json::get_str(&event, "delta.signature").unwrap_or_default();
                    state.thinking_signature = signature.to_string();
                    cache_signature(model, &state.thinking_text, signature);
                    blocks.push(chunk(
                        model,
                        state,
                        json!({"thought": true, "text": "", "thoughtSignature": signature}),
                    ));
                }
                Some("input_json_delta") => {
                    let partial = json::get_str(&event, "delta.partial_json").unwrap_or_default();
                    state.tool_args.entry(index).or_default().push_str(partial);
                }
                _ => {}
            }
        }
        Some("content_block_stop") => {
            let index = json::get_i64(&event, "index").unwrap_or(0);
            if state.open_block.take().as_deref() == Some("tool_use") {
                let arguments = state.tool_args.remove(&index).unwrap_or_default();
                let args: Value = serde_json::from_str(&arguments).unwrap_or(json!({}));
                let tool_id = state.tool_ids.remove(&index).unwrap_or_default();
                let tool_name = state.tool_names.remove(&index).unwrap_or_default();
                blocks.push(chunk(
                    model,
                    state,
                    json!({"functionCall": {
                        "id": tool_id,
                        "name": tool_name,
                        "args": args,
                    }}),
                ));
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
            if !state.finished {
                state.finished = true;
                let payload = json!({
                    "candidates": [{
                        "content": {"role": "model", "parts": []},
                        "finishReason": stop_reason_to_gemini_finish(&state.finish_reason),
                        "index": 0,
                    }],
                    "usageMetadata": {
                        "promptTokenCount": state.input_tokens,
                        "candidatesTokenCount": state.output_tokens,
                        "totalTokenCount": state.input_tokens + state.output_tokens,
                    },
                    "modelVersion": model,
                    "responseId": state.response_id,
                });
                blocks.push(data_block(&payload));
            }
        }
        _ => {}
    }
    blocks
}

fn chunk(model: &str, state: &StreamState, part: Value) -> String {
    data_block(&json!({
        "candidates": [{
            "content": {"role": "model", "parts": [part]},
            "index": 0,
        }],
        "modelVersion": model,
        "responseId": state.response_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_maps_contents_and_tools() {
        let body = json!({
            "systemInstruction": {"parts": [{"text": "sys"}]},
            "contents": [
                {"role": "user", "parts": [{"text": "hello"}]},
                {"role": "model", "parts": [
                    {"functionCall": {"id": "fc1", "name": "read", "args": {"p": 1}}},
                ]},
                {"role": "user", "parts": [
                    {"functionResponse": {"id": "fc1", "name": "read", "response": {"result": "ok"}}},
                ]},
            ],
            "tools": [{"functionDeclarations": [
                {"name": "read", "description": "d", "parameters": {"type": "object"}},
            ]}],
            "generationConfig": {"maxOutputTokens": 2000, "temperature": 0.5},
            "toolConfig": {"functionCallingConfig": {"mode": "ANY"}},
        });
        let out = translate_request("claude-sonnet-4-5", &body, false);
        assert_eq!(json::get_i64(&out, "max_tokens"), Some(2000));
        assert_eq!(json::get_str(&out, "system.0.text"), Some("sys"));
        assert_eq!(json::get_str(&out, "messages.1.role"), Some("assistant"));
        assert_eq!(json::get_str(&out, "messages.1.content.0.type"), Some("tool_use"));
        assert_eq!(json::get_str(&out, "messages.2.content.0.tool_use_id"), Some("fc1"));
        assert_eq!(json::get_str(&out, "tools.0.name"), Some("read"));
        assert_eq!(json::get_str(&out, "tool_choice.type"), Some("any"));
    }

    #[test]
    fn response_maps_parts_and_usage() {
        let body = json!({
            "id": "msg_1",
            "content": [
                {"type": "thinking", "thinking": "hm", "signature": "s"},
                {"type": "text", "text": "answer"},
            ],
            "stop_reason": "max_tokens",
            "usage": {"input_tokens": 2, "output_tokens": 3},
        });
        let out = translate_response("m", &body);
        assert_eq!(json::get_bool(&out, "candidates.0.content.parts.0.thought"), Some(true));
        assert_eq!(json::get_str(&out, "candidates.0.content.parts.1.text"), Some("answer"));
        assert_eq!(json::get_str(&out, "candidates.0.finishReason"), Some("MAX_TOKENS"));
        assert_eq!(json::get_i64(&out, "usageMetadata.totalTokenCount"), Some(5));
    }

    #[test]
    fn stream_aggregates_tool_args_until_block_stop() {
        let mut state = StreamState::default();
        let mut out = Vec::new();
        for line in [
            br#"data: {"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t1","name":"read"}}"#.as_slice(),
            br#"data: {"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"p\":"}}"#.as_slice(),
            br#"data: {"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"1}"}}"#.as_slice(),
            br#"data: {"type":"content_block_stop","index":0}"#.as_slice(),
        ] {
            out.extend(translate_stream("m", line, &mut state));
        }
        assert_eq!(out.len(), 1, "functionCall emitted only on block stop");
        assert!(out[0].contains("\"functionCall\""));
        assert!(out[0].contains("\"name\":\"read\""));
    }
}
