//! Gemini clients talking to an OpenAI-compatible upstream.

use aiproxy_common::json;
use aiproxy_thinking::convert_budget_to_level;
use serde_json::{json, Map, Value};

use crate::sse::{data_block, parse_line, SseLine};
use crate::StreamState;

use super::finish_to_gemini;

/// Gemini generateContent request -> OpenAI chat request.
pub fn translate_request(model: &str, body: &Value, stream: bool) -> Value {
    let mut out = Value::Object(Map::new());
    json::set(&mut out, "model", json!(model));
    json::set(&mut out, "stream", json!(stream));

    let mut messages: Vec<Value> = Vec::new();
    if let Some(Value::Array(parts)) = json::get(body, "systemInstruction.parts") {
        let text: String = parts
            .iter()
            .filter_map(|part| json::get_str(part, "text"))
            .collect::<Vec<_>>()
            .join("\n");
        if !text.is_empty() {
            messages.push(json!({"role": "system", "content": text}));
        }
    }

    if let Some(Value::Array(contents)) = json::get(body, "contents") {
        for content in contents {
            let role = match json::get_str(content, "role") {
                Some("model") => "assistant",
                _ => "user",
            };
            let mut items: Vec<Value> = Vec::new();
            let mut tool_calls: Vec<Value> = Vec::new();
            if let Some(Value::Array(parts)) = json::get(content, "parts") {
                for part in parts {
                    if json::get_bool(part, "thought") == Some(true) {
                        continue;
                    }
                    if let Some(text) = json::get_str(part, "text") {
                        items.push(json!({"type": "text", "text": text}));
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
                    } else if let Some(response) = part.get("functionResponse") {
                        let id = json::get_str(response, "id")
                            .unwrap_or_else(|| json::get_str(response, "name").unwrap_or_default());
                        let payload = response
                            .get("response")
                            .and_then(|r| r.get("result").or(Some(r)))
                            .cloned()
                            .unwrap_or(Value::Null);
                        let text = match payload {
                            Value::String(text) => text,
                            other => serde_json::to_string(&other).unwrap_or_default(),
                        };
                        messages.push(json!({"role": "tool", "tool_call_id": id, "content": text}));
                    } else if let Some(inline) = part.get("inlineData") {
                        let mime = json::get_str(inline, "mimeType").unwrap_or("image/png");
                        let data = json::get_str(inline, "data").unwrap_or_default();
                        items.push(json!({"type": "image_url", "image_url": {
                            "url": format!("data:{mime};base64,{data}"),
                        }}));
                    }
                }
            }
            if !items.is_empty() {
                messages.push(json!({"role": role, "content": items}));
            }
            if role == "assistant" && !tool_calls.is_empty() {
                messages.push(json!({"role": "assistant", "tool_calls": tool_calls}));
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
                    converted.push(json!({"type": "function", "function": {
                        "name": json::get_str(declaration, "name").unwrap_or_default(),
                        "description": json::get_str(declaration, "description").unwrap_or_default(),
                        "parameters": schema,
                    }}));
                }
            }
        }
        if !converted.is_empty() {
            json::set(&mut out, "tools", Value::Array(converted));
        }
    }

    match json::get_str(body, "toolConfig.functionCallingConfig.mode") {
        Some("ANY") => json::set(&mut out, "tool_choice", json!("required")),
        Some("NONE") => json::set(&mut out, "tool_choice", json!("none")),
        Some("AUTO") => json::set(&mut out, "tool_choice", json!("auto")),
        _ => {}
    }

    if let Some(temperature) = json::get_f64(body, "generationConfig.temperature") {
        json::set(&mut out, "temperature", json!(temperature));
    }
    if let Some(top_p) = json::get_f64(body, "generationConfig.topP") {
        json::set(&mut out, "top_p", json!(top_p));
    }
    if let Some(max_tokens) = json::get_i64(body, "generationConfig.maxOutputTokens") {
        json::set(&mut out, "max_tokens", json!(max_tokens));
    }
    if let Some(Value::Array(stops)) = json::get(body, "generationConfig.stopSequences") {
        json::set(&mut out, "stop", json!(stops));
    }
    if let Some(budget) = json::get_i64(body, "generationConfig.thinkingConfig.thinkingBudget") {
        if let Some(effort) = convert_budget_to_level(budget) {
            json::set(&mut out, "reasoning_effort", json!(effort));
        }
    }

    out
}

/// OpenAI chat completion -> Gemini generateContent response.
pub fn translate_response(model: &str, body: &Value) -> Value {
    let mut parts: Vec<Value> = Vec::new();
    if let Some(reasoning) = json::get_str(body, "choices.0.message.reasoning_content") {
        if !reasoning.is_empty() {
            parts.push(json!({"thought": true, "text": reasoning}));
        }
    }
    if let Some(text) = json::get_str(body, "choices.0.message.content") {
        if !text.is_empty() {
            parts.push(json!({"text": text}));
        }
    }
    if let Some(Value::Array(tool_calls)) = json::get(body, "choices.0.message.tool_calls") {
        for call in tool_calls {
            let arguments = json::get_str(call, "function.arguments").unwrap_or("{}");
            let args: Value = serde_json::from_str(arguments).unwrap_or(json!({}));
            parts.push(json!({"functionCall": {
                "id": json::get_str(call, "id").unwrap_or_default(),
                "name": json::get_str(call, "function.name").unwrap_or_default(),
                "args": args,
            }}));
        }
    }

    let finish = json::get_str(body, "choices.0.finish_reason").unwrap_or("stop");
    let prompt = json::get_i64(body, "usage.prompt_tokens").unwrap_or(0);
    let completion = json::get_i64(body, "usage.completion_tokens").unwrap_or(0);
    json!({
        "candidates": [{
            "content": {"role": "model", "parts": parts},
            "finishReason": finish_to_gemini(finish),
            "index": 0,
        }],
        "usageMetadata": {
            "promptTokenCount": prompt,
            "candidatesTokenCount": completion,
            "totalTokenCount": prompt + completion,
        },
        "modelVersion": model,
        "responseId": json::get_str(body, "id").unwrap_or_default(),
    })
}

/// OpenAI chat completion chunk -> Gemini streaming chunk(s).
pub fn translate_stream(model: &str, line: &[u8], state: &mut StreamState) -> Vec<String> {
    let chunk = match parse_line(line) {
        SseLine::Data(value) => value,
        SseLine::Done => {
            if state.finished {
                return Vec::new();
            }
            state.finished = true;
            return vec![data_block(&json!({
                "candidates": [{
                    "content": {"role": "model", "parts": []},
                    "finishReason": finish_to_gemini(&state.finish_reason),
                    "index": 0,
                }],
                "usageMetadata": {
                    "promptTokenCount": state.input_tokens,
                    "candidatesTokenCount": state.output_tokens,
                    "totalTokenCount": state.input_tokens + state.output_tokens,
                },
                "modelVersion": model,
                "responseId": state.response_id,
            }))];
        }
        _ => return Vec::new(),
    };

    state.ensure_identity("resp-");
    if let Some(id) = json::get_str(&chunk, "id") {
        state.response_id = id.to_string();
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

    let mut parts: Vec<Value> = Vec::new();
    if let Some(reasoning) = json::get_str(&chunk, "choices.0.delta.reasoning_content") {
        if !reasoning.is_empty() {
            parts.push(json!({"thought": true, "text": reasoning}));
        }
    }
    if let Some(text) = json::get_str(&chunk, "choices.0.delta.content") {
        if !text.is_empty() {
            parts.push(json!({"text": text}));
        }
    }
    if let Some(Value::Array(tool_calls)) = json::get(&chunk, "choices.0.delta.tool_calls") {
        for call in tool_calls {
            let index = json::get_i64(call, "index").unwrap_or(0);
            if let Some(name) = json::get_str(call, "function.name") {
                state.tool_names.insert(index, name.to_string());
                state.tool_ids.insert(
                    index,
                    json::get_str(call, "id").unwrap_or(name).to_string(),
                );
                state.tool_args.insert(index, String::new());
            }
            if let Some(arguments) = json::get_str(call, "function.arguments") {
                state.tool_args.entry(index).or_default().push_str(arguments);
            }
        }
    }
    // Function calls are emitted whole once the upstream reports the
    // tool_calls finish; Gemini clients expect complete args.
    if state.finish_reason == "tool_calls" && !state.tool_args.is_empty() {
        let mut indexes: Vec<i64> = state.tool_args.keys().copied().collect();
        indexes.sort_unstable();
        for index in indexes {
            let arguments = state.tool_args.remove(&index).unwrap_or_default();
            let args: Value = serde_json::from_str(&arguments).unwrap_or(json!({}));
            parts.push(json!({"functionCall": {
                "id": state.tool_ids.remove(&index).unwrap_or_default(),
                "name": state.tool_names.remove(&index).unwrap_or_default(),
                "args": args,
            }}));
        }
    }

    if parts.is_empty() {
        return Vec::new();
    }
    vec![data_block(&json!({
        "candidates": [{"content": {"role": "model", "parts": parts}, "index": 0}],
        "modelVersion": model,
        "responseId": state.response_id,
    }))]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_maps_contents_to_messages() {
        let body = json!({
            "systemInstruction": {"parts": [{"text": "sys"}]},
            "contents": [
                {"role": "user", "parts": [{"text": "hi"}]},
                {"role": "model", "parts": [{"functionCall": {"name": "read", "args": {"p": 1}}}]},
                {"role": "user", "parts": [{"functionResponse": {"name": "read", "response": {"result": "ok"}}}]},
            ],
            "generationConfig": {"maxOutputTokens": 99, "thinkingConfig": {"thinkingBudget": 1024}},
        });
        let out = translate_request("qwen3-coder-plus", &body, false);
        assert_eq!(json::get_str(&out, "messages.0.role"), Some("system"));
        assert_eq!(json::get_str(&out, "messages.2.tool_calls.0.function.name"), Some("read"));
        assert_eq!(json::get_str(&out, "messages.3.role"), Some("tool"));
        assert_eq!(json::get_i64(&out, "max_tokens"), Some(99));
        assert_eq!(json::get_str(&out, "reasoning_effort"), Some("low"));
    }

    #[test]
    fn stream_buffers_tool_args_until_finish() {
        let mut state = StreamState::default();
        let mut out = Vec::new();
        for line in [
            br#"data: {"id":"c1","choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"t1","function":{"name":"read","arguments":"{\"p\""}}]}}]}"#.as_slice(),
            br#"data: {"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":":1}"}}]},"finish_reason":"tool_calls"}]}"#.as_slice(),
            b"data: [DONE]".as_slice(),
        ] {
            out.extend(translate_stream("m", line, &mut state));
        }
        let joined = out.concat();
        assert!(joined.contains("\"functionCall\""));
        assert!(joined.contains("\"p\":1"));
    }
}
