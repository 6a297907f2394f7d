//! Gemini clients talking to a Responses (Codex) upstream.

use aiproxy_common::json;
use aiproxy_thinking::convert_budget_to_level;
use serde_json::{json, Map, Value};

use crate::sse::{data_block, parse_line, SseLine};
use crate::StreamState;

/// Gemini generateContent request -> Responses request.
pub fn translate_request(model: &str, body: &Value, stream: bool) -> Value {
    let mut out = Value::Object(Map::new());
    json::set(&mut out, "model", json!(model));
    json::set(&mut out, "stream", json!(stream));
    json::set(&mut out, "store", json!(false));

    if let Some(Value::Array(parts)) = json::get(body, "systemInstruction.parts") {
        let text: String = parts
            .iter()
            .filter_map(|part| json::get_str(part, "text"))
            .collect::<Vec<_>>()
            .join("\n");
        if !text.is_empty() {
            json::set(&mut out, "instructions", json!(text));
        }
    }

    let mut input: Vec<Value> = Vec::new();
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
                        continue;
                    }
                    if let Some(text) = json::get_str(part, "text") {
                        let part_type = if role == "assistant" { "output_text" } else { "input_text" };
                        parts_out.push(json!({"type": part_type, "text": text}));
                    } else if let Some(call) = part.get("functionCall") {
                        let name = json::get_str(call, "name").unwrap_or_default();
                        input.push(json!({
                            "type": "function_call",
                            "call_id": json::get_str(call, "id").unwrap_or(name),
                            "name": name,
                            "arguments": serde_json::to_string(call.get("args").unwrap_or(&json!({})))
                                .unwrap_or_default(),
                        }));
                    } else if let Some(response) = part.get("functionResponse") {
                        let id = json::get_str(response, "id")
                            .unwrap_or_else(|| json::get_str(response, "name").unwrap_or_default());
                        let payload = response
                            .get("response")
                            .and_then(|r| r.get("result").or(Some(r)))
                            .cloned()
                            .unwrap_or(Value::Null);
                        let output = match payload {
                            Value::String(text) => text,
                            other => serde_json::to_string(&other).unwrap_or_default(),
                        };
                        input.push(json!({
                            "type": "function_call_output",
                            "call_id": id,
                            "output": output,
                        }));
                    } else if let Some(inline) = part.get("inlineData") {
                        let mime = json::get_str(inline, "mimeType").unwrap_or("image/png");
                        let data = json::get_str(inline, "data").unwrap_or_default();
                        parts_out.push(json!({
                            "type": "input_image",
                            "image_url": format!("data:{mime};base64,{data}"),
                        }));
                    }
                }
            }
            if !parts_out.is_empty() {
                input.push(json!({"type": "message", "role": role, "content": parts_out}));
            }
        }
    }
    json::set(&mut out, "input", Value::Array(input));

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
                        "type": "function",
                        "name": json::get_str(declaration, "name").unwrap_or_default(),
                        "description": json::get_str(declaration, "description").unwrap_or_default(),
                        "parameters": schema,
                    }));
                }
            }
        }
        if !converted.is_empty() {
            json::set(&mut out, "tools", Value::Array(converted));
        }
    }

    if let Some(max_tokens) = json::get_i64(body, "generationConfig.maxOutputTokens") {
        json::set(&mut out, "max_output_tokens", json!(max_tokens));
    }
    if let Some(temperature) = json::get_f64(body, "generationConfig.temperature") {
        json::set(&mut out, "temperature", json!(temperature));
    }
    if let Some(budget) = json::get_i64(body, "generationConfig.thinkingConfig.thinkingBudget") {
        if let Some(effort) = convert_budget_to_level(budget) {
            json::set(&mut out, "reasoning.effort", json!(effort));
            json::set(&mut out, "reasoning.summary", json!("auto"));
        }
    }

    out
}

/// Responses envelope -> Gemini generateContent response.
pub fn translate_response(model: &str, body: &Value) -> Value {
    let mut parts: Vec<Value> = Vec::new();
    if let Some(Value::Array(output)) = json::get(body, "output") {
        for item in output {
            match json::get_str(item, "type") {
                Some("reasoning") => {
                    if let Some(Value::Array(summary)) = json::get(item, "summary") {
                        let text: String = summary
                            .iter()
                            .filter_map(|part| json::get_str(part, "text"))
                            .collect::<Vec<_>>()
                            .join("");
                        if !text.is_empty() {
                            parts.push(json!({"thought": true, "text": text}));
                        }
                    }
                }
                Some("message") => {
                    if let Some(Value::Array(content)) = json::get(item, "content") {
                        for part in content {
                            if json::get_str(part, "type") == Some("output_text") {
                                parts.push(json!({
                                    "text": json::get_str(part, "text").unwrap_or_default()
                                }));
                            }
                        }
                    }
                }
                Some("function_call") => {
                    let arguments = json::get_str(item, "arguments").unwrap_or("{}");
                    let args: Value = serde_json::from_str(arguments).unwrap_or(json!({}));
                    parts.push(json!({"functionCall": {
                        "id": json::get_str(item, "call_id").unwrap_or_default(),
                        "name": json::get_str(item, "name").unwrap_or_default(),
                        "args": args,
                    }}));
                }
                _ => {}
            }
        }
    }

    let finish = if json::get_str(body, "status") == Some("incomplete") {
        "MAX_TOKENS"
    } else {
        "STOP"
    };
    let input_tokens = json::get_i64(body, "usage.input_tokens").unwrap_or(0);
    let output_tokens = json::get_i64(body, "usage.output_tokens").unwrap_or(0);
    json!({
        "candidates": [{
            "content": {"role": "model", "parts": parts},
            "finishReason": finish,
            "index": 0,
        }],
        "usageMetadata": {
            "promptTokenCount": input_tokens,
            "candidatesTokenCount": output_tokens,
            "totalTokenCount": input_tokens + output_tokens,
        },
        "modelVersion": model,
        "responseId": json::get_str(body, "id").unwrap_or_default(),
    })
}

/// Responses SSE event -> Gemini streaming chunk(s).
pub fn translate_stream(model: &str, line: &[u8], state: &mut StreamState) -> Vec<String> {
    let event = match parse_line(line) {
        SseLine::Data(value) => value,
        SseLine::Done => return Vec::new(),
        _ => return Vec::new(),
    };

    state.ensure_identity("resp-");
    let mut blocks = Vec::new();
    match json::get_str(&event, "type") {
        Some("response.created") => {
            if let Some(id) = json::get_str(&event, "response.id") {
                state.response_id = id.to_string();
            }
            state.started = true;
        }
        Some("response.output_item.added") => {
            if json::get_str(&event, "item.type") == Some("function_call") {
                let output_index = json::get_i64(&event, "output_index").unwrap_or(0);
                state.tool_ids.insert(
                    output_index,
                    json::get_str(&event, "item.call_id").unwrap_or_default().to_string(),
                );
                state.tool_names.insert(
                    output_index,
                    json::get_str(&event, "item.name").unwrap_or_default().to_string(),
                );
                state.tool_args.insert(output_index, String::new());
            }
        }
        Some("response.output_text.delta") => {
            let text = json::get_str(&event, "delta").unwrap_or_default();
            blocks.push(chunk(model, state, json!({"text": text})));
        }
        Some("response.reasoning_summary_text.delta") | Some("response.reasoning_text.delta") => {
            let text = json::get_str(&event, "delta").unwrap_or_default();
            blocks.push(chunk(model, state, json!({"thought": true, "text": text})));
        }
        Some("response.function_call_arguments.delta") => {
            let output_index = json::get_i64(&event, "output_index").unwrap_or(0);
            let delta = json::get_str(&event, "delta").unwrap_or_default();
            state.tool_args.entry(output_index).or_default().push_str(delta);
        }
        Some("response.output_item.done") => {
            let output_index = json::get_i64(&event, "output_index").unwrap_or(0);
            if let Some(arguments) = state.tool_args.remove(&output_index) {
                state.tool_count += 1;
                let args: Value = serde_json::from_str(&arguments).unwrap_or(json!({}));
                let tool_id = state.tool_ids.remove(&output_index).unwrap_or_default();
                let tool_name = state.tool_names.remove(&output_index).unwrap_or_default();
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
        Some("response.completed") | Some("response.incomplete") => {
            if !state.finished {
                state.finished = true;
                let finish = if json::get_str(&event, "type") == Some("response.incomplete") {
                    "MAX_TOKENS"
                } else {
                    "STOP"
                };
                let input_tokens =
                    json::get_i64(&event, "response.usage.input_tokens").unwrap_or(0);
                let output_tokens =
                    json::get_i64(&event, "response.usage.output_tokens").unwrap_or(0);
                blocks.push(data_block(&json!({
                    "candidates": [{
                        "content": {"role": "model", "parts": []},
                        "finishReason": finish,
                        "index": 0,
                    }],
                    "usageMetadata": {
                        "promptTokenCount": input_tokens,
                        "candidatesTokenCount": output_tokens,
                        "totalTokenCount": input_tokens + output_tokens,
                    },
                    "modelVersion": model,
                    "responseId": state.response_id,
                })));
            }
        }
        _ => {}
    }
    blocks
}

fn chunk(model: &str, state: &StreamState, part: Value) -> String {
    data_block(&json!({
        "candidates": [{"content": {"role": "model", "parts": [part]}, "index": 0}],
        "modelVersion": model,
        "responseId": state.response_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_maps_gemini_contents() {
        let body = json!({
            "systemInstruction": {"parts": [{"text": "sys"}]},
            "contents": [
                {"role": "user", "parts": [{"text": "hi"}]},
                {"role": "model", "parts": [{"functionCall": {"name": "read", "args": {}}}]},
            ],
            "generationConfig": {"thinkingConfig": {"thinkingBudget": 9000}},
        });
        let out = translate_request("gpt-5", &body, false);
        assert_eq!(json::get_str(&out, "instructions"), Some("sys"));
        assert_eq!(json::get_str(&out, "input.0.content.0.text"), Some("hi"));
        assert_eq!(json::get_str(&out, "input.1.type"), Some("function_call"));
        assert_eq!(json::get_str(&out, "reasoning.effort"), Some("high"));
    }

    #[test]
    fn stream_emits_function_call_on_item_done() {
        let mut state = StreamState::default();
        let mut out = Vec::new();
        for line in [
            br#"data: {"type":"response.created","response":{"id":"r"}}"#.as_slice(),
            br#"data: {"type":"response.output_item.added","output_index":0,"item":{"type":"function_call","call_id":"c1","name":"read"}}"#.as_slice(),
            br#"data: {"type":"response.function_call_arguments.delta","output_index":0,"delta":"{\"p\":1}"}"#.as_slice(),
            br#"data: {"type":"response.output_item.done","output_index":0}"#.as_slice(),
            br#"data: {"type":"response.completed","response":{"usage":{"input_tokens":1,"output_tokens":1}}}"#.as_slice(),
        ] {
            out.extend(translate_stream("m", line, &mut state));
        }
        let joined = out.concat();
        assert!(joined.contains("\"functionCall\""));
        assert!(joined.contains("\"p\":1"));
        assert!(joined.contains("\"finishReason\":\"STOP\""));
    }
}
