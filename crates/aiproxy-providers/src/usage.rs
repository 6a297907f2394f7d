//! Usage extraction from upstream payloads, surfaced to the manager's
//! reporter through `Response::metadata`.

use aiproxy_common::json;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Usage {
    pub input_tokens: i64,
    pub output_tokens: i64,
}

impl Usage {
    pub fn into_metadata(self, metadata: &mut Map<String, Value>) {
        metadata.insert("input_tokens".to_string(), Value::from(self.input_tokens));
        metadata.insert("output_tokens".to_string(), Value::from(self.output_tokens));
    }
}

/// Claude unary `usage` object.
pub(crate) fn parse_claude_usage(body: &Value) -> Usage {
    Usage {
        input_tokens: json::get_i64(body, "usage.input_tokens").unwrap_or(0),
        output_tokens: json::get_i64(body, "usage.output_tokens").unwrap_or(0),
    }
}

/// Claude SSE line carrying usage (`message_start` and `message_delta`).
pub(crate) fn parse_claude_stream_usage(line: &[u8], usage: &mut Usage) -> bool {
    let Some(value) = data_payload(line) else {
        return false;
    };
    let mut matched = false;
    if let Some(input) = json::get_i64(&value, "message.usage.input_tokens") {
        usage.input_tokens = input;
        matched = true;
    }
    if let Some(output) = json::get_i64(&value, "usage.output_tokens") {
        usage.output_tokens = output;
        matched = true;
    }
    matched
}

/// Gemini `usageMetadata` object (unary or chunk; envelope already removed).
pub(crate) fn parse_gemini_usage(body: &Value) -> Option<Usage> {
    let metadata = json::get(body, "usageMetadata")?;
    Some(Usage {
        input_tokens: json::get_i64(metadata, "promptTokenCount").unwrap_or(0),
        output_tokens: json::get_i64(metadata, "candidatesTokenCount").unwrap_or(0),
    })
}

/// OpenAI / Responses usage objects.
pub(crate) fn parse_openai_usage(body: &Value) -> Usage {
    Usage {
        input_tokens: json::get_i64(body, "usage.prompt_tokens")
            .or_else(|| json::get_i64(body, "usage.input_tokens"))
            .unwrap_or(0),
        output_tokens: json::get_i64(body, "usage.completion_tokens")
            .or_else(|| json::get_i64(body, "usage.output_tokens"))
            .unwrap_or(0),
    }
}

fn data_payload(line: &[u8]) -> Option<Value> {
    let text = std::str::from_utf8(line).ok()?;
    let trimmed = text.trim();
    let payload = trimmed.strip_prefix("data:").map(str::trim).unwrap_or(trimmed);
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    serde_json::from_str(payload).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn claude_stream_usage_merges_both_sides() {
        let mut usage = Usage::default();
        assert!(parse_claude_stream_usage(
            br#"data: {"type":"message_start","message":{"usage":{"input_tokens":9}}}"#,
            &mut usage,
        ));
        assert!(parse_claude_stream_usage(
            br#"data: {"type":"message_delta","usage":{"output_tokens":4}}"#,
            &mut usage,
        ));
        assert_eq!(usage, Usage { input_tokens: 9, output_tokens: 4 });
        assert!(!parse_claude_stream_usage(br#"data: {"type":"ping"}"#, &mut usage));
    }

    #[test]
    fn gemini_and_openai_usage() {
        let gemini = json!({"usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 5}});
        assert_eq!(
            parse_gemini_usage(&gemini),
            Some(Usage { input_tokens: 3, output_tokens: 5 })
        );
        let openai = json!({"usage": {"prompt_tokens": 1, "completion_tokens": 2}});
        assert_eq!(
            parse_openai_usage(&openai),
            Usage { input_tokens: 1, output_tokens: 2 }
        );
    }
}
