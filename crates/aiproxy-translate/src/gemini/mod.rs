//! Translators targeting the Gemini GenerateContent wire format.

pub mod from_claude;
pub mod from_openai;
pub mod from_responses;

use serde_json::{json, Value};

/// Gemini `finishReason` -> OpenAI `finish_reason`.
pub(crate) fn finish_to_openai(finish: &str, saw_tool_call: bool) -> &'static str {
    if saw_tool_call {
        return "tool_calls";
    }
    match finish {
        "MAX_TOKENS" => "length",
        "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" => "content_filter",
        _ => "stop",
    }
}

/// Gemini `finishReason` -> Claude `stop_reason`.
pub(crate) fn finish_to_claude(finish: &str, saw_tool_call: bool) -> &'static str {
    if saw_tool_call {
        return "tool_use";
    }
    match finish {
        "MAX_TOKENS" => "max_tokens",
        "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" => "refusal",
        _ => "end_turn",
    }
}

/// Permissive safety settings attached to every translated Gemini request;
/// filtering is the client's concern, not the proxy's.
pub(crate) fn default_safety_settings() -> Value {
    json!([
        {"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_NONE"},
        {"category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_NONE"},
        {"category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "BLOCK_NONE"},
        {"category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "BLOCK_NONE"},
    ])
}
