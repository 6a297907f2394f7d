//! Translators targeting the OpenAI Chat Completions wire format (also used
//! by the Qwen and iFlow upstreams).

pub mod from_claude;
pub mod from_gemini;
pub mod from_responses;

/// OpenAI `finish_reason` -> Gemini `finishReason`.
pub(crate) fn finish_to_gemini(finish: &str) -> &'static str {
    match finish {
        "length" => "MAX_TOKENS",
        "content_filter" => "SAFETY",
        _ => "STOP",
    }
}
