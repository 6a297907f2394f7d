//! Translators targeting the Anthropic Messages wire format.

pub mod from_gemini;
pub mod from_openai;
pub mod from_responses;

/// Claude `stop_reason` -> OpenAI `finish_reason`.
pub(crate) fn stop_reason_to_finish(stop_reason: &str) -> &'static str {
    match stop_reason {
        "end_turn" | "stop_sequence" | "pause_turn" => "stop",
        "max_tokens" | "model_context_window_exceeded" => "length",
        "tool_use" => "tool_calls",
        "refusal" => "content_filter",
        _ => "stop",
    }
}

/// OpenAI `finish_reason` -> Claude `stop_reason`.
pub(crate) fn finish_to_stop_reason(finish_reason: &str) -> &'static str {
    match finish_reason {
        "stop" => "end_turn",
        "length" => "max_tokens",
        "tool_calls" | "function_call" => "tool_use",
        "content_filter" => "refusal",
        _ => "end_turn",
    }
}

/// Claude `stop_reason` -> Gemini `finishReason`.
pub(crate) fn stop_reason_to_gemini_finish(stop_reason: &str) -> &'static str {
    match stop_reason {
        "max_tokens" | "model_context_window_exceeded" => "MAX_TOKENS",
        "refusal" => "SAFETY",
        _ => "STOP",
    }
}
