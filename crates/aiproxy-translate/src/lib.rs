//! Bidirectional schema conversion between the four wire formats.
//!
//! Translators mutate raw JSON trees (`serde_json::Value`, built with
//! `preserve_order`) through dotted-path helpers instead of decoding into
//! typed structs, so fields a translator does not know about survive in
//! place and in order.
//!
//! Module layout follows the upstream format: `claude::from_openai` converts
//! OpenAI-client requests *to* the Claude wire and Claude responses *back* to
//! OpenAI shapes.

pub mod claude;
pub mod envelope;
pub mod gemini;
pub mod openai;
pub mod responses;
mod signature;
mod sse;
mod state;

pub use signature::{
    cache_signature, clear_signature_cache, get_cached_signature, has_valid_signature,
    model_group, GEMINI_SKIP_SIGNATURE,
};
pub use state::StreamState;

/// Wire schema identifier for inbound requests and upstream payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    OpenAI,
    /// OpenAI Responses API (Codex).
    Responses,
    Claude,
    Gemini,
    /// Gemini wrapped in the CLI `{"model":…,"request":{…}}` envelope.
    GeminiCli,
    /// Gemini CLI envelope with Antigravity additions (project, requestId,
    /// request.sessionId).
    Antigravity,
    Qwen,
    IFlow,
}

impl Format {
    pub fn from_str(value: &str) -> Option<Format> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(Format::OpenAI),
            "openai-response" | "responses" | "codex" => Some(Format::Responses),
            "claude" | "anthropic" => Some(Format::Claude),
            "gemini" => Some(Format::Gemini),
            "gemini-cli" => Some(Format::GeminiCli),
            "antigravity" => Some(Format::Antigravity),
            "qwen" => Some(Format::Qwen),
            "iflow" => Some(Format::IFlow),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Format::OpenAI => "openai",
            Format::Responses => "openai-response",
            Format::Claude => "claude",
            Format::Gemini => "gemini",
            Format::GeminiCli => "gemini-cli",
            Format::Antigravity => "antigravity",
            Format::Qwen => "qwen",
            Format::IFlow => "iflow",
        }
    }

    /// The schema actually on the wire: Qwen and iFlow speak OpenAI Chat
    /// Completions; the two Gemini envelopes carry a Gemini body.
    pub fn wire(&self) -> Format {
        match self {
            Format::Qwen | Format::IFlow => Format::OpenAI,
            other => *other,
        }
    }

    fn gemini_family(&self) -> bool {
        matches!(
            self.wire(),
            Format::Gemini | Format::GeminiCli | Format::Antigravity
        )
    }
}

/// Translates a request payload from the client schema into the upstream
/// schema. `stream` selects the streaming shape where the two differ (used
/// even for unary calls when the streaming shape is a superset).
///
/// Unknown or unparsable payloads pass through unchanged: the upstream is
/// the authority on rejecting malformed bodies.
pub fn translate_request(
    from: Format,
    to: Format,
    model: &str,
    payload: &[u8],
    stream: bool,
) -> Vec<u8> {
    let from = from.wire();
    let to = to.wire();
    if from == to {
        return payload.to_vec();
    }
    let Ok(body) = serde_json::from_slice::<serde_json::Value>(payload) else {
        return payload.to_vec();
    };
    // Envelope-only moves: same gemini body, different wrapper.
    if from.gemini_family() && to.gemini_family() {
        let inner = envelope::unwrap(body, from);
        let out = envelope::wrap(inner, to, model);
        return serde_json::to_vec(&out).unwrap_or_else(|_| payload.to_vec());
    }
    let inner = if from.gemini_family() {
        envelope::unwrap(body, from)
    } else {
        body
    };
    let source = if from.gemini_family() { Format::Gemini } else { from };
    let translated = match (source, to.base()) {
        (Format::OpenAI, Format::Claude) => claude::from_openai::translate_request(model, &inner, stream),
        (Format::Responses, Format::Claude) => claude::from_responses::translate_request(model, &inner, stream),
        (Format::Gemini, Format::Claude) => claude::from_gemini::translate_request(model, &inner, stream),
        (Format::OpenAI, Format::Gemini) => gemini::from_openai::translate_request(model, &inner, stream),
        (Format::Responses, Format::Gemini) => gemini::from_responses::translate_request(model, &inner, stream),
        (Format::Claude, Format::Gemini) => gemini::from_claude::translate_request(model, &inner, stream),
        (Format::Claude, Format::OpenAI) => openai::from_claude::translate_request(model, &inner, stream),
        (Format::Gemini, Format::OpenAI) => openai::from_gemini::translate_request(model, &inner, stream),
        (Format::Responses, Format::OpenAI) => openai::from_responses::translate_request(model, &inner, stream),
        (Format::OpenAI, Format::Responses) => responses::from_openai::translate_request(model, &inner, stream),
        (Format::Claude, Format::Responses) => responses::from_claude::translate_request(model, &inner, stream),
        (Format::Gemini, Format::Responses) => responses::from_gemini::translate_request(model, &inner, stream),
        _ => inner,
    };
    let out = if to.gemini_family() && to != Format::Gemini {
        envelope::wrap(translated, to, model)
    } else {
        translated
    };
    serde_json::to_vec(&out).unwrap_or_else(|_| payload.to_vec())
}

/// Translates a complete (unary) upstream response back into the client
/// schema. `upstream` is the schema the response arrived in.
pub fn translate_non_stream(
    upstream: Format,
    client: Format,
    model: &str,
    response: &[u8],
    state: &mut StreamState,
) -> Vec<u8> {
    let upstream = upstream.wire();
    let client = client.wire();
    if upstream == client {
        return response.to_vec();
    }
    let Ok(body) = serde_json::from_slice::<serde_json::Value>(response) else {
        return response.to_vec();
    };
    let body = if upstream.gemini_family() {
        envelope::unwrap_response(body, upstream)
    } else {
        body
    };
    let out = match (upstream.base(), client.base()) {
        (Format::Claude, Format::OpenAI) => claude::from_openai::translate_response(model, &body),
        (Format::Claude, Format::Responses) => claude::from_responses::translate_response(model, &body),
        (Format::Claude, Format::Gemini) => claude::from_gemini::translate_response(model, &body),
        (Format::Gemini, Format::OpenAI) => gemini::from_openai::translate_response(model, &body),
        (Format::Gemini, Format::Responses) => gemini::from_responses::translate_response(model, &body),
        (Format::Gemini, Format::Claude) => gemini::from_claude::translate_response(model, &body),
        (Format::OpenAI, Format::Claude) => openai::from_claude::translate_response(model, &body),
        (Format::OpenAI, Format::Gemini) => openai::from_gemini::translate_response(model, &body),
        (Format::OpenAI, Format::Responses) => openai::from_responses::translate_response(model, &body),
        (Format::Responses, Format::OpenAI) => responses::from_openai::translate_response(model, &body),
        (Format::Responses, Format::Claude) => responses::from_claude::translate_response(model, &body),
        (Format::Responses, Format::Gemini) => responses::from_gemini::translate_response(model, &body),
        _ => body,
    };
    let _ = state;
    serde_json::to_vec(&out).unwrap_or_else(|_| response.to_vec())
}

/// Sentinel accepted by [`translate_stream`] to flush terminal state.
pub const STREAM_DONE: &[u8] = b"[DONE]";

/// Translates one upstream SSE line into zero or more complete client-format
/// SSE blocks. `state` accumulates cross-chunk context for the whole stream.
pub fn translate_stream(
    upstream: Format,
    client: Format,
    model: &str,
    line: &[u8],
    state: &mut StreamState,
) -> Vec<String> {
    let upstream = upstream.wire();
    let client = client.wire();
    if upstream == client {
        // Already client-shaped: forward the line, restoring SSE framing
        // (the reader stripped the blank separator after each data line).
        let Ok(text) = std::str::from_utf8(line) else {
            return Vec::new();
        };
        let trimmed = text.trim_end();
        if trimmed.is_empty() || trimmed == "[DONE]" {
            // The synthetic EOF flush; upstream's own terminator (if any)
            // already passed through as a data line.
            return Vec::new();
        }
        return if trimmed.starts_with("data:") {
            vec![format!("{trimmed}\n\n")]
        } else {
            vec![format!("{trimmed}\n")]
        };
    }
    if upstream.base() == client.base() {
        // Same body schema, different envelope: unwrap each data line.
        return match sse::parse_line(line) {
            sse::SseLine::Data(value) => {
                vec![sse::data_block(&envelope::unwrap_response(value, upstream))]
            }
            _ => Vec::new(),
        };
    }
    match (upstream.base(), client.base()) {
        (Format::Claude, Format::OpenAI) => claude::from_openai::translate_stream(model, line, state),
        (Format::Claude, Format::Responses) => claude::from_responses::translate_stream(model, line, state),
        (Format::Claude, Format::Gemini) => claude::from_gemini::translate_stream(model, line, state),
        (Format::Gemini, Format::OpenAI) => gemini::from_openai::translate_stream(model, line, state, upstream),
        (Format::Gemini, Format::Responses) => gemini::from_responses::translate_stream(model, line, state, upstream),
        (Format::Gemini, Format::Claude) => gemini::from_claude::translate_stream(model, line, state, upstream),
        (Format::OpenAI, Format::Claude) => openai::from_claude::translate_stream(model, line, state),
        (Format::OpenAI, Format::Gemini) => openai::from_gemini::translate_stream(model, line, state),
        (Format::OpenAI, Format::Responses) => openai::from_responses::translate_stream(model, line, state),
        (Format::Responses, Format::OpenAI) => responses::from_openai::translate_stream(model, line, state),
        (Format::Responses, Format::Claude) => responses::from_claude::translate_stream(model, line, state),
        (Format::Responses, Format::Gemini) => responses::from_gemini::translate_stream(model, line, state),
        _ => Vec::new(),
    }
}

/// Packages a scalar token count into the client format's token-count
/// response shape.
pub fn translate_token_count(client: Format, count: i64, body: &[u8]) -> Vec<u8> {
    let out = match client.wire().base() {
        Format::Claude => serde_json::json!({ "input_tokens": count }),
        Format::Gemini => serde_json::json!({ "totalTokens": count }),
        Format::Responses => serde_json::json!({ "object": "response.input_tokens", "input_tokens": count }),
        _ => serde_json::json!({
            "object": "tokens.count",
            "prompt_tokens": count,
            "total_tokens": count,
        }),
    };
    serde_json::to_vec(&out).unwrap_or_else(|_| body.to_vec())
}

impl Format {
    /// Collapses the Gemini envelope flavors onto the bare Gemini schema for
    /// body translation dispatch.
    fn base(&self) -> Format {
        if self.gemini_family() {
            Format::Gemini
        } else {
            self.wire()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parsing_round_trips() {
        for name in ["openai", "claude", "gemini", "gemini-cli", "antigravity", "qwen", "iflow"] {
            let format = Format::from_str(name).expect(name);
            assert_eq!(format.as_str(), name);
        }
        assert_eq!(Format::from_str("codex"), Some(Format::Responses));
        assert_eq!(Format::from_str("nope"), None);
    }

    #[test]
    fn identity_translation_is_byte_exact() {
        let payload = br#"{"model":"m","zeta":1,"alpha":{"b":2}}"#;
        let out = translate_request(Format::Claude, Format::Claude, "m", payload, false);
        assert_eq!(out, payload.to_vec());
        let qwen = translate_request(Format::Qwen, Format::OpenAI, "m", payload, false);
        assert_eq!(qwen, payload.to_vec());
    }

    #[test]
    fn token_count_shapes() {
        let claude = translate_token_count(Format::Claude, 42, b"{}");
        assert_eq!(claude, br#"{"input_tokens":42}"#.to_vec());
        let gemini = translate_token_count(Format::Gemini, 42, b"{}");
        assert_eq!(gemini, br#"{"totalTokens":42}"#.to_vec());
    }
}
