//! SSE line plumbing shared by the stream translators.

use serde_json::Value;

use crate::STREAM_DONE;

/// One parsed upstream SSE line.
pub(crate) enum SseLine {
    /// The `[DONE]` sentinel (either raw or as a data line).
    Done,
    /// A `data:` line carrying JSON.
    Data(Value),
    /// An `event:` line; the name is informational, the payload follows on
    /// the next data line.
    Event(String),
    /// Blank lines, comments, unparsable payloads.
    Ignore,
}

pub(crate) fn parse_line(line: &[u8]) -> SseLine {
    let Ok(text) = std::str::from_utf8(line) else {
        return SseLine::Ignore;
    };
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return SseLine::Ignore;
    }
    if trimmed == "[DONE]" || line == STREAM_DONE {
        return SseLine::Done;
    }
    if let Some(event) = trimmed.strip_prefix("event:") {
        return SseLine::Event(event.trim().to_string());
    }
    let payload = trimmed.strip_prefix("data:").map(str::trim).unwrap_or(trimmed);
    if payload == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<Value>(payload) {
        Ok(value) => SseLine::Data(value),
        Err(_) => SseLine::Ignore,
    }
}

/// Formats a complete `data:` block in client SSE framing.
pub(crate) fn data_block(value: &Value) -> String {
    format!("data: {}\n\n", compact(value))
}

/// Formats an `event:` + `data:` block (Claude-style framing).
pub(crate) fn event_block(event: &str, value: &Value) -> String {
    format!("event: {event}\ndata: {}\n\n", compact(value))
}

pub(crate) const DONE_BLOCK: &str = "data: [DONE]\n\n";

fn compact(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}
