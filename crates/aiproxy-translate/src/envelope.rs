//! Gemini CLI / Antigravity request envelopes.
//!
//! Both upstreams carry a plain Gemini body under `request`, alongside
//! routing fields (`model`, `project`, and for Antigravity `requestId` plus
//! `request.sessionId`). Executors fill the account-specific fields; here we
//! only move the body in and out of the wrapper.

use aiproxy_common::json;
use serde_json::{Map, Value};

use crate::Format;

/// Extracts the Gemini body from an envelope request. Plain Gemini bodies
/// pass through.
pub fn unwrap(body: Value, from: Format) -> Value {
    match from.wire() {
        Format::GeminiCli | Format::Antigravity => match body {
            Value::Object(mut map) => map.remove("request").unwrap_or(Value::Object(map)),
            other => other,
        },
        _ => body,
    }
}

/// Wraps a Gemini body for an envelope upstream.
pub fn wrap(body: Value, to: Format, model: &str) -> Value {
    match to.wire() {
        Format::GeminiCli | Format::Antigravity => {
            let mut out = Map::new();
            out.insert("model".to_string(), Value::String(model.to_string()));
            out.insert("project".to_string(), Value::String(String::new()));
            if to.wire() == Format::Antigravity {
                out.insert("requestId".to_string(), Value::String(String::new()));
            }
            out.insert("request".to_string(), body);
            Value::Object(out)
        }
        _ => body,
    }
}

/// Envelope upstreams answer with `{"response": …}`; unwrap before response
/// translation. Streaming chunks use the same wrapper per SSE data line.
pub fn unwrap_response(body: Value, upstream: Format) -> Value {
    match upstream.wire() {
        Format::GeminiCli | Format::Antigravity => {
            if json::exists(&body, "response") {
                match body {
                    Value::Object(mut map) => map.remove("response").unwrap_or(Value::Null),
                    other => other,
                }
            } else {
                body
            }
        }
        _ => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wrap_and_unwrap_round_trip() {
        let body = json!({"contents": [{"role": "user", "parts": [{"text": "hi"}]}]});
        let wrapped = wrap(body.clone(), Format::GeminiCli, "gemini-2.5-pro");
        assert_eq!(wrapped["model"], json!("gemini-2.5-pro"));
        assert_eq!(wrapped["request"], body);
        assert_eq!(unwrap(wrapped, Format::GeminiCli), body);
    }

    #[test]
    fn antigravity_envelope_carries_request_id() {
        let wrapped = wrap(json!({}), Format::Antigravity, "m");
        assert!(wrapped.get("requestId").is_some());
    }

    #[test]
    fn response_unwrapping() {
        let body = json!({"response": {"candidates": []}});
        assert_eq!(
            unwrap_response(body, Format::GeminiCli),
            json!({"candidates": []})
        );
        let plain = json!({"candidates": []});
        assert_eq!(unwrap_response(plain.clone(), Format::Antigravity), plain);
    }
}
