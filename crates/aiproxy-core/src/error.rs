use http::HeaderMap;
use serde_json::json;

/// Error surfaced to a client, with the upstream status and any headers the
/// upstream wants forwarded (e.g. `Retry-After`).
#[derive(Debug, Default)]
pub struct ErrorMessage {
    pub status: u16,
    pub message: String,
    pub headers: Option<HeaderMap>,
}

impl ErrorMessage {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            headers: None,
        }
    }

    pub fn body(&self) -> Vec<u8> {
        build_error_response_body(self.status, &self.message)
    }
}

impl From<aiproxy_auth::ExecutorError> for ErrorMessage {
    fn from(err: aiproxy_auth::ExecutorError) -> Self {
        Self {
            status: if err.status == 0 { 502 } else { err.status },
            message: err.message,
            headers: err.headers,
        }
    }
}

/// Builds an OpenAI-compatible error body. When the upstream error text is
/// itself valid JSON it is forwarded verbatim so clients see the original
/// provider payload.
pub fn build_error_response_body(status: u16, text: &str) -> Vec<u8> {
    let status = if status == 0 { 500 } else { status };
    let trimmed = text.trim();
    if !trimmed.is_empty() && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return trimmed.as_bytes().to_vec();
    }
    let message = if trimmed.is_empty() {
        canonical_reason(status)
    } else {
        trimmed
    };

    let (error_type, code) = match status {
        401 => ("authentication_error", "invalid_api_key"),
        403 => ("permission_error", "insufficient_quota"),
        404 => ("invalid_request_error", "model_not_found"),
        429 => ("rate_limit_error", "rate_limit_exceeded"),
        s if s >= 500 => ("server_error", "internal_server_error"),
        _ => ("invalid_request_error", ""),
    };

    let mut error = json!({"message": message, "type": error_type});
    if !code.is_empty() {
        error["code"] = json!(code);
    }
    serde_json::to_vec(&json!({"error": error}))
        .unwrap_or_else(|_| br#"{"error":{"message":"internal error","type":"server_error"}}"#.to_vec())
}

fn canonical_reason(status: u16) -> &'static str {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or("error")
}
