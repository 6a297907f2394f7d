use std::error::Error;
use std::fmt;

use http::HeaderMap;

/// Error classification driving credential state updates and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Surfaced verbatim, never retried, no credential state change.
    Client,
    /// 401/403: pair cools down proportionally to the error streak.
    Auth,
    /// 402/429: quota-exceeded with a reset deadline.
    Quota,
    /// 408/5xx/transport: short cooldown, fall through to the next credential.
    Transient,
    /// Translator or malformed-payload failures: surfaced immediately.
    Fatal,
}

impl ErrorKind {
    pub fn retryable(&self) -> bool {
        matches!(self, ErrorKind::Auth | ErrorKind::Quota | ErrorKind::Transient)
    }
}

/// Classifies an upstream HTTP status. Status 0 stands for transport errors
/// that never produced a response.
pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::Auth,
        402 | 429 => ErrorKind::Quota,
        0 | 408 => ErrorKind::Transient,
        s if s >= 500 => ErrorKind::Transient,
        _ => ErrorKind::Client,
    }
}

/// Error returned by provider executors. Carries the upstream status and
/// headers so the manager can classify without parsing bodies.
#[derive(Debug, Clone, Default)]
pub struct ExecutorError {
    pub status: u16,
    pub message: String,
    pub headers: Option<HeaderMap>,
    /// Marks translator/parse failures that must not touch credential state.
    pub fatal: bool,
}

impl ExecutorError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            headers: None,
            fatal: false,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Transport-level failure with no HTTP response.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(0, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            status: 500,
            message: message.into(),
            headers: None,
            fatal: true,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn kind(&self) -> ErrorKind {
        if self.fatal {
            ErrorKind::Fatal
        } else {
            classify_status(self.status)
        }
    }

    /// Reset hint from a `Retry-After` header, in seconds.
    pub fn retry_after_secs(&self) -> Option<u64> {
        let headers = self.headers.as_ref()?;
        let value = headers.get("retry-after")?.to_str().ok()?;
        value.trim().parse().ok()
    }
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.status > 0 {
            write!(f, "upstream status {}: {}", self.status, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl Error for ExecutorError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_table() {
        assert_eq!(classify_status(400), ErrorKind::Client);
        assert_eq!(classify_status(401), ErrorKind::Auth);
        assert_eq!(classify_status(402), ErrorKind::Quota);
        assert_eq!(classify_status(403), ErrorKind::Auth);
        assert_eq!(classify_status(404), ErrorKind::Client);
        assert_eq!(classify_status(408), ErrorKind::Transient);
        assert_eq!(classify_status(429), ErrorKind::Quota);
        assert_eq!(classify_status(500), ErrorKind::Transient);
        assert_eq!(classify_status(503), ErrorKind::Transient);
        assert_eq!(classify_status(0), ErrorKind::Transient);
        assert!(!classify_status(400).retryable());
        assert!(classify_status(429).retryable());
    }

    #[test]
    fn retry_after_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", "30".parse().expect("header value"));
        let err = ExecutorError::new(429, "quota").with_headers(headers);
        assert_eq!(err.retry_after_secs(), Some(30));
        assert_eq!(ExecutorError::new(429, "quota").retry_after_secs(), None);
    }

    #[test]
    fn fatal_overrides_status_classification() {
        let err = ExecutorError::fatal("bad chunk");
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(!err.kind().retryable());
    }
}
