use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Credential lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    #[default]
    Active,
    Disabled,
    Pending,
    Error,
}

/// Volatile per-(auth, model) availability state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelState {
    /// True when quota or an auth error marks this pair unusable.
    pub unavailable: bool,
    /// Pair is skipped by selection until this instant.
    pub next_retry_after: Option<OffsetDateTime>,
    pub quota: QuotaState,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuotaState {
    pub exceeded: bool,
    pub reset_at: Option<OffsetDateTime>,
}

impl ModelState {
    /// Whether selection may hand this pair out at `now`.
    pub fn available(&self, now: OffsetDateTime) -> bool {
        match self.next_retry_after {
            Some(until) => until <= now,
            None => !self.unavailable,
        }
    }
}

/// A credential record. Owned by the [`crate::Manager`]; everything handed to
/// selectors and executors is a snapshot clone, mutation goes through the
/// manager.
#[derive(Debug, Clone, Default)]
pub struct Auth {
    pub id: String,
    /// Upstream family tag (`claude`, `gemini-cli`, `antigravity`, …).
    pub provider: String,
    pub status: AuthStatus,
    pub disabled: bool,
    pub label: String,
    /// Token-file payload, round-tripped verbatim. Well-known keys:
    /// `type`, `access_token`, `refresh_token`, `expired`, `email`,
    /// `project_id`, `label`, `disabled`.
    pub metadata: Map<String, Value>,
    /// User-visible labels plus execution hints (`auth_kind`, `priority`,
    /// `api_key`, `base_url`, cloak settings, path on disk).
    pub attributes: HashMap<String, String>,
    /// Volatile availability per model id.
    pub model_states: HashMap<String, ModelState>,
    pub created_at: Option<OffsetDateTime>,
    pub updated_at: Option<OffsetDateTime>,
    pub last_refresh: Option<OffsetDateTime>,
    pub next_refresh_after: Option<OffsetDateTime>,
    /// Consecutive auth failures; scales the cooldown window.
    pub auth_error_streak: u32,
    /// Consecutive refresh failures; scales the refresh backoff.
    pub refresh_error_streak: u32,
    /// Freshest upstream error observed on this credential.
    pub last_error: Option<(u16, String, OffsetDateTime)>,
}

impl Auth {
    pub fn new(id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            ..Self::default()
        }
    }

    /// Selection priority, higher first. Read from the `priority` attribute.
    pub fn priority(&self) -> i64 {
        self.attributes
            .get("priority")
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn runnable(&self) -> bool {
        self.status == AuthStatus::Active && !self.disabled
    }

    pub fn model_available(&self, model: &str, now: OffsetDateTime) -> bool {
        self.model_states
            .get(model)
            .map(|state| state.available(now))
            .unwrap_or(true)
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// `oauth` or `apikey`, from attributes with an api_key fallback.
    pub fn auth_kind(&self) -> &str {
        if let Some(kind) = self.attributes.get("auth_kind") {
            return kind;
        }
        if self.attributes.contains_key("api_key") {
            "apikey"
        } else {
            "oauth"
        }
    }

    /// Access credential for outbound calls: an explicit API key attribute
    /// wins over the OAuth access token.
    pub fn access_credential(&self) -> Option<String> {
        if let Some(key) = self.attributes.get("api_key") {
            if !key.trim().is_empty() {
                return Some(key.clone());
            }
        }
        self.metadata_str("access_token")
            .filter(|token| !token.trim().is_empty())
            .map(str::to_string)
    }

    /// Token expiry parsed from the `expired` RFC 3339 metadata key.
    pub fn token_expiry(&self) -> Option<OffsetDateTime> {
        let raw = self.metadata_str("expired")?;
        OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn model_availability_follows_retry_deadline() {
        let now = OffsetDateTime::now_utc();
        let mut auth = Auth::new("a", "gemini");
        assert!(auth.model_available("m", now));

        auth.model_states.insert(
            "m".to_string(),
            ModelState {
                unavailable: true,
                next_retry_after: Some(now + Duration::minutes(30)),
                quota: QuotaState {
                    exceeded: true,
                    reset_at: Some(now + Duration::minutes(30)),
                },
            },
        );
        assert!(!auth.model_available("m", now));
        assert!(auth.model_available("m", now + Duration::minutes(31)));
        assert!(auth.model_available("other", now));
    }

    #[test]
    fn auth_kind_and_access_credential() {
        let mut auth = Auth::new("a", "claude");
        auth.metadata
            .insert("access_token".to_string(), Value::String("sk-ant-oat-xyz".into()));
        assert_eq!(auth.auth_kind(), "oauth");
        assert_eq!(auth.access_credential().as_deref(), Some("sk-ant-oat-xyz"));

        auth.attributes.insert("api_key".to_string(), "sk-key".to_string());
        assert_eq!(auth.auth_kind(), "apikey");
        assert_eq!(auth.access_credential().as_deref(), Some("sk-key"));
    }

    #[test]
    fn priority_defaults_to_zero() {
        let mut auth = Auth::new("a", "claude");
        assert_eq!(auth.priority(), 0);
        auth.attributes.insert("priority".to_string(), "10".to_string());
        assert_eq!(auth.priority(), 10);
    }
}
