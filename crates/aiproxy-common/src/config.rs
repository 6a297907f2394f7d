use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Immutable application configuration snapshot.
///
/// Only the keys the execution pipeline reads are modeled; unknown keys in the
/// file are ignored rather than rejected so older/newer configs keep loading.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory holding one JSON token file per credential.
    #[serde(default = "default_auth_dir")]
    pub auth_dir: String,
    /// Outbound proxy URL applied to every upstream client.
    #[serde(default)]
    pub proxy: Option<String>,
    /// Capture request/response bodies for the request log.
    #[serde(default)]
    pub request_log: bool,
    /// Upper bound on failover attempts per request; 0 means "as many as
    /// there are candidates".
    #[serde(default)]
    pub max_retry_attempts: usize,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub payload: PayloadConfig,
    /// Channel (provider/auth-kind) scoped model aliases.
    #[serde(default, rename = "oauth-model-alias")]
    pub oauth_model_alias: HashMap<String, Vec<ModelAliasEntry>>,
    /// Anthropic API key entries with optional cloaking behavior.
    #[serde(default, rename = "claude-api-key")]
    pub claude_keys: Vec<ClaudeKeyConfig>,
    /// Extra user-defined models registered per provider.
    #[serde(default)]
    pub models: Vec<ModelEntry>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8317
}

fn default_auth_dir() -> String {
    "~/.aiproxy/auths".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, serde_yaml::Error> {
        let text = std::fs::read_to_string(path).unwrap_or_default();
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&text)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StreamingConfig {
    /// How many times a streaming request may be retried before any bytes
    /// have been forwarded to the client.
    #[serde(default, rename = "bootstrap-retries")]
    pub bootstrap_retries: usize,
    /// SSE keep-alive interval in seconds; 0 disables keep-alives.
    #[serde(default, rename = "keep-alive-seconds")]
    pub keep_alive_seconds: u64,
}

/// Payload rewrite rules applied after translation.
///
/// `default` rules fill fields only when absent from the original payload and
/// the first matching rule wins per field; `r#override` rules replace fields
/// unconditionally and the last matching rule wins per field.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PayloadConfig {
    #[serde(default)]
    pub default: Vec<PayloadRule>,
    #[serde(default, rename = "override")]
    pub r#override: Vec<PayloadRule>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PayloadRule {
    #[serde(default)]
    pub models: Vec<PayloadRuleModel>,
    /// Dotted JSON path -> value to write.
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PayloadRuleModel {
    pub name: String,
    /// Restricts the rule to one wire protocol (e.g. "claude", "gemini").
    #[serde(default)]
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ModelAliasEntry {
    /// Upstream model name.
    pub name: String,
    /// Client-visible alias.
    pub alias: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClaudeKeyConfig {
    #[serde(rename = "api-key")]
    pub api_key: String,
    #[serde(default, rename = "base-url")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub cloak: Option<CloakConfig>,
}

/// Claude request mutation used to pass as the first-party CLI.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CloakConfig {
    /// "auto" (cloak unless the client already is the CLI), "always", "off".
    #[serde(default)]
    pub mode: String,
    /// Replace all system text instead of prepending the CLI prelude.
    #[serde(default, rename = "strict-mode")]
    pub strict_mode: bool,
    #[serde(default, rename = "sensitive-words")]
    pub sensitive_words: Vec<String>,
}

/// User-defined model declaration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ModelEntry {
    pub name: String,
    pub provider: String,
    #[serde(default, rename = "display-name")]
    pub display_name: Option<String>,
    #[serde(default, rename = "max-completion-tokens")]
    pub max_completion_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_defaults() {
        let cfg: Config = serde_yaml::from_str("host: 0.0.0.0").expect("config should parse");
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 8317);
        assert_eq!(cfg.streaming.bootstrap_retries, 0);
        assert!(cfg.payload.default.is_empty());
    }

    #[test]
    fn payload_rules_parse() {
        let yaml = r#"
payload:
  default:
    - models:
        - name: "gemini-*"
          protocol: gemini
      params:
        generationConfig.temperature: 0.7
  override:
    - models:
        - name: "*"
      params:
        safetySettings: []
"#;
        let cfg: Config = serde_yaml::from_str(yaml).expect("config should parse");
        assert_eq!(cfg.payload.default.len(), 1);
        assert_eq!(cfg.payload.r#override.len(), 1);
        let rule = &cfg.payload.default[0];
        assert_eq!(rule.models[0].name, "gemini-*");
        assert_eq!(rule.models[0].protocol.as_deref(), Some("gemini"));
        assert!(rule.params.contains_key("generationConfig.temperature"));
    }
}
