use aiproxy_common::json;
use serde_json::Value;

use crate::config::{ThinkingConfig, LEVEL_AUTO, LEVEL_NONE};

/// Extracts the reasoning configuration from a request body in the given
/// provider's wire format. Returns an unset config when nothing is present.
pub fn extract_thinking_config(body: &Value, provider: &str) -> ThinkingConfig {
    match provider {
        "claude" => extract_claude(body),
        "gemini" => extract_gemini(body, ""),
        "gemini-cli" | "antigravity" => extract_gemini(body, "request."),
        "openai" => extract_effort(body, "reasoning_effort"),
        "codex" => extract_effort(body, "reasoning.effort"),
        "iflow" => extract_iflow(body),
        _ => ThinkingConfig::default(),
    }
}

/// Claude: `thinking.type` ("enabled"/"disabled") and `thinking.budget_tokens`.
/// `type="disabled"` wins; `type="enabled"` without a budget means auto.
fn extract_claude(body: &Value) -> ThinkingConfig {
    let thinking_type = json::get_str(body, "thinking.type").unwrap_or_default();
    if thinking_type == "disabled" {
        return ThinkingConfig::none();
    }
    if let Some(budget) = json::get_i64(body, "thinking.budget_tokens") {
        return match budget {
            0 => ThinkingConfig::none(),
            -1 => ThinkingConfig::auto(),
            other => ThinkingConfig::budget(other),
        };
    }
    if thinking_type == "enabled" {
        return ThinkingConfig::auto();
    }
    ThinkingConfig::default()
}

/// Gemini: `generationConfig.thinkingConfig.thinkingLevel` (Gemini 3) checked
/// before `thinkingBudget` (Gemini 2.5). CLI/Antigravity envelopes prefix the
/// path with `request.`.
fn extract_gemini(body: &Value, prefix: &str) -> ThinkingConfig {
    let base = format!("{prefix}generationConfig.thinkingConfig");
    if let Some(level) = json::get_str(body, &format!("{base}.thinkingLevel")) {
        return match level {
            LEVEL_NONE => ThinkingConfig::none(),
            LEVEL_AUTO => ThinkingConfig::auto(),
            other => ThinkingConfig::level(other),
        };
    }
    if let Some(budget) = json::get_i64(body, &format!("{base}.thinkingBudget")) {
        return match budget {
            0 => ThinkingConfig::none(),
            -1 => ThinkingConfig::auto(),
            other => ThinkingConfig::budget(other),
        };
    }
    ThinkingConfig::default()
}

fn extract_effort(body: &Value, path: &str) -> ThinkingConfig {
    match json::get_str(body, path) {
        Some(LEVEL_NONE) => ThinkingConfig::none(),
        Some(level) => ThinkingConfig::level(level),
        None => ThinkingConfig::default(),
    }
}

/// iFlow: boolean toggles only. Budget 1 is the "enabled" sentinel; the
/// applier turns it back into the model family's toggle field.
fn extract_iflow(body: &Value) -> ThinkingConfig {
    if let Some(enabled) = json::get_bool(body, "chat_template_kwargs.enable_thinking") {
        return if enabled {
            ThinkingConfig::budget(1)
        } else {
            ThinkingConfig::none()
        };
    }
    if let Some(split) = json::get_bool(body, "reasoning_split") {
        return if split {
            ThinkingConfig::budget(1)
        } else {
            ThinkingConfig::none()
        };
    }
    ThinkingConfig::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThinkingMode;
    use serde_json::json;

    #[test]
    fn claude_disabled_beats_budget() {
        let body = json!({"thinking": {"type": "disabled", "budget_tokens": 4096}});
        assert_eq!(extract_thinking_config(&body, "claude"), ThinkingConfig::none());
    }

    #[test]
    fn claude_enabled_without_budget_is_auto() {
        let body = json!({"thinking": {"type": "enabled"}});
        assert_eq!(extract_thinking_config(&body, "claude"), ThinkingConfig::auto());
    }

    #[test]
    fn gemini_level_beats_budget() {
        let body = json!({"generationConfig": {"thinkingConfig": {
            "thinkingLevel": "high", "thinkingBudget": 128
        }}});
        let config = extract_thinking_config(&body, "gemini");
        assert_eq!(config.mode, ThinkingMode::Level);
        assert_eq!(config.level, "high");
    }

    #[test]
    fn gemini_cli_uses_request_prefix() {
        let body = json!({"request": {"generationConfig": {"thinkingConfig": {
            "thinkingBudget": 2048
        }}}});
        assert_eq!(
            extract_thinking_config(&body, "gemini-cli"),
            ThinkingConfig::budget(2048)
        );
        assert!(!extract_thinking_config(&body, "gemini").is_set());
    }

    #[test]
    fn openai_and_codex_paths() {
        let chat = json!({"reasoning_effort": "low"});
        assert_eq!(extract_thinking_config(&chat, "openai"), ThinkingConfig::level("low"));
        let responses = json!({"reasoning": {"effort": "none"}});
        assert_eq!(extract_thinking_config(&responses, "codex"), ThinkingConfig::none());
    }

    #[test]
    fn iflow_toggles() {
        let glm = json!({"chat_template_kwargs": {"enable_thinking": true}});
        assert_eq!(extract_thinking_config(&glm, "iflow"), ThinkingConfig::budget(1));
        let minimax = json!({"reasoning_split": false});
        assert_eq!(extract_thinking_config(&minimax, "iflow"), ThinkingConfig::none());
    }
}
