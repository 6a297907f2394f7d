use aiproxy_registry::ModelInfo;
use serde_json::Value;

use crate::config::ThinkingConfig;
use crate::error::ThinkingError;
use crate::extract::extract_thinking_config;
use crate::provider;
use crate::strip::strip_thinking_config;
use crate::suffix::{parse_suffix, suffix_to_config};
use crate::validate::validate_config;

/// Applies thinking configuration to a request body already translated into
/// `provider`'s wire format.
///
/// `model` may still carry its suffix; a suffix always wins over body fields.
/// `model_info` is the registry entry for the base model; `None` (unknown
/// model) is treated as user-defined: the config is applied without
/// validation and the upstream gets to reject it.
///
/// On a validation error the body is left untouched so callers that ignore
/// the error still forward a coherent payload.
pub fn apply_thinking(
    body: &mut Value,
    model: &str,
    provider: &str,
    model_info: Option<&ModelInfo>,
) -> Result<(), ThinkingError> {
    let suffix = parse_suffix(model);

    if model_info.map(|info| info.user_defined).unwrap_or(true) {
        let config = config_from(&suffix.raw_suffix, body, provider);
        if !config.is_set() {
            tracing::debug!(model, provider, "thinking: user-defined model, passthrough");
            return Ok(());
        }
        tracing::debug!(model, provider, ?config, "thinking: applying without validation for user-defined model");
        provider::apply(body, &config, model_info, provider);
        return Ok(());
    }

    let info = model_info.expect("checked above");
    if info.thinking.is_none() {
        let config = extract_thinking_config(body, provider);
        if config.is_set() {
            tracing::debug!(model = %info.id, provider, "thinking: model does not support thinking, stripping config");
            strip_thinking_config(body, provider);
        }
        return Ok(());
    }

    let config = config_from(&suffix.raw_suffix, body, provider);
    if !config.is_set() {
        return Ok(());
    }

    let validated = validate_config(&config, model_info, provider).map_err(|err| {
        tracing::warn!(model = %info.id, provider, error = %err, "thinking: validation failed");
        err
    })?;
    tracing::debug!(model = %info.id, provider, ?validated, "thinking: applying validated config");
    provider::apply(body, &validated, model_info, provider);
    Ok(())
}

fn config_from(raw_suffix: &Option<String>, body: &Value, provider: &str) -> ThinkingConfig {
    match raw_suffix {
        Some(raw) => suffix_to_config(raw),
        None => extract_thinking_config(body, provider),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiproxy_common::json;
    use aiproxy_registry::ThinkingSupport;
    use serde_json::json;

    fn claude_model() -> ModelInfo {
        ModelInfo::new("claude-sonnet-4-5", "claude").with_thinking(ThinkingSupport {
            min: 1024,
            max: 32_000,
            zero_allowed: true,
            dynamic_allowed: false,
            levels: Vec::new(),
        })
    }

    #[test]
    fn suffix_beats_body_config() {
        let mut body = json!({"thinking": {"type": "enabled", "budget_tokens": 2048}});
        apply_thinking(
            &mut body,
            "claude-sonnet-4-5(16384)",
            "claude",
            Some(&claude_model()),
        )
        .expect("apply");
        assert_eq!(json::get_i64(&body, "thinking.budget_tokens"), Some(16_384));
    }

    #[test]
    fn strips_config_for_non_thinking_model() {
        let model = ModelInfo::new("claude-3-5-haiku", "claude");
        let mut body = json!({"thinking": {"type": "enabled"}, "max_tokens": 512});
        apply_thinking(&mut body, "claude-3-5-haiku", "claude", Some(&model)).expect("apply");
        assert!(!json::exists(&body, "thinking"));
        assert_eq!(json::get_i64(&body, "max_tokens"), Some(512));
    }

    #[test]
    fn validation_error_leaves_body_untouched() {
        let model = ModelInfo::new("gpt-5", "codex").with_thinking(ThinkingSupport {
            levels: vec!["low".into(), "high".into()],
            ..ThinkingSupport::default()
        });
        let mut body = json!({"reasoning_effort": "galactic"});
        let err = apply_thinking(&mut body, "gpt-5", "openai", Some(&model))
            .expect_err("unknown level must fail");
        assert_eq!(err.status_code(), 400);
        assert_eq!(json::get_str(&body, "reasoning_effort"), Some("galactic"));
    }

    #[test]
    fn unknown_model_applies_without_validation() {
        let mut body = json!({});
        apply_thinking(&mut body, "custom-model(2048)", "claude", None).expect("apply");
        assert_eq!(json::get_i64(&body, "thinking.budget_tokens"), Some(2048));
    }
}
