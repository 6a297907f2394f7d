use aiproxy_common::json;
use aiproxy_registry::ModelInfo;
use serde_json::{json, Value};

use super::is_user_defined;
use crate::config::{ThinkingConfig, ThinkingMode};

/// Claude wire format: `thinking.type` + `thinking.budget_tokens`.
pub fn apply(body: &mut Value, config: &ThinkingConfig, model_info: Option<&ModelInfo>) {
    if is_user_defined(model_info) {
        apply_compatible(body, config);
        return;
    }
    if model_info.and_then(|info| info.thinking.as_ref()).is_none() {
        return;
    }
    // Validation already converted Level/Auto into Budget for Claude models.
    if !matches!(config.mode, ThinkingMode::Budget | ThinkingMode::None) {
        return;
    }
    if config.budget == 0 {
        json::set(body, "thinking.type", json!("disabled"));
        json::remove(body, "thinking.budget_tokens");
    } else {
        json::set(body, "thinking.type", json!("enabled"));
        json::set(body, "thinking.budget_tokens", json!(config.budget));
    }
}

fn apply_compatible(body: &mut Value, config: &ThinkingConfig) {
    match config.mode {
        ThinkingMode::None => {
            json::set(body, "thinking.type", json!("disabled"));
            json::remove(body, "thinking.budget_tokens");
        }
        ThinkingMode::Auto => {
            json::set(body, "thinking.type", json!("enabled"));
            json::remove(body, "thinking.budget_tokens");
        }
        ThinkingMode::Budget => {
            json::set(body, "thinking.type", json!("enabled"));
            json::set(body, "thinking.budget_tokens", json!(config.budget));
        }
        ThinkingMode::Level => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiproxy_registry::ThinkingSupport;
    use serde_json::json;

    fn model() -> ModelInfo {
        ModelInfo::new("claude-sonnet-4-5", "claude").with_thinking(ThinkingSupport {
            min: 1024,
            max: 32_000,
            zero_allowed: true,
            dynamic_allowed: false,
            levels: Vec::new(),
        })
    }

    #[test]
    fn enables_with_budget() {
        let mut body = json!({"model": "claude-sonnet-4-5"});
        apply(&mut body, &ThinkingConfig::budget(16_384), Some(&model()));
        assert_eq!(
            body["thinking"],
            json!({"type": "enabled", "budget_tokens": 16_384})
        );
    }

    #[test]
    fn disables_and_drops_budget() {
        let mut body = json!({"thinking": {"type": "enabled", "budget_tokens": 512}});
        apply(&mut body, &ThinkingConfig::none(), Some(&model()));
        assert_eq!(body["thinking"], json!({"type": "disabled"}));
    }
}
