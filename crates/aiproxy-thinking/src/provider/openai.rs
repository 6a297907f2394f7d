use aiproxy_common::json;
use aiproxy_registry::ModelInfo;
use serde_json::{json, Value};

use super::is_user_defined;
use crate::config::{convert_budget_to_level, ThinkingConfig, ThinkingMode, LEVEL_AUTO, LEVEL_NONE};

/// OpenAI Chat Completions: discrete `reasoning_effort` levels only.
pub fn apply(body: &mut Value, config: &ThinkingConfig, model_info: Option<&ModelInfo>) {
    apply_at_path(body, config, model_info, "reasoning_effort");
}

pub(crate) fn apply_at_path(
    body: &mut Value,
    config: &ThinkingConfig,
    model_info: Option<&ModelInfo>,
    path: &str,
) {
    if is_user_defined(model_info) {
        apply_compatible(body, config, path);
        return;
    }
    let Some(support) = model_info.and_then(|info| info.thinking.as_ref()) else {
        return;
    };
    if !matches!(config.mode, ThinkingMode::Level | ThinkingMode::None) {
        return;
    }

    if config.mode == ThinkingMode::Level {
        json::set(body, path, json!(config.level));
        return;
    }

    let mut effort = "";
    if config.budget == 0 && (support.zero_allowed || support.supports_level(LEVEL_NONE)) {
        effort = LEVEL_NONE;
    }
    if effort.is_empty() && !config.level.is_empty() {
        json::set(body, path, json!(config.level));
        return;
    }
    if effort.is_empty() {
        if let Some(first) = support.levels.first() {
            json::set(body, path, json!(first));
        }
        return;
    }
    json::set(body, path, json!(effort));
}

fn apply_compatible(body: &mut Value, config: &ThinkingConfig, path: &str) {
    let effort = match config.mode {
        ThinkingMode::Level => {
            if config.level.is_empty() {
                return;
            }
            config.level.clone()
        }
        ThinkingMode::None => {
            if config.level.is_empty() {
                LEVEL_NONE.to_string()
            } else {
                config.level.clone()
            }
        }
        ThinkingMode::Auto => LEVEL_AUTO.to_string(),
        ThinkingMode::Budget => match convert_budget_to_level(config.budget) {
            Some(level) => level.to_string(),
            None => return,
        },
    };
    json::set(body, path, json!(effort));
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiproxy_registry::ThinkingSupport;

    fn gpt5() -> ModelInfo {
        ModelInfo::new("gpt-5", "codex").with_thinking(ThinkingSupport {
            min: 0,
            max: 0,
            zero_allowed: false,
            dynamic_allowed: false,
            levels: vec![
                "minimal".into(),
                "low".into(),
                "medium".into(),
                "high".into(),
                "xhigh".into(),
            ],
        })
    }

    #[test]
    fn writes_level() {
        let mut body = json!({"model": "gpt-5"});
        apply(&mut body, &ThinkingConfig::level("high"), Some(&gpt5()));
        assert_eq!(json::get_str(&body, "reasoning_effort"), Some("high"));
    }

    #[test]
    fn none_without_zero_support_falls_back_to_lowest_level() {
        let mut body = json!({});
        apply(&mut body, &ThinkingConfig::none(), Some(&gpt5()));
        assert_eq!(json::get_str(&body, "reasoning_effort"), Some("minimal"));
    }

    #[test]
    fn user_defined_budget_converts_to_level() {
        let mut body = json!({});
        apply(&mut body, &ThinkingConfig::budget(10_000), None);
        assert_eq!(json::get_str(&body, "reasoning_effort"), Some("high"));
    }
}
