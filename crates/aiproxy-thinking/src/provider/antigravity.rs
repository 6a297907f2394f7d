use aiproxy_common::json;
use aiproxy_registry::ModelInfo;
use serde_json::{json, Value};

use super::gemini::{apply_budget_format, apply_level_format};
use super::is_user_defined;
use crate::config::{ThinkingConfig, ThinkingMode};

const PREFIX: &str = "request.";

/// Antigravity rides the Gemini CLI envelope but adds Claude-submodel
/// constraints: the thinking budget must stay below `maxOutputTokens`, and a
/// budget under the model minimum drops `thinkingConfig` entirely.
pub fn apply(body: &mut Value, config: &ThinkingConfig, model_info: Option<&ModelInfo>) {
    if is_user_defined(model_info) {
        apply_compatible(body, config, model_info);
        return;
    }
    let Some(info) = model_info else {
        return;
    };
    let Some(support) = info.thinking.as_ref() else {
        return;
    };

    let is_claude = info.id.to_ascii_lowercase().contains("claude");
    if matches!(config.mode, ThinkingMode::Auto | ThinkingMode::Budget) {
        apply_budget_with_claude_constraints(body, config, model_info, is_claude);
        return;
    }
    if support.has_levels() {
        apply_level_format(body, config, PREFIX);
    } else {
        apply_budget_with_claude_constraints(body, config, model_info, is_claude);
    }
}

fn apply_compatible(body: &mut Value, config: &ThinkingConfig, model_info: Option<&ModelInfo>) {
    let is_claude = model_info
        .map(|info| info.id.to_ascii_lowercase().contains("claude"))
        .unwrap_or(false);
    if config.mode == ThinkingMode::Auto {
        apply_budget_with_claude_constraints(body, config, model_info, is_claude);
        return;
    }
    if config.mode == ThinkingMode::Level
        || (config.mode == ThinkingMode::None && !config.level.is_empty())
    {
        apply_level_format(body, config, PREFIX);
        return;
    }
    apply_budget_with_claude_constraints(body, config, model_info, is_claude);
}

fn apply_budget_with_claude_constraints(
    body: &mut Value,
    config: &ThinkingConfig,
    model_info: Option<&ModelInfo>,
    is_claude: bool,
) {
    if !is_claude {
        apply_budget_format(body, config, PREFIX);
        return;
    }

    let mut budget = config.budget;
    let (effective_max, from_model) = effective_max_tokens(body, model_info);
    if effective_max > 0 && budget >= effective_max {
        budget = effective_max - 1;
    }

    let min_budget = model_info
        .and_then(|info| info.thinking.as_ref())
        .map(|support| support.min)
        .unwrap_or(0);
    if min_budget > 0 && budget >= 0 && budget < min_budget {
        json::remove(body, "request.generationConfig.thinkingConfig");
        return;
    }

    if from_model && effective_max > 0 {
        json::set(
            body,
            "request.generationConfig.maxOutputTokens",
            json!(effective_max),
        );
    }

    let capped = ThinkingConfig {
        mode: config.mode,
        budget,
        level: config.level.clone(),
    };
    apply_budget_format(body, &capped, PREFIX);
}

/// Max tokens to cap thinking against: the request's `maxOutputTokens` when
/// present, otherwise the model default (which is then written back).
fn effective_max_tokens(body: &Value, model_info: Option<&ModelInfo>) -> (i64, bool) {
    if let Some(max) = json::get_i64(body, "request.generationConfig.maxOutputTokens") {
        if max > 0 {
            return (max, false);
        }
    }
    if let Some(info) = model_info {
        if info.max_completion_tokens > 0 {
            return (i64::from(info.max_completion_tokens), true);
        }
    }
    (0, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiproxy_registry::ThinkingSupport;

    fn claude_model() -> ModelInfo {
        ModelInfo::new("gemini-claude-sonnet-4-5-thinking", "antigravity")
            .with_max_completion_tokens(64_000)
            .with_thinking(ThinkingSupport {
                min: 1024,
                max: 16_000,
                zero_allowed: false,
                dynamic_allowed: false,
                levels: Vec::new(),
            })
    }

    fn gemini3_model() -> ModelInfo {
        ModelInfo::new("gemini-3-pro-preview", "antigravity")
            .with_max_completion_tokens(65_536)
            .with_thinking(ThinkingSupport {
                min: 0,
                max: 0,
                zero_allowed: false,
                dynamic_allowed: true,
                levels: vec!["low".into(), "high".into()],
            })
    }

    #[test]
    fn claude_budget_capped_below_max_output_tokens() {
        let mut body = json!({"request": {"generationConfig": {"maxOutputTokens": 4000}}});
        apply(&mut body, &ThinkingConfig::budget(5000), Some(&claude_model()));
        assert_eq!(
            json::get_i64(&body, "request.generationConfig.thinkingConfig.thinkingBudget"),
            Some(3999)
        );
        // maxOutputTokens came from the request; it is not rewritten.
        assert_eq!(
            json::get_i64(&body, "request.generationConfig.maxOutputTokens"),
            Some(4000)
        );
    }

    #[test]
    fn claude_absent_max_output_tokens_filled_from_model_default() {
        let mut body = json!({"request": {}});
        apply(&mut body, &ThinkingConfig::budget(100_000), Some(&claude_model()));
        assert_eq!(
            json::get_i64(&body, "request.generationConfig.maxOutputTokens"),
            Some(64_000)
        );
        assert_eq!(
            json::get_i64(&body, "request.generationConfig.thinkingConfig.thinkingBudget"),
            Some(63_999)
        );
    }

    #[test]
    fn claude_budget_below_min_drops_thinking_config() {
        let mut body = json!({"request": {"generationConfig": {
            "maxOutputTokens": 1000,
            "thinkingConfig": {"thinkingBudget": 999}
        }}});
        apply(&mut body, &ThinkingConfig::budget(999), Some(&claude_model()));
        assert!(!json::exists(&body, "request.generationConfig.thinkingConfig"));
    }

    #[test]
    fn gemini3_gets_level_not_budget() {
        let mut body = json!({"request": {}});
        apply(&mut body, &ThinkingConfig::level("high"), Some(&gemini3_model()));
        assert_eq!(
            json::get_str(&body, "request.generationConfig.thinkingConfig.thinkingLevel"),
            Some("high")
        );
        assert!(!json::exists(
            &body,
            "request.generationConfig.thinkingConfig.thinkingBudget"
        ));
    }
}
