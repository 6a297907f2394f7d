use aiproxy_common::json;
use aiproxy_registry::ModelInfo;
use serde_json::{json, Value};

use super::is_user_defined;
use crate::config::{ThinkingConfig, ThinkingMode};

/// Gemini wire format: `generationConfig.thinkingConfig.{thinkingBudget,
/// thinkingLevel, includeThoughts}`. The CLI envelope nests everything under
/// `request.`, passed in as `prefix`.
pub fn apply(body: &mut Value, config: &ThinkingConfig, model_info: Option<&ModelInfo>, prefix: &str) {
    if is_user_defined(model_info) {
        apply_compatible(body, config, prefix);
        return;
    }
    let Some(support) = model_info.and_then(|info| info.thinking.as_ref()) else {
        return;
    };
    // Auto always rides the budget field with the -1 sentinel.
    if matches!(config.mode, ThinkingMode::Auto | ThinkingMode::Budget) {
        apply_budget_format(body, config, prefix);
        return;
    }
    if support.has_levels() {
        apply_level_format(body, config, prefix);
    } else {
        apply_budget_format(body, config, prefix);
    }
}

fn apply_compatible(body: &mut Value, config: &ThinkingConfig, prefix: &str) {
    if config.mode == ThinkingMode::Auto {
        apply_budget_format(body, config, prefix);
        return;
    }
    if config.mode == ThinkingMode::Level
        || (config.mode == ThinkingMode::None && !config.level.is_empty())
    {
        apply_level_format(body, config, prefix);
        return;
    }
    apply_budget_format(body, config, prefix);
}

pub(crate) fn apply_level_format(body: &mut Value, config: &ThinkingConfig, prefix: &str) {
    let base = format!("{prefix}generationConfig.thinkingConfig");
    // Only one of thinkingLevel/thinkingBudget may be present, and the
    // snake_case includeThoughts variant trips the upstream oneof parser.
    json::remove(body, &format!("{base}.thinkingBudget"));
    json::remove(body, &format!("{base}.include_thoughts"));

    if config.mode == ThinkingMode::None {
        json::set(body, &format!("{base}.includeThoughts"), json!(false));
        if !config.level.is_empty() {
            json::set(body, &format!("{base}.thinkingLevel"), json!(config.level));
        }
        return;
    }
    if config.mode != ThinkingMode::Level {
        return;
    }
    json::set(body, &format!("{base}.thinkingLevel"), json!(config.level));
    json::set(body, &format!("{base}.includeThoughts"), json!(true));
}

pub(crate) fn apply_budget_format(body: &mut Value, config: &ThinkingConfig, prefix: &str) {
    let base = format!("{prefix}generationConfig.thinkingConfig");
    json::remove(body, &format!("{base}.thinkingLevel"));
    json::remove(body, &format!("{base}.include_thoughts"));

    let include_thoughts = match config.mode {
        ThinkingMode::None => false,
        ThinkingMode::Auto => true,
        _ => config.budget > 0,
    };
    json::set(body, &format!("{base}.thinkingBudget"), json!(config.budget));
    json::set(body, &format!("{base}.includeThoughts"), json!(include_thoughts));
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiproxy_registry::ThinkingSupport;

    fn budget_model() -> ModelInfo {
        ModelInfo::new("gemini-2.5-pro", "gemini").with_thinking(ThinkingSupport {
            min: 128,
            max: 32_768,
            zero_allowed: false,
            dynamic_allowed: true,
            levels: Vec::new(),
        })
    }

    fn level_model() -> ModelInfo {
        ModelInfo::new("gemini-3-pro-preview", "gemini").with_thinking(ThinkingSupport {
            min: 0,
            max: 0,
            zero_allowed: false,
            dynamic_allowed: true,
            levels: vec!["low".into(), "high".into()],
        })
    }

    #[test]
    fn budget_format_deletes_conflicting_level() {
        let mut body = json!({"generationConfig": {"thinkingConfig": {"thinkingLevel": "high"}}});
        apply(&mut body, &ThinkingConfig::budget(2048), Some(&budget_model()), "");
        let config = &body["generationConfig"]["thinkingConfig"];
        assert_eq!(config["thinkingBudget"], json!(2048));
        assert_eq!(config["includeThoughts"], json!(true));
        assert!(config.get("thinkingLevel").is_none());
    }

    #[test]
    fn level_format_deletes_conflicting_budget() {
        let mut body = json!({"request": {"generationConfig": {"thinkingConfig": {"thinkingBudget": 1}}}});
        apply(&mut body, &ThinkingConfig::level("high"), Some(&level_model()), "request.");
        let config = &body["request"]["generationConfig"]["thinkingConfig"];
        assert_eq!(config["thinkingLevel"], json!("high"));
        assert_eq!(config["includeThoughts"], json!(true));
        assert!(config.get("thinkingBudget").is_none());
    }

    #[test]
    fn auto_uses_dynamic_budget() {
        let mut body = json!({});
        apply(&mut body, &ThinkingConfig::auto(), Some(&budget_model()), "");
        let config = &body["generationConfig"]["thinkingConfig"];
        assert_eq!(config["thinkingBudget"], json!(-1));
        assert_eq!(config["includeThoughts"], json!(true));
    }

    #[test]
    fn none_disables_thoughts() {
        let mut body = json!({});
        apply(&mut body, &ThinkingConfig::none(), Some(&budget_model()), "");
        let config = &body["generationConfig"]["thinkingConfig"];
        assert_eq!(config["thinkingBudget"], json!(0));
        assert_eq!(config["includeThoughts"], json!(false));
    }
}
