use aiproxy_common::json;
use aiproxy_registry::ModelInfo;
use serde_json::{json, Value};

use super::is_user_defined;
use crate::config::{ThinkingConfig, ThinkingMode, LEVEL_NONE};

/// iFlow models only toggle reasoning on or off: GLM via
/// `chat_template_kwargs.enable_thinking`, MiniMax via `reasoning_split`.
pub fn apply(body: &mut Value, config: &ThinkingConfig, model_info: Option<&ModelInfo>) {
    if is_user_defined(model_info) {
        return;
    }
    let Some(info) = model_info else {
        return;
    };
    if info.thinking.is_none() {
        return;
    }
    let id = info.id.to_ascii_lowercase();
    if id.starts_with("glm") {
        let enabled = config_to_boolean(config);
        json::set(body, "chat_template_kwargs.enable_thinking", json!(enabled));
        if enabled {
            // Keep thinking output in the response.
            json::set(body, "chat_template_kwargs.clear_thinking", json!(false));
        }
    } else if id.starts_with("minimax") {
        json::set(body, "reasoning_split", json!(config_to_boolean(config)));
    }
}

/// Qwen models share the GLM toggle field regardless of model family.
pub fn apply_qwen(body: &mut Value, config: &ThinkingConfig, model_info: Option<&ModelInfo>) {
    if is_user_defined(model_info) {
        return;
    }
    if model_info.and_then(|info| info.thinking.as_ref()).is_none() {
        return;
    }
    let enabled = config_to_boolean(config);
    json::set(body, "chat_template_kwargs.enable_thinking", json!(enabled));
}

fn config_to_boolean(config: &ThinkingConfig) -> bool {
    match config.mode {
        ThinkingMode::None => false,
        ThinkingMode::Auto => true,
        ThinkingMode::Budget => config.budget > 0,
        ThinkingMode::Level => config.level != LEVEL_NONE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiproxy_registry::ThinkingSupport;

    fn model(id: &str) -> ModelInfo {
        ModelInfo::new(id, "iflow").with_thinking(ThinkingSupport {
            zero_allowed: true,
            ..ThinkingSupport::default()
        })
    }

    #[test]
    fn glm_toggle() {
        let mut body = json!({});
        apply(&mut body, &ThinkingConfig::budget(1), Some(&model("glm-4.6")));
        assert_eq!(json::get_bool(&body, "chat_template_kwargs.enable_thinking"), Some(true));
        assert_eq!(json::get_bool(&body, "chat_template_kwargs.clear_thinking"), Some(false));

        let mut off = json!({});
        apply(&mut off, &ThinkingConfig::none(), Some(&model("glm-4.6")));
        assert_eq!(json::get_bool(&off, "chat_template_kwargs.enable_thinking"), Some(false));
        assert!(!json::exists(&off, "chat_template_kwargs.clear_thinking"));
    }

    #[test]
    fn minimax_toggle() {
        let mut body = json!({});
        apply(&mut body, &ThinkingConfig::budget(1), Some(&model("minimax-m2")));
        assert_eq!(json::get_bool(&body, "reasoning_split"), Some(true));
    }

    #[test]
    fn qwen_toggle_ignores_model_family() {
        let mut body = json!({});
        apply_qwen(&mut body, &ThinkingConfig::budget(24_576), Some(&model("qwen3-coder-plus")));
        assert_eq!(json::get_bool(&body, "chat_template_kwargs.enable_thinking"), Some(true));

        let mut off = json!({});
        apply_qwen(&mut off, &ThinkingConfig::none(), Some(&model("qwen3-coder-plus")));
        assert_eq!(json::get_bool(&off, "chat_template_kwargs.enable_thinking"), Some(false));
    }
}
