use aiproxy_common::json;
use serde_json::Value;

/// Removes thinking configuration fields from a request body.
///
/// Used when a model has no thinking capability but the request still carries
/// configuration; silently dropping it prevents upstream rejections.
pub fn strip_thinking_config(body: &mut Value, provider: &str) {
    match provider {
        "claude" => {
            json::remove(body, "thinking");
        }
        "gemini" => {
            json::remove(body, "generationConfig.thinkingConfig");
        }
        "gemini-cli" | "antigravity" => {
            json::remove(body, "request.generationConfig.thinkingConfig");
        }
        "openai" => {
            json::remove(body, "reasoning_effort");
        }
        "codex" => {
            json::remove(body, "reasoning.effort");
        }
        "iflow" => {
            json::remove(body, "chat_template_kwargs.enable_thinking");
            json::remove(body, "chat_template_kwargs.clear_thinking");
            json::remove(body, "reasoning_split");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_provider_specific_fields() {
        let mut claude = json!({"thinking": {"type": "enabled"}, "model": "m"});
        strip_thinking_config(&mut claude, "claude");
        assert_eq!(claude, json!({"model": "m"}));

        let mut gemini = json!({"generationConfig": {"thinkingConfig": {"thinkingBudget": 1}, "temperature": 0.5}});
        strip_thinking_config(&mut gemini, "gemini");
        assert_eq!(gemini, json!({"generationConfig": {"temperature": 0.5}}));

        let mut iflow = json!({"chat_template_kwargs": {"enable_thinking": true}, "reasoning_split": true});
        strip_thinking_config(&mut iflow, "iflow");
        assert_eq!(iflow, json!({"chat_template_kwargs": {}}));
    }
}
