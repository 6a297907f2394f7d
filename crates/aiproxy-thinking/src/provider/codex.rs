use aiproxy_registry::ModelInfo;
use serde_json::Value;

use crate::config::ThinkingConfig;

/// Codex (OpenAI Responses API): same level semantics as Chat Completions but
/// nested at `reasoning.effort`.
pub fn apply(body: &mut Value, config: &ThinkingConfig, model_info: Option<&ModelInfo>) {
    super::openai::apply_at_path(body, config, model_info, "reasoning.effort");
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiproxy_common::json;
    use serde_json::json;

    #[test]
    fn writes_nested_effort() {
        let mut body = json!({"model": "gpt-5-codex"});
        apply(&mut body, &ThinkingConfig::level("medium"), None);
        assert_eq!(json::get_str(&body, "reasoning.effort"), Some("medium"));
    }
}
