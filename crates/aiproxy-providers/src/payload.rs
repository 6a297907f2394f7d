use aiproxy_common::{json, match_model_pattern, Config, PayloadRule};
use serde_json::Value;

/// Applies configured payload rewrites to a translated request body.
///
/// Default rules only fill fields absent from the original payload and the
/// first matching rule wins per field; override rules write unconditionally
/// and the last matching rule wins. Rules match on (model glob, optional
/// protocol); `root` prefixes every parameter path (the Gemini CLI envelope
/// passes `request`).
pub fn apply_payload_config(
    config: &Config,
    model: &str,
    protocol: &str,
    root: &str,
    payload: &mut Value,
    original: &Value,
) {
    let model = model.trim();
    if model.is_empty() {
        return;
    }
    let rules = &config.payload;
    if rules.default.is_empty() && rules.r#override.is_empty() {
        return;
    }
    let candidates = model_candidates(config, model, protocol);

    let mut applied_defaults: Vec<String> = Vec::new();
    for rule in &rules.default {
        if !rule_matches(rule, protocol, &candidates) {
            continue;
        }
        for (path, value) in &rule.params {
            let full_path = build_path(root, path);
            if full_path.is_empty() {
                continue;
            }
            if json::exists(original, &full_path) {
                continue;
            }
            if applied_defaults.iter().any(|p| p == &full_path) {
                continue;
            }
            json::set(payload, &full_path, value.clone());
            applied_defaults.push(full_path);
        }
    }
    for rule in &rules.r#override {
        if !rule_matches(rule, protocol, &candidates) {
            continue;
        }
        for (path, value) in &rule.params {
            let full_path = build_path(root, path);
            if full_path.is_empty() {
                continue;
            }
            json::set(payload, &full_path, value.clone());
        }
    }
}

fn rule_matches(rule: &PayloadRule, protocol: &str, candidates: &[String]) -> bool {
    for entry in &rule.models {
        let name = entry.name.trim();
        if name.is_empty() {
            continue;
        }
        if let Some(entry_protocol) = &entry.protocol {
            if !protocol.is_empty() && !entry_protocol.trim().eq_ignore_ascii_case(protocol) {
                continue;
            }
        }
        if candidates
            .iter()
            .any(|candidate| match_model_pattern(name, candidate))
        {
            return true;
        }
    }
    false
}

/// The model itself plus any channel aliases pointing at it, so rules keyed
/// by either name apply.
fn model_candidates(config: &Config, model: &str, protocol: &str) -> Vec<String> {
    let mut candidates = vec![model.to_string()];
    let channel = protocol.trim().to_ascii_lowercase();
    if channel.is_empty() {
        return candidates;
    }
    if let Some(entries) = config.oauth_model_alias.get(&channel) {
        for entry in entries {
            if entry.name.trim().eq_ignore_ascii_case(model) {
                let alias = entry.alias.trim();
                if !alias.is_empty()
                    && !candidates.iter().any(|c| c.eq_ignore_ascii_case(alias))
                {
                    candidates.push(alias.to_string());
                }
            }
        }
    }
    candidates
}

fn build_path(root: &str, path: &str) -> String {
    let root = root.trim();
    let path = path.trim().trim_start_matches('.');
    if root.is_empty() {
        return path.to_string();
    }
    if path.is_empty() {
        return root.to_string();
    }
    format!("{root}.{path}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiproxy_common::{PayloadConfig, PayloadRuleModel};
    use serde_json::json;
    use std::collections::HashMap;

    fn config_with(default: Vec<PayloadRule>, r#override: Vec<PayloadRule>) -> Config {
        Config {
            payload: PayloadConfig { default, r#override },
            ..Config::default()
        }
    }

    fn rule(pattern: &str, protocol: Option<&str>, params: &[(&str, Value)]) -> PayloadRule {
        PayloadRule {
            models: vec![PayloadRuleModel {
                name: pattern.to_string(),
                protocol: protocol.map(str::to_string),
            }],
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn defaults_fill_only_absent_fields_first_match_wins() {
        let config = config_with(
            vec![
                rule("gemini-*", None, &[("generationConfig.temperature", json!(0.7))]),
                rule("gemini-2.5-pro", None, &[("generationConfig.temperature", json!(0.1))]),
            ],
            vec![],
        );
        // Field absent in the original: first matching default applies.
        let original = json!({});
        let mut payload = json!({});
        apply_payload_config(&config, "gemini-2.5-pro", "gemini", "", &mut payload, &original);
        assert_eq!(json::get_f64(&payload, "generationConfig.temperature"), Some(0.7));

        // Field present in the original: defaults leave it alone.
        let original = json!({"generationConfig": {"temperature": 0.3}});
        let mut payload = original.clone();
        apply_payload_config(&config, "gemini-2.5-pro", "gemini", "", &mut payload, &original);
        assert_eq!(json::get_f64(&payload, "generationConfig.temperature"), Some(0.3));
    }

    #[test]
    fn overrides_replace_unconditionally_last_match_wins() {
        let config = config_with(
            vec![],
            vec![
                rule("*", None, &[("temperature", json!(0.5))]),
                rule("claude-*", None, &[("temperature", json!(1.0))]),
            ],
        );
        let original = json!({"temperature": 0.2});
        let mut payload = original.clone();
        apply_payload_config(&config, "claude-sonnet-4-5", "claude", "", &mut payload, &original);
        assert_eq!(json::get_f64(&payload, "temperature"), Some(1.0));
    }

    #[test]
    fn protocol_scoping_and_root_prefix() {
        let config = config_with(
            vec![rule("*", Some("gemini"), &[("generationConfig.topK", json!(40))])],
            vec![],
        );
        let original = json!({});
        let mut payload = json!({"request": {}});
        apply_payload_config(&config, "gemini-2.5-pro", "gemini-cli", "request", &mut payload, &original);
        // Protocol mismatch ("gemini" rule vs "gemini-cli" call): no write.
        assert!(!json::exists(&payload, "request.generationConfig.topK"));

        let mut payload = json!({"request": {}});
        apply_payload_config(&config, "gemini-2.5-pro", "gemini", "request", &mut payload, &original);
        assert_eq!(json::get_i64(&payload, "request.generationConfig.topK"), Some(40));
    }
}
