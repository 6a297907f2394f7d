//! Cloaking: request mutations that make proxied traffic indistinguishable
//! from the first-party CLI (system prelude, synthetic user id, sensitive
//! word obfuscation).

use aiproxy_auth::Auth;
use aiproxy_common::{json, CloakConfig, Config};
use serde_json::{json, Value};

use super::user_id::{cached_user_id, is_valid_user_id};

pub(crate) const CLAUDE_CODE_PRELUDE: &str =
    "You are Claude Code, Anthropic's official CLI for Claude.";

/// Resolves the cloak configuration for this credential: a matching
/// `claude-api-key` config entry wins, auth attributes are the fallback.
pub(crate) fn resolve_cloak_config(config: &Config, auth: &Auth) -> CloakConfig {
    if let Some(api_key) = auth.attributes.get("api_key") {
        for entry in &config.claude_keys {
            if !entry.api_key.trim().eq_ignore_ascii_case(api_key.trim()) {
                continue;
            }
            if let (Some(entry_base), Some(auth_base)) =
                (&entry.base_url, auth.attributes.get("base_url"))
            {
                if !entry_base.trim().eq_ignore_ascii_case(auth_base.trim()) {
                    continue;
                }
            }
            if let Some(cloak) = &entry.cloak {
                return cloak.clone();
            }
        }
    }
    CloakConfig {
        mode: auth.attributes.get("cloak_mode").cloned().unwrap_or_default(),
        strict_mode: auth
            .attributes
            .get("cloak_strict_mode")
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(false),
        sensitive_words: auth
            .attributes
            .get("cloak_sensitive_words")
            .map(|raw| raw.split(',').map(|word| word.trim().to_string()).collect())
            .unwrap_or_default(),
    }
}

fn should_cloak(mode: &str, client_user_agent: &str) -> bool {
    match mode {
        "off" | "disabled" => false,
        "always" => true,
        // auto (default): cloak unless the client already is the CLI.
        _ => !client_user_agent.starts_with("claude-cli"),
    }
}

/// Applies the full cloak to a Claude request body.
pub(crate) fn apply_cloaking(
    config: &Config,
    auth: &Auth,
    body: &mut Value,
    model: &str,
    client_user_agent: &str,
) {
    let cloak = resolve_cloak_config(config, auth);
    if !should_cloak(&cloak.mode, client_user_agent) {
        return;
    }

    // Haiku-class models never carry the CLI system prompt upstream.
    if !model.starts_with("claude-3-5-haiku") {
        inject_system_prelude(body, cloak.strict_mode);
    }
    inject_fake_user_id(body, auth);
    if !cloak.sensitive_words.is_empty() {
        obfuscate_sensitive_words(body, &cloak.sensitive_words);
    }
}

/// Strict mode replaces the system array with the prelude alone; otherwise
/// the prelude is prepended ahead of the caller's system text.
pub(crate) fn inject_system_prelude(body: &mut Value, strict: bool) {
    let prelude = json!({"type": "text", "text": CLAUDE_CODE_PRELUDE});
    if strict {
        json::set(body, "system", Value::Array(vec![prelude]));
        return;
    }
    let mut parts = vec![prelude];
    match json::get(body, "system") {
        Some(Value::Array(existing)) => {
            if json::get_str(body, "system.0.text") == Some(CLAUDE_CODE_PRELUDE) {
                return;
            }
            for part in existing {
                if json::get_str(part, "type") == Some("text") {
                    parts.push(part.clone());
                }
            }
        }
        Some(Value::String(text)) => {
            if text == CLAUDE_CODE_PRELUDE {
                return;
            }
            if !text.is_empty() {
                let text = text.clone();
                parts.push(json!({"type": "text", "text": text}));
            }
        }
        _ => {}
    }
    json::set(body, "system", Value::Array(parts));
}

fn inject_fake_user_id(body: &mut Value, auth: &Auth) {
    let existing = json::get_str(body, "metadata.user_id").unwrap_or_default();
    if !existing.is_empty() && is_valid_user_id(existing) {
        return;
    }
    let api_key = auth.access_credential().unwrap_or_default();
    json::set(body, "metadata.user_id", Value::String(cached_user_id(&api_key)));
}

/// Breaks configured sensitive words in every text field with a zero-width
/// space after the first character, leaving the rendered text unchanged.
pub(crate) fn obfuscate_sensitive_words(body: &mut Value, words: &[String]) {
    let words: Vec<&str> = words
        .iter()
        .map(|word| word.trim())
        .filter(|word| !word.is_empty())
        .collect();
    if words.is_empty() {
        return;
    }
    walk_text_fields(body, &|text| obfuscate(text, &words));
}

fn obfuscate(text: &str, words: &[&str]) -> Option<String> {
    let mut out = text.to_string();
    let mut changed = false;
    for word in words {
        // ASCII-lowered matching keeps byte offsets aligned with `out`.
        let lowered = out.to_ascii_lowercase();
        let needle = word.to_ascii_lowercase();
        let mut result = String::with_capacity(out.len());
        let mut cursor = 0;
        let mut search = 0;
        while let Some(found) = lowered[search..].find(&needle) {
            let start = search + found;
            let end = start + needle.len();
            result.push_str(&out[cursor..start]);
            let original = &out[start..end];
            let mut chars = original.chars();
            if let Some(first) = chars.next() {
                result.push(first);
                result.push('\u{200B}');
                result.push_str(chars.as_str());
            }
            changed = true;
            cursor = end;
            search = end;
        }
        if changed {
            result.push_str(&out[cursor..]);
            out = result;
        }
    }
    changed.then_some(out)
}

fn walk_text_fields(node: &mut Value, rewrite: &impl Fn(&str) -> Option<String>) {
    match node {
        Value::Object(map) => {
            for (key, value) in map.iter_mut() {
                if key == "text" || key == "content" {
                    if let Value::String(text) = value {
                        if let Some(replaced) = rewrite(text) {
                            *value = Value::String(replaced);
                            continue;
                        }
                    }
                }
                walk_text_fields(value, rewrite);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_text_fields(item, rewrite);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prelude_prepended_unless_already_first() {
        let mut body = json!({"system": [{"type": "text", "text": "custom"}]});
        inject_system_prelude(&mut body, false);
        assert_eq!(json::get_str(&body, "system.0.text"), Some(CLAUDE_CODE_PRELUDE));
        assert_eq!(json::get_str(&body, "system.1.text"), Some("custom"));

        // Re-running does not duplicate.
        inject_system_prelude(&mut body, false);
        assert_eq!(json::get_str(&body, "system.1.text"), Some("custom"));
        assert!(json::get(&body, "system.2").is_none());
    }

    #[test]
    fn strict_mode_replaces_system() {
        let mut body = json!({"system": [{"type": "text", "text": "custom"}]});
        inject_system_prelude(&mut body, true);
        assert_eq!(json::get_str(&body, "system.0.text"), Some(CLAUDE_CODE_PRELUDE));
        assert!(json::get(&body, "system.1").is_none());
    }

    #[test]
    fn obfuscation_inserts_zero_width_space() {
        let mut body = json!({"messages": [{"role": "user", "content": [
            {"type": "text", "text": "tell me about SecretProject now"},
        ]}]});
        obfuscate_sensitive_words(&mut body, &["secretproject".to_string()]);
        let text = json::get_str(&body, "messages.0.content.0.text").expect("text");
        assert!(text.contains('\u{200B}'));
        assert!(!text.contains("SecretProject"));
        assert!(text.starts_with("tell me about S"));
    }

    #[test]
    fn cloak_mode_gating() {
        assert!(should_cloak("auto", "python-requests/2"));
        assert!(!should_cloak("auto", "claude-cli/1.0.83 (external, cli)"));
        assert!(should_cloak("always", "claude-cli/1.0.83"));
        assert!(!should_cloak("off", "python-requests/2"));
    }
}
