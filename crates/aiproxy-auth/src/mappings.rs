use std::collections::HashMap;

use aiproxy_common::ModelAliasEntry;

use crate::auth::Auth;

/// Reverse alias table: channel -> lowercase alias -> upstream model name.
///
/// Applied after provider resolution; a mapping only rewrites the model name
/// sent upstream, never which provider set is consulted for selection.
#[derive(Debug, Default)]
pub struct ModelMappingTable {
    reverse: HashMap<String, HashMap<String, String>>,
}

impl ModelMappingTable {
    pub fn compile(mappings: &HashMap<String, Vec<ModelAliasEntry>>) -> Self {
        let mut reverse: HashMap<String, HashMap<String, String>> = HashMap::new();
        for (raw_channel, entries) in mappings {
            let channel = raw_channel.trim().to_ascii_lowercase();
            if channel.is_empty() || entries.is_empty() {
                continue;
            }
            let mut table = HashMap::new();
            for entry in entries {
                let name = entry.name.trim();
                let alias = entry.alias.trim();
                if name.is_empty() || alias.is_empty() || name.eq_ignore_ascii_case(alias) {
                    continue;
                }
                table
                    .entry(alias.to_ascii_lowercase())
                    .or_insert_with(|| name.to_string());
            }
            if !table.is_empty() {
                reverse.insert(channel, table);
            }
        }
        Self { reverse }
    }

    /// Resolves the true upstream model for `requested` on this auth's
    /// channel. Returns `None` when no mapping applies.
    pub fn resolve(&self, auth: &Auth, requested: &str) -> Option<String> {
        let channel = oauth_model_mapping_channel(&auth.provider, auth.auth_kind());
        if channel.is_empty() {
            return None;
        }
        let key = requested.trim().to_ascii_lowercase();
        if key.is_empty() {
            return None;
        }
        let name = self.reverse.get(channel)?.get(&key)?;
        if name.eq_ignore_ascii_case(requested) {
            return None;
        }
        Some(name.clone())
    }
}

/// Channel scoping the per-(provider, auth-kind) configuration tables.
/// API-key auth has no OAuth channel for most providers.
pub fn oauth_model_mapping_channel(provider: &str, auth_kind: &str) -> &'static str {
    let provider = provider.trim().to_ascii_lowercase();
    let apikey = auth_kind.trim().eq_ignore_ascii_case("apikey");
    match provider.as_str() {
        // Plain gemini is keyed config; OAuth gemini registers as gemini-cli.
        "gemini" => "",
        "vertex" if apikey => "",
        "vertex" => "vertex",
        "claude" if apikey => "",
        "claude" => "claude",
        "codex" if apikey => "",
        "codex" => "codex",
        "gemini-cli" => "gemini-cli",
        "aistudio" => "aistudio",
        "antigravity" => "antigravity",
        "qwen" => "qwen",
        "iflow" => "iflow",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ModelMappingTable {
        let mut mappings = HashMap::new();
        mappings.insert(
            "claude".to_string(),
            vec![ModelAliasEntry {
                name: "claude-sonnet-4-5".to_string(),
                alias: "sonnet-latest".to_string(),
            }],
        );
        ModelMappingTable::compile(&mappings)
    }

    #[test]
    fn resolves_alias_per_channel() {
        let table = table();
        let oauth = Auth::new("a", "claude");
        assert_eq!(
            table.resolve(&oauth, "SONNET-LATEST").as_deref(),
            Some("claude-sonnet-4-5")
        );
        assert!(table.resolve(&oauth, "claude-sonnet-4-5").is_none());

        // API-key claude has no channel, so the alias does not apply.
        let mut apikey = Auth::new("b", "claude");
        apikey.attributes.insert("api_key".to_string(), "sk".to_string());
        assert!(table.resolve(&apikey, "sonnet-latest").is_none());
    }

    #[test]
    fn channel_table() {
        assert_eq!(oauth_model_mapping_channel("claude", "oauth"), "claude");
        assert_eq!(oauth_model_mapping_channel("claude", "apikey"), "");
        assert_eq!(oauth_model_mapping_channel("gemini", "oauth"), "");
        assert_eq!(oauth_model_mapping_channel("antigravity", "oauth"), "antigravity");
        assert_eq!(oauth_model_mapping_channel("unknown", "oauth"), "");
    }
}
