use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use aiproxy_common::ModelAliasEntry;

use crate::model::ModelInfo;

/// Model registry: which client serves which models, and which provider tags
/// can serve a given model id.
///
/// Lookups are hot-path; registrations happen on credential load and config
/// changes only.
#[derive(Default)]
pub struct ModelRegistry {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    /// client id -> models it serves.
    clients: HashMap<String, ClientEntry>,
    /// lowercase model id -> provider tags (derived from `clients`).
    providers_by_model: HashMap<String, HashSet<String>>,
    /// lowercase alias -> lowercase canonical model id, per channel.
    aliases: HashMap<String, HashMap<String, String>>,
    /// (client id, lowercase model id) pairs currently quota-exceeded.
    quota_exceeded: HashSet<(String, String)>,
}

struct ClientEntry {
    provider: String,
    models: Vec<ModelInfo>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the model list a client serves.
    pub fn register_client(&self, id: &str, provider: &str, models: Vec<ModelInfo>) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        inner.clients.insert(
            id.to_string(),
            ClientEntry {
                provider: provider.to_string(),
                models,
            },
        );
        inner.rebuild_provider_index();
    }

    pub fn unregister_client(&self, id: &str) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if inner.clients.remove(id).is_some() {
            inner.quota_exceeded.retain(|(client, _)| client != id);
            inner.rebuild_provider_index();
        }
    }

    pub fn client_supports_model(&self, id: &str, model: &str) -> bool {
        let inner = self.inner.read().expect("registry lock poisoned");
        let Some(entry) = inner.clients.get(id) else {
            return false;
        };
        let wanted = inner.resolve_alias_any(model);
        entry
            .models
            .iter()
            .any(|info| info.id.eq_ignore_ascii_case(&wanted))
    }

    /// Provider tags currently able to serve `model`, honoring per-channel
    /// aliases case-insensitively.
    pub fn provider_names_for_model(&self, model: &str) -> Vec<String> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let wanted = inner.resolve_alias_any(model);
        let mut names: Vec<String> = inner
            .providers_by_model
            .get(&wanted.to_ascii_lowercase())
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Full metadata for a model id (alias-aware). Returns the first match
    /// across registered clients, preferring non-user-defined entries.
    pub fn model_info(&self, model: &str) -> Option<ModelInfo> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let wanted = inner.resolve_alias_any(model);
        let mut fallback: Option<ModelInfo> = None;
        for entry in inner.clients.values() {
            for info in &entry.models {
                if !info.id.eq_ignore_ascii_case(&wanted) {
                    continue;
                }
                if !info.user_defined {
                    return Some(info.clone());
                }
                if fallback.is_none() {
                    fallback = Some(info.clone());
                }
            }
        }
        fallback
    }

    /// All distinct models served by clients of the given provider tags.
    pub fn models_for_providers(&self, providers: &[String]) -> Vec<ModelInfo> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for entry in inner.clients.values() {
            if !providers.iter().any(|p| p.eq_ignore_ascii_case(&entry.provider)) {
                continue;
            }
            for info in &entry.models {
                if seen.insert(info.id.to_ascii_lowercase()) {
                    out.push(info.clone());
                }
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// All distinct models across every registered client.
    pub fn all_models(&self) -> Vec<ModelInfo> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for entry in inner.clients.values() {
            for info in &entry.models {
                if seen.insert(info.id.to_ascii_lowercase()) {
                    out.push(info.clone());
                }
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn set_model_quota_exceeded(&self, client_id: &str, model: &str) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        inner
            .quota_exceeded
            .insert((client_id.to_string(), model.to_ascii_lowercase()));
    }

    pub fn clear_model_quota_exceeded(&self, client_id: &str, model: &str) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        inner
            .quota_exceeded
            .remove(&(client_id.to_string(), model.to_ascii_lowercase()));
    }

    pub fn is_model_quota_exceeded(&self, client_id: &str, model: &str) -> bool {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .quota_exceeded
            .contains(&(client_id.to_string(), model.to_ascii_lowercase()))
    }

    /// Installs per-channel alias tables (alias -> canonical upstream name).
    pub fn set_model_aliases(&self, tables: &HashMap<String, Vec<ModelAliasEntry>>) {
        let mut compiled: HashMap<String, HashMap<String, String>> = HashMap::new();
        for (channel, entries) in tables {
            let channel = channel.trim().to_ascii_lowercase();
            if channel.is_empty() {
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
                compiled.insert(channel, table);
            }
        }
        let mut inner = self.inner.write().expect("registry lock poisoned");
        inner.aliases = compiled;
    }
}

impl Inner {
    fn rebuild_provider_index(&mut self) {
        let mut index: HashMap<String, HashSet<String>> = HashMap::new();
        for entry in self.clients.values() {
            for info in &entry.models {
                index
                    .entry(info.id.to_ascii_lowercase())
                    .or_default()
                    .insert(entry.provider.clone());
            }
        }
        self.providers_by_model = index;
    }

    /// Resolves `model` through any channel's alias table; falls back to the
    /// name itself. Aliases never affect which provider set is consulted for
    /// a model already known by its canonical name.
    fn resolve_alias_any(&self, model: &str) -> String {
        let key = model.trim().to_ascii_lowercase();
        if self.providers_by_model.contains_key(&key) {
            return model.trim().to_string();
        }
        for table in self.aliases.values() {
            if let Some(name) = table.get(&key) {
                return name.clone();
            }
        }
        model.trim().to_string()
    }
}
