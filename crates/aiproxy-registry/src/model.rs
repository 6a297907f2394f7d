use serde::{Deserialize, Serialize};

/// Immutable description of a model known to the proxy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Canonical model identifier as clients request it.
    pub id: String,
    /// Provider tag of the upstream family serving this model.
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub max_completion_tokens: u32,
    /// Declared via config rather than the built-in table; thinking config is
    /// passed through without validation for these.
    #[serde(default)]
    pub user_defined: bool,
    /// Present iff the model supports reasoning at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingSupport>,
}

/// Reasoning capability block.
///
/// `min`/`max` describe the numeric budget range; `levels` lists discrete
/// effort levels ordered low to high. Budget-only models leave `levels`
/// empty; level-only models leave `min == max == 0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThinkingSupport {
    #[serde(default)]
    pub min: i64,
    #[serde(default)]
    pub max: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub levels: Vec<String>,
    #[serde(default)]
    pub zero_allowed: bool,
    #[serde(default)]
    pub dynamic_allowed: bool,
}

impl ThinkingSupport {
    pub fn budget_range(&self) -> bool {
        self.min != 0 || self.max != 0
    }

    pub fn has_levels(&self) -> bool {
        !self.levels.is_empty()
    }

    pub fn supports_level(&self, level: &str) -> bool {
        let wanted = level.trim();
        self.levels
            .iter()
            .any(|candidate| candidate.trim().eq_ignore_ascii_case(wanted))
    }
}

impl ModelInfo {
    pub fn new(id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            ..Self::default()
        }
    }

    pub fn with_thinking(mut self, thinking: ThinkingSupport) -> Self {
        self.thinking = Some(thinking);
        self
    }

    pub fn with_max_completion_tokens(mut self, value: u32) -> Self {
        self.max_completion_tokens = value;
        self
    }
}
