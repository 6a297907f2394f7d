use serde_json::{Map, Value};

use crate::config::{convert_level_to_budget, ThinkingConfig, ThinkingMode, LEVEL_AUTO, LEVEL_NONE};
use crate::{
    REASONING_EFFORT_METADATA_KEY, THINKING_BUDGET_METADATA_KEY,
    THINKING_ORIGINAL_MODEL_METADATA_KEY,
};

/// Result of splitting `model(suffix)` into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuffixResult {
    /// Model name with the suffix removed.
    pub model_name: String,
    /// Raw suffix text between the parentheses, when present.
    pub raw_suffix: Option<String>,
}

impl SuffixResult {
    pub fn has_suffix(&self) -> bool {
        self.raw_suffix.is_some()
    }
}

/// Splits a trailing `(...)` group off a model name.
///
/// Only a non-empty group at the very end counts; parentheses elsewhere stay
/// part of the name.
pub fn parse_suffix(model: &str) -> SuffixResult {
    let trimmed = model.trim();
    if let Some(stripped) = trimmed.strip_suffix(')') {
        if let Some(open) = stripped.rfind('(') {
            let name = stripped[..open].trim();
            let suffix = stripped[open + 1..].trim();
            if !name.is_empty() && !suffix.is_empty() {
                return SuffixResult {
                    model_name: name.to_string(),
                    raw_suffix: Some(suffix.to_string()),
                };
            }
        }
    }
    SuffixResult {
        model_name: trimmed.to_string(),
        raw_suffix: None,
    }
}

/// Strips the thinking suffix for routing and records the parsed
/// configuration as metadata (`thinking_budget` for numeric/none/auto,
/// `reasoning_effort` for levels) so the executor pipeline can re-apply it
/// after translation and alias resolution.
pub fn normalize_thinking_model(model: &str) -> (String, Option<Map<String, Value>>) {
    let parsed = parse_suffix(model);
    let Some(raw) = parsed.raw_suffix.as_deref() else {
        return (parsed.model_name, None);
    };
    let config = suffix_to_config(raw);
    if !config.is_set() {
        return (parsed.model_name, None);
    }
    let mut metadata = Map::new();
    metadata.insert(
        THINKING_ORIGINAL_MODEL_METADATA_KEY.to_string(),
        Value::String(model.trim().to_string()),
    );
    match config.mode {
        ThinkingMode::Level => {
            metadata.insert(
                REASONING_EFFORT_METADATA_KEY.to_string(),
                Value::String(config.level),
            );
        }
        _ => {
            metadata.insert(
                THINKING_BUDGET_METADATA_KEY.to_string(),
                Value::from(config.budget),
            );
        }
    }
    (parsed.model_name, Some(metadata))
}

/// Rebuilds a [`ThinkingConfig`] from execution metadata, if present.
pub fn thinking_from_metadata(metadata: &Map<String, Value>) -> Option<ThinkingConfig> {
    if let Some(effort) = metadata
        .get(REASONING_EFFORT_METADATA_KEY)
        .and_then(Value::as_str)
    {
        return Some(match effort {
            LEVEL_NONE => ThinkingConfig::none(),
            LEVEL_AUTO => ThinkingConfig::auto(),
            level => ThinkingConfig::level(level),
        });
    }
    if let Some(budget) = metadata
        .get(THINKING_BUDGET_METADATA_KEY)
        .and_then(Value::as_i64)
    {
        return Some(match budget {
            0 => ThinkingConfig::none(),
            -1 => ThinkingConfig::auto(),
            other => ThinkingConfig::budget(other),
        });
    }
    None
}

/// Re-attaches a synthetic suffix from metadata so appliers see the same
/// priority rules as a literal suffix.
pub fn model_with_metadata_suffix(model: &str, metadata: &Map<String, Value>) -> String {
    if parse_suffix(model).has_suffix() {
        return model.to_string();
    }
    match thinking_from_metadata(metadata) {
        Some(config) => match config.mode {
            ThinkingMode::Level => format!("{model}({})", config.level),
            ThinkingMode::None => format!("{model}(none)"),
            ThinkingMode::Auto => format!("{model}(auto)"),
            ThinkingMode::Budget => format!("{model}({})", config.budget),
        },
        None => model.to_string(),
    }
}

/// Converts a raw suffix to a configuration.
///
/// Priority: special values (`none`, `auto`, `-1`) > level names > integers.
/// `0` maps to none here; zero-disallowed models clamp it back to min during
/// validation. Unknown suffixes yield an unset config.
pub fn suffix_to_config(raw_suffix: &str) -> ThinkingConfig {
    let lowered = raw_suffix.trim().to_ascii_lowercase();
    match lowered.as_str() {
        LEVEL_NONE => return ThinkingConfig::none(),
        LEVEL_AUTO | "-1" => return ThinkingConfig::auto(),
        _ => {}
    }
    if convert_level_to_budget(&lowered).is_some()
        && lowered != LEVEL_NONE
        && lowered != LEVEL_AUTO
    {
        return ThinkingConfig::level(lowered);
    }
    if let Ok(budget) = lowered.parse::<i64>() {
        if budget == 0 {
            return ThinkingConfig::none();
        }
        if budget > 0 {
            return ThinkingConfig {
                mode: ThinkingMode::Budget,
                budget,
                level: String::new(),
            };
        }
    }
    tracing::debug!(raw_suffix, "unknown thinking suffix, treating as no config");
    ThinkingConfig::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trailing_suffix_only() {
        let parsed = parse_suffix("gemini-2.5-pro(8192)");
        assert_eq!(parsed.model_name, "gemini-2.5-pro");
        assert_eq!(parsed.raw_suffix.as_deref(), Some("8192"));

        let plain = parse_suffix("gemini-2.5-pro");
        assert_eq!(plain.model_name, "gemini-2.5-pro");
        assert!(plain.raw_suffix.is_none());

        let empty = parse_suffix("model()");
        assert!(empty.raw_suffix.is_none());
    }

    #[test]
    fn suffix_config_priority() {
        assert_eq!(suffix_to_config("none"), ThinkingConfig::none());
        assert_eq!(suffix_to_config("auto"), ThinkingConfig::auto());
        assert_eq!(suffix_to_config("-1"), ThinkingConfig::auto());
        assert_eq!(suffix_to_config("HIGH"), ThinkingConfig::level("high"));
        assert_eq!(suffix_to_config("4096"), ThinkingConfig::budget(4096));
        assert_eq!(suffix_to_config("0"), ThinkingConfig::none());
        assert!(!suffix_to_config("wat").is_set());
    }

    #[test]
    fn normalize_records_structured_metadata() {
        let (model, metadata) = normalize_thinking_model("gpt-5(high)");
        assert_eq!(model, "gpt-5");
        let metadata = metadata.expect("suffix metadata");
        assert_eq!(
            metadata.get(REASONING_EFFORT_METADATA_KEY).and_then(Value::as_str),
            Some("high")
        );

        let (model, metadata) = normalize_thinking_model("gemini-2.5-pro(8192)");
        assert_eq!(model, "gemini-2.5-pro");
        let metadata = metadata.expect("suffix metadata");
        assert_eq!(
            metadata.get(THINKING_BUDGET_METADATA_KEY).and_then(Value::as_i64),
            Some(8192)
        );
        assert_eq!(
            metadata
                .get(THINKING_ORIGINAL_MODEL_METADATA_KEY)
                .and_then(Value::as_str),
            Some("gemini-2.5-pro(8192)")
        );

        let (model, metadata) = normalize_thinking_model("gpt-5");
        assert_eq!(model, "gpt-5");
        assert!(metadata.is_none());
    }

    #[test]
    fn metadata_round_trips_to_config_and_suffix() {
        let (_, metadata) = normalize_thinking_model("m(none)");
        let metadata = metadata.expect("metadata");
        assert_eq!(thinking_from_metadata(&metadata), Some(ThinkingConfig::none()));
        assert_eq!(model_with_metadata_suffix("m", &metadata), "m(none)");

        let (_, metadata) = normalize_thinking_model("m(2048)");
        let metadata = metadata.expect("metadata");
        assert_eq!(model_with_metadata_suffix("m", &metadata), "m(2048)");

        assert_eq!(model_with_metadata_suffix("m", &Map::new()), "m");
        // A literal suffix is never doubled.
        let (_, metadata) = normalize_thinking_model("m(low)");
        assert_eq!(
            model_with_metadata_suffix("m(low)", &metadata.expect("metadata")),
            "m(low)"
        );
    }
}
