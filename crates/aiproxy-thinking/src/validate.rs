use aiproxy_registry::{ModelInfo, ThinkingSupport};

use crate::config::{
    convert_budget_to_level, convert_level_to_budget, ThinkingConfig, ThinkingMode, LEVEL_AUTO,
    LEVEL_MEDIUM, LEVEL_NONE,
};
use crate::error::ThinkingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capability {
    BudgetOnly,
    LevelOnly,
    Hybrid,
}

fn detect_capability(support: &ThinkingSupport) -> Capability {
    match (support.budget_range(), support.has_levels()) {
        (true, true) => Capability::Hybrid,
        (false, true) => Capability::LevelOnly,
        _ => Capability::BudgetOnly,
    }
}

/// Clamps a budget into the model's supported range.
///
/// -1 (dynamic) passes through; 0 clamps to min unless the model allows zero;
/// level-only models (no numeric range) pass values through unchanged.
pub fn clamp_budget(value: i64, model_info: Option<&ModelInfo>, provider: &str) -> i64 {
    let Some(support) = model_info.and_then(|info| info.thinking.as_ref()) else {
        return value;
    };
    if value == -1 {
        return value;
    }
    let model = model_info.map(|info| info.id.as_str()).unwrap_or("unknown");
    if value == 0 && !support.zero_allowed {
        tracing::warn!(
            provider,
            model,
            original_value = value,
            clamped_to = support.min,
            "thinking: budget zero not allowed"
        );
        return support.min;
    }
    if !support.budget_range() {
        return value;
    }
    if value < support.min {
        if value == 0 && support.zero_allowed {
            return 0;
        }
        tracing::debug!(provider, model, original_value = value, clamped_to = support.min, "thinking: budget clamped");
        return support.min;
    }
    if value > support.max {
        tracing::debug!(provider, model, original_value = value, clamped_to = support.max, "thinking: budget clamped");
        return support.max;
    }
    value
}

/// Validates a configuration against model capabilities and normalizes it to
/// the shape the provider applier expects. Idempotent: validating an already
/// validated config is a no-op.
pub fn validate_config(
    config: &ThinkingConfig,
    model_info: Option<&ModelInfo>,
    provider: &str,
) -> Result<ThinkingConfig, ThinkingError> {
    let mut normalized = config.clone();
    let model = model_info.map(|info| info.id.as_str()).unwrap_or("unknown");
    let Some(support) = model_info.and_then(|info| info.thinking.as_ref()) else {
        if config.mode != ThinkingMode::None {
            return Err(ThinkingError::NotSupported {
                model: model.to_string(),
            });
        }
        return Ok(normalized);
    };

    match detect_capability(support) {
        Capability::BudgetOnly => {
            if normalized.mode == ThinkingMode::Level && normalized.level != LEVEL_AUTO {
                let budget = convert_level_to_budget(&normalized.level).ok_or_else(|| {
                    ThinkingError::UnknownLevel {
                        message: format!("unknown level: {}", normalized.level),
                    }
                })?;
                normalized = ThinkingConfig::budget(budget);
            }
        }
        Capability::LevelOnly => {
            if normalized.mode == ThinkingMode::Budget {
                let level = convert_budget_to_level(normalized.budget).ok_or_else(|| {
                    ThinkingError::UnknownLevel {
                        message: format!(
                            "budget {} cannot be converted to a valid level",
                            normalized.budget
                        ),
                    }
                })?;
                normalized = ThinkingConfig::level(level);
            }
        }
        Capability::Hybrid => {}
    }

    if normalized.mode == ThinkingMode::Level && normalized.level == LEVEL_NONE {
        normalized = ThinkingConfig::none();
    }
    if normalized.mode == ThinkingMode::Level && normalized.level == LEVEL_AUTO {
        normalized = ThinkingConfig::auto();
    }
    if normalized.mode == ThinkingMode::Budget && normalized.budget == 0 {
        normalized.mode = ThinkingMode::None;
        normalized.level = String::new();
    }

    if support.has_levels()
        && normalized.mode == ThinkingMode::Level
        && !support.supports_level(&normalized.level)
    {
        let valid: Vec<String> = support
            .levels
            .iter()
            .map(|level| level.trim().to_ascii_lowercase())
            .collect();
        return Err(ThinkingError::LevelNotSupported {
            message: format!(
                "level {:?} not supported, valid levels: {}",
                normalized.level.to_ascii_lowercase(),
                valid.join(", ")
            ),
        });
    }

    if normalized.mode == ThinkingMode::Auto && !support.dynamic_allowed {
        normalized = convert_auto_to_mid_range(support, provider, model);
    }

    if normalized.mode == ThinkingMode::None && provider == "claude" {
        // Claude can disable explicitly via thinking.type="disabled"; keep
        // budget at zero so the applier omits budget_tokens.
        normalized.budget = 0;
        normalized.level = String::new();
    } else {
        if matches!(
            normalized.mode,
            ThinkingMode::Budget | ThinkingMode::Auto | ThinkingMode::None
        ) {
            normalized.budget = clamp_budget(normalized.budget, model_info, provider);
        }
        // A zero-disallowed clamp can leave ModeNone with a positive budget;
        // give level-capable models their lowest level so the applier never
        // needs the support block.
        if normalized.mode == ThinkingMode::None
            && normalized.budget > 0
            && support.has_levels()
        {
            normalized.level = support.levels[0].clone();
        }
    }

    Ok(normalized)
}

fn convert_auto_to_mid_range(
    support: &ThinkingSupport,
    provider: &str,
    model: &str,
) -> ThinkingConfig {
    if support.has_levels() && !support.budget_range() {
        tracing::debug!(provider, model, clamped_to = LEVEL_MEDIUM, "thinking: dynamic not allowed, using medium level");
        return ThinkingConfig::level(LEVEL_MEDIUM);
    }
    let mid = (support.min + support.max) / 2;
    let config = if mid <= 0 && support.zero_allowed {
        ThinkingConfig::none()
    } else if mid <= 0 {
        ThinkingConfig::budget(support.min)
    } else {
        ThinkingConfig::budget(mid)
    };
    tracing::debug!(provider, model, clamped_to = config.budget, "thinking: dynamic not allowed, using mid-range budget");
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiproxy_registry::{ModelInfo, ThinkingSupport};

    fn budget_model(min: i64, max: i64, zero_allowed: bool) -> ModelInfo {
        ModelInfo::new("budget-model", "claude").with_thinking(ThinkingSupport {
            min,
            max,
            levels: Vec::new(),
            zero_allowed,
            dynamic_allowed: false,
        })
    }

    fn level_model(levels: &[&str], dynamic_allowed: bool) -> ModelInfo {
        ModelInfo::new("level-model", "codex").with_thinking(ThinkingSupport {
            min: 0,
            max: 0,
            levels: levels.iter().map(|s| s.to_string()).collect(),
            zero_allowed: false,
            dynamic_allowed,
        })
    }

    #[test]
    fn rejects_thinking_on_unsupported_model() {
        let plain = ModelInfo::new("plain", "claude");
        let err = validate_config(&ThinkingConfig::budget(1024), Some(&plain), "claude")
            .expect_err("must reject");
        assert!(matches!(err, ThinkingError::NotSupported { .. }));
        // None passes through.
        validate_config(&ThinkingConfig::none(), Some(&plain), "claude").expect("none is allowed");
    }

    #[test]
    fn budget_only_converts_levels() {
        let model = budget_model(1024, 32_000, false);
        let out = validate_config(&ThinkingConfig::level("medium"), Some(&model), "claude")
            .expect("valid");
        assert_eq!(out.mode, ThinkingMode::Budget);
        assert_eq!(out.budget, 8192);
    }

    #[test]
    fn level_only_converts_budgets() {
        let model = level_model(&["low", "medium", "high"], false);
        let out =
            validate_config(&ThinkingConfig::budget(8000), Some(&model), "codex").expect("valid");
        assert_eq!(out.mode, ThinkingMode::Level);
        assert_eq!(out.level, "medium");
    }

    #[test]
    fn unsupported_level_is_an_error() {
        let model = level_model(&["low", "high"], false);
        let err = validate_config(&ThinkingConfig::level("xhigh"), Some(&model), "codex")
            .expect_err("must reject");
        assert!(matches!(err, ThinkingError::LevelNotSupported { .. }));
    }

    #[test]
    fn clamps_budget_into_range() {
        let model = budget_model(1024, 32_000, false);
        for (input, want) in [(0, 1024), (1, 1024), (1024, 1024), (40_000, 32_000)] {
            let out = validate_config(&ThinkingConfig::budget(input), Some(&model), "gemini")
                .expect("valid");
            assert_eq!(out.budget, want, "budget {input}");
        }
    }

    #[test]
    fn zero_allowed_keeps_explicit_disable() {
        let model = budget_model(128, 32_768, true);
        let out =
            validate_config(&ThinkingConfig::budget(0), Some(&model), "gemini").expect("valid");
        assert_eq!(out.mode, ThinkingMode::None);
        assert_eq!(out.budget, 0);
    }

    #[test]
    fn auto_on_non_dynamic_budget_model_uses_mid_range() {
        let model = budget_model(1024, 32_000, false);
        let out =
            validate_config(&ThinkingConfig::auto(), Some(&model), "claude").expect("valid");
        assert_eq!(out.mode, ThinkingMode::Budget);
        assert_eq!(out.budget, (1024 + 32_000) / 2);
    }

    #[test]
    fn auto_on_non_dynamic_level_model_uses_medium() {
        let model = level_model(&["low", "medium", "high"], false);
        let out = validate_config(&ThinkingConfig::auto(), Some(&model), "codex").expect("valid");
        assert_eq!(out.mode, ThinkingMode::Level);
        assert_eq!(out.level, "medium");
    }

    #[test]
    fn validation_is_idempotent() {
        let models = [
            budget_model(1024, 32_000, false),
            budget_model(128, 32_768, true),
            level_model(&["low", "medium", "high"], false),
        ];
        let configs = [
            ThinkingConfig::none(),
            ThinkingConfig::auto(),
            ThinkingConfig::budget(0),
            ThinkingConfig::budget(512),
            ThinkingConfig::budget(100_000),
            ThinkingConfig::level("medium"),
        ];
        for model in &models {
            for config in &configs {
                let Ok(once) = validate_config(config, Some(model), "gemini") else {
                    continue;
                };
                let twice = validate_config(&once, Some(model), "gemini").expect("revalidate");
                assert_eq!(once, twice, "model {} config {:?}", model.id, config);
            }
        }
    }
}
