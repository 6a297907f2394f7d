pub const LEVEL_NONE: &str = "none";
pub const LEVEL_AUTO: &str = "auto";
pub const LEVEL_MINIMAL: &str = "minimal";
pub const LEVEL_LOW: &str = "low";
pub const LEVEL_MEDIUM: &str = "medium";
pub const LEVEL_HIGH: &str = "high";
pub const LEVEL_XHIGH: &str = "xhigh";

/// How a request expresses its reasoning wish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ThinkingMode {
    /// Numeric token budget. The zero-value mode: an all-default config is
    /// `Budget(0)` and means "nothing requested".
    #[default]
    Budget,
    None,
    Auto,
    Level,
}

/// Normalized reasoning configuration.
///
/// `budget` uses -1 as the dynamic sentinel; `level` holds a discrete effort
/// name for level-based modes and is empty otherwise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThinkingConfig {
    pub mode: ThinkingMode,
    pub budget: i64,
    pub level: String,
}

impl ThinkingConfig {
    pub fn none() -> Self {
        Self {
            mode: ThinkingMode::None,
            budget: 0,
            level: String::new(),
        }
    }

    pub fn auto() -> Self {
        Self {
            mode: ThinkingMode::Auto,
            budget: -1,
            level: String::new(),
        }
    }

    pub fn budget(tokens: i64) -> Self {
        Self {
            mode: ThinkingMode::Budget,
            budget: tokens,
            level: String::new(),
        }
    }

    pub fn level(level: impl Into<String>) -> Self {
        Self {
            mode: ThinkingMode::Level,
            budget: 0,
            level: level.into(),
        }
    }

    /// Whether the request expressed any reasoning wish at all.
    pub fn is_set(&self) -> bool {
        self.mode != ThinkingMode::Budget || self.budget != 0 || !self.level.is_empty()
    }
}

/// Canonical level -> numeric budget table.
pub fn convert_level_to_budget(level: &str) -> Option<i64> {
    match level.trim().to_ascii_lowercase().as_str() {
        LEVEL_NONE => Some(0),
        LEVEL_AUTO => Some(-1),
        LEVEL_MINIMAL => Some(512),
        LEVEL_LOW => Some(1024),
        LEVEL_MEDIUM => Some(8192),
        LEVEL_HIGH => Some(24_576),
        LEVEL_XHIGH => Some(32_768),
        _ => None,
    }
}

/// Numeric budget -> level thresholds for level-only models.
pub fn convert_budget_to_level(budget: i64) -> Option<&'static str> {
    match budget {
        -1 => Some(LEVEL_AUTO),
        b if b < -1 => None,
        0 => Some(LEVEL_NONE),
        b if b <= 1024 => Some(LEVEL_LOW),
        b if b <= 8192 => Some(LEVEL_MEDIUM),
        b if b <= 24_576 => Some(LEVEL_HIGH),
        _ => Some(LEVEL_XHIGH),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_means_nothing_requested() {
        assert!(!ThinkingConfig::default().is_set());
        assert!(ThinkingConfig::none().is_set());
        assert!(ThinkingConfig::auto().is_set());
        assert!(ThinkingConfig::budget(1).is_set());
        assert!(!ThinkingConfig::budget(0).is_set());
    }

    #[test]
    fn level_budget_conversions() {
        assert_eq!(convert_level_to_budget("medium"), Some(8192));
        assert_eq!(convert_level_to_budget("XHIGH"), Some(32_768));
        assert_eq!(convert_level_to_budget("bogus"), None);
        assert_eq!(convert_budget_to_level(1024), Some(LEVEL_LOW));
        assert_eq!(convert_budget_to_level(1025), Some(LEVEL_MEDIUM));
        assert_eq!(convert_budget_to_level(24_577), Some(LEVEL_XHIGH));
        assert_eq!(convert_budget_to_level(-2), None);
    }
}
