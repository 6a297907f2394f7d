//! Unified thinking/reasoning configuration processing.
//!
//! Model names may carry a suffix (`gemini-2.5-pro(8192)`, `gpt-5(high)`,
//! `claude-sonnet-4-5(none)`) which takes priority over any reasoning fields
//! in the request body. The extracted configuration is validated against the
//! model's capability block and written back in the target provider's wire
//! format.

mod apply;
mod config;
mod error;
mod extract;
pub mod provider;
mod strip;
mod suffix;
mod validate;

pub use apply::apply_thinking;
pub use config::{
    convert_budget_to_level, convert_level_to_budget, ThinkingConfig, ThinkingMode, LEVEL_AUTO,
    LEVEL_HIGH, LEVEL_LOW, LEVEL_MEDIUM, LEVEL_MINIMAL, LEVEL_NONE, LEVEL_XHIGH,
};
pub use error::ThinkingError;
pub use extract::extract_thinking_config;
pub use strip::strip_thinking_config;
pub use suffix::{
    model_with_metadata_suffix, normalize_thinking_model, parse_suffix, thinking_from_metadata,
    SuffixResult,
};
pub use validate::{clamp_budget, validate_config};

/// Metadata key carrying a numeric thinking budget parsed off the model name
/// (`-1` dynamic, `0` disabled).
pub const THINKING_BUDGET_METADATA_KEY: &str = "thinking_budget";
/// Metadata key carrying a discrete reasoning effort level.
pub const REASONING_EFFORT_METADATA_KEY: &str = "reasoning_effort";
/// Metadata key carrying the client-requested model name including suffix.
pub const THINKING_ORIGINAL_MODEL_METADATA_KEY: &str = "thinking_original_model";
