//! Provider-specific thinking appliers.
//!
//! Each applier expects a configuration already normalized by
//! [`crate::validate_config`] and writes the provider's wire fields, deleting
//! conflicting siblings. User-defined models get a best-effort translation
//! without validation.

pub mod antigravity;
pub mod claude;
pub mod codex;
pub mod gemini;
pub mod iflow;
pub mod openai;

use aiproxy_registry::ModelInfo;
use serde_json::Value;

use crate::config::ThinkingConfig;

/// Dispatches to the applier registered for `provider`. Unknown providers
/// pass the body through untouched.
pub fn apply(body: &mut Value, config: &ThinkingConfig, model_info: Option<&ModelInfo>, provider: &str) {
    match provider {
        "claude" => claude::apply(body, config, model_info),
        "gemini" => gemini::apply(body, config, model_info, ""),
        "gemini-cli" => gemini::apply(body, config, model_info, "request."),
        "antigravity" => antigravity::apply(body, config, model_info),
        "openai" => openai::apply(body, config, model_info),
        "codex" => codex::apply(body, config, model_info),
        "iflow" => iflow::apply(body, config, model_info),
        "qwen" => iflow::apply_qwen(body, config, model_info),
        _ => {}
    }
}

pub(crate) fn is_user_defined(model_info: Option<&ModelInfo>) -> bool {
    model_info.map(|info| info.user_defined).unwrap_or(true)
}
