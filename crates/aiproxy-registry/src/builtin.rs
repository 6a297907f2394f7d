use crate::model::{ModelInfo, ThinkingSupport};

const GEMINI_25_MIN: i64 = 128;
const GEMINI_25_MAX: i64 = 32_768;
const CLAUDE_MIN: i64 = 1024;
const CLAUDE_MAX: i64 = 32_000;

fn gemini_25(id: &str, max_completion: u32, zero_allowed: bool) -> ModelInfo {
    ModelInfo::new(id, "gemini")
        .with_max_completion_tokens(max_completion)
        .with_thinking(ThinkingSupport {
            min: GEMINI_25_MIN,
            max: GEMINI_25_MAX,
            levels: Vec::new(),
            zero_allowed,
            dynamic_allowed: true,
        })
}

fn gemini_3(id: &str, max_completion: u32) -> ModelInfo {
    ModelInfo::new(id, "gemini")
        .with_max_completion_tokens(max_completion)
        .with_thinking(ThinkingSupport {
            min: 0,
            max: 0,
            levels: vec!["low".into(), "high".into()],
            zero_allowed: false,
            dynamic_allowed: true,
        })
}

fn claude_thinking(id: &str, max_completion: u32) -> ModelInfo {
    ModelInfo::new(id, "claude")
        .with_max_completion_tokens(max_completion)
        .with_thinking(ThinkingSupport {
            min: CLAUDE_MIN,
            max: CLAUDE_MAX,
            levels: Vec::new(),
            zero_allowed: true,
            dynamic_allowed: false,
        })
}

fn gpt5(id: &str) -> ModelInfo {
    ModelInfo::new(id, "codex")
        .with_max_completion_tokens(128_000)
        .with_thinking(ThinkingSupport {
            min: 0,
            max: 0,
            levels: vec![
                "minimal".into(),
                "low".into(),
                "medium".into(),
                "high".into(),
                "xhigh".into(),
            ],
            zero_allowed: false,
            dynamic_allowed: false,
        })
}

/// Built-in model table for a provider tag.
///
/// These seed the registry when a credential for that provider registers;
/// config-declared models are added on top with `user_defined = true`.
pub fn builtin_models(provider: &str) -> Vec<ModelInfo> {
    match provider {
        "gemini" | "gemini-cli" | "vertex" | "aistudio" => vec![
            retag(gemini_25("gemini-2.5-flash", 65_536, true), provider),
            retag(gemini_25("gemini-2.5-pro", 65_536, false), provider),
            retag(gemini_3("gemini-3-flash-preview", 65_536), provider),
            retag(gemini_3("gemini-3-pro-preview", 65_536), provider),
        ],
        "antigravity" => vec![
            retag(gemini_3("gemini-3-pro-preview", 65_536), provider),
            retag(gemini_25("gemini-2.5-flash", 65_536, true), provider),
            retag(
                ModelInfo::new("gemini-2.5-computer-use-preview-10-2025", provider)
                    .with_max_completion_tokens(65_536),
                provider,
            ),
            retag(
                claude_thinking("gemini-claude-sonnet-4-5-thinking", 64_000),
                provider,
            ),
            retag(
                ModelInfo::new("gemini-claude-sonnet-4-5", provider)
                    .with_max_completion_tokens(64_000),
                provider,
            ),
        ],
        "claude" => vec![
            claude_thinking("claude-opus-4-5", 64_000),
            claude_thinking("claude-sonnet-4-5", 64_000),
            claude_thinking("claude-sonnet-4", 64_000),
            ModelInfo::new("claude-3-5-haiku", "claude").with_max_completion_tokens(8_192),
        ],
        "codex" => vec![
            gpt5("gpt-5"),
            gpt5("gpt-5-codex"),
            gpt5("gpt-5.1"),
            gpt5("gpt-5.1-codex"),
        ],
        "qwen" => {
            let toggle = ThinkingSupport {
                min: 0,
                max: 0,
                levels: Vec::new(),
                zero_allowed: true,
                dynamic_allowed: false,
            };
            vec![
                ModelInfo::new("qwen3-coder-plus", "qwen")
                    .with_max_completion_tokens(65_536)
                    .with_thinking(toggle.clone()),
                ModelInfo::new("qwen3-coder-flash", "qwen")
                    .with_max_completion_tokens(65_536)
                    .with_thinking(toggle),
            ]
        }
        "iflow" => vec![
            ModelInfo::new("glm-4.6", "iflow")
                .with_max_completion_tokens(98_304)
                .with_thinking(ThinkingSupport {
                    min: 0,
                    max: 0,
                    levels: Vec::new(),
                    zero_allowed: true,
                    dynamic_allowed: false,
                }),
            ModelInfo::new("minimax-m2", "iflow")
                .with_max_completion_tokens(98_304)
                .with_thinking(ThinkingSupport {
                    min: 0,
                    max: 0,
                    levels: Vec::new(),
                    zero_allowed: true,
                    dynamic_allowed: false,
                }),
            ModelInfo::new("qwen3-max", "iflow").with_max_completion_tokens(65_536),
        ],
        _ => Vec::new(),
    }
}

fn retag(mut info: ModelInfo, provider: &str) -> ModelInfo {
    info.provider = provider.to_string();
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemini3_models_are_level_only() {
        let models = builtin_models("gemini");
        let pro = models
            .iter()
            .find(|m| m.id == "gemini-3-pro-preview")
            .expect("gemini-3-pro-preview registered");
        let support = pro.thinking.as_ref().expect("thinking support");
        assert!(!support.budget_range());
        assert!(support.has_levels());
    }

    #[test]
    fn antigravity_claude_thinking_has_budget_range() {
        let models = builtin_models("antigravity");
        let claude = models
            .iter()
            .find(|m| m.id == "gemini-claude-sonnet-4-5-thinking")
            .expect("claude-on-antigravity registered");
        let support = claude.thinking.as_ref().expect("thinking support");
        assert!(support.budget_range());
        assert!(!support.has_levels());
    }

    #[test]
    fn unknown_provider_has_no_builtins() {
        assert!(builtin_models("nope").is_empty());
    }
}
