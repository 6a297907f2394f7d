//! Antigravity model-name aliasing.
//!
//! The upstream rotates internal revision names for some models; clients see
//! stable public names. Both directions are table lookups.

const ALIASES: &[(&str, &str)] = &[
    // (internal upstream name, client-visible name)
    ("rev19-uic3-1p", "gemini-2.5-computer-use-preview-10-2025"),
    ("gemini-3-pro-preview-11-2025", "gemini-3-pro-preview"),
    ("claude-sonnet-4-5", "gemini-claude-sonnet-4-5"),
    ("claude-sonnet-4-5-thinking", "gemini-claude-sonnet-4-5-thinking"),
];

/// Client-visible name -> internal upstream name.
pub(crate) fn to_upstream(model: &str) -> &str {
    for (internal, public) in ALIASES {
        if public.eq_ignore_ascii_case(model) {
            return internal;
        }
    }
    model
}

/// Internal upstream name -> client-visible name.
pub(crate) fn to_public(model: &str) -> &str {
    for (internal, public) in ALIASES {
        if internal.eq_ignore_ascii_case(model) {
            return public;
        }
    }
    model
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_tables_are_inverse() {
        assert_eq!(
            to_upstream("gemini-2.5-computer-use-preview-10-2025"),
            "rev19-uic3-1p"
        );
        assert_eq!(
            to_public("rev19-uic3-1p"),
            "gemini-2.5-computer-use-preview-10-2025"
        );
        assert_eq!(to_upstream("gemini-claude-sonnet-4-5-thinking"), "claude-sonnet-4-5-thinking");
        assert_eq!(to_upstream("unmapped"), "unmapped");
        assert_eq!(to_public("unmapped"), "unmapped");
    }
}
