//! OAuth tool-name prefixing.
//!
//! Anthropic's OAuth backend reserves bare tool names for its own built-ins;
//! custom tools are renamed with a `proxy_` prefix before forwarding and the
//! prefix is stripped from everything flowing back to the client.

use aiproxy_common::json;
use serde_json::Value;

pub(crate) const TOOL_PREFIX: &str = "proxy_";

/// Prefixes custom tool names in an outbound request: `tools[]` entries
/// without a `type` (built-ins keep theirs), a specific `tool_choice`, and
/// historical `tool_use` blocks in the conversation.
pub(crate) fn apply_tool_prefix(body: &mut Value) {
    if let Some(Value::Array(tools)) = json::get_mut(body, "tools") {
        for tool in tools {
            let is_builtin = json::get_str(tool, "type").map(|t| !t.is_empty()).unwrap_or(false);
            if is_builtin {
                continue;
            }
            prefix_field(tool, "name");
        }
    }
    if json::get_str(body, "tool_choice.type") == Some("tool") {
        if let Some(choice) = json::get_mut(body, "tool_choice") {
            prefix_field(choice, "name");
        }
    }
    if let Some(Value::Array(messages)) = json::get_mut(body, "messages") {
        for message in messages {
            if let Some(Value::Array(content)) = json::get_mut(message, "content") {
                for part in content {
                    if json::get_str(part, "type") == Some("tool_use") {
                        prefix_field(part, "name");
                    }
                }
            }
        }
    }
}

/// Strips the prefix from a unary response's `tool_use` blocks.
pub(crate) fn strip_prefix_from_response(body: &mut Value) {
    if let Some(Value::Array(content)) = json::get_mut(body, "content") {
        for part in content {
            if json::get_str(part, "type") == Some("tool_use") {
                strip_field(part, "name");
            }
        }
    }
}

/// Strips the prefix from one SSE line (`content_block` starts and any
/// `tool_name` references). Returns the rewritten line when changed.
pub(crate) fn strip_prefix_from_stream_line(line: &[u8]) -> Option<Vec<u8>> {
    let text = std::str::from_utf8(line).ok()?;
    let trimmed = text.trim();
    let payload = trimmed.strip_prefix("data:").map(str::trim)?;
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    let mut value: Value = serde_json::from_str(payload).ok()?;
    let mut changed = false;
    if json::get_str(&value, "content_block.type") == Some("tool_use") {
        if let Some(block) = json::get_mut(&mut value, "content_block") {
            changed |= strip_field(block, "name");
        }
    }
    if let Some(block) = json::get_mut(&mut value, "content_block") {
        changed |= strip_field(block, "tool_name");
    }
    if !changed {
        return None;
    }
    Some(format!("data: {}", serde_json::to_string(&value).ok()?).into_bytes())
}

fn prefix_field(node: &mut Value, field: &str) {
    let Some(name) = json::get_str(node, field) else {
        return;
    };
    if name.is_empty() || name.starts_with(TOOL_PREFIX) {
        return;
    }
    let prefixed = format!("{TOOL_PREFIX}{name}");
    json::set(node, field, Value::String(prefixed));
}

fn strip_field(node: &mut Value, field: &str) -> bool {
    let Some(name) = json::get_str(node, field) else {
        return false;
    };
    let Some(stripped) = name.strip_prefix(TOOL_PREFIX) else {
        return false;
    };
    let stripped = stripped.to_string();
    json::set(node, field, Value::String(stripped));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefixes_custom_tools_but_not_builtins() {
        let mut body = json!({
            "tools": [
                {"name": "Read"},
                {"type": "web_search_20250305", "name": "web_search"},
            ],
            "tool_choice": {"type": "tool", "name": "Read"},
            "messages": [{"role": "assistant", "content": [
                {"type": "tool_use", "id": "t1", "name": "Read", "input": {}},
            ]}],
        });
        apply_tool_prefix(&mut body);
        assert_eq!(json::get_str(&body, "tools.0.name"), Some("proxy_Read"));
        assert_eq!(json::get_str(&body, "tools.1.name"), Some("web_search"));
        assert_eq!(json::get_str(&body, "tool_choice.name"), Some("proxy_Read"));
        assert_eq!(
            json::get_str(&body, "messages.0.content.0.name"),
            Some("proxy_Read")
        );
        // Idempotent: a second pass does not double the prefix.
        apply_tool_prefix(&mut body);
        assert_eq!(json::get_str(&body, "tools.0.name"), Some("proxy_Read"));
    }

    #[test]
    fn strips_prefix_from_response_and_stream() {
        let mut body = json!({"content": [
            {"type": "tool_use", "id": "t1", "name": "proxy_Read", "input": {}},
            {"type": "text", "text": "x"},
        ]});
        strip_prefix_from_response(&mut body);
        assert_eq!(json::get_str(&body, "content.0.name"), Some("Read"));

        let line = br#"data: {"type":"content_block_start","index":0,"content_block":{"type":"tool_use","name":"proxy_Read"}}"#;
        let rewritten = strip_prefix_from_stream_line(line).expect("rewritten");
        assert!(String::from_utf8_lossy(&rewritten).contains("\"name\":\"Read\""));

        let plain = br#"data: {"type":"content_block_delta","delta":{"type":"text_delta","text":"hi"}}"#;
        assert!(strip_prefix_from_stream_line(plain).is_none());
    }
}
