//! JSON-Schema cleaner for Gemini-family tool declarations.
//!
//! The Gemini function-calling schema dialect rejects several JSON-Schema
//! keywords and cannot represent `$ref` cycles; cyclic references collapse
//! into a description-only placeholder instead of expanding forever.

use std::collections::HashSet;

use serde_json::{Map, Value};

const DROPPED_KEYWORDS: &[&str] = &[
    "$schema",
    "$id",
    "additionalProperties",
    "unevaluatedProperties",
    "strict",
    "exclusiveMaximum",
    "exclusiveMinimum",
    "patternProperties",
    "const",
];

/// Cleans one tool parameter schema in place: resolves local `$ref`s against
/// `$defs`/`definitions`, drops unsupported keywords, and normalizes
/// `format` values Gemini rejects.
pub fn clean_tool_schema(schema: &Value) -> Value {
    let definitions = collect_definitions(schema);
    let mut visiting = HashSet::new();
    clean_node(schema, &definitions, &mut visiting)
}

fn collect_definitions(schema: &Value) -> Map<String, Value> {
    let mut definitions = Map::new();
    for key in ["$defs", "definitions"] {
        if let Some(Value::Object(defs)) = schema.get(key) {
            for (name, def) in defs {
                definitions.insert(format!("#/{key}/{name}"), def.clone());
            }
        }
    }
    definitions
}

fn clean_node(
    node: &Value,
    definitions: &Map<String, Value>,
    visiting: &mut HashSet<String>,
) -> Value {
    match node {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get("$ref") {
                return resolve_ref(reference, map, definitions, visiting);
            }
            let mut out = Map::new();
            for (key, value) in map {
                if DROPPED_KEYWORDS.contains(&key.as_str())
                    || key == "$defs"
                    || key == "definitions"
                {
                    continue;
                }
                if key == "format" {
                    // Gemini only understands a small set of format values.
                    match value.as_str() {
                        Some("date-time") | Some("date") | Some("time") | Some("enum")
                        | Some("int32") | Some("int64") | Some("float") | Some("double") => {
                            out.insert(key.clone(), value.clone());
                        }
                        _ => {}
                    }
                    continue;
                }
                out.insert(key.clone(), clean_node(value, definitions, visiting));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| clean_node(item, definitions, visiting))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_ref(
    reference: &str,
    node: &Map<String, Value>,
    definitions: &Map<String, Value>,
    visiting: &mut HashSet<String>,
) -> Value {
    if visiting.contains(reference) {
        // Cycle: emit a description-only placeholder instead of expanding.
        let description = node
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("recursive reference")
            .to_string();
        return serde_json::json!({"type": "object", "description": description});
    }
    let Some(target) = definitions.get(reference) else {
        return serde_json::json!({
            "type": "object",
            "description": format!("unresolved reference {reference}"),
        });
    };
    visiting.insert(reference.to_string());
    let resolved = clean_node(&target.clone(), definitions, visiting);
    visiting.remove(reference);
    resolved
}

/// Cleans every function declaration schema in a (possibly enveloped)
/// Gemini request body.
pub(crate) fn clean_gemini_tools(body: &mut Value, root: &str) {
    let tools_path = if root.is_empty() {
        "tools".to_string()
    } else {
        format!("{root}.tools")
    };
    let Some(Value::Array(tools)) = aiproxy_common::json::get_mut(body, &tools_path) else {
        return;
    };
    for tool in tools {
        let Some(Value::Array(declarations)) =
            aiproxy_common::json::get_mut(tool, "functionDeclarations")
        else {
            continue;
        };
        for declaration in declarations {
            for key in ["parameters", "parametersJsonSchema"] {
                if let Some(schema) = declaration.get(key) {
                    let cleaned = clean_tool_schema(schema);
                    aiproxy_common::json::set(declaration, key, cleaned);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drops_unsupported_keywords_and_inlines_refs() {
        let schema = json!({
            "$schema": "https://json-schema.org/draft-07/schema",
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "path": {"type": "string", "format": "uri"},
                "node": {"$ref": "#/$defs/node"},
            },
            "$defs": {"node": {"type": "object", "properties": {"name": {"type": "string"}}}},
        });
        let cleaned = clean_tool_schema(&schema);
        assert!(cleaned.get("$schema").is_none());
        assert!(cleaned.get("additionalProperties").is_none());
        assert!(cleaned.get("$defs").is_none());
        // Unsupported format dropped, reference inlined.
        assert!(cleaned["properties"]["path"].get("format").is_none());
        assert_eq!(
            cleaned["properties"]["node"]["properties"]["name"]["type"],
            json!("string")
        );
    }

    #[test]
    fn ref_cycles_become_placeholders() {
        let schema = json!({
            "type": "object",
            "properties": {"tree": {"$ref": "#/$defs/tree"}},
            "$defs": {
                "tree": {
                    "type": "object",
                    "properties": {"children": {"type": "array", "items": {"$ref": "#/$defs/tree"}}},
                },
            },
        });
        let cleaned = clean_tool_schema(&schema);
        let inner = &cleaned["properties"]["tree"]["properties"]["children"]["items"];
        assert_eq!(inner["type"], json!("object"));
        assert!(inner["description"].as_str().expect("description").contains("recursive"));
    }

    #[test]
    fn unresolved_refs_do_not_panic() {
        let schema = json!({"$ref": "#/definitions/missing"});
        let cleaned = clean_tool_schema(&schema);
        assert!(cleaned["description"]
            .as_str()
            .expect("description")
            .contains("unresolved"));
    }
}
