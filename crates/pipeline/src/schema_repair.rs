//! Tool Schema Repair: detects empty or missing tool input schemas and, where
//! the tool name matches a known alias, substitutes a canonical schema before
//! the request ever reaches the translator.

use serde_json::{Value, json};

use crate::{error::PipelineError, messages::anthropic::AnthropicTool};

/// Fixed alias table. Operator-facing tool-description overrides live in the
/// YAML overrides file, but this table — encoding protocol-level naming
/// conventions, not per-deployment policy — is compiled in.
const ALIASES: &[(&str, &str)] = &[
    ("web_search", "WebSearch"),
    ("read_file", "Read"),
    ("write_file", "Write"),
    ("list_files", "Glob"),
    ("search_files", "Grep"),
    ("run_command", "Bash"),
    ("edit_file", "Edit"),
];

fn canonical_schema(name: &str) -> Option<Value> {
    match name {
        "WebSearch" => Some(json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"],
        })),
        "Read" => Some(json!({
            "type": "object",
            "properties": { "file_path": { "type": "string" } },
            "required": ["file_path"],
        })),
        "Write" => Some(json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string" },
                "content": { "type": "string" },
            },
            "required": ["file_path", "content"],
        })),
        "Glob" => Some(json!({
            "type": "object",
            "properties": { "pattern": { "type": "string" } },
            "required": ["pattern"],
        })),
        "Grep" => Some(json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "path": { "type": "string" },
            },
            "required": ["pattern"],
        })),
        "Bash" => Some(json!({
            "type": "object",
            "properties": { "command": { "type": "string" } },
            "required": ["command"],
        })),
        "Edit" => Some(json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string" },
                "old_string": { "type": "string" },
                "new_string": { "type": "string" },
            },
            "required": ["file_path", "old_string", "new_string"],
        })),
        _ => None,
    }
}

/// Resolve `name` to the canonical tool name it aliases, if any. Case- and
/// separator-insensitive: `"Web_Search"`, `"web-search"`, and `"WEBSEARCH"`
/// all resolve to the same alias as `"web_search"`.
fn resolve_alias(name: &str) -> Option<&'static str> {
    let normalized: String = name.to_ascii_lowercase().replace(['-', ' '], "_");

    ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalized)
        .map(|(_, canonical)| *canonical)
        .or_else(|| {
            // The name may already *be* the canonical spelling, just cased
            // differently (e.g. a client sending "websearch").
            ["WebSearch", "Read", "Write", "Glob", "Grep", "Bash", "Edit"]
                .into_iter()
                .find(|canonical| canonical.eq_ignore_ascii_case(name))
        })
}

fn schema_is_empty(schema: &Value) -> bool {
    let Some(obj) = schema.as_object() else {
        return true;
    };

    let has_type = obj.get("type").is_some();
    let has_properties = obj.get("properties").and_then(Value::as_object).is_some_and(|p| !p.is_empty());
    let has_required = obj.get("required").and_then(Value::as_array).is_some_and(|r| !r.is_empty());

    !(has_type && (has_properties || has_required))
}

/// Repair every tool definition with an empty schema in place. When a tool
/// can't be repaired: in strict mode, the whole request is rejected as
/// `InvalidToolDefinition`; otherwise the tool is forwarded with its
/// original (possibly empty) schema and a warning is logged.
pub fn repair_tools(tools: Vec<AnthropicTool>, strict_mode: bool) -> Result<Vec<AnthropicTool>, PipelineError> {
    let mut repaired = Vec::with_capacity(tools.len());

    for mut tool in tools {
        if schema_is_empty(&tool.input_schema) {
            match resolve_alias(&tool.name).and_then(canonical_schema) {
                Some(schema) => {
                    log::info!("repaired empty schema for tool '{}' using canonical alias", tool.name);
                    tool.input_schema = schema;
                }
                None if strict_mode => {
                    return Err(PipelineError::InvalidToolDefinition(format!(
                        "tool '{}' has an empty input schema and no canonical alias to repair it",
                        tool.name
                    )));
                }
                None => {
                    log::warn!(
                        "tool '{}' has an empty input schema and no canonical alias; forwarding as-is",
                        tool.name
                    );
                }
            }
        }
        repaired.push(tool);
    }

    Ok(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, schema: Value) -> AnthropicTool {
        AnthropicTool {
            name: name.to_string(),
            description: "a tool".to_string(),
            input_schema: schema,
        }
    }

    #[test]
    fn restores_canonical_schema_for_known_alias() {
        // Scenario 1: {name:"web_search", input_schema:{}} repairs to canonical WebSearch schema.
        let tools = vec![tool("web_search", json!({}))];
        let repaired = repair_tools(tools, false).unwrap();

        assert_eq!(repaired[0].input_schema["type"], "object");
        assert_eq!(repaired[0].input_schema["required"][0], "query");
    }

    #[test]
    fn leaves_well_formed_schema_untouched() {
        let schema = json!({ "type": "object", "properties": { "x": { "type": "string" } } });
        let tools = vec![tool("CustomTool", schema.clone())];
        let repaired = repair_tools(tools, false).unwrap();

        assert_eq!(repaired[0].input_schema, schema);
    }

    #[test]
    fn non_strict_mode_passes_through_unrepairable_schema() {
        let tools = vec![tool("totally_unknown_tool", json!({}))];
        let repaired = repair_tools(tools, false).unwrap();

        assert_eq!(repaired[0].input_schema, json!({}));
    }

    #[test]
    fn strict_mode_rejects_unrepairable_schema() {
        let tools = vec![tool("totally_unknown_tool", json!({}))];
        let err = repair_tools(tools, true).unwrap_err();

        assert!(matches!(err, PipelineError::InvalidToolDefinition(_)));
    }

    #[test]
    fn recognizes_case_and_separator_variants() {
        let tools = vec![tool("Read-File", json!(null))];
        let repaired = repair_tools(tools, false).unwrap();

        assert_eq!(repaired[0].input_schema["required"][0], "file_path");
    }
}
