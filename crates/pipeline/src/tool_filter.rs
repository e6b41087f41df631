//! Tool Filter & Description Overrider: drops tools the operator has
//! blocklisted and rewrites descriptions from the YAML overrides file.

use std::collections::HashMap;

use crate::messages::anthropic::AnthropicTool;

/// Remove tools named in `skip_tools` and apply description overrides to the
/// rest. Order of the remaining tools is preserved.
pub fn apply(tools: Vec<AnthropicTool>, skip_tools: &[String], tool_descriptions: &HashMap<String, String>) -> Vec<AnthropicTool> {
    tools
        .into_iter()
        .filter(|tool| !skip_tools.iter().any(|skipped| skipped == &tool.name))
        .map(|mut tool| {
            if let Some(description) = tool_descriptions.get(&tool.name) {
                tool.description = description.clone();
            }
            tool
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str, description: &str) -> AnthropicTool {
        AnthropicTool {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: json!({ "type": "object" }),
        }
    }

    #[test]
    fn drops_skipped_tools() {
        let tools = vec![tool("WebSearch", "search the web"), tool("Read", "read a file")];
        let filtered = apply(tools, &["WebSearch".to_string()], &HashMap::new());

        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "Read");
    }

    #[test]
    fn overrides_description_when_present() {
        let tools = vec![tool("Read", "read a file")];
        let mut overrides = HashMap::new();
        overrides.insert("Read".to_string(), "Read the contents of a file from disk.".to_string());

        let filtered = apply(tools, &[], &overrides);

        assert_eq!(filtered[0].description, "Read the contents of a file from disk.");
    }

    #[test]
    fn leaves_unmentioned_tools_untouched() {
        let tools = vec![tool("Bash", "run a command")];
        let filtered = apply(tools, &[], &HashMap::new());

        assert_eq!(filtered[0].description, "run a command");
    }
}
