use std::collections::HashMap;

use serde::Deserialize;

/// Optional YAML-sourced overrides layered on top of the flat config file.
///
/// Maps directly onto the two YAML documents this policy layer needs:
/// a `toolDescriptions` map and a `systemMessage` rewrite rule set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OverridesConfig {
    /// Tool name to replacement description. Applied by the tool filter before
    /// the request is forwarded upstream.
    #[serde(rename = "toolDescriptions")]
    pub tool_descriptions: HashMap<String, String>,
    /// System message rewrite rules.
    #[serde(rename = "systemMessage")]
    pub system_message: SystemMessageOverrides,
}

/// Ordered rewrite rules applied to the concatenated system message: remove,
/// then find/replace, then prepend/append.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SystemMessageOverrides {
    /// Regex patterns whose matches are deleted from the system message.
    /// An invalid pattern is skipped with a warning, never aborts the request.
    #[serde(rename = "removePatterns")]
    pub remove_patterns: Vec<String>,
    /// Literal find/replace pairs, applied in order after `remove_patterns`.
    pub replacements: Vec<TextReplacement>,
    /// Text prepended to the system message after removals and replacements.
    pub prepend: Option<String>,
    /// Text appended to the system message after removals and replacements.
    pub append: Option<String>,
}

/// A single literal find/replace pair.
#[derive(Debug, Clone, Deserialize)]
pub struct TextReplacement {
    /// Literal substring to search for.
    pub find: String,
    /// Replacement text.
    pub replace: String,
}

impl OverridesConfig {
    /// Parse a YAML overrides document.
    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn parses_full_overrides_document() {
        let yaml = indoc! {r#"
            toolDescriptions:
              WebSearch: "Search the web for current information."
            systemMessage:
              removePatterns:
                - "You are Claude.*\n"
              replacements:
                - find: "Anthropic"
                  replace: "the provider"
              prepend: "Operator note: "
              append: "\nEnd of system message."
        "#};

        let overrides = OverridesConfig::from_yaml(yaml).unwrap();

        assert_eq!(
            overrides.tool_descriptions.get("WebSearch").map(String::as_str),
            Some("Search the web for current information.")
        );
        assert_eq!(overrides.system_message.remove_patterns.len(), 1);
        assert_eq!(overrides.system_message.replacements[0].find, "Anthropic");
        assert_eq!(overrides.system_message.prepend.as_deref(), Some("Operator note: "));
    }

    #[test]
    fn empty_document_yields_defaults() {
        let overrides = OverridesConfig::from_yaml("").unwrap();
        assert!(overrides.tool_descriptions.is_empty());
        assert!(overrides.system_message.replacements.is_empty());
    }
}
