//! System-Message Rewriter: ordered regex removals, literal find/replace
//! pairs, then optional prepend/append. Applied in that exact order; a
//! malformed regex is skipped with a warning rather than aborting the
//! request.

use config::SystemMessageOverrides;
use regex::Regex;

/// Rewrite `system` per the configured overrides.
pub fn rewrite(system: &str, overrides: &SystemMessageOverrides) -> String {
    let mut text = system.to_string();

    for pattern in &overrides.remove_patterns {
        match Regex::new(pattern) {
            Ok(re) => text = re.replace_all(&text, "").into_owned(),
            Err(e) => log::warn!("skipping invalid system-message remove pattern '{pattern}': {e}"),
        }
    }

    for replacement in &overrides.replacements {
        text = text.replace(&replacement.find, &replacement.replace);
    }

    if let Some(prepend) = &overrides.prepend {
        text = format!("{prepend}{text}");
    }

    if let Some(append) = &overrides.append {
        text = format!("{text}{append}");
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::TextReplacement;

    fn overrides() -> SystemMessageOverrides {
        SystemMessageOverrides {
            remove_patterns: vec![r"\bsecret-[a-z]+\b".to_string()],
            replacements: vec![TextReplacement {
                find: "OldName".to_string(),
                replace: "NewName".to_string(),
            }],
            prepend: Some("PREFIX ".to_string()),
            append: Some(" SUFFIX".to_string()),
        }
    }

    #[test]
    fn applies_removals_replacements_and_prepend_append_in_order() {
        let result = rewrite("You are OldName, keep secret-token safe", &overrides());
        assert_eq!(result, "PREFIX You are NewName, keep  safe SUFFIX");
    }

    #[test]
    fn invalid_regex_is_skipped_not_fatal() {
        let overrides = SystemMessageOverrides {
            remove_patterns: vec!["(unclosed".to_string()],
            replacements: vec![],
            prepend: None,
            append: None,
        };

        let result = rewrite("hello world", &overrides);
        assert_eq!(result, "hello world");
    }

    #[test]
    fn empty_overrides_is_identity() {
        let overrides = SystemMessageOverrides::default();
        assert_eq!(rewrite("unchanged", &overrides), "unchanged");
    }
}
