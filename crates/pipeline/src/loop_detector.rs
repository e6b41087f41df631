//! Loop Detector: fingerprints assistant tool calls across the conversation
//! and flags two repetition shapes — the same call fired three times in a
//! row, or two distinct calls alternating for two full cycles — either of
//! which usually means the backend is stuck retrying a fix that already
//! landed.
//!
//! Pure and synchronous: the detector only reads the message history handed
//! to it, never touches the network, and never fires on fewer than three
//! tool calls total.

use serde_json::Value;

use crate::messages::anthropic::{AnthropicContent, AnthropicMessage, AnthropicRole};

/// A tool call reduced to the identity the detector compares on: the tool
/// name plus a hash of its canonicalized arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    name: String,
    hash: String,
}

fn fingerprint(name: &str, arguments: &Value) -> Fingerprint {
    // Canonical JSON serialization normalizes whitespace and key order
    // (`serde_json::to_string` on a `Value` built from parsed JSON preserves
    // insertion order, which is stable for a given backend response) so two
    // functionally identical calls hash the same regardless of formatting.
    let canonical = serde_json::to_string(arguments).unwrap_or_default();
    Fingerprint {
        name: name.to_string(),
        hash: format!("{:x}", md5::compute(canonical)),
    }
}

fn extract_fingerprints(messages: &[AnthropicMessage]) -> Vec<Fingerprint> {
    messages
        .iter()
        .filter(|m| m.role == AnthropicRole::Assistant)
        .flat_map(|m| {
            m.content.iter().filter_map(|block| match block {
                AnthropicContent::ToolUse { name, input, .. } => Some(fingerprint(name, input)),
                _ => None,
            })
        })
        .collect()
}

/// What kind of repetition was detected, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    ConsecutiveIdentical,
    AlternatingPattern,
}

/// Result of running the detector over a conversation's tool-call history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopDetection {
    pub kind: Option<LoopKind>,
    pub tool_name: Option<String>,
    pub repetition_count: usize,
}

impl LoopDetection {
    fn none() -> Self {
        Self {
            kind: None,
            tool_name: None,
            repetition_count: 0,
        }
    }

    pub fn has_loop(&self) -> bool {
        self.kind.is_some()
    }

    /// A breaker message to surface to the client in place of forwarding the
    /// repeated tool call again, with a tool-specific suggestion.
    pub fn recommendation(&self) -> Option<String> {
        let tool_name = self.tool_name.as_deref()?;
        let suggestion = match tool_name {
            "Edit" | "MultiEdit" | "Write" => "The file may already be properly edited; try a different approach.",
            "Bash" => "This command doesn't appear to be making progress; check its output before retrying.",
            "TodoWrite" => "The todo list may already reflect the current state; try moving on to the next step.",
            _ => "This tool call doesn't appear to be making progress; try a different approach.",
        };
        Some(format!("It looks like `{tool_name}` has been called repeatedly with the same arguments. {suggestion}"))
    }
}

const MIN_TOOL_CALLS: usize = 3;
const CONSECUTIVE_TRIGGER: usize = 3;
const ALTERNATING_CYCLES: usize = 2;

/// Run the detector over `messages`, the full inbound conversation in order.
pub fn detect(messages: &[AnthropicMessage]) -> LoopDetection {
    let calls = extract_fingerprints(messages);

    if calls.len() < MIN_TOOL_CALLS {
        return LoopDetection::none();
    }

    if let Some(tail) = calls.len().checked_sub(CONSECUTIVE_TRIGGER) {
        let window = &calls[tail..];
        if window.windows(2).all(|pair| pair[0] == pair[1]) {
            return LoopDetection {
                kind: Some(LoopKind::ConsecutiveIdentical),
                tool_name: Some(window[0].name.clone()),
                repetition_count: window.len(),
            };
        }
    }

    let alternating_window = ALTERNATING_CYCLES * 2;
    if let Some(tail) = calls.len().checked_sub(alternating_window) {
        let window = &calls[tail..];
        let a = &window[0];
        let b = &window[1];
        if a != b && window.iter().enumerate().all(|(i, call)| if i % 2 == 0 { call == a } else { call == b }) {
            return LoopDetection {
                kind: Some(LoopKind::AlternatingPattern),
                tool_name: Some(b.name.clone()),
                repetition_count: ALTERNATING_CYCLES,
            };
        }
    }

    LoopDetection::none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assistant_call(name: &str, input: Value) -> AnthropicMessage {
        AnthropicMessage {
            role: AnthropicRole::Assistant,
            content: vec![AnthropicContent::ToolUse {
                id: "toolu_1".to_string(),
                name: name.to_string(),
                input,
            }],
        }
    }

    #[test]
    fn three_identical_calls_trigger_consecutive_loop() {
        // Scenario 5: three successive TodoWrite calls with identical arguments.
        let args = json!({ "todos": [{ "content": "fix bug", "status": "in_progress" }] });
        let messages = vec![
            assistant_call("TodoWrite", args.clone()),
            assistant_call("TodoWrite", args.clone()),
            assistant_call("TodoWrite", args),
        ];

        let detection = detect(&messages);
        assert!(detection.has_loop());
        assert_eq!(detection.kind, Some(LoopKind::ConsecutiveIdentical));
        assert_eq!(detection.tool_name.as_deref(), Some("TodoWrite"));
        assert!(detection.recommendation().unwrap().contains("todo list"));
    }

    #[test]
    fn never_triggers_below_three_tool_calls() {
        let args = json!({ "x": 1 });
        let messages = vec![assistant_call("Edit", args.clone()), assistant_call("Edit", args)];

        assert!(!detect(&messages).has_loop());
    }

    #[test]
    fn alternating_pattern_over_two_cycles_triggers() {
        let a = json!({ "file_path": "a.rs" });
        let b = json!({ "file_path": "b.rs" });
        let messages = vec![
            assistant_call("Edit", a.clone()),
            assistant_call("Edit", b.clone()),
            assistant_call("Edit", a.clone()),
            assistant_call("Edit", b),
        ];

        let detection = detect(&messages);
        assert_eq!(detection.kind, Some(LoopKind::AlternatingPattern));
    }

    #[test]
    fn distinct_calls_do_not_trigger() {
        let messages = vec![
            assistant_call("Read", json!({ "file_path": "a.rs" })),
            assistant_call("Read", json!({ "file_path": "b.rs" })),
            assistant_call("Read", json!({ "file_path": "c.rs" })),
        ];

        assert!(!detect(&messages).has_loop());
    }
}
