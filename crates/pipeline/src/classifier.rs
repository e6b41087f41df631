//! Hybrid Tool-Necessity Classifier: decides whether the upstream call should
//! advertise `tool_choice=required` (the request is clearly asking for an
//! action) or leave it at `auto` (the request reads as research, explanation,
//! or is too ambiguous to force a tool call).
//!
//! Two stages, per the design: Stage A walks the conversation and extracts
//! `(verb, artifact)` action pairs from user turns; Stage B runs a
//! priority-ordered rule engine over those pairs. Both stages are pure,
//! deterministic, and synchronous — no network, no per-request state beyond
//! what's in the request itself.

use std::sync::LazyLock;

use regex::Regex;

use crate::messages::anthropic::{AnthropicContent, AnthropicMessage, AnthropicRole};

/// Verbs that strongly imply a file/command mutation is being requested.
const STRONG_IMPLEMENTATION_VERBS: &[&str] =
    &["create", "write", "edit", "update", "fix", "implement", "build", "run", "delete", "remove", "add", "refactor"];

/// Weaker implementation verbs: still action-oriented, but common enough in
/// research requests too ("generate a summary") that artifact presence
/// matters more for these.
const WEAK_IMPLEMENTATION_VERBS: &[&str] = &["generate", "make", "change", "modify", "apply"];

const RESEARCH_VERBS: &[&str] =
    &["read", "look", "check", "research", "explain", "describe", "show", "find", "search", "review", "analyze", "understand", "explore"];

/// Tool names Stage A treats as "research" when found in an assistant turn's
/// tool calls — used to detect a completed research phase.
const RESEARCH_TOOLS: &[&str] = &["task", "read", "grep", "glob", "websearch", "webfetch"];

/// Phrases that mark a request as asking about a tool hypothetically rather
/// than asking for it to be invoked.
const NEGATION_PHRASES: &[&str] = &["show me how to", "what if", "without actually", "hypothetically", "in theory", "just curious"];

static FILE_ARTIFACT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b[\w./-]+\.(rs|py|js|ts|tsx|jsx|go|java|c|cpp|h|hpp|rb|sh|md|txt|json|ya?ml|toml|html|css)\b")
        .expect("artifact regex is valid")
});

static EXPLAIN_TOOL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bexplain\s+(the|what|how)\b.*\btool\b").expect("explain-tool regex is valid"));

/// How many trailing messages Stage A scans for a completed research phase.
const RESEARCH_LOOKBACK: usize = 6;

/// One extracted `(verb, artifact)` signal from a user turn.
#[derive(Debug, Clone)]
struct ActionPair {
    verb: Verb,
    has_artifact: bool,
    is_explanation_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Strong,
    Weak,
    Research,
    None,
}

/// Output of the classifier: whether tool use should be forced for the
/// upcoming upstream call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDecision {
    pub require_tools: bool,
    pub confident: bool,
    pub reason: &'static str,
}

fn text_of(message: &AnthropicMessage) -> String {
    message
        .content
        .iter()
        .filter_map(|block| match block {
            AnthropicContent::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn tool_names_of(message: &AnthropicMessage) -> Vec<String> {
    message
        .content
        .iter()
        .filter_map(|block| match block {
            AnthropicContent::ToolUse { name, .. } => Some(name.to_ascii_lowercase()),
            _ => None,
        })
        .collect()
}

fn classify_verb(word: &str) -> Verb {
    if STRONG_IMPLEMENTATION_VERBS.contains(&word) {
        Verb::Strong
    } else if WEAK_IMPLEMENTATION_VERBS.contains(&word) {
        Verb::Weak
    } else if RESEARCH_VERBS.contains(&word) {
        Verb::Research
    } else {
        Verb::None
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_lowercase())
        .collect()
}

/// Stage A: extract the dominant action signal from a single user turn's text.
fn extract_action_pair(text: &str) -> ActionPair {
    let is_explanation_only =
        NEGATION_PHRASES.iter().any(|phrase| text.to_ascii_lowercase().contains(phrase)) || EXPLAIN_TOOL_PATTERN.is_match(text);

    let has_artifact = FILE_ARTIFACT.is_match(text);

    let verb = tokenize(text)
        .into_iter()
        .map(|word| classify_verb(&word))
        .max_by_key(|v| match v {
            Verb::Strong => 3,
            Verb::Weak => 2,
            Verb::Research => 1,
            Verb::None => 0,
        })
        .unwrap_or(Verb::None);

    ActionPair {
        verb,
        has_artifact,
        is_explanation_only,
    }
}

/// Whether `text` reads as a report of completed work rather than a plan —
/// used to decide whether a continuation request should be treated as fresh.
fn looks_like_completion_report(text: &str) -> bool {
    const MARKERS: &[&str] = &["completed", "done", "finished", "successfully", "implemented", "all set"];
    let lower = text.to_ascii_lowercase();
    MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Stage A over the full history: the current (last) user turn's pair, plus
/// whether a research phase completed in the last [`RESEARCH_LOOKBACK`]
/// messages, walking back through intervening completion-report assistant
/// turns to find the user request a compound "now do X" continues from.
struct StageAResult {
    current: ActionPair,
    research_done: bool,
}

fn run_stage_a(messages: &[AnthropicMessage]) -> Option<StageAResult> {
    let last_user_index = messages.iter().rposition(|m| m.role == AnthropicRole::User)?;
    let current_text = text_of(&messages[last_user_index]);
    let mut current = extract_action_pair(&current_text);

    // Compound-request continuation: if the latest user turn carries no
    // implementation signal of its own, walk back to the prior user turn
    // unless an intervening assistant turn reports the work as already done.
    if current.verb == Verb::None && !current.has_artifact {
        let mut idx = last_user_index;
        while idx > 0 {
            idx -= 1;
            let msg = &messages[idx];
            if msg.role == AnthropicRole::Assistant && looks_like_completion_report(&text_of(msg)) {
                break;
            }
            if msg.role == AnthropicRole::User {
                let prior = extract_action_pair(&text_of(msg));
                if prior.verb != Verb::None || prior.has_artifact {
                    current = prior;
                }
                break;
            }
        }
    }

    let research_done = messages
        .iter()
        .rev()
        .take(RESEARCH_LOOKBACK)
        .any(|m| m.role == AnthropicRole::Assistant && tool_names_of(m).iter().any(|name| RESEARCH_TOOLS.contains(&name.as_str())));

    Some(StageAResult { current, research_done })
}

/// Stage B: priority-ordered rules over the Stage A signal. Always total —
/// every input resolves to a decision, even an empty conversation.
fn run_stage_b(stage_a: Option<StageAResult>) -> RuleDecision {
    let Some(stage_a) = stage_a else {
        return RuleDecision {
            require_tools: false,
            confident: false,
            reason: "no user turn found in the conversation",
        };
    };

    let pair = &stage_a.current;

    if pair.is_explanation_only {
        return RuleDecision {
            require_tools: false,
            confident: true,
            reason: "request reads as explanation-only, not a call to action",
        };
    }

    if pair.verb == Verb::Strong && pair.has_artifact {
        return RuleDecision {
            require_tools: true,
            confident: true,
            reason: "strong implementation verb with a named file artifact",
        };
    }

    if stage_a.research_done && (pair.verb == Verb::Strong || pair.verb == Verb::Weak) {
        return RuleDecision {
            require_tools: true,
            confident: true,
            reason: "research phase completed, current turn asks to act on it",
        };
    }

    if pair.verb == Verb::Research && !pair.has_artifact {
        return RuleDecision {
            require_tools: false,
            confident: true,
            reason: "pure research request, no implementation signal",
        };
    }

    if pair.verb == Verb::Strong || (pair.verb == Verb::Weak && pair.has_artifact) {
        return RuleDecision {
            require_tools: true,
            confident: false,
            reason: "implementation verb present without a clear artifact",
        };
    }

    RuleDecision {
        require_tools: false,
        confident: false,
        reason: "ambiguous request, defaulting to auto tool choice",
    }
}

/// Classify `messages` (the full inbound conversation, in order) and decide
/// whether the upcoming upstream call should force tool use.
pub fn classify(messages: &[AnthropicMessage]) -> RuleDecision {
    run_stage_b(run_stage_a(messages))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(text: &str) -> AnthropicMessage {
        AnthropicMessage {
            role: AnthropicRole::User,
            content: vec![AnthropicContent::Text { text: text.to_string() }],
        }
    }

    fn assistant_tool_call(name: &str) -> AnthropicMessage {
        AnthropicMessage {
            role: AnthropicRole::Assistant,
            content: vec![AnthropicContent::ToolUse {
                id: "toolu_1".to_string(),
                name: name.to_string(),
                input: json!({}),
            }],
        }
    }

    fn tool_result(text: &str) -> AnthropicMessage {
        AnthropicMessage {
            role: AnthropicRole::User,
            content: vec![AnthropicContent::ToolResult {
                tool_use_id: "toolu_1".to_string(),
                content: vec![crate::messages::anthropic::AnthropicToolResultContent::Text { text: text.to_string() }],
            }],
        }
    }

    #[test]
    fn compound_request_continuation_forces_tools() {
        // Scenario 3: research turn, then "now please update CLAUDE.md based on the research".
        let messages = vec![
            user("research the logging layer"),
            assistant_tool_call("Task"),
            tool_result("logging uses the `log` crate throughout"),
            user("now please update CLAUDE.md based on the research"),
        ];

        let decision = classify(&messages);
        assert!(decision.require_tools);
        assert!(decision.confident);
    }

    #[test]
    fn pure_research_request_does_not_force_tools() {
        // Scenario 4.
        let messages = vec![user("read the documentation and explain the architecture")];

        let decision = classify(&messages);
        assert!(!decision.require_tools);
        assert!(decision.confident);
    }

    #[test]
    fn explanation_only_is_not_forced_even_with_strong_verb() {
        let messages = vec![user("show me how to fix a bug in main.rs, hypothetically")];

        let decision = classify(&messages);
        assert!(!decision.require_tools);
    }

    #[test]
    fn classifier_is_total_for_empty_conversation() {
        let decision = classify(&[]);
        assert!(!decision.require_tools);
        assert!(!decision.confident);
    }

    #[test]
    fn classifier_is_deterministic() {
        let messages = vec![user("fix the bug in src/main.rs")];
        let first = classify(&messages);
        let second = classify(&messages);
        assert_eq!(first, second);
    }
}
