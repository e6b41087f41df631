//! Channel Parser: splits a backend response body into analysis/final/
//! commentary segments when it contains inline `<|start|>...<|end|>`
//! delimiter tokens (the "harmony" format some backend models emit instead
//! of plain text), plus the history-preservation rule for carrying forward
//! unresolved analysis across turns.
//!
//! The parser only reads; it never mutates visible content itself — replacing
//! the assistant's visible text with the parsed `final` segment is the
//! backward translator's job.

use std::sync::LazyLock;

use regex::Regex;

/// Matches one complete `<|start|>ROLE<|channel|>CHANNEL<|message|>BODY<|end|>`
/// span, or the same with a trailing `<|return|>` instead of `<|end|>`.
/// Role and channel are case-insensitive; the body is matched lazily and may
/// span multiple lines.
static CHANNEL_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<\|start\|>(?P<role>[a-z]+)<\|channel\|>(?P<channel>[a-z]+)<\|message\|>(?P<body>.*?)<\|(?:end|return)\|>")
        .expect("channel token regex is valid")
});

/// Role a channel segment was attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentRole {
    Assistant,
    User,
    System,
    Developer,
    Tool,
}

impl SegmentRole {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "user" => Self::User,
            "system" => Self::System,
            "developer" => Self::Developer,
            "tool" => Self::Tool,
            _ => Self::Assistant,
        }
    }
}

/// Which logical channel a segment was tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Analysis,
    Final,
    Commentary,
    Unknown,
}

impl Channel {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "analysis" => Self::Analysis,
            "final" => Self::Final,
            "commentary" => Self::Commentary,
            _ => Self::Unknown,
        }
    }

    fn content_type(self) -> ContentType {
        match self {
            Self::Analysis => ContentType::Thinking,
            Self::Final => ContentType::Response,
            Self::Commentary => ContentType::ToolCall,
            Self::Unknown => ContentType::Regular,
        }
    }
}

/// How a segment's content should be treated once classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Thinking,
    Response,
    ToolCall,
    Regular,
}

/// One parsed delimiter-tagged span.
#[derive(Debug, Clone)]
pub struct ChannelSegment {
    pub role: SegmentRole,
    pub channel: Channel,
    pub content_type: ContentType,
    pub content: String,
    /// The raw, unparsed token span this segment came from.
    pub raw: String,
}

/// Result of parsing a complete response body.
#[derive(Debug, Clone, Default)]
pub struct ParsedChannelMessage {
    pub segments: Vec<ChannelSegment>,
    pub thinking_text: String,
    pub response_text: String,
    pub tool_call_text: String,
    /// Whether any channel delimiter tokens were found at all.
    pub has_harmony: bool,
}

/// Parse `body` for channel-tagged segments. Content without any delimiter
/// tokens returns `has_harmony = false` and `response_text` equal to the
/// original body, unchanged — this holds for any input, matching the
/// invariant that the parser never errors and never rejects malformed input.
pub fn parse(body: &str) -> ParsedChannelMessage {
    let mut message = ParsedChannelMessage::default();

    let mut matched_any = false;
    for captures in CHANNEL_TOKEN.captures_iter(body) {
        matched_any = true;

        let role = SegmentRole::parse(&captures["role"]);
        let channel = Channel::parse(&captures["channel"]);
        let content_type = channel.content_type();
        let content = captures["body"].to_string();

        match content_type {
            ContentType::Thinking => {
                message.thinking_text.push_str(&content);
            }
            ContentType::Response => {
                message.response_text.push_str(&content);
            }
            ContentType::ToolCall => {
                message.tool_call_text.push_str(&content);
            }
            ContentType::Regular => {}
        }

        message.segments.push(ChannelSegment {
            role,
            channel,
            content_type,
            content,
            raw: captures[0].to_string(),
        });
    }

    if !matched_any {
        message.response_text = body.to_string();
        message.has_harmony = false;
    } else {
        message.has_harmony = true;

        let start_count = body.matches("<|start|>").count();
        let end_count = body.matches("<|end|>").count() + body.matches("<|return|>").count();
        if start_count != end_count {
            log::warn!(
                "channel parser: mismatched start/end token counts (start={start_count}, end={end_count}); \
                 proceeding with best-effort extraction"
            );
        }
    }

    message
}

/// Tracks analysis/commentary content carried forward across turns for
/// models whose reasoning depends on seeing its own prior channel output.
///
/// Bounded to the most recent `MAX_HISTORY` messages; if the reference point
/// used to bound the preserved buffer is lost during truncation, the buffer
/// is cleared rather than risk resurfacing stale analysis.
#[derive(Debug, Clone, Default)]
pub struct ChannelHistory {
    preserved: Vec<String>,
    /// Index (within the conversation) of the last `final` segment seen.
    last_final_index: Option<usize>,
}

const MAX_HISTORY: usize = 50;

impl ChannelHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe a freshly parsed assistant message at conversation position
    /// `index`. If it carried a tool call, its thinking/commentary content is
    /// retained; a fresh `final` segment clears the preserved buffer.
    pub fn observe(&mut self, index: usize, parsed: &ParsedChannelMessage, had_tool_use: bool) {
        let saw_final = parsed.segments.iter().any(|s| s.channel == Channel::Final);

        if saw_final {
            self.preserved.clear();
            self.last_final_index = Some(index);
            return;
        }

        if had_tool_use {
            for segment in &parsed.segments {
                if matches!(segment.content_type, ContentType::Thinking | ContentType::ToolCall) {
                    self.preserved.push(segment.content.clone());
                }
            }
        }
    }

    /// Content that must be re-submitted as prior-assistant content on the
    /// next turn, concatenated in observation order.
    pub fn preserved_content(&self) -> Option<String> {
        if self.preserved.is_empty() {
            None
        } else {
            Some(self.preserved.join("\n"))
        }
    }

    /// Adjust bookkeeping when the conversation is truncated to its most
    /// recent `MAX_HISTORY` messages (or fewer). If the last-final reference
    /// point falls outside the retained window, the preserved buffer is
    /// cleared since it can no longer be correctly bounded.
    pub fn truncate(&mut self, total_messages: usize) {
        if total_messages <= MAX_HISTORY {
            return;
        }

        let cutoff = total_messages - MAX_HISTORY;
        match self.last_final_index {
            Some(index) if index >= cutoff => {
                self.last_final_index = Some(index - cutoff);
            }
            _ => {
                self.preserved.clear();
                self.last_final_index = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_without_tokens_is_returned_unchanged() {
        let parsed = parse("just a plain response, no channels here");
        assert!(!parsed.has_harmony);
        assert_eq!(parsed.response_text, "just a plain response, no channels here");
    }

    #[test]
    fn round_trips_analysis_and_final_channels() {
        // Scenario 7.
        let body = "<|start|>assistant<|channel|>analysis<|message|>thinking…<|end|>\
                     <|start|>assistant<|channel|>final<|message|>hello<|end|>";

        let parsed = parse(body);

        assert!(parsed.has_harmony);
        assert_eq!(parsed.response_text, "hello");
        assert_eq!(parsed.thinking_text, "thinking…");
    }

    #[test]
    fn recognizes_return_terminator() {
        let body = "<|start|>assistant<|channel|>final<|message|>done<|return|>";
        let parsed = parse(body);
        assert_eq!(parsed.response_text, "done");
    }

    #[test]
    fn role_and_channel_are_case_insensitive_with_default_role() {
        let body = "<|start|>ASSISTANT<|channel|>FINAL<|message|>hi<|end|>";
        let parsed = parse(body);
        assert_eq!(parsed.segments[0].role, SegmentRole::Assistant);
        assert_eq!(parsed.segments[0].channel, Channel::Final);
    }

    #[test]
    fn unknown_channel_maps_to_regular_content() {
        let body = "<|start|>assistant<|channel|>mystery<|message|>stuff<|end|>";
        let parsed = parse(body);
        assert_eq!(parsed.segments[0].content_type, ContentType::Regular);
    }

    #[test]
    fn mismatched_delimiters_never_error_just_warn() {
        let body = "<|start|>assistant<|channel|>final<|message|>partial";
        let parsed = parse(body);
        assert!(!parsed.has_harmony);
        assert_eq!(parsed.response_text, body);
    }

    #[test]
    fn history_retains_thinking_after_tool_use_until_next_final() {
        let mut history = ChannelHistory::new();

        let analysis_only = parse("<|start|>assistant<|channel|>analysis<|message|>plan the fix<|end|>");
        history.observe(0, &analysis_only, true);
        assert_eq!(history.preserved_content().as_deref(), Some("plan the fix"));

        let with_final = parse("<|start|>assistant<|channel|>final<|message|>done<|end|>");
        history.observe(1, &with_final, false);
        assert_eq!(history.preserved_content(), None);
    }

    #[test]
    fn truncation_clears_buffer_when_reference_point_is_lost() {
        let mut history = ChannelHistory::new();
        let analysis_only = parse("<|start|>assistant<|channel|>analysis<|message|>notes<|end|>");
        history.observe(0, &analysis_only, true);

        history.truncate(MAX_HISTORY + 10);

        assert_eq!(history.preserved_content(), None);
    }
}
