//! Splitting reconstructed assistant text into its reasoning and answer
//! parts for display.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static THINK_BLOCK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").unwrap());

static THINK_COMPLETE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>(.*?)</think>(.*)").unwrap());

static THINK_OPEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<think>(.*)").unwrap());

/// Display split of a message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThinkingView {
    /// Reasoning text, `None` when the message has no `<think>` marker.
    pub thinking: Option<String>,
    /// Whether the reasoning segment has been closed.
    pub thinking_complete: bool,
    pub answer: String,
}

/// Split `content` at its first thinking segment.
///
/// A closed segment yields its trimmed inner text and the trimmed text
/// after it as the answer. An open segment (still streaming) yields the
/// trimmed text after the marker and an empty answer.
pub fn split_thinking(content: &str) -> ThinkingView {
    if !content.contains("<think>") {
        return ThinkingView {
            thinking: None,
            thinking_complete: false,
            answer: content.to_string(),
        };
    }

    if let Some(caps) = THINK_COMPLETE_RE.captures(content) {
        return ThinkingView {
            thinking: Some(caps[1].trim().to_string()),
            thinking_complete: true,
            answer: caps[2].trim().to_string(),
        };
    }

    let thinking = THINK_OPEN_RE
        .captures(content)
        .map(|caps| caps[1].trim().to_string())
        .unwrap_or_default();

    ThinkingView {
        thinking: Some(thinking),
        thinking_complete: false,
        answer: String::new(),
    }
}

/// Remove every closed `<think>…</think>` segment.
pub fn strip_think_tags(content: &str) -> String {
    THINK_BLOCK_RE.replace_all(content, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_answer() {
        let view = split_thinking("just an answer");
        assert_eq!(view.thinking, None);
        assert!(!view.thinking_complete);
        assert_eq!(view.answer, "just an answer");
    }

    #[test]
    fn test_complete_segment() {
        let view = split_thinking("<think>step 1\nstep 2</think>The answer is 4.");
        assert_eq!(view.thinking.as_deref(), Some("step 1\nstep 2"));
        assert!(view.thinking_complete);
        assert_eq!(view.answer, "The answer is 4.");
    }

    #[test]
    fn test_complete_segment_is_trimmed() {
        let view = split_thinking("<think>\nreasoning\n</think>\n\nAnswer\n");
        assert_eq!(view.thinking.as_deref(), Some("reasoning"));
        assert_eq!(view.answer, "Answer");
    }

    #[test]
    fn test_segment_in_progress() {
        let view = split_thinking("<think>  still going\n");
        assert_eq!(view.thinking.as_deref(), Some("still going"));
        assert!(!view.thinking_complete);
        assert_eq!(view.answer, "");
    }

    #[test]
    fn test_text_before_marker_is_not_part_of_answer() {
        let view = split_thinking("pre<think>t</think>post");
        assert_eq!(view.thinking.as_deref(), Some("t"));
        assert_eq!(view.answer, "post");
    }

    #[test]
    fn test_strip_think_tags() {
        assert_eq!(strip_think_tags("<think>a\nb</think>x<think>c</think>y"), "xy");
        // An unclosed segment is left alone
        assert_eq!(strip_think_tags("<think>open"), "<think>open");
    }
}
