//! Chat message assembly and plain-text coercion.
//!
//! Transports here render raw text, so model replies get a deterministic
//! markdown-stripping pass before they go out.  The coercion is idempotent
//! and preserves every non-markup character in order.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};

use crate::chat_context::ChatTurn;

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[a-zA-Z0-9_-]*\s*\n?(.*?)```").expect("static regex"));
static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\((https?://[^)\s]+)\)").expect("static regex"));
static INLINE_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("static regex"));
static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s{0,3}#{1,6}\s*").expect("static regex"));
static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*[-*+]\s+").expect("static regex"));
static BLOCKQUOTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*>\s?").expect("static regex"));
static BOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*|__(.+?)__").expect("static regex"));
static ITALIC_STAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*([^*]+)\*").expect("static regex"));
static ITALIC_UNDERSCORE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_([^_]+)_").expect("static regex"));
static TRAILING_STAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\*(\s|$)").expect("static regex"));
static NUMBERED_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^0-9])(\d{1,2})\.\s+").expect("static regex"));
static NUMBERED_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+(\d{1,2}\.\s+)").expect("static regex"));

/// Assemble the `messages` array for the chat oracle: system prompt, prior
/// turns, then the current user prompt.
pub fn build_chat_messages(system_prompt: &str, history: &[ChatTurn], prompt: &str) -> Vec<Value> {
    let mut messages = vec![json!({"role": "system", "content": system_prompt})];
    for turn in history {
        if matches!(turn.role, "user" | "assistant") && !turn.content.trim().is_empty() {
            messages.push(json!({"role": turn.role, "content": turn.content}));
        }
    }
    messages.push(json!({"role": "user", "content": prompt}));
    messages
}

/// Strip markdown structure from a model reply, leaving plain text.
///
/// Fenced blocks keep their inner content; links become `text (url)`;
/// headings, bullets, quotes, and emphasis wrappers are removed; inline
/// numbered lists that start at 1 and run consecutively are split one item
/// per line.  Runs of whitespace collapse and the ends are trimmed.
pub fn coerce_plain_text_reply(text: &str) -> String {
    let cleaned = text.trim();
    if cleaned.is_empty() {
        return String::new();
    }

    let cleaned = FENCE_RE.replace_all(cleaned, |caps: &regex::Captures<'_>| {
        caps.get(1).map(|m| m.as_str().trim().to_owned()).unwrap_or_default()
    });
    let cleaned = LINK_RE.replace_all(&cleaned, "$1 ($2)");
    let cleaned = INLINE_CODE_RE.replace_all(&cleaned, "$1");
    let cleaned = HEADER_RE.replace_all(&cleaned, "");
    let cleaned = BULLET_RE.replace_all(&cleaned, "");
    let cleaned = BLOCKQUOTE_RE.replace_all(&cleaned, "");
    let cleaned = BOLD_RE.replace_all(&cleaned, "$1$2");
    let cleaned = ITALIC_STAR_RE.replace_all(&cleaned, "$1");
    let cleaned = ITALIC_UNDERSCORE_RE.replace_all(&cleaned, "$1");
    let cleaned = TRAILING_STAR_RE.replace_all(&cleaned, "$1");
    let cleaned = cleaned.replace('`', "");
    let cleaned = split_inline_numbered_list(&cleaned);

    let mut collapsed_lines: Vec<String> = Vec::new();
    let mut previous_blank = false;
    for line in cleaned.lines() {
        let compact: String = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if compact.is_empty() {
            if !previous_blank {
                collapsed_lines.push(String::new());
            }
            previous_blank = true;
            continue;
        }
        collapsed_lines.push(compact);
        previous_blank = false;
    }

    collapsed_lines.join("\n").trim().to_owned()
}

/// Split `1. a 2. b 3. c` onto separate lines, but only when the sequence
/// starts at 1 and every step increments by exactly one.
fn split_inline_numbered_list(text: &str) -> String {
    let numbers: Vec<u32> = NUMBERED_ITEM_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).and_then(|m| m.as_str().parse().ok()))
        .collect();

    if numbers.len() < 2 || numbers[0] != 1 {
        return text.to_owned();
    }
    let consecutive = numbers.windows(2).all(|pair| pair[1] == pair[0] + 1);
    if !consecutive {
        return text.to_owned();
    }

    NUMBERED_SPLIT_RE.replace_all(text, "\n$1").into_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_system_history_prompt_order() {
        let history = vec![
            ChatTurn {
                role: "user",
                content: "q1".into(),
            },
            ChatTurn {
                role: "assistant",
                content: "a1".into(),
            },
            ChatTurn {
                role: "assistant",
                content: "   ".into(),
            },
        ];
        let messages = build_chat_messages("sys", &history, "q2");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "q1");
        assert_eq!(messages[3], serde_json::json!({"role": "user", "content": "q2"}));
    }

    #[test]
    fn strips_fences_keeping_content() {
        let input = "before\n```rust\nlet x = 1;\n```\nafter";
        let output = coerce_plain_text_reply(input);
        assert!(output.contains("let x = 1;"));
        assert!(!output.contains("```"));
    }

    #[test]
    fn rewrites_links_and_strips_emphasis() {
        let input = "See [docs](https://example.com/d) for **bold** and *italic* and `code`.";
        assert_eq!(
            coerce_plain_text_reply(input),
            "See docs (https://example.com/d) for bold and italic and code."
        );
    }

    #[test]
    fn strips_headers_bullets_and_quotes() {
        let input = "# Title\n- item one\n> quoted\nplain";
        assert_eq!(coerce_plain_text_reply(input), "Title\nitem one\nquoted\nplain");
    }

    #[test]
    fn splits_consecutive_inline_numbered_lists() {
        let input = "Steps: 1. wash 2. rinse 3. repeat";
        let output = coerce_plain_text_reply(input);
        assert_eq!(output, "Steps:\n1. wash\n2. rinse\n3. repeat");
    }

    #[test]
    fn leaves_non_consecutive_numbers_inline() {
        let input = "Sections 1. intro 5. appendix";
        assert_eq!(coerce_plain_text_reply(input), input);
    }

    #[test]
    fn leaves_lists_not_starting_at_one() {
        let input = "See 3. below and 4. after";
        assert_eq!(coerce_plain_text_reply(input), input);
    }

    #[test]
    fn collapses_blank_runs() {
        let input = "a\n\n\n\nb";
        assert_eq!(coerce_plain_text_reply(input), "a\n\nb");
    }

    #[test]
    fn coercion_is_idempotent() {
        let inputs = [
            "See [docs](https://example.com/d) for **bold**.",
            "# Title\n- item\n1. a 2. b",
            "plain text stays plain",
            "```\ncode\n```",
        ];
        for input in inputs {
            let once = coerce_plain_text_reply(input);
            let twice = coerce_plain_text_reply(&once);
            assert_eq!(once, twice, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(coerce_plain_text_reply("   "), "");
    }
}
