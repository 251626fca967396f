//! Text repair passes run after citation splicing.
//!
//! Each pass is idempotent on its own output but the order matters: later
//! passes assume the brackets removed by earlier ones are gone. Run them
//! through [`run_all`] unless a test targets a single pass.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::{Captures, Regex};

fn raw_bracketed_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[source:[a-zA-Z0-9_]+\]").expect("bracketed marker regex must compile")
    })
}

fn raw_open_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[source:[a-zA-Z0-9_]+").expect("open marker regex must compile"))
}

fn citation_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+)\]\(#ref-[^)]+\)").expect("citation regex must compile"))
}

fn citation_start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[[0-9,\s]+\]\(#ref-").expect("citation start regex must compile"))
}

fn merge_rules() -> &'static [(Regex, &'static str)] {
    static RULES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RULES.get_or_init(|| {
        const LINK: &str = r"\[\d+\]\(#ref-[^)]+\)";
        let rules = [
            // two links followed by a stray closer
            (format!(r"({LINK}),\s*({LINK})\]"), "${1}, ${2}"),
            (r"(\[\d+,\s*\d+\]\(#ref-[^)]+\))\]".to_string(), "${1}"),
            (r"(\[\d+\]),\s*(\[\d+\])\]".to_string(), "${1}, ${2}"),
            (r"(\[\d+,\s*\d+\])\]".to_string(), "${1}"),
            (format!(r"(\]\s*),\s*({LINK})\]"), "${1}, ${2}"),
            (format!(r"({LINK})\s*\]"), "${1}"),
            (format!(r"({LINK}),\s*({LINK})\s*\]"), "${1}, ${2}"),
            (r"\]\]".to_string(), "]"),
        ];
        rules
            .into_iter()
            .map(|(pattern, replacement)| {
                (
                    Regex::new(&pattern).expect("merge regex must compile"),
                    replacement,
                )
            })
            .collect()
    })
}

/// Remove `[source:ID]` and `[source:ID` fragments the splice left behind.
pub fn strip_raw_markers(text: &str) -> String {
    let text = raw_bracketed_marker_re().replace_all(text, "");
    raw_open_marker_re().replace_all(&text, "").into_owned()
}

/// Drop citation links whose number was never assigned.
pub fn drop_unknown_citations(text: &str, valid_numbers: &BTreeSet<usize>) -> String {
    citation_link_re()
        .replace_all(text, |caps: &Captures| {
            let known = caps[1]
                .parse::<usize>()
                .map(|n| valid_numbers.contains(&n))
                .unwrap_or(false);
            if known {
                caps[0].to_string()
            } else {
                String::new()
            }
        })
        .into_owned()
}

/// Remove every `[` that does not open a `[n](#ref-...)` citation.
pub fn strip_stray_open_brackets(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (idx, ch) in text.char_indices() {
        if ch == '[' && !citation_start_re().is_match(&text[idx..]) {
            continue;
        }
        out.push(ch);
    }
    out
}

fn is_group_byte(b: u8) -> bool {
    b.is_ascii_digit() || b == b',' || b.is_ascii_whitespace()
}

/// Reopen digit groups that lost their `[`, e.g. `see 12]` becomes `see [12]`.
///
/// A group already opened by `[` is left alone, so `[12](#ref-...)` and
/// `[1, 2]` pass through unchanged.
pub fn repair_loose_numbers(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut openings = Vec::new();

    for (close, _) in text.match_indices(']') {
        let mut run_start = close;
        while run_start > 0 && is_group_byte(bytes[run_start - 1]) {
            run_start -= 1;
        }
        if run_start > 0 && bytes[run_start - 1] == b'[' {
            continue;
        }
        if let Some(offset) = bytes[run_start..close].iter().position(u8::is_ascii_digit) {
            openings.push(run_start + offset);
        }
    }

    if openings.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len() + openings.len());
    let mut last = 0;
    for at in openings {
        out.push_str(&text[last..at]);
        out.push('[');
        last = at;
    }
    out.push_str(&text[last..]);
    out
}

/// Collapse adjacent citation groups and stray closers into one
/// comma-separated group; `]]` becomes `]`.
pub fn merge_citation_groups(text: &str) -> String {
    merge_rules()
        .iter()
        .fold(text.to_string(), |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        })
}

/// All passes, in order.
pub fn run_all(text: &str, valid_numbers: &BTreeSet<usize>) -> String {
    let text = strip_raw_markers(text);
    let text = drop_unknown_citations(&text, valid_numbers);
    let text = strip_stray_open_brackets(&text);
    let text = repair_loose_numbers(&text);
    merge_citation_groups(&text)
}
