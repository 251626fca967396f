// Reference Rewriter: numbered markdown citations plus the reference list

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::cleanup;
use super::parser::{parse_references, CitationMarker, ReferenceKey, ReferenceKind};
use super::resolver::TitleTable;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceItem {
    pub number: usize,
    #[serde(rename = "type")]
    pub kind: ReferenceKind,
    pub id: String,
    pub title: String,
}

/// Numbers handed out to resolvable keys, in first-occurrence order.
#[derive(Debug, Default)]
struct ReferenceAssignment {
    numbers: HashMap<ReferenceKey, usize>,
    order: Vec<ReferenceKey>,
}

impl ReferenceAssignment {
    fn assign(markers: &[CitationMarker], titles: &TitleTable) -> Self {
        let mut assignment = Self::default();
        for marker in markers {
            if assignment.numbers.contains_key(&marker.key) || !titles.contains_key(&marker.key) {
                continue;
            }
            assignment.order.push(marker.key.clone());
            assignment
                .numbers
                .insert(marker.key.clone(), assignment.order.len());
        }
        assignment
    }

    fn number(&self, key: &ReferenceKey) -> Option<usize> {
        self.numbers.get(key).copied()
    }

    fn valid_numbers(&self) -> BTreeSet<usize> {
        self.numbers.values().copied().collect()
    }
}

fn citation_link(number: usize, key: &ReferenceKey) -> String {
    format!("[{}](#{})", number, key.anchor())
}

/// Span to overwrite for a resolved marker, widened over `[[..]]` or `[..]`
/// decoration so no bracket litter is left behind.
fn decorated_span(text: &str, marker: &CitationMarker) -> (usize, usize) {
    let bytes = text.as_bytes();
    let before = &bytes[marker.start.saturating_sub(2)..marker.start];
    let after = &bytes[marker.end..(marker.end + 2).min(bytes.len())];

    if before == b"[[" && after.starts_with(b"]]") {
        (marker.start - 2, marker.end + 2)
    } else if before.ends_with(b"[") && after.starts_with(b"]") {
        (marker.start - 1, marker.end + 1)
    } else {
        (marker.start, marker.end)
    }
}

fn is_group_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b':' | b',' | b' ')
}

/// Span to delete for an unresolved marker. Bracket decoration goes with it,
/// and inside a `[source:a, source:b]` group so does one `, ` separator.
fn unresolved_span(text: &str, marker: &CitationMarker) -> (usize, usize) {
    let decorated = decorated_span(text, marker);
    if decorated != (marker.start, marker.end) {
        return decorated;
    }

    let bytes = text.as_bytes();
    let mut open = marker.start;
    while open > 0 && is_group_byte(bytes[open - 1]) {
        open -= 1;
    }
    if open == 0 || bytes[open - 1] != b'[' {
        return (marker.start, marker.end);
    }

    if bytes.get(marker.end) == Some(&b',') {
        let mut end = marker.end + 1;
        while bytes.get(end) == Some(&b' ') {
            end += 1;
        }
        return (marker.start, end);
    }

    let mut start = marker.start;
    while start > open && bytes[start - 1] == b' ' {
        start -= 1;
    }
    if start > open && bytes[start - 1] == b',' {
        return (start - 1, marker.end);
    }
    (marker.start, marker.end)
}

/// Delete markers left in finished text. Removing a span can join its
/// neighbours into a new `source:ID`, so repeat until none remain.
fn strip_leftover_markers(mut text: String) -> String {
    loop {
        let leftovers: Vec<CitationMarker> = parse_references(&text).collect();
        if leftovers.is_empty() {
            return text;
        }
        for marker in leftovers.iter().rev() {
            text.replace_range(marker.start..marker.end, "");
        }
    }
}

/// Rewrite `source:ID` citations into `[N](#ref-source-ID)` links.
///
/// Resolvable keys are numbered from 1 in order of first appearance; markers
/// whose key is missing from `titles` are removed. The returned list holds
/// only references with a real title, sorted by number. Text without markers
/// comes back unchanged, and the output never contains a marker, so a second
/// pass over rewritten output is a no-op.
pub fn process_references(text: &str, titles: &TitleTable) -> (String, Vec<ReferenceItem>) {
    let markers: Vec<CitationMarker> = parse_references(text).collect();
    if markers.is_empty() {
        return (text.to_string(), Vec::new());
    }

    let assignment = ReferenceAssignment::assign(&markers, titles);

    // right to left, so spans of markers not yet visited stay valid
    let mut processed = text.to_string();
    for marker in markers.iter().rev() {
        match assignment.number(&marker.key) {
            Some(number) => {
                let (start, end) = decorated_span(&processed, marker);
                processed.replace_range(start..end, &citation_link(number, &marker.key));
            }
            None => {
                let (start, end) = unresolved_span(&processed, marker);
                processed.replace_range(start..end, "");
            }
        }
    }

    let processed = strip_leftover_markers(cleanup::run_all(&processed, &assignment.valid_numbers()));

    let references = assignment
        .order
        .iter()
        .filter_map(|key| {
            let title = titles.get(key)?;
            if title.is_empty() || *title == key.to_string() {
                return None;
            }
            Some(ReferenceItem {
                number: assignment.number(key)?,
                kind: key.kind,
                id: key.id.clone(),
                title: title.clone(),
            })
        })
        .collect();

    (processed, references)
}
