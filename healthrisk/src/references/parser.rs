// Reference Parser: locates inline `source:ID` citations emitted by the model

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"source:([a-zA-Z0-9_]+)").expect("marker regex must compile"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    Source,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Source => "source",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a citation target. Two markers cite the same thing when their
/// keys are equal, whatever their position in the text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReferenceKey {
    pub kind: ReferenceKind,
    pub id: String,
}

impl ReferenceKey {
    pub fn source(id: impl Into<String>) -> Self {
        Self {
            kind: ReferenceKind::Source,
            id: id.into(),
        }
    }

    /// Anchor used by the rendered citation link, e.g. `ref-source-abc`.
    pub fn anchor(&self) -> String {
        format!("ref-{}-{}", self.kind, self.id)
    }
}

impl fmt::Display for ReferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A located occurrence of a citation. `start..end` is a byte span into the
/// text the marker was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationMarker {
    pub key: ReferenceKey,
    pub start: usize,
    pub end: usize,
}

/// Lazy left-to-right scan over the citation markers of a text. A clone
/// continues independently from the same position.
#[derive(Debug, Clone)]
pub struct CitationMarkers<'t> {
    text: &'t str,
    pos: usize,
}

impl<'t> Iterator for CitationMarkers<'t> {
    type Item = CitationMarker;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos > self.text.len() {
            return None;
        }
        let caps = marker_re().captures_at(self.text, self.pos)?;
        let whole = caps.get(0)?;
        let id = caps.get(1)?;
        self.pos = whole.end();
        Some(CitationMarker {
            key: ReferenceKey::source(id.as_str()),
            start: whole.start(),
            end: whole.end(),
        })
    }
}

pub fn parse_references(text: &str) -> CitationMarkers<'_> {
    CitationMarkers { text, pos: 0 }
}
