//! Citation post-processing for model output.
//!
//! The model cites retrieved documents inline as `source:ID`. Answers go
//! through three steps before they reach the client: [`parse_references`]
//! finds the markers, [`fetch_reference_titles`] resolves their titles and
//! [`process_references`] renders numbered `[N](#ref-source-ID)` links plus the
//! reference list.

pub mod cleanup;
pub mod parser;
pub mod resolver;
pub mod rewriter;

pub use parser::{parse_references, CitationMarker, ReferenceKey, ReferenceKind};
pub use resolver::{fetch_reference_titles, TitleLookup, TitleTable};
pub use rewriter::{process_references, ReferenceItem};

/// Output of the full citation pipeline for one answer.
#[derive(Debug, Clone, Default)]
pub struct RenderedReferences {
    /// `None` when the answer carried no citation markers.
    pub processed_content: Option<String>,
    pub references: Vec<ReferenceItem>,
}

/// Parse, resolve and rewrite the citations of `answer`.
pub async fn render_references<L>(lookup: &L, answer: &str) -> RenderedReferences
where
    L: TitleLookup + ?Sized,
{
    let mut markers = parse_references(answer).peekable();
    if markers.peek().is_none() {
        return RenderedReferences::default();
    }
    let titles = fetch_reference_titles(lookup, markers).await;
    let (processed, references) = process_references(answer, &titles);
    RenderedReferences {
        processed_content: Some(processed),
        references,
    }
}
