use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use pretty_assertions::assert_eq;

use healthrisk::references::{render_references, ReferenceKey, ReferenceKind, TitleLookup};

struct Library {
    titles: HashMap<String, Option<String>>,
}

impl Library {
    fn new(entries: &[(&str, Option<&str>)]) -> Self {
        Self {
            titles: entries
                .iter()
                .map(|(id, title)| (id.to_string(), title.map(str::to_string)))
                .collect(),
        }
    }
}

#[async_trait]
impl TitleLookup for Library {
    async fn get_title(&self, key: &ReferenceKey) -> Result<Option<String>> {
        if key.id == "broken" {
            anyhow::bail!("store offline");
        }
        Ok(self
            .titles
            .get(&key.id)
            .map(|title| title.clone().unwrap_or_default()))
    }
}

#[tokio::test]
async fn model_answer_becomes_numbered_links() {
    let library = Library::new(&[("dash", Some("DASH eating plan")), ("walk", Some("Walking for health"))]);
    let answer = "Cut salt [source:dash]. Walk 30 minutes a day [[source:walk]]. \
                  Both help [source:dash, source:walk].";

    let rendered = render_references(&library, answer).await;

    assert_eq!(
        rendered.processed_content.as_deref(),
        Some(
            "Cut salt [1](#ref-source-dash). Walk 30 minutes a day [2](#ref-source-walk). \
             Both help [1](#ref-source-dash), [2](#ref-source-walk)."
        )
    );
    let listed: Vec<(usize, &str, &str)> = rendered
        .references
        .iter()
        .map(|r| (r.number, r.id.as_str(), r.title.as_str()))
        .collect();
    assert_eq!(
        listed,
        vec![(1, "dash", "DASH eating plan"), (2, "walk", "Walking for health")]
    );
    assert!(rendered.references.iter().all(|r| r.kind == ReferenceKind::Source));
}

#[tokio::test]
async fn unknown_and_failing_sources_are_dropped() {
    let library = Library::new(&[("dash", Some("DASH eating plan"))]);
    let answer = "Eat fruit source:ghost and vegetables source:broken, less salt source:dash.";

    let rendered = render_references(&library, answer).await;
    let text = rendered.processed_content.expect("answer had markers");

    assert!(!text.contains("ghost"));
    assert!(!text.contains("broken"));
    assert!(text.contains("[1](#ref-source-dash)"));
    assert_eq!(rendered.references.len(), 1);
}

#[tokio::test]
async fn untitled_source_is_linked_but_not_listed() {
    let library = Library::new(&[("notitle", None)]);

    let rendered = render_references(&library, "See source:notitle.").await;

    assert_eq!(rendered.processed_content.as_deref(), Some("See [1](#ref-source-notitle)."));
    assert!(rendered.references.is_empty());
}

#[tokio::test]
async fn plain_answers_pass_through() {
    let library = Library::new(&[]);

    let rendered = render_references(&library, "Drink water and sleep well.").await;

    assert_eq!(rendered.processed_content, None);
    assert!(rendered.references.is_empty());
}

#[tokio::test]
async fn rendering_twice_changes_nothing() {
    let library = Library::new(&[("dash", Some("DASH eating plan"))]);

    let first = render_references(&library, "Less salt [source:dash].").await;
    let processed = first.processed_content.expect("processed");
    let second = render_references(&library, &processed).await;

    assert_eq!(second.processed_content, None);
}
