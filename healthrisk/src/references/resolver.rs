// Reference Resolver: fetches display titles for the unique citation keys

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use super::parser::{CitationMarker, ReferenceKey};

/// Title table keyed by citation identity.
pub type TitleTable = HashMap<ReferenceKey, String>;

/// Document-store lookup used to give citations a human readable title.
///
/// `Ok(None)` means the document does not exist. A document that exists but
/// has no title should return `Ok(Some(String::new()))`.
#[async_trait]
pub trait TitleLookup: Send + Sync {
    async fn get_title(&self, key: &ReferenceKey) -> Result<Option<String>>;
}

/// Look up every distinct key among `markers` exactly once, concurrently.
///
/// Missing documents and failed lookups are left out of the table. A document
/// without a title resolves to the raw key (`source:ID`).
pub async fn fetch_reference_titles<L, I>(lookup: &L, markers: I) -> TitleTable
where
    L: TitleLookup + ?Sized,
    I: IntoIterator<Item = CitationMarker>,
{
    let mut seen = HashSet::new();
    let keys: Vec<ReferenceKey> = markers
        .into_iter()
        .filter_map(|marker| seen.insert(marker.key.clone()).then_some(marker.key))
        .collect();

    if keys.is_empty() {
        return TitleTable::new();
    }

    debug!("Resolving {} reference titles", keys.len());
    let lookups = keys.iter().map(|key| lookup.get_title(key));
    let results = join_all(lookups).await;

    let mut titles = TitleTable::with_capacity(keys.len());
    for (key, result) in keys.into_iter().zip(results) {
        match result {
            Ok(Some(title)) => {
                let title = if title.trim().is_empty() {
                    key.to_string()
                } else {
                    title
                };
                titles.insert(key, title);
            }
            Ok(None) => debug!("No document for reference {}", key),
            Err(e) => warn!("Title lookup failed for {}: {}", key, e),
        }
    }
    titles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::references::parser::parse_references;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeLookup {
        titles: HashMap<String, Option<String>>,
        calls: AtomicUsize,
    }

    impl FakeLookup {
        fn new(entries: &[(&str, Option<&str>)]) -> Self {
            Self {
                titles: entries
                    .iter()
                    .map(|(id, title)| (id.to_string(), title.map(str::to_string)))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TitleLookup for FakeLookup {
        async fn get_title(&self, key: &ReferenceKey) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // later keys finish first
            let delay = if key.id == "first" { 30 } else { 1 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            match self.titles.get(&key.id) {
                Some(Some(title)) => Ok(Some(title.clone())),
                Some(None) => Ok(Some(String::new())),
                None if key.id == "broken" => Err(anyhow::anyhow!("connection reset")),
                None => Ok(None),
            }
        }
    }

    #[tokio::test]
    async fn looks_up_each_key_once() {
        let lookup = FakeLookup::new(&[("abc", Some("Doc A")), ("xyz", Some("Doc B"))]);
        let text = "source:abc source:xyz source:abc source:abc";

        let titles = fetch_reference_titles(&lookup, parse_references(text)).await;

        assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
        assert_eq!(titles.len(), 2);
        assert_eq!(titles[&ReferenceKey::source("abc")], "Doc A");
        assert_eq!(titles[&ReferenceKey::source("xyz")], "Doc B");
    }

    #[tokio::test]
    async fn misses_and_failures_are_omitted() {
        let lookup = FakeLookup::new(&[("found", Some("Found"))]);
        let text = "source:found source:missing source:broken";

        let titles = fetch_reference_titles(&lookup, parse_references(text)).await;

        assert_eq!(titles.len(), 1);
        assert!(titles.contains_key(&ReferenceKey::source("found")));
    }

    #[tokio::test]
    async fn untitled_document_resolves_to_raw_key() {
        let lookup = FakeLookup::new(&[("bare", None)]);

        let titles = fetch_reference_titles(&lookup, parse_references("source:bare")).await;

        assert_eq!(titles[&ReferenceKey::source("bare")], "source:bare");
    }

    #[tokio::test]
    async fn completion_order_does_not_matter() {
        let lookup = FakeLookup::new(&[("first", Some("One")), ("second", Some("Two"))]);

        let titles =
            fetch_reference_titles(&lookup, parse_references("source:first source:second")).await;

        assert_eq!(titles[&ReferenceKey::source("first")], "One");
        assert_eq!(titles[&ReferenceKey::source("second")], "Two");
    }

    #[tokio::test]
    async fn no_markers_means_no_lookups() {
        let lookup = FakeLookup::new(&[]);
        let titles = fetch_reference_titles(&lookup, parse_references("plain text")).await;
        assert!(titles.is_empty());
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
    }
}
