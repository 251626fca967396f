// Retriever Agent: semantic retrieval and bounded context assembly for RAG prompts

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::embedding::EmbeddingProvider;
use crate::models::{ChatInclude, Source};

pub const SIMILARITY_THRESHOLD: f32 = 0.4;
pub const MAX_SOURCES: usize = 5;
pub const SEARCH_CANDIDATES: usize = 8;
pub const MAX_EXCERPT_CHARS: usize = 8000;
pub const TRUNCATION_MARKER: &str = "...";

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub source_id: String,
    pub title: Option<String>,
    pub content: String,
    pub similarity: f32,
}

/// Cosine-similarity search over embedded source chunks of one notebook.
#[async_trait]
pub trait VectorSearch: Send + Sync {
    async fn similarity_search(
        &self,
        query_embedding: &[f32],
        notebook_id: &str,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SearchHit>>;
}

#[async_trait]
pub trait SourceCatalog: Send + Sync {
    async fn latest_notebook_id(&self) -> Result<Option<String>>;
    async fn get_source(&self, id: &str) -> Result<Option<Source>>;
    /// Sources of the notebook, most recently updated first.
    async fn recent_sources(&self, notebook_id: &str, limit: usize) -> Result<Vec<Source>>;
}

/// Zero for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextExcerpt {
    pub ref_id: String,
    pub title: Option<String>,
    pub text: String,
    pub truncated: bool,
}

impl ContextExcerpt {
    fn render(&self) -> String {
        let mut block = format!(
            "=== {} ===\nTitle: {}\n",
            self.ref_id,
            self.title.as_deref().unwrap_or("No title")
        );
        if !self.text.is_empty() {
            block.push_str(&format!("\nFull Content: {}\n", self.text));
        }
        block
    }
}

/// Retrieved excerpts plus the ids the model is allowed to cite.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextBundle {
    pub excerpts: Vec<ContextExcerpt>,
    pub available_ids: Vec<String>,
}

impl ContextBundle {
    pub fn is_empty(&self) -> bool {
        self.excerpts.is_empty()
    }

    pub fn render(&self) -> String {
        self.excerpts
            .iter()
            .map(ContextExcerpt::render)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Cap `text` at `max_chars` characters, appending the truncation marker
/// when something was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => (format!("{}{}", &text[..cut], TRUNCATION_MARKER), true),
        None => (text.to_string(), false),
    }
}

struct Selected {
    source: Source,
    matched_chunk: Option<String>,
}

#[derive(Clone)]
pub struct ContextAssembler {
    catalog: Arc<dyn SourceCatalog>,
    search: Arc<dyn VectorSearch>,
    embeddings: Option<Arc<dyn EmbeddingProvider>>,
}

impl ContextAssembler {
    pub fn new(
        catalog: Arc<dyn SourceCatalog>,
        search: Arc<dyn VectorSearch>,
        embeddings: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Self {
        Self {
            catalog,
            search,
            embeddings,
        }
    }

    /// Build the context for `query` from `notebook_id`, or from the most
    /// recently updated notebook when no scope is given. Never fails: any
    /// retrieval problem degrades to the recency fallback or an empty bundle.
    pub async fn assemble(&self, query: &str, notebook_id: Option<&str>) -> ContextBundle {
        let scope = match notebook_id {
            Some(id) => id.to_string(),
            None => match self.catalog.latest_notebook_id().await {
                Ok(Some(id)) => id,
                Ok(None) => {
                    debug!("Retriever: no notebook available, context is empty");
                    return ContextBundle::default();
                }
                Err(e) => {
                    warn!("Retriever: failed to resolve latest notebook: {}", e);
                    return ContextBundle::default();
                }
            },
        };

        let mut selected = self.semantic_sources(query, &scope).await;
        if selected.is_empty() {
            selected = self.recent_sources(&scope).await;
        }

        let bundle = build_bundle(selected);
        info!(
            "Retriever: assembled {} excerpts for notebook {}",
            bundle.excerpts.len(),
            scope
        );
        bundle
    }

    async fn semantic_sources(&self, query: &str, notebook_id: &str) -> Vec<Selected> {
        let Some(embedder) = &self.embeddings else {
            debug!("Retriever: no embedding provider configured, using recent sources");
            return Vec::new();
        };

        let embedding = match embedder.embed_query(query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("Retriever: query embedding failed: {}", e);
                return Vec::new();
            }
        };

        let hits = match self
            .search
            .similarity_search(&embedding, notebook_id, SIMILARITY_THRESHOLD, SEARCH_CANDIDATES)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!("Retriever: similarity search failed: {}", e);
                return Vec::new();
            }
        };

        let mut selected = Vec::new();
        for hit in rank_hits(hits) {
            if selected.len() >= MAX_SOURCES {
                break;
            }
            match self.catalog.get_source(&hit.source_id).await {
                Ok(Some(source)) if source.inclusion() != ChatInclude::Off => {
                    selected.push(Selected {
                        source,
                        matched_chunk: Some(hit.content),
                    });
                }
                Ok(_) => {}
                Err(e) => warn!("Retriever: failed to load source {}: {}", hit.source_id, e),
            }
        }
        selected
    }

    async fn recent_sources(&self, notebook_id: &str) -> Vec<Selected> {
        match self.catalog.recent_sources(notebook_id, MAX_SOURCES).await {
            Ok(sources) => sources
                .into_iter()
                .filter(|source| source.inclusion() != ChatInclude::Off)
                .take(MAX_SOURCES)
                .map(|source| Selected {
                    source,
                    matched_chunk: None,
                })
                .collect(),
            Err(e) => {
                warn!("Retriever: failed to list recent sources: {}", e);
                Vec::new()
            }
        }
    }
}

/// Hits at or above the threshold, best hit per source, highest first.
fn rank_hits(mut hits: Vec<SearchHit>) -> Vec<SearchHit> {
    hits.retain(|hit| hit.similarity >= SIMILARITY_THRESHOLD);
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
    });
    let mut seen = HashSet::new();
    hits.retain(|hit| seen.insert(hit.source_id.clone()));
    hits
}

fn build_bundle(selected: Vec<Selected>) -> ContextBundle {
    let mut bundle = ContextBundle::default();
    for Selected {
        source,
        matched_chunk,
    } in selected
    {
        let ref_id = source.ref_id();
        let raw = source
            .full_text
            .filter(|text| !text.trim().is_empty())
            .or(matched_chunk)
            .unwrap_or_default();
        let (text, truncated) = truncate_chars(&raw, MAX_EXCERPT_CHARS);

        bundle.available_ids.push(ref_id.clone());
        bundle.excerpts.push(ContextExcerpt {
            ref_id,
            title: source.title,
            text,
            truncated,
        });
    }
    bundle
}
