use chrono::Utc;
use tracing::{info, warn};
use warp::{Rejection, Reply};

use super::AppState;
use crate::agents::retriever::SourceCatalog;
use crate::db::NewChunk;
use crate::embedding::{chunk_text, CHUNK_CHARS, CHUNK_OVERLAP};
use crate::error::{reject, ApiError};
use crate::models::{new_record_id, IngestSourceRequest, IngestSourceResponse, Source, SourceDetail};

pub async fn handle_create_source(request: IngestSourceRequest, state: AppState) -> Result<impl Reply, Rejection> {
    if request.title.trim().is_empty() || request.content.trim().is_empty() {
        return Err(reject(ApiError::BadRequest("title and content are required".to_string())));
    }

    let notebook_id = match request.notebook_id {
        Some(id) => {
            if !state.store.notebook_exists(&id).await.map_err(reject)? {
                return Err(reject(ApiError::NotFound(format!("notebook {}", id))));
            }
            id
        }
        None => state.store.default_notebook().await.map_err(reject)?,
    };

    let texts = chunk_text(&request.content, CHUNK_CHARS, CHUNK_OVERLAP);
    let embeddings = match &state.embeddings {
        Some(provider) => match provider.embed_documents(&texts).await {
            Ok(vectors) => Some(vectors),
            Err(e) => {
                warn!("Embedding failed, storing source without vectors: {}", e);
                None
            }
        },
        None => None,
    };
    let embedded = embeddings.is_some();

    let chunks: Vec<NewChunk> = match embeddings {
        Some(vectors) => texts
            .into_iter()
            .zip(vectors)
            .map(|(content, vector)| NewChunk {
                content,
                embedding: Some(vector),
            })
            .collect(),
        None => texts
            .into_iter()
            .map(|content| NewChunk {
                content,
                embedding: None,
            })
            .collect(),
    };

    let now = Utc::now();
    let source = Source {
        id: new_record_id(),
        notebook_id: notebook_id.clone(),
        title: Some(request.title.trim().to_string()),
        full_text: Some(request.content),
        chat_include: request.chat_include.as_str().to_string(),
        created: now,
        updated: now,
    };
    state.store.insert_source(&source, &chunks).await.map_err(reject)?;

    info!(
        "Ingested source {} into notebook {} ({} chunks, embedded: {})",
        source.id,
        notebook_id,
        chunks.len(),
        embedded
    );

    Ok(warp::reply::json(&IngestSourceResponse {
        source_id: source.id,
        notebook_id,
        chunks_count: chunks.len(),
        embedded,
    }))
}

pub async fn handle_get_source(source_id: String, state: AppState) -> Result<impl Reply, Rejection> {
    info!("Fetching source: {}", source_id);

    let source = state
        .store
        .get_source(&source_id)
        .await
        .map_err(reject)?
        .ok_or_else(|| reject(ApiError::NotFound(format!("source {}", source_id))))?;

    Ok(warp::reply::json(&SourceDetail::from(source)))
}
