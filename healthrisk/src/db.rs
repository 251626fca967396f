use std::cmp::Ordering;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{postgres::PgPoolOptions, Pool, Postgres, Row};
use tracing::{debug, warn};

use crate::agents::retriever::{cosine_similarity, SearchHit, SourceCatalog, VectorSearch};
use crate::models::{new_record_id, HealthChatSession, HealthExamination, Source};
use crate::references::{ReferenceKey, ReferenceKind, TitleLookup};

pub type DbPool = Pool<Postgres>;

pub async fn create_pool(database_url: &str) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    Ok(pool)
}

const EVALUATION_ENABLED_KEY: &str = "evaluation_enabled";
const DEFAULT_NOTEBOOK_NAME: &str = "Health knowledge base";

/// Clients sometimes send ids as `table:id`; the tables store the bare id.
pub fn bare_id(id: &str) -> &str {
    id.rsplit(':').next().unwrap_or(id)
}

/// One chunk of a source ready to be stored.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub content: String,
    pub embedding: Option<Vec<f32>>,
}

/// Typed queries over the application tables.
#[derive(Clone)]
pub struct Store {
    pool: DbPool,
}

impl Store {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Map the `X-User-Id` session token to a user id.
    pub async fn resolve_user(&self, session_token: &str) -> Result<Option<String>> {
        let id = sqlx::query_scalar::<_, String>("SELECT id FROM users WHERE session_token = $1 LIMIT 1")
            .bind(session_token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    // --- examinations ---

    pub async fn insert_examination(&self, exam: &HealthExamination) -> Result<()> {
        sqlx::query(
            "INSERT INTO health_examinations
             (id, user_id, age, gender, height, weight, systolic_bp, diastolic_bp, bmi,
              pulse_pressure, risk_level, prediction_proba, cholesterol, glucose, smoking,
              alcohol, physical_activity, created)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
        )
        .bind(&exam.id)
        .bind(&exam.user_id)
        .bind(exam.age)
        .bind(exam.gender)
        .bind(exam.height)
        .bind(exam.weight)
        .bind(exam.systolic_bp)
        .bind(exam.diastolic_bp)
        .bind(exam.bmi)
        .bind(exam.pulse_pressure)
        .bind(&exam.risk_level)
        .bind(exam.prediction_proba)
        .bind(exam.cholesterol)
        .bind(exam.glucose)
        .bind(exam.smoking)
        .bind(exam.alcohol)
        .bind(exam.physical_activity)
        .bind(exam.created)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_examination(&self, id: &str) -> Result<Option<HealthExamination>> {
        let exam = sqlx::query_as::<_, HealthExamination>("SELECT * FROM health_examinations WHERE id = $1")
            .bind(bare_id(id))
            .fetch_optional(&self.pool)
            .await?;
        Ok(exam)
    }

    // --- chat sessions ---

    pub async fn get_session(&self, id: &str) -> Result<Option<HealthChatSession>> {
        let session = sqlx::query_as::<_, HealthChatSession>("SELECT * FROM health_chat_sessions WHERE id = $1")
            .bind(bare_id(id))
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    pub async fn find_session_by_examination(&self, examination_id: &str) -> Result<Option<HealthChatSession>> {
        let session = sqlx::query_as::<_, HealthChatSession>(
            "SELECT * FROM health_chat_sessions WHERE examination_id = $1 ORDER BY created LIMIT 1",
        )
        .bind(bare_id(examination_id))
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    /// Sessions newest first; all sessions when `user_id` is `None`.
    pub async fn list_sessions(&self, user_id: Option<&str>) -> Result<Vec<HealthChatSession>> {
        let sessions = match user_id {
            Some(user_id) => {
                sqlx::query_as::<_, HealthChatSession>(
                    "SELECT * FROM health_chat_sessions WHERE user_id = $1 ORDER BY updated DESC",
                )
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, HealthChatSession>("SELECT * FROM health_chat_sessions ORDER BY updated DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(sessions)
    }

    /// Insert or replace a session transcript.
    pub async fn save_session(&self, session: &HealthChatSession) -> Result<()> {
        sqlx::query(
            "INSERT INTO health_chat_sessions (id, user_id, examination_id, title, messages, created, updated)
             VALUES ($1, $2, $3, $4, $5, $6, NOW())
             ON CONFLICT (id) DO UPDATE
             SET title = EXCLUDED.title, messages = EXCLUDED.messages, updated = NOW()",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.examination_id)
        .bind(&session.title)
        .bind(&session.messages)
        .bind(session.created)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns `false` when no such session exists.
    pub async fn update_session_title(&self, id: &str, title: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE health_chat_sessions SET title = $2, updated = NOW() WHERE id = $1")
            .bind(bare_id(id))
            .bind(title)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_session(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM health_chat_sessions WHERE id = $1")
            .bind(bare_id(id))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // --- settings ---

    /// Defaults to enabled when the setting was never written.
    pub async fn evaluation_enabled(&self) -> Result<bool> {
        let value = sqlx::query_scalar::<_, Json<bool>>("SELECT value FROM app_settings WHERE key = $1")
            .bind(EVALUATION_ENABLED_KEY)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value.map(|Json(enabled)| enabled).unwrap_or(true))
    }

    pub async fn set_evaluation_enabled(&self, enabled: bool) -> Result<()> {
        sqlx::query(
            "INSERT INTO app_settings (key, value, updated) VALUES ($1, $2, NOW())
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated = NOW()",
        )
        .bind(EVALUATION_ENABLED_KEY)
        .bind(Json(enabled))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- notebooks & sources ---

    pub async fn notebook_exists(&self, id: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM notebooks WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    /// The most recently updated notebook, created on first use.
    pub async fn default_notebook(&self) -> Result<String> {
        if let Some(id) = self.latest_notebook().await? {
            return Ok(id);
        }
        let id = new_record_id();
        sqlx::query("INSERT INTO notebooks (id, name) VALUES ($1, $2)")
            .bind(&id)
            .bind(DEFAULT_NOTEBOOK_NAME)
            .execute(&self.pool)
            .await?;
        debug!("Created default notebook {}", id);
        Ok(id)
    }

    async fn latest_notebook(&self) -> Result<Option<String>> {
        let id = sqlx::query_scalar::<_, String>("SELECT id FROM notebooks ORDER BY updated DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    /// Store a source and its chunks atomically and touch its notebook.
    pub async fn insert_source(&self, source: &Source, chunks: &[NewChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO sources (id, notebook_id, title, full_text, chat_include, created, updated)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&source.id)
        .bind(&source.notebook_id)
        .bind(&source.title)
        .bind(&source.full_text)
        .bind(&source.chat_include)
        .bind(source.created)
        .bind(source.updated)
        .execute(&mut *tx)
        .await?;

        for (index, chunk) in chunks.iter().enumerate() {
            sqlx::query(
                "INSERT INTO source_embeddings (id, source_id, chunk_index, content, embedding)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(new_record_id())
            .bind(&source.id)
            .bind(index as i32)
            .bind(&chunk.content)
            .bind(&chunk.embedding)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE notebooks SET updated = NOW() WHERE id = $1")
            .bind(&source.notebook_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl TitleLookup for Store {
    async fn get_title(&self, key: &ReferenceKey) -> Result<Option<String>> {
        match key.kind {
            ReferenceKind::Source => {
                let row = sqlx::query("SELECT title FROM sources WHERE id = $1")
                    .bind(&key.id)
                    .fetch_optional(&self.pool)
                    .await?;
                match row {
                    Some(row) => {
                        let title: Option<String> = row.try_get("title")?;
                        Ok(Some(title.unwrap_or_default()))
                    }
                    None => Ok(None),
                }
            }
        }
    }
}

#[async_trait]
impl SourceCatalog for Store {
    async fn latest_notebook_id(&self) -> Result<Option<String>> {
        self.latest_notebook().await
    }

    async fn get_source(&self, id: &str) -> Result<Option<Source>> {
        let source = sqlx::query_as::<_, Source>("SELECT * FROM sources WHERE id = $1")
            .bind(bare_id(id))
            .fetch_optional(&self.pool)
            .await?;
        Ok(source)
    }

    async fn recent_sources(&self, notebook_id: &str, limit: usize) -> Result<Vec<Source>> {
        let sources = sqlx::query_as::<_, Source>(
            "SELECT * FROM sources WHERE notebook_id = $1 ORDER BY updated DESC LIMIT $2",
        )
        .bind(notebook_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(sources)
    }
}

/// Chunks scored per query. Newest sources first, so an oversized notebook
/// loses its oldest chunks rather than its recent ones.
pub const SEARCH_SCAN_LIMIT: i64 = 5_000;

#[derive(Debug, Clone, sqlx::FromRow)]
struct ChunkRow {
    source_id: String,
    title: Option<String>,
    content: String,
    embedding: Vec<f32>,
}

/// Score chunks against the query and keep the best `limit` at or above
/// `threshold`.
fn rank_chunks(query_embedding: &[f32], rows: Vec<ChunkRow>, threshold: f32, limit: usize) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = rows
        .into_iter()
        .filter_map(|row| {
            let similarity = cosine_similarity(query_embedding, &row.embedding);
            (similarity >= threshold).then(|| SearchHit {
                source_id: row.source_id,
                title: row.title,
                content: row.content,
                similarity,
            })
        })
        .collect();

    hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(Ordering::Equal));
    hits.truncate(limit);
    hits
}

#[async_trait]
impl VectorSearch for Store {
    async fn similarity_search(
        &self,
        query_embedding: &[f32],
        notebook_id: &str,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let rows = sqlx::query_as::<_, ChunkRow>(
            "SELECT e.source_id, s.title, e.content, e.embedding
             FROM source_embeddings e
             JOIN sources s ON s.id = e.source_id
             WHERE s.notebook_id = $1 AND e.embedding IS NOT NULL
             ORDER BY s.updated DESC, e.chunk_index
             LIMIT $2",
        )
        .bind(notebook_id)
        .bind(SEARCH_SCAN_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        if rows.len() as i64 == SEARCH_SCAN_LIMIT {
            warn!("Vector search in {} hit the scan limit of {} chunks", notebook_id, SEARCH_SCAN_LIMIT);
        }

        let hits = rank_chunks(query_embedding, rows, threshold, limit);
        debug!("Vector search in {} returned {} hits", notebook_id, hits.len());
        Ok(hits)
    }
}
