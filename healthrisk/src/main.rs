use std::sync::Arc;

use tracing::{info, warn};
use warp::Filter;

use healthrisk::agents::retriever::ContextAssembler;
use healthrisk::agents::summarizer::SummarizerAgent;
use healthrisk::api::{self, AppState};
use healthrisk::config::Config;
use healthrisk::db::{self, Store};
use healthrisk::embedding::{EmbeddingProvider, HttpEmbeddingClient};
use healthrisk::error::{handle_rejection, reject, ApiError};
use healthrisk::evaluator::EvaluatorClient;
use healthrisk::llm::{ChatModel, OpenAiChatClient};
use healthrisk::redis_client::{CachedTitleLookup, RedisClient};
use healthrisk::risk::{LogisticRiskModel, RiskModel};
use healthrisk::{metrics, middleware};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!("Starting health risk service");

    // Initialize database pool
    let db_pool = db::create_pool(&config.database_url).await?;
    info!("Database connection pool created");

    // Run migrations
    sqlx::migrate!("./migrations").run(&db_pool).await?;
    info!("Database migrations applied");

    // Initialize Redis client
    let redis_client = RedisClient::new(&config.redis_url).await?;
    info!("Redis connection established");

    let store = Store::new(db_pool);

    let embeddings: Option<Arc<dyn EmbeddingProvider>> = match &config.embedding_service_url {
        Some(url) => Some(Arc::new(HttpEmbeddingClient::new(url.as_str(), config.embedding_model.as_str())?)),
        None => {
            warn!("EMBEDDING_SERVICE_URL not set, retrieval uses the most recent sources");
            None
        }
    };

    let chat_model: Option<Arc<dyn ChatModel>> = match &config.openai_api_key {
        Some(key) => Some(Arc::new(OpenAiChatClient::new(
            config.llm_base_url.as_str(),
            key.as_str(),
            config.llm_model.as_str(),
        )?)),
        None => {
            warn!("OPENAI_API_KEY not set, recommendation and chat are disabled");
            None
        }
    };

    let risk_model: Arc<dyn RiskModel> = match &config.risk_model_path {
        Some(path) => Arc::new(LogisticRiskModel::from_path(path)?),
        None => Arc::new(LogisticRiskModel::default()),
    };

    let evaluator = EvaluatorClient::new(config.evaluator_url.as_str());
    let titles = CachedTitleLookup::new(Arc::new(redis_client), store.clone(), config.title_cache_ttl_secs);
    let assembler = ContextAssembler::new(Arc::new(store.clone()), Arc::new(store.clone()), embeddings.clone());
    let summarizer = SummarizerAgent::new(assembler, chat_model, Arc::new(titles), Arc::new(evaluator.clone()));

    let state = AppState {
        store,
        summarizer,
        evaluator,
        risk_model,
        embeddings,
        limiter: middleware::rate_limiter(config.rate_limit_per_minute),
    };

    // Build API routes
    let api_routes = api::routes(state).with(warp::log("api")).with(middleware::cors());

    // Health check route
    let health = warp::path("health")
        .and(warp::get())
        .map(|| warp::reply::json(&serde_json::json!({"status": "healthy"})));

    // Metrics route
    let metrics_route = warp::path("metrics").and(warp::get()).and_then(|| async {
        let (buffer, content_type) =
            metrics::encode().map_err(|e| reject(ApiError::InternalError(e.to_string())))?;
        Ok::<_, warp::Rejection>(warp::reply::with_header(buffer, "Content-Type", content_type))
    });

    let routes = health.or(metrics_route).or(api_routes).recover(handle_rejection);

    // Start server
    let addr = ([0, 0, 0, 0], config.port);
    info!("Server listening on {}", addr.1);

    warp::serve(routes).run(addr).await;

    Ok(())
}
