use std::sync::Arc;

use tracing::warn;
use warp::{Filter, Rejection, Reply};

use crate::agents::summarizer::SummarizerAgent;
use crate::db::Store;
use crate::embedding::EmbeddingProvider;
use crate::evaluator::EvaluatorClient;
use crate::middleware::{rate_limited, Limiter};
use crate::risk::RiskModel;

mod evaluation;
mod health;
mod sessions;
mod sources;

const JSON_BODY_LIMIT: u64 = 1024 * 1024;
const SOURCE_BODY_LIMIT: u64 = 20 * 1024 * 1024;

/// Everything the handlers share.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub summarizer: SummarizerAgent,
    pub evaluator: EvaluatorClient,
    pub risk_model: Arc<dyn RiskModel>,
    pub embeddings: Option<Arc<dyn EmbeddingProvider>>,
    pub limiter: Limiter,
}

impl AppState {
    /// Map an `X-User-Id` session token to a user id; lookup failures are
    /// treated as anonymous.
    pub async fn resolve_user(&self, session_token: Option<String>) -> Option<String> {
        let token = session_token.filter(|t| !t.trim().is_empty())?;
        match self.store.resolve_user(&token).await {
            Ok(user_id) => user_id,
            Err(e) => {
                warn!("Failed to resolve user from session token: {}", e);
                None
            }
        }
    }

    /// Whether answers should be sent to the evaluator. Defaults to enabled
    /// when the setting cannot be read.
    pub async fn evaluation_enabled(&self) -> bool {
        match self.store.evaluation_enabled().await {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!("Failed to read evaluation setting, assuming enabled: {}", e);
                true
            }
        }
    }
}

pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let api = warp::path("api").and(warp::path("v1"));
    let health = api.and(warp::path("health"));
    let user = warp::header::optional::<String>("x-user-id");

    let predict_route = health
        .and(warp::path("predict"))
        .and(warp::path::end())
        .and(warp::post())
        .and(user)
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(health::handle_predict);

    let recommendation_route = health
        .and(warp::path("recommendation"))
        .and(warp::path::end())
        .and(warp::post())
        .and(rate_limited(state.limiter.clone()))
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(health::handle_recommendation);

    let chat_route = health
        .and(warp::path("chat"))
        .and(warp::path::end())
        .and(warp::post())
        .and(rate_limited(state.limiter.clone()))
        .and(user)
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(health::handle_chat);

    let list_sessions_route = health
        .and(warp::path("sessions"))
        .and(warp::path::end())
        .and(warp::get())
        .and(user)
        .and(with_state(state.clone()))
        .and_then(sessions::handle_list_sessions);

    let session = health.and(warp::path("sessions")).and(warp::path::param::<String>()).and(warp::path::end());

    let get_session_route = session
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(sessions::handle_get_session);

    let update_session_route = session
        .and(warp::patch())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(sessions::handle_update_session);

    let delete_session_route = session
        .and(warp::delete())
        .and(with_state(state.clone()))
        .and_then(sessions::handle_delete_session);

    let create_source_route = api
        .and(warp::path("sources"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(SOURCE_BODY_LIMIT))
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(sources::handle_create_source);

    let get_source_route = api
        .and(warp::path("sources"))
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(sources::handle_get_source);

    let evaluation = api.and(warp::path("evaluation"));

    let get_config_route = evaluation
        .and(warp::path("config"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(evaluation::handle_get_config);

    let set_config_route = evaluation
        .and(warp::path("config"))
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body())
        .and(with_state(state.clone()))
        .and_then(evaluation::handle_set_config);

    let status_route = evaluation
        .and(warp::path("status"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(evaluation::handle_status);

    let initialize_route = evaluation
        .and(warp::path("initialize"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_state(state))
        .and_then(evaluation::handle_initialize);

    predict_route
        .or(recommendation_route)
        .or(chat_route)
        .or(list_sessions_route)
        .or(get_session_route)
        .or(update_session_route)
        .or(delete_session_route)
        .or(create_source_route)
        .or(get_source_route)
        .or(get_config_route)
        .or(set_config_route)
        .or(status_route)
        .or(initialize_route)
}

fn json_body<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(JSON_BODY_LIMIT).and(warp::body::json())
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || state.clone())
}
