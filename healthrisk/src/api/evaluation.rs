use serde_json::json;
use tracing::{info, warn};
use warp::{Rejection, Reply};

use super::AppState;
use crate::error::reject;
use crate::models::{EvaluationConfig, EvaluationConfigResponse};

pub async fn handle_get_config(state: AppState) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&EvaluationConfigResponse {
        success: true,
        enabled: state.evaluation_enabled().await,
    }))
}

pub async fn handle_set_config(config: EvaluationConfig, state: AppState) -> Result<impl Reply, Rejection> {
    state
        .store
        .set_evaluation_enabled(config.enabled)
        .await
        .map_err(reject)?;
    info!("Evaluation enabled set to {}", config.enabled);

    Ok(warp::reply::json(&EvaluationConfigResponse {
        success: true,
        enabled: config.enabled,
    }))
}

pub async fn handle_status(state: AppState) -> Result<impl Reply, Rejection> {
    let body = match state.evaluator.status().await {
        Ok(status) => json!(status),
        Err(e) => {
            warn!("Evaluator status unavailable: {}", e);
            json!({"success": false, "initialized": false, "error": e.to_string()})
        }
    };
    Ok(warp::reply::json(&body))
}

pub async fn handle_initialize(state: AppState) -> Result<impl Reply, Rejection> {
    let ready = state.evaluator.reinitialize().await;
    Ok(warp::reply::json(&json!({"success": ready, "initialized": ready})))
}
