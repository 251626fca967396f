use serde_json::json;
use tracing::info;
use warp::{Rejection, Reply};

use super::AppState;
use crate::error::{reject, ApiError};
use crate::models::{SessionDetailResponse, SessionItem, SessionListResponse, SessionUpdateRequest};

pub async fn handle_list_sessions(user_token: Option<String>, state: AppState) -> Result<impl Reply, Rejection> {
    let user_id = state.resolve_user(user_token).await;
    let sessions = state.store.list_sessions(user_id.as_deref()).await.map_err(reject)?;

    Ok(warp::reply::json(&SessionListResponse {
        sessions: sessions.iter().map(SessionItem::from).collect(),
    }))
}

pub async fn handle_get_session(session_id: String, state: AppState) -> Result<impl Reply, Rejection> {
    let session = state
        .store
        .get_session(&session_id)
        .await
        .map_err(reject)?
        .ok_or_else(|| reject(ApiError::NotFound(format!("session {}", session_id))))?;

    let item = SessionItem::from(&session);
    Ok(warp::reply::json(&SessionDetailResponse {
        session: item,
        messages: session.messages.0,
    }))
}

pub async fn handle_update_session(
    session_id: String,
    request: SessionUpdateRequest,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let title = request.title.trim();
    if title.is_empty() {
        return Err(reject(ApiError::BadRequest("title must not be empty".to_string())));
    }

    let updated = state
        .store
        .update_session_title(&session_id, title)
        .await
        .map_err(reject)?;
    if !updated {
        return Err(reject(ApiError::NotFound(format!("session {}", session_id))));
    }

    info!("Renamed session {}", session_id);
    Ok(warp::reply::json(&json!({"success": true, "title": title})))
}

pub async fn handle_delete_session(session_id: String, state: AppState) -> Result<impl Reply, Rejection> {
    let deleted = state.store.delete_session(&session_id).await.map_err(reject)?;
    if !deleted {
        return Err(reject(ApiError::NotFound(format!("session {}", session_id))));
    }

    info!("Deleted session {}", session_id);
    Ok(warp::reply::json(&json!({"success": true})))
}
