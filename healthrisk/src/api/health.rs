use chrono::Utc;
use tracing::{error, info, warn};
use warp::{Rejection, Reply};

use super::AppState;
use crate::agents::summarizer::{ChatTurn, GenerationError};
use crate::error::{reject, ApiError};
use crate::models::{
    new_record_id, ChatRequest, ChatResponse, HealthChatSession, HealthExamination, PredictionRequest,
    PredictionResponse, RecommendationRequest, RecommendationResponse, SessionMessage,
};
use crate::risk;
use crate::sessions::{is_seed_only, new_session};

pub async fn handle_predict(
    user_token: Option<String>,
    request: PredictionRequest,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let result = risk::predict(state.risk_model.as_ref(), &request)
        .map_err(|e| reject(ApiError::BadRequest(e.to_string())))?;
    info!(
        "Prediction: risk {} ({:.2}% disease)",
        result.risk_level.as_str(),
        result.probabilities.disease
    );

    let examination = HealthExamination {
        id: new_record_id(),
        user_id: state.resolve_user(user_token).await,
        age: request.age,
        gender: request.gender,
        height: request.height,
        weight: request.weight,
        systolic_bp: request.systolic_blood_pressure,
        diastolic_bp: request.diastolic_blood_pressure,
        bmi: result.bmi,
        pulse_pressure: result.pulse_pressure,
        risk_level: result.risk_level.as_str().to_string(),
        prediction_proba: result.probabilities.disease / 100.0,
        cholesterol: request.cholesterol,
        glucose: request.glucose,
        smoking: request.smoking,
        alcohol: request.alcohol,
        physical_activity: request.physical_activity,
        created: Utc::now(),
    };

    state.store.insert_examination(&examination).await.map_err(|e| {
        error!("Failed to save examination: {}", e);
        reject(e)
    })?;

    Ok(warp::reply::json(&PredictionResponse {
        success: true,
        data: result,
        examination_id: Some(examination.id),
    }))
}

fn failure_message(context: &str, err: &GenerationError) -> String {
    match err {
        GenerationError::ModelNotConfigured => err.to_string(),
        GenerationError::Model(_) => format!("{}: {}", context, err),
    }
}

pub async fn handle_recommendation(request: RecommendationRequest, state: AppState) -> Result<impl Reply, Rejection> {
    let evaluate = state.evaluation_enabled().await;

    let response = match state.summarizer.recommend(&request, evaluate).await {
        Ok(answer) => RecommendationResponse {
            success: true,
            recommendation: answer.text,
            error: None,
            answer: answer.generated,
        },
        Err(e) => {
            warn!("Recommendation failed: {}", e);
            RecommendationResponse::failure(failure_message("Error generating recommendation", &e))
        }
    };

    Ok(warp::reply::json(&response))
}

/// Continue the requested session, or the one belonging to the examination.
async fn existing_session(state: &AppState, request: &ChatRequest) -> Option<HealthChatSession> {
    if let Some(session_id) = &request.session_id {
        match state.store.get_session(session_id).await {
            Ok(Some(session)) => return Some(session),
            Ok(None) => info!("Chat: session {} not found", session_id),
            Err(e) => warn!("Chat: failed to load session {}: {}", session_id, e),
        }
    }

    let examination_id = request.examination_id.as_deref()?;
    match state.store.find_session_by_examination(examination_id).await {
        Ok(session) => session,
        Err(e) => {
            warn!("Chat: failed to find session for examination {}: {}", examination_id, e);
            None
        }
    }
}

pub async fn handle_chat(
    user_token: Option<String>,
    request: ChatRequest,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    if !state.summarizer.has_model() {
        return Ok(warp::reply::json(&ChatResponse::failure(
            GenerationError::ModelNotConfigured.to_string(),
        )));
    }

    let (mut session, is_new) = match existing_session(&state, &request).await {
        Some(session) => (session, false),
        None => {
            let Some(examination_id) = request.examination_id.as_deref() else {
                return Ok(warp::reply::json(&ChatResponse::failure(
                    "examination_id is required to create a new chat session",
                )));
            };
            let examination = match state.store.get_examination(examination_id).await {
                Ok(examination) => examination,
                Err(e) => {
                    warn!("Chat: failed to load examination {}: {}", examination_id, e);
                    None
                }
            };
            let user_id = state.resolve_user(user_token).await;
            info!("Chat: creating session for examination {}", examination_id);
            (new_session(&request, examination_id, examination.as_ref(), user_id), true)
        }
    };

    // opening a session only stores the seeded transcript
    if is_new && request.message.trim().is_empty() && is_seed_only(&session.messages) {
        if let Err(e) = state.store.save_session(&session).await {
            error!("Chat: failed to save session: {}", e);
            return Ok(warp::reply::json(&ChatResponse::failure(format!("Error in health chat: {}", e))));
        }
        return Ok(warp::reply::json(&ChatResponse {
            success: true,
            answer: String::new(),
            error: None,
            session_id: Some(session.id),
            generated: Default::default(),
        }));
    }

    let evaluate = state.evaluation_enabled().await;
    let turn = ChatTurn {
        message: &request.message,
        risk_level: request.risk_level,
        patient: request.patient_data.as_ref(),
        history: &session.messages,
    };
    let answer = match state.summarizer.chat(turn, evaluate).await {
        Ok(answer) => answer,
        Err(e) => {
            warn!("Chat failed: {}", e);
            return Ok(warp::reply::json(&ChatResponse::failure(failure_message("Error in health chat", &e))));
        }
    };

    let now = Utc::now();
    session.messages.push(SessionMessage::User {
        content: request.message.clone(),
        timestamp: now,
    });
    session.messages.push(SessionMessage::Bot {
        content: answer.text.clone(),
        timestamp: now,
        processed_content: answer.generated.processed_content.clone(),
        references: answer.generated.references.clone().unwrap_or_default(),
        evaluation_metrics: answer.generated.evaluation_metrics.clone(),
    });

    if let Err(e) = state.store.save_session(&session).await {
        error!("Chat: failed to save session {}: {}", session.id, e);
        return Ok(warp::reply::json(&ChatResponse::failure(format!("Error in health chat: {}", e))));
    }

    Ok(warp::reply::json(&ChatResponse {
        success: true,
        answer: answer.text,
        error: None,
        session_id: Some(session.id),
        generated: answer.generated,
    }))
}
