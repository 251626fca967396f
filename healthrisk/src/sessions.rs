//! Building and reading health chat sessions.

use chrono::Utc;
use sqlx::types::Json;

use crate::db::bare_id;
use crate::models::{
    new_record_id, ChatRequest, ExaminationSummary, HealthChatSession, HealthExamination, PatientInfo, RiskLevel,
    SessionMessage,
};
use crate::risk::{bmi_category, bp_category};

const RECOMMENDATION_HEADER: &str = "**💡 Healthy lifestyle recommendations:**";
const RECOMMENDATION_NOTE: &str =
    "**ℹ️ Note:** This result is educational and does not replace professional medical advice.";

/// `"<risk label> - sys/dia"`, or just the label without blood pressure.
pub fn session_title(request: &ChatRequest) -> String {
    let label = request.risk_level.label();
    let pressure = request
        .patient_data
        .as_ref()
        .and_then(|p| p.systolic_bp.zip(p.diastolic_bp));
    match pressure {
        Some((systolic, diastolic)) => format!("{} - {}/{}", label, systolic, diastolic),
        None => label.to_string(),
    }
}

pub fn examination_summary(exam: &HealthExamination, request: &ChatRequest) -> ExaminationSummary {
    let risk_level = RiskLevel::parse(&exam.risk_level).unwrap_or(request.risk_level);
    ExaminationSummary {
        risk_level,
        risk_label: risk_level.label().to_string(),
        patient_info: PatientInfo {
            age: exam.age,
            gender: exam.gender,
            blood_pressure: format!("{}/{}", exam.systolic_bp, exam.diastolic_bp),
            bmi: exam.bmi,
            bmi_category: bmi_category(exam.bmi).to_string(),
            bp_category: bp_category(exam.systolic_bp, exam.diastolic_bp).to_string(),
            cholesterol: exam.cholesterol,
            glucose: exam.glucose,
            smoking: exam.smoking,
            alcohol: exam.alcohol,
            physical_activity: exam.physical_activity,
        },
        prob_disease: exam.prediction_proba * 100.0,
        examination_id: exam.id.clone(),
        recommendation: request.recommendation.clone(),
        recommendation_processed_content: request.recommendation_processed_content.clone(),
        recommendation_references: request.recommendation_references.clone().unwrap_or_default(),
    }
}

fn wrap_recommendation(text: &str) -> String {
    format!("{}\n\n{}\n\n{}", RECOMMENDATION_HEADER, text, RECOMMENDATION_NOTE)
}

/// Bot message carrying the recommendation the patient already received.
/// Its evaluation scores are kept only when it cites something.
pub fn recommendation_message(request: &ChatRequest) -> Option<SessionMessage> {
    let recommendation = request.recommendation.as_deref()?;
    let references = request.recommendation_references.clone().unwrap_or_default();

    let processed_content = request.recommendation_processed_content.as_deref().map(|processed| {
        if processed.contains(RECOMMENDATION_HEADER) {
            processed.to_string()
        } else {
            wrap_recommendation(processed)
        }
    });
    let evaluation_metrics = if references.is_empty() {
        None
    } else {
        request.recommendation_evaluation_metrics.clone()
    };

    Some(SessionMessage::Bot {
        content: wrap_recommendation(recommendation),
        timestamp: Utc::now(),
        processed_content,
        references,
        evaluation_metrics,
    })
}

/// A fresh session for `examination_id`, seeded with the examination result
/// and the initial recommendation when they are available.
pub fn new_session(
    request: &ChatRequest,
    examination_id: &str,
    examination: Option<&HealthExamination>,
    user_id: Option<String>,
) -> HealthChatSession {
    let mut messages = Vec::new();
    if let Some(exam) = examination {
        messages.push(SessionMessage::Result {
            content: examination_summary(exam, request),
            timestamp: Utc::now(),
        });
        messages.extend(recommendation_message(request));
    }

    let now = Utc::now();
    HealthChatSession {
        id: new_record_id(),
        user_id,
        examination_id: Some(bare_id(examination_id).to_string()),
        title: Some(session_title(request)),
        messages: Json(messages),
        created: now,
        updated: now,
    }
}

/// True when the transcript holds only the seeded result, optionally
/// followed by the seeded recommendation.
pub fn is_seed_only(messages: &[SessionMessage]) -> bool {
    matches!(
        messages,
        [SessionMessage::Result { .. }] | [SessionMessage::Result { .. }, SessionMessage::Bot { .. }]
    )
}
