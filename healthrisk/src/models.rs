use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use crate::references::ReferenceItem;

/// Record ids are citation-safe: `source:<id>` must match `[A-Za-z0-9_]+`.
pub fn new_record_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notebook {
    pub id: String,
    pub name: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatInclude {
    Full,
    Off,
}

impl ChatInclude {
    /// Unknown or empty values fall back to `Full`.
    pub fn parse(value: &str) -> Self {
        match value {
            "off" => ChatInclude::Off,
            _ => ChatInclude::Full,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChatInclude::Full => "full",
            ChatInclude::Off => "off",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Source {
    pub id: String,
    pub notebook_id: String,
    pub title: Option<String>,
    pub full_text: Option<String>,
    pub chat_include: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl Source {
    pub fn inclusion(&self) -> ChatInclude {
        ChatInclude::parse(&self.chat_include)
    }

    pub fn ref_id(&self) -> String {
        format!("source:{}", self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_probability(prob_disease: f64) -> Self {
        if prob_disease >= 0.7 {
            RiskLevel::High
        } else if prob_disease >= 0.3 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low Risk",
            RiskLevel::Medium => "Medium Risk",
            RiskLevel::High => "High Risk",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HealthExamination {
    pub id: String,
    pub user_id: Option<String>,
    pub age: i32,
    pub gender: i32,
    pub height: f64,
    pub weight: f64,
    pub systolic_bp: i32,
    pub diastolic_bp: i32,
    pub bmi: f64,
    pub pulse_pressure: f64,
    pub risk_level: String,
    pub prediction_proba: f64,
    pub cholesterol: Option<i32>,
    pub glucose: Option<i32>,
    pub smoking: Option<i32>,
    pub alcohol: Option<i32>,
    pub physical_activity: Option<i32>,
    pub created: DateTime<Utc>,
}

/// Scores returned by the evaluation service. `None` means the metric was
/// not evaluated, which is not the same as a score of `0.0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_relevance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_relevance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groundedness: Option<f64>,
}

impl EvaluationMetrics {
    pub fn is_empty(&self) -> bool {
        self.context_relevance.is_none()
            && self.answer_relevance.is_none()
            && self.groundedness.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientInfo {
    pub age: i32,
    pub gender: i32,
    pub blood_pressure: String,
    pub bmi: f64,
    pub bmi_category: String,
    pub bp_category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cholesterol: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glucose: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smoking: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alcohol: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_activity: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExaminationSummary {
    pub risk_level: RiskLevel,
    pub risk_label: String,
    pub patient_info: PatientInfo,
    pub prob_disease: f64,
    pub examination_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation_processed_content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendation_references: Vec<ReferenceItem>,
}

/// One entry of a chat session transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SessionMessage {
    User {
        content: String,
        timestamp: DateTime<Utc>,
    },
    Bot {
        content: String,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        processed_content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        references: Vec<ReferenceItem>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        evaluation_metrics: Option<EvaluationMetrics>,
    },
    Result {
        content: ExaminationSummary,
        timestamp: DateTime<Utc>,
    },
}

impl SessionMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionMessage::User { .. } => "user",
            SessionMessage::Bot { .. } => "bot",
            SessionMessage::Result { .. } => "result",
        }
    }

    /// Plain text of the message, `None` for structured results.
    pub fn text(&self) -> Option<&str> {
        match self {
            SessionMessage::User { content, .. } | SessionMessage::Bot { content, .. } => {
                Some(content)
            }
            SessionMessage::Result { .. } => None,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct HealthChatSession {
    pub id: String,
    pub user_id: Option<String>,
    pub examination_id: Option<String>,
    pub title: Option<String>,
    pub messages: Json<Vec<SessionMessage>>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

// API Request/Response models
#[derive(Debug, Clone, Deserialize)]
pub struct PredictionRequest {
    pub age: i32,
    pub gender: i32,
    pub height: f64,
    pub weight: f64,
    pub systolic_blood_pressure: i32,
    pub diastolic_blood_pressure: i32,
    pub cholesterol: Option<i32>,
    pub glucose: Option<i32>,
    pub smoking: Option<i32>,
    pub alcohol: Option<i32>,
    pub physical_activity: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Probabilities {
    pub no_disease: f64,
    pub disease: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub prediction: u8,
    pub risk_level: RiskLevel,
    pub confidence: f64,
    pub probabilities: Probabilities,
    pub bmi: f64,
    pub pulse_pressure: f64,
}

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub success: bool,
    pub data: PredictionResult,
    pub examination_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecommendationRequest {
    pub age: i32,
    pub gender: i32,
    pub height: f64,
    pub weight: f64,
    pub systolic_blood_pressure: i32,
    pub diastolic_blood_pressure: i32,
    pub bmi: f64,
    pub risk_level: RiskLevel,
    pub prob_disease: f64,
    pub cholesterol: Option<i32>,
    pub glucose: Option<i32>,
    pub smoking: Option<i32>,
    pub alcohol: Option<i32>,
    pub physical_activity: Option<i32>,
}

/// Answer payload shared by the recommendation and chat endpoints.
#[derive(Debug, Default, Serialize)]
pub struct GeneratedAnswer {
    pub processed_content: Option<String>,
    pub references: Option<Vec<ReferenceItem>>,
    pub evaluation_metrics: Option<EvaluationMetrics>,
    pub meets_threshold: Option<bool>,
    pub threshold_warning: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecommendationResponse {
    pub success: bool,
    pub recommendation: String,
    pub error: Option<String>,
    #[serde(flatten)]
    pub answer: GeneratedAnswer,
}

impl RecommendationResponse {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            recommendation: String::new(),
            error: Some(error.into()),
            answer: GeneratedAnswer::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PatientData {
    pub age: Option<i32>,
    pub systolic_bp: Option<i32>,
    pub diastolic_bp: Option<i32>,
    pub bmi: Option<f64>,
    pub prob_disease: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    pub risk_level: RiskLevel,
    pub patient_data: Option<PatientData>,
    pub examination_id: Option<String>,
    pub session_id: Option<String>,
    pub recommendation: Option<String>,
    pub recommendation_processed_content: Option<String>,
    pub recommendation_references: Option<Vec<ReferenceItem>>,
    pub recommendation_evaluation_metrics: Option<EvaluationMetrics>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub success: bool,
    pub answer: String,
    pub error: Option<String>,
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub generated: GeneratedAnswer,
}

impl ChatResponse {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            answer: String::new(),
            error: Some(error.into()),
            session_id: None,
            generated: GeneratedAnswer::default(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionItem {
    pub id: String,
    pub title: Option<String>,
    pub examination_id: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl From<&HealthChatSession> for SessionItem {
    fn from(session: &HealthChatSession) -> Self {
        Self {
            id: session.id.clone(),
            title: session.title.clone(),
            examination_id: session.examination_id.clone(),
            created: session.created,
            updated: session.updated,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionItem>,
}

#[derive(Debug, Serialize)]
pub struct SessionDetailResponse {
    #[serde(flatten)]
    pub session: SessionItem,
    pub messages: Vec<SessionMessage>,
}

#[derive(Debug, Deserialize)]
pub struct SessionUpdateRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct IngestSourceRequest {
    pub notebook_id: Option<String>,
    pub title: String,
    pub content: String,
    #[serde(default = "default_chat_include")]
    pub chat_include: ChatInclude,
}

fn default_chat_include() -> ChatInclude {
    ChatInclude::Full
}

#[derive(Debug, Serialize)]
pub struct IngestSourceResponse {
    pub source_id: String,
    pub notebook_id: String,
    pub chunks_count: usize,
    pub embedded: bool,
}

#[derive(Debug, Serialize)]
pub struct SourceDetail {
    pub id: String,
    pub title: Option<String>,
    pub full_text: Option<String>,
    pub chat_include: ChatInclude,
    pub updated: DateTime<Utc>,
}

impl From<Source> for SourceDetail {
    fn from(source: Source) -> Self {
        let chat_include = source.inclusion();
        Self {
            id: source.id,
            title: source.title,
            full_text: source.full_text,
            chat_include,
            updated: source.updated,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct EvaluationConfigResponse {
    pub success: bool,
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_ids_are_citation_safe() {
        let id = new_record_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn risk_level_thresholds() {
        assert_eq!(RiskLevel::from_probability(0.7), RiskLevel::High);
        assert_eq!(RiskLevel::from_probability(0.69), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_probability(0.3), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_probability(0.29), RiskLevel::Low);
    }

    #[test]
    fn missing_metric_is_not_zero() {
        let metrics: EvaluationMetrics =
            serde_json::from_value(json!({"context_relevance": 0.0})).expect("parses");
        assert_eq!(metrics.context_relevance, Some(0.0));
        assert_eq!(metrics.answer_relevance, None);
        assert!(!metrics.is_empty());
        assert!(EvaluationMetrics::default().is_empty());
    }

    #[test]
    fn session_messages_are_tagged_by_type() {
        let raw = json!([
            {"type": "user", "content": "hi", "timestamp": "2024-05-01T10:00:00Z"},
            {"type": "bot", "content": "hello", "timestamp": "2024-05-01T10:00:01Z",
             "references": [{"number": 1, "type": "source", "id": "a1", "title": "Diet"}]}
        ]);
        let messages: Vec<SessionMessage> = serde_json::from_value(raw).expect("parses");

        assert_eq!(messages[0].kind(), "user");
        match &messages[1] {
            SessionMessage::Bot { references, evaluation_metrics, .. } => {
                assert_eq!(references.len(), 1);
                assert!(evaluation_metrics.is_none());
            }
            other => panic!("expected bot message, got {:?}", other.kind()),
        }

        let back = serde_json::to_value(&messages[0]).expect("serializes");
        assert_eq!(back["type"], "user");
    }

    #[test]
    fn chat_include_defaults_to_full() {
        assert_eq!(ChatInclude::parse("off"), ChatInclude::Off);
        assert_eq!(ChatInclude::parse("full"), ChatInclude::Full);
        assert_eq!(ChatInclude::parse(""), ChatInclude::Full);
    }
}
