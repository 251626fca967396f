//! Client for the RAG evaluation service.
//!
//! The service scores an answer for context relevance, answer relevance and
//! groundedness. It is slow and optional: every failure here becomes an
//! unsuccessful [`EvaluationResponse`] with no metrics, never an error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::models::EvaluationMetrics;

const STATUS_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationApp {
    HealthRecommendation,
    HealthChat,
    General,
}

impl EvaluationApp {
    pub fn timeout(&self) -> Duration {
        match self {
            EvaluationApp::HealthRecommendation => Duration::from_secs(180),
            EvaluationApp::HealthChat => Duration::from_secs(120),
            EvaluationApp::General => Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationRequest {
    pub query: String,
    pub context: String,
    pub response: String,
    pub app_id: EvaluationApp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationResponse {
    pub success: bool,
    #[serde(default)]
    pub metrics: EvaluationMetrics,
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl EvaluationResponse {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Metrics of a successful evaluation that produced at least one score.
    pub fn into_metrics(self) -> Option<EvaluationMetrics> {
        (self.success && !self.metrics.is_empty()).then_some(self.metrics)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorStatus {
    pub success: bool,
    pub initialized: bool,
    #[serde(default)]
    pub trulens_available: bool,
}

/// Scores a generated answer. Implementations never fail; problems are
/// reported as an unsuccessful response.
#[async_trait]
pub trait AnswerEvaluator: Send + Sync {
    async fn evaluate(&self, request: &EvaluationRequest) -> EvaluationResponse;
}

/// Shared handle to the evaluation service. Cloning shares the readiness
/// flag, so one successful probe is seen by every request.
#[derive(Clone)]
pub struct EvaluatorClient {
    http: reqwest::Client,
    base_url: String,
    ready: Arc<AtomicBool>,
}

impl EvaluatorClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> anyhow::Result<EvaluatorStatus> {
        let status = self
            .http
            .get(format!("{}/status", self.base_url))
            .timeout(STATUS_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(status)
    }

    /// Probe the service once it is known to be ready; otherwise ask
    /// `/status` again. Safe to call from any number of requests at once.
    pub async fn ensure_ready(&self) -> bool {
        if self.is_ready() {
            return true;
        }
        let ready = match self.status().await {
            Ok(status) => {
                info!("Evaluator reachable, initialized={}", status.initialized);
                status.initialized
            }
            Err(e) => {
                warn!("Evaluator not reachable: {}", e);
                false
            }
        };
        self.ready.store(ready, Ordering::SeqCst);
        ready
    }

    /// Forget the cached readiness and probe again.
    pub async fn reinitialize(&self) -> bool {
        self.ready.store(false, Ordering::SeqCst);
        self.ensure_ready().await
    }

    async fn post_evaluation(&self, request: &EvaluationRequest) -> EvaluationResponse {
        if !self.ensure_ready().await {
            return EvaluationResponse::failed("evaluation service not available");
        }

        let timeout = request.app_id.timeout();
        let result = self
            .http
            .post(format!("{}/evaluate", self.base_url))
            .timeout(timeout)
            .json(request)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                warn!("Evaluation timed out after {}s", timeout.as_secs());
                return EvaluationResponse::failed(format!(
                    "Request timeout after {}s",
                    timeout.as_secs()
                ));
            }
            Err(e) => {
                // the service may have gone away; probe again next time
                self.ready.store(false, Ordering::SeqCst);
                warn!("Evaluation request failed: {}", e);
                return EvaluationResponse::failed(e.to_string());
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            warn!("Evaluator returned status {}", status);
            return EvaluationResponse::failed(format!("Service returned status {}", status.as_u16()));
        }

        match response.json::<EvaluationResponse>().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Evaluator returned an unreadable body: {}", e);
                EvaluationResponse::failed(e.to_string())
            }
        }
    }
}

#[async_trait]
impl AnswerEvaluator for EvaluatorClient {
    async fn evaluate(&self, request: &EvaluationRequest) -> EvaluationResponse {
        self.post_evaluation(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn ready_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "initialized": true, "trulens_available": true
            })))
            .mount(&server)
            .await;
        server
    }

    fn request(app_id: EvaluationApp) -> EvaluationRequest {
        EvaluationRequest {
            query: "How do I lower my blood pressure?".into(),
            context: "=== source:a ===".into(),
            response: "Reduce salt.".into(),
            app_id,
        }
    }

    #[test]
    fn timeouts_by_app() {
        assert_eq!(EvaluationApp::HealthRecommendation.timeout().as_secs(), 180);
        assert_eq!(EvaluationApp::HealthChat.timeout().as_secs(), 120);
        assert_eq!(EvaluationApp::General.timeout().as_secs(), 60);
    }

    #[tokio::test]
    async fn returns_metrics_on_success() {
        let server = ready_server().await;
        Mock::given(method("POST"))
            .and(path("/evaluate"))
            .and(body_partial_json(json!({"app_id": "health_chat"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "metrics": {"context_relevance": 0.9, "answer_relevance": 0.85, "groundedness": 0.75}
            })))
            .mount(&server)
            .await;

        let client = EvaluatorClient::new(server.uri());
        let metrics = client
            .evaluate(&request(EvaluationApp::HealthChat))
            .await
            .into_metrics()
            .expect("metrics");

        assert_eq!(metrics.context_relevance, Some(0.9));
        assert_eq!(metrics.groundedness, Some(0.75));
    }

    #[tokio::test]
    async fn non_200_means_no_metrics() {
        let server = ready_server().await;
        Mock::given(method("POST"))
            .and(path("/evaluate"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = EvaluatorClient::new(server.uri());
        let response = client.evaluate(&request(EvaluationApp::General)).await;

        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("Service returned status 500"));
        assert!(response.into_metrics().is_none());
    }

    #[tokio::test]
    async fn unreachable_service_is_not_ready() {
        let client = EvaluatorClient::new("http://127.0.0.1:9");
        assert!(!client.ensure_ready().await);

        let response = client.evaluate(&request(EvaluationApp::HealthChat)).await;
        assert!(!response.success);
        assert!(response.into_metrics().is_none());
    }

    #[tokio::test]
    async fn uninitialized_service_is_not_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "initialized": false
            })))
            .mount(&server)
            .await;

        let client = EvaluatorClient::new(server.uri());
        assert!(!client.ensure_ready().await);
        assert!(!client.is_ready());
    }

    #[tokio::test]
    async fn readiness_is_probed_once_and_shared() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true, "initialized": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = EvaluatorClient::new(server.uri());
        let clone = client.clone();
        assert!(client.ensure_ready().await);
        assert!(clone.ensure_ready().await);
    }

    #[tokio::test]
    async fn successful_response_without_scores_has_no_metrics() {
        let server = ready_server().await;
        Mock::given(method("POST"))
            .and(path("/evaluate"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"success": true, "metrics": {}})),
            )
            .mount(&server)
            .await;

        let client = EvaluatorClient::new(server.uri());
        let response = client.evaluate(&request(EvaluationApp::General)).await;

        assert!(response.success);
        assert!(response.into_metrics().is_none());
    }
}
