// Summarizer Agent: grounded answer generation with citations and evaluation

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::agents::decision::check_threshold;
use crate::agents::retriever::{truncate_chars, ContextAssembler, ContextBundle};
use crate::evaluator::{AnswerEvaluator, EvaluationApp, EvaluationRequest};
use crate::llm::{ChatMessage, ChatModel};
use crate::metrics::metrics;
use crate::models::{EvaluationMetrics, GeneratedAnswer, PatientData, RecommendationRequest, RiskLevel, SessionMessage};
use crate::prompts::{self, LIFESTYLE_QUERY};
use crate::references::{render_references, RenderedReferences, TitleLookup};

pub const RECOMMENDATION_TEMPERATURE: f32 = 0.2;
const RECOMMENDATION_EVAL_LIMITS: EvalLimits = EvalLimits { context: 3000, response: 2000 };
const CHAT_EVAL_LIMITS: EvalLimits = EvalLimits { context: 4000, response: 2500 };
const HISTORY_EVAL_MESSAGES: usize = 6;
const HISTORY_EVAL_CLIP: usize = 200;
const FALLBACK_EVAL_CONTEXT: &str = "Health knowledge base context";
const FALLBACK_EVAL_QUERY: &str = "Question about health and a healthy lifestyle";

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Chat model is not configured")]
    ModelNotConfigured,
    #[error("Chat model request failed: {0}")]
    Model(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy)]
struct EvalLimits {
    context: usize,
    response: usize,
}

/// Clip text for the evaluator, appending `...` when cut.
pub fn truncate_for_eval(text: &str, max_chars: usize) -> String {
    truncate_chars(text, max_chars).0
}

/// A model answer after citation rewriting and the quality gate.
#[derive(Debug)]
pub struct Answer {
    pub text: String,
    pub generated: GeneratedAnswer,
}

/// One chat turn: the new message plus the transcript so far.
pub struct ChatTurn<'a> {
    pub message: &'a str,
    pub risk_level: RiskLevel,
    pub patient: Option<&'a PatientData>,
    pub history: &'a [SessionMessage],
}

#[derive(Clone)]
pub struct SummarizerAgent {
    assembler: ContextAssembler,
    chat_model: Option<Arc<dyn ChatModel>>,
    titles: Arc<dyn TitleLookup>,
    evaluator: Arc<dyn AnswerEvaluator>,
}

impl SummarizerAgent {
    pub fn new(
        assembler: ContextAssembler,
        chat_model: Option<Arc<dyn ChatModel>>,
        titles: Arc<dyn TitleLookup>,
        evaluator: Arc<dyn AnswerEvaluator>,
    ) -> Self {
        Self {
            assembler,
            chat_model,
            titles,
            evaluator,
        }
    }

    pub fn has_model(&self) -> bool {
        self.chat_model.is_some()
    }

    fn model(&self) -> Result<&Arc<dyn ChatModel>, GenerationError> {
        self.chat_model.as_ref().ok_or(GenerationError::ModelNotConfigured)
    }

    pub async fn recommend(&self, request: &RecommendationRequest, evaluate: bool) -> Result<Answer, GenerationError> {
        let model = self.model()?;
        info!("Summarizer: generating recommendation for {} risk", request.risk_level.as_str());

        let bundle = self.assembler.assemble(LIFESTYLE_QUERY, None).await;
        let messages = [
            ChatMessage::system(prompts::recommendation_system(&bundle)),
            ChatMessage::user(prompts::recommendation_user(request, &bundle)),
        ];
        let text = model.complete(&messages, Some(RECOMMENDATION_TEMPERATURE)).await?;
        metrics().answers.with_label_values(&["recommendation"]).inc();

        let rendered = render_references(self.titles.as_ref(), &text).await;

        let evaluation = if evaluate {
            self.evaluate(
                EvaluationApp::HealthRecommendation,
                prompts::recommendation_eval_query(request),
                &bundle.render(),
                &text,
                RECOMMENDATION_EVAL_LIMITS,
            )
            .await
        } else {
            None
        };

        Ok(finish("recommendation", text, rendered, evaluation))
    }

    pub async fn chat(&self, turn: ChatTurn<'_>, evaluate: bool) -> Result<Answer, GenerationError> {
        let model = self.model()?;
        info!("Summarizer: answering chat message ({} prior messages)", turn.history.len());

        let bundle = self.assembler.assemble(LIFESTYLE_QUERY, None).await;
        let language = prompts::detect_language(turn.message);

        let mut messages = vec![ChatMessage::system(prompts::chat_system(
            &bundle,
            turn.risk_level,
            turn.patient,
            language,
        ))];
        messages.extend(replay_history(turn.history));
        messages.push(ChatMessage::user(turn.message));

        let text = model.complete(&messages, None).await?;
        metrics().answers.with_label_values(&["chat"]).inc();

        let rendered = render_references(self.titles.as_ref(), &text).await;

        // metrics are attached only to answers that carry references
        let evaluation = if evaluate {
            let query = if turn.message.trim().is_empty() {
                FALLBACK_EVAL_QUERY.to_string()
            } else {
                turn.message.to_string()
            };
            let context = chat_eval_context(&bundle, turn.history, turn.message);
            self.evaluate(EvaluationApp::HealthChat, query, &context, &text, CHAT_EVAL_LIMITS)
                .await
                .filter(|_| !rendered.references.is_empty())
        } else {
            None
        };

        Ok(finish("chat", text, rendered, evaluation))
    }

    async fn evaluate(
        &self,
        app_id: EvaluationApp,
        query: String,
        context: &str,
        response: &str,
        limits: EvalLimits,
    ) -> Option<EvaluationMetrics> {
        let flow = match app_id {
            EvaluationApp::HealthRecommendation => "recommendation",
            EvaluationApp::HealthChat => "chat",
            EvaluationApp::General => "general",
        };
        let request = EvaluationRequest {
            query,
            context: truncate_for_eval(context, limits.context),
            response: truncate_for_eval(response, limits.response),
            app_id,
        };
        let result = self.evaluator.evaluate(&request).await;
        if let Some(error) = &result.error {
            warn!("Summarizer: evaluation unavailable: {}", error);
        }
        let metrics_out = result.into_metrics();
        let outcome = if metrics_out.is_some() { "scored" } else { "unavailable" };
        metrics().evaluations.with_label_values(&[flow, outcome]).inc();
        metrics_out
    }
}

fn replay_history(history: &[SessionMessage]) -> Vec<ChatMessage> {
    history
        .iter()
        .filter_map(|message| match message {
            SessionMessage::User { content, .. } => Some(ChatMessage::user(content.clone())),
            SessionMessage::Bot { content, .. } => Some(ChatMessage::assistant(content.clone())),
            SessionMessage::Result { .. } => None,
        })
        .collect()
}

/// Evaluation context for a chat answer: the retrieved material, or the tail
/// of the conversation when nothing was retrieved.
fn chat_eval_context(bundle: &ContextBundle, history: &[SessionMessage], message: &str) -> String {
    if !bundle.is_empty() {
        return bundle.render();
    }

    let clip = |kind: &str, text: &str| {
        format!("{}: {}", kind, text.chars().take(HISTORY_EVAL_CLIP).collect::<String>())
    };
    let mut recent: Vec<Option<String>> = history
        .iter()
        .map(|m| m.text().map(|text| clip(m.kind(), text)))
        .collect();
    recent.push(Some(clip("user", message)));

    let start = recent.len().saturating_sub(HISTORY_EVAL_MESSAGES);
    let context = recent[start..].iter().flatten().cloned().collect::<Vec<_>>().join("\n");
    if context.trim().is_empty() {
        FALLBACK_EVAL_CONTEXT.to_string()
    } else {
        context
    }
}

fn finish(
    flow: &str,
    text: String,
    rendered: RenderedReferences,
    evaluation: Option<EvaluationMetrics>,
) -> Answer {
    let gate = check_threshold(evaluation.as_ref());
    if !gate.meets_threshold {
        metrics().gate_failures.with_label_values(&[flow]).inc();
    }

    let references = rendered.processed_content.as_ref().map(|_| rendered.references);
    Answer {
        text,
        generated: GeneratedAnswer {
            processed_content: rendered.processed_content,
            references,
            evaluation_metrics: evaluation,
            meets_threshold: Some(gate.meets_threshold),
            threshold_warning: gate.warning,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::retriever::{SearchHit, SourceCatalog, VectorSearch};
    use crate::evaluator::EvaluationResponse;
    use crate::models::Source;
    use crate::references::ReferenceKey;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    struct OneSourceCatalog;

    #[async_trait]
    impl SourceCatalog for OneSourceCatalog {
        async fn latest_notebook_id(&self) -> Result<Option<String>> {
            Ok(Some("nb".into()))
        }

        async fn get_source(&self, _id: &str) -> Result<Option<Source>> {
            Ok(None)
        }

        async fn recent_sources(&self, _notebook_id: &str, _limit: usize) -> Result<Vec<Source>> {
            Ok(vec![Source {
                id: "a1".into(),
                notebook_id: "nb".into(),
                title: Some("DASH diet".into()),
                full_text: Some("Eat vegetables and less salt.".into()),
                chat_include: "full".into(),
                created: Utc::now(),
                updated: Utc::now(),
            }])
        }
    }

    struct NoSearch;

    #[async_trait]
    impl VectorSearch for NoSearch {
        async fn similarity_search(&self, _: &[f32], _: &str, _: f32, _: usize) -> Result<Vec<SearchHit>> {
            Ok(vec![])
        }
    }

    struct ScriptedModel {
        answer: String,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, messages: &[ChatMessage], _temperature: Option<f32>) -> Result<String> {
            self.seen.lock().expect("lock").push(messages.to_vec());
            Ok(self.answer.clone())
        }
    }

    struct Titles;

    #[async_trait]
    impl TitleLookup for Titles {
        async fn get_title(&self, key: &ReferenceKey) -> Result<Option<String>> {
            Ok((key.id == "a1").then(|| "DASH diet".to_string()))
        }
    }

    struct FixedEvaluator {
        metrics: EvaluationMetrics,
        requests: Mutex<Vec<EvaluationRequest>>,
    }

    #[async_trait]
    impl AnswerEvaluator for FixedEvaluator {
        async fn evaluate(&self, request: &EvaluationRequest) -> EvaluationResponse {
            self.requests.lock().expect("lock").push(request.clone());
            EvaluationResponse {
                success: true,
                metrics: self.metrics.clone(),
                ..EvaluationResponse::default()
            }
        }
    }

    fn agent(answer: &str, metrics: EvaluationMetrics) -> (SummarizerAgent, Arc<ScriptedModel>, Arc<FixedEvaluator>) {
        let model = Arc::new(ScriptedModel {
            answer: answer.to_string(),
            seen: Mutex::new(vec![]),
        });
        let evaluator = Arc::new(FixedEvaluator {
            metrics,
            requests: Mutex::new(vec![]),
        });
        let assembler = ContextAssembler::new(Arc::new(OneSourceCatalog), Arc::new(NoSearch), None);
        let agent = SummarizerAgent::new(assembler, Some(model.clone()), Arc::new(Titles), evaluator.clone());
        (agent, model, evaluator)
    }

    fn good_metrics() -> EvaluationMetrics {
        EvaluationMetrics {
            context_relevance: Some(0.9),
            answer_relevance: Some(0.9),
            groundedness: Some(0.9),
        }
    }

    fn recommendation_request() -> RecommendationRequest {
        RecommendationRequest {
            age: 50,
            gender: 2,
            height: 175.0,
            weight: 90.0,
            systolic_blood_pressure: 145,
            diastolic_blood_pressure: 92,
            bmi: 29.39,
            risk_level: RiskLevel::High,
            prob_disease: 72.5,
            cholesterol: Some(2),
            glucose: None,
            smoking: Some(1),
            alcohol: None,
            physical_activity: None,
        }
    }

    #[tokio::test]
    async fn recommendation_is_cited_evaluated_and_gated() {
        let (agent, model, evaluator) = agent("Cut salt [source:a1].", good_metrics());

        let answer = agent.recommend(&recommendation_request(), true).await.expect("answer");

        assert_eq!(answer.text, "Cut salt [source:a1].");
        assert_eq!(answer.generated.processed_content.as_deref(), Some("Cut salt [1](#ref-source-a1)."));
        assert_eq!(answer.generated.references.as_ref().map(Vec::len), Some(1));
        assert_eq!(answer.generated.meets_threshold, Some(true));

        let seen = model.seen.lock().expect("lock");
        assert!(seen[0][0].content.contains("- source:a1"));

        let requests = evaluator.requests.lock().expect("lock");
        assert_eq!(requests[0].app_id, EvaluationApp::HealthRecommendation);
        assert!(requests[0].query.contains("risk level high"));
    }

    #[tokio::test]
    async fn low_scores_produce_a_warning() {
        let (agent, _, _) = agent(
            "Walk daily [source:a1].",
            EvaluationMetrics {
                groundedness: Some(0.5),
                ..good_metrics()
            },
        );

        let answer = agent.recommend(&recommendation_request(), true).await.expect("answer");

        assert_eq!(answer.generated.meets_threshold, Some(false));
        assert!(answer.generated.threshold_warning.expect("warning").contains("Groundedness: 50.00%"));
    }

    #[tokio::test]
    async fn evaluation_disabled_skips_the_evaluator() {
        let (agent, _, evaluator) = agent("Sleep well.", good_metrics());

        let answer = agent.recommend(&recommendation_request(), false).await.expect("answer");

        assert!(evaluator.requests.lock().expect("lock").is_empty());
        assert_eq!(answer.generated.evaluation_metrics, None);
        assert_eq!(answer.generated.processed_content, None);
        assert_eq!(answer.generated.meets_threshold, Some(true));
    }

    #[tokio::test]
    async fn chat_metrics_require_references() {
        let (agent, _, evaluator) = agent("Drink water.", good_metrics());
        let turn = ChatTurn {
            message: "What should I drink?",
            risk_level: RiskLevel::Low,
            patient: None,
            history: &[],
        };

        let answer = agent.chat(turn, true).await.expect("answer");

        assert_eq!(evaluator.requests.lock().expect("lock").len(), 1);
        assert_eq!(answer.generated.evaluation_metrics, None);
        assert_eq!(answer.generated.meets_threshold, Some(true));
    }

    #[tokio::test]
    async fn chat_replays_history_without_results() {
        let (agent, model, _) = agent("Yes [source:a1].", good_metrics());
        let history = vec![
            SessionMessage::User {
                content: "Is salt bad?".into(),
                timestamp: Utc::now(),
            },
            SessionMessage::Bot {
                content: "In excess, yes.".into(),
                timestamp: Utc::now(),
                processed_content: None,
                references: vec![],
                evaluation_metrics: None,
            },
        ];
        let turn = ChatTurn {
            message: "Even sea salt?",
            risk_level: RiskLevel::Medium,
            patient: None,
            history: &history,
        };

        let answer = agent.chat(turn, true).await.expect("answer");

        let seen = model.seen.lock().expect("lock");
        let roles: Vec<_> = seen[0].iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![crate::llm::Role::System, crate::llm::Role::User, crate::llm::Role::Assistant, crate::llm::Role::User]
        );
        assert_eq!(answer.generated.evaluation_metrics, Some(good_metrics()));
    }

    #[tokio::test]
    async fn missing_model_is_reported() {
        let assembler = ContextAssembler::new(Arc::new(OneSourceCatalog), Arc::new(NoSearch), None);
        let agent = SummarizerAgent::new(
            assembler,
            None,
            Arc::new(Titles),
            Arc::new(FixedEvaluator {
                metrics: good_metrics(),
                requests: Mutex::new(vec![]),
            }),
        );

        let err = agent.recommend(&recommendation_request(), true).await.unwrap_err();
        assert!(matches!(err, GenerationError::ModelNotConfigured));
    }

    #[test]
    fn history_context_uses_last_six_clipped_messages() {
        let history: Vec<SessionMessage> = (0..8)
            .map(|i| SessionMessage::User {
                content: format!("{}{}", i, "x".repeat(300)),
                timestamp: Utc::now(),
            })
            .collect();

        let context = chat_eval_context(&ContextBundle::default(), &history, "last");
        let lines: Vec<&str> = context.lines().collect();

        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with("user: 3"));
        assert_eq!(lines[0].chars().count(), "user: ".len() + HISTORY_EVAL_CLIP);
        assert_eq!(lines[5], "user: last");
    }

    #[test]
    fn eval_truncation_appends_marker() {
        assert_eq!(truncate_for_eval("abcdef", 3), "abc...");
        assert_eq!(truncate_for_eval("abc", 3), "abc");
    }
}
