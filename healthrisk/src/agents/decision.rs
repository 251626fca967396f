// Decision Agent: quality gate over evaluation metrics

use serde::Serialize;
use tracing::info;

use crate::models::EvaluationMetrics;

pub const CONTEXT_RELEVANCE_MIN: f64 = 0.70;
pub const ANSWER_RELEVANCE_MIN: f64 = 0.80;
pub const GROUNDEDNESS_MIN: f64 = 0.70;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateOutcome {
    pub meets_threshold: bool,
    pub warning: Option<String>,
}

impl GateOutcome {
    fn pass() -> Self {
        Self {
            meets_threshold: true,
            warning: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedMetric {
    pub name: &'static str,
    pub value: f64,
    pub minimum: f64,
}

/// Metrics that were evaluated and fell below their minimum. Missing metrics
/// are never counted as failures.
pub fn failed_metrics(metrics: &EvaluationMetrics) -> Vec<FailedMetric> {
    [
        ("Context Relevance", metrics.context_relevance, CONTEXT_RELEVANCE_MIN),
        ("Answer Relevance", metrics.answer_relevance, ANSWER_RELEVANCE_MIN),
        ("Groundedness", metrics.groundedness, GROUNDEDNESS_MIN),
    ]
    .into_iter()
    .filter_map(|(name, value, minimum)| match value {
        Some(value) if value < minimum => Some(FailedMetric {
            name,
            value,
            minimum,
        }),
        _ => None,
    })
    .collect()
}

fn warning_text(failed: &[FailedMetric]) -> String {
    let mut text = String::from(
        "⚠️ **Quality warning:** this answer did not meet the quality standard for the following metrics:\n",
    );
    for metric in failed {
        text.push_str(&format!(
            "- {}: {:.2}% (minimum {:.0}%)\n",
            metric.name,
            metric.value * 100.0,
            metric.minimum * 100.0
        ));
    }
    text.push_str("\nPlease consult a healthcare professional before acting on this advice.");
    text
}

/// Decide whether an answer may be shown without a warning. No metrics at
/// all counts as a pass.
pub fn check_threshold(metrics: Option<&EvaluationMetrics>) -> GateOutcome {
    let Some(metrics) = metrics else {
        return GateOutcome::pass();
    };

    let failed = failed_metrics(metrics);
    if failed.is_empty() {
        return GateOutcome::pass();
    }

    info!(
        "Decision: answer below quality threshold on {} metric(s)",
        failed.len()
    );
    GateOutcome {
        meets_threshold: false,
        warning: Some(warning_text(&failed)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn metrics(c: Option<f64>, a: Option<f64>, g: Option<f64>) -> EvaluationMetrics {
        EvaluationMetrics {
            context_relevance: c,
            answer_relevance: a,
            groundedness: g,
        }
    }

    #[test]
    fn exact_minimums_pass() {
        let outcome = check_threshold(Some(&metrics(Some(0.70), Some(0.80), Some(0.70))));
        assert_eq!(outcome, GateOutcome::pass());
    }

    #[test]
    fn absent_metrics_pass() {
        assert!(check_threshold(None).meets_threshold);
        assert!(check_threshold(Some(&EvaluationMetrics::default())).meets_threshold);
    }

    #[test]
    fn only_failing_metric_is_named() {
        let outcome = check_threshold(Some(&metrics(Some(0.69), Some(0.90), Some(0.90))));

        assert!(!outcome.meets_threshold);
        let warning = outcome.warning.expect("warning");
        assert!(warning.contains("Context Relevance: 69.00%"));
        assert!(!warning.contains("Answer Relevance"));
        assert!(!warning.contains("Groundedness"));
    }

    #[test]
    fn missing_metric_is_not_evaluated() {
        let outcome = check_threshold(Some(&metrics(None, Some(0.79), None)));

        assert!(!outcome.meets_threshold);
        let failed = failed_metrics(&metrics(None, Some(0.79), None));
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name, "Answer Relevance");
    }

    #[test]
    fn zero_score_fails() {
        let failed = failed_metrics(&metrics(Some(0.0), None, Some(0.0)));
        let names: Vec<_> = failed.iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["Context Relevance", "Groundedness"]);
    }
}
