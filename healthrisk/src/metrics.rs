use std::sync::OnceLock;

use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};

pub struct Metrics {
    pub answers: IntCounterVec,
    pub evaluations: IntCounterVec,
    pub gate_failures: IntCounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Process-wide counters, registered in the default registry on first use.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| Metrics {
        answers: register_int_counter_vec!(
            "healthrisk_answers_total",
            "Generated answers by flow",
            &["flow"]
        )
        .expect("answers counter registers once"),
        evaluations: register_int_counter_vec!(
            "healthrisk_evaluations_total",
            "Evaluation calls by flow and outcome",
            &["flow", "outcome"]
        )
        .expect("evaluations counter registers once"),
        gate_failures: register_int_counter_vec!(
            "healthrisk_quality_gate_failures_total",
            "Answers that fell below a quality threshold",
            &["flow"]
        )
        .expect("gate counter registers once"),
    })
}

/// Text exposition of the default registry.
pub fn encode() -> Result<(Vec<u8>, String), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_exposition() {
        metrics().answers.with_label_values(&["chat"]).inc();
        let (body, content_type) = encode().expect("encodes");
        let text = String::from_utf8(body).expect("utf8");

        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("healthrisk_answers_total{flow=\"chat\"}"));
    }
}
