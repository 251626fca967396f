//! Prompt text for the recommendation and chat flows.

use std::fmt::Write;

use crate::agents::retriever::ContextBundle;
use crate::models::{PatientData, RecommendationRequest, RiskLevel};

/// Retrieval query shared by the recommendation and chat flows.
pub const LIFESTYLE_QUERY: &str = "health lifestyle recommendation diet physical activity exercise cardiovascular disease prevention BMI blood pressure cholesterol glucose smoking alcohol";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English,
    Indonesian,
}

impl Language {
    pub fn name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Indonesian => "Indonesian",
        }
    }
}

const ENGLISH_WORDS: &[&str] = &[
    "the", "is", "are", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "what", "how", "when", "where", "why", "can", "could", "should", "would", "will", "may",
    "might", "this", "that", "these", "those", "hello", "hi", "thanks", "thank", "please", "help",
    "need", "want", "have", "has", "had", "do", "does", "did", "get", "got", "give", "gave",
];

const ENGLISH_CUES: &[&str] = &[
    "what", "how", "when", "where", "why", "can you", "could you", "should i", "would you",
];

/// English when more than 30% of the words are common English words or the
/// text contains an English question cue; Indonesian otherwise.
pub fn detect_language(text: &str) -> Language {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .collect();
    if words.is_empty() {
        return Language::Indonesian;
    }

    let english = words.iter().filter(|w| ENGLISH_WORDS.contains(*w)).count();
    let ratio = english as f64 / words.len() as f64;
    if ratio > 0.3 || ENGLISH_CUES.iter().any(|cue| lower.contains(cue)) {
        Language::English
    } else {
        Language::Indonesian
    }
}

fn citation_rules(out: &mut String, bundle: &ContextBundle) {
    out.push_str("\n# Citations\n");
    if bundle.available_ids.is_empty() {
        out.push_str("No reference material is available. Do not write any citations.\n");
        return;
    }
    out.push_str(
        "Cite the reference material inline using its exact id in square brackets, for example [source:abc123].\n\
         Only cite ids from this list; never invent ids:\n",
    );
    for id in &bundle.available_ids {
        let _ = writeln!(out, "- {}", id);
    }
}

fn context_section(out: &mut String, bundle: &ContextBundle) {
    if bundle.is_empty() {
        return;
    }
    out.push_str("\n# Reference material\n");
    out.push_str(&bundle.render());
    out.push('\n');
}

pub fn recommendation_system(bundle: &ContextBundle) -> String {
    let mut out = String::from(
        "You are a preventive-health assistant. Give practical, evidence-based lifestyle \
         recommendations for lowering cardiovascular risk. Cover diet, physical activity, \
         weight, blood pressure and habits. Be specific, encouraging and concise. \
         You do not diagnose or prescribe medication.\n",
    );
    context_section(&mut out, bundle);
    citation_rules(&mut out, bundle);
    out
}

fn level_text(level: i32) -> &'static str {
    match level {
        1 => "Normal",
        2 => "Above normal",
        3 => "Well above normal",
        _ => "Unknown",
    }
}

fn yes_no(flag: i32) -> &'static str {
    if flag == 1 {
        "Yes"
    } else {
        "No"
    }
}

pub fn recommendation_user(request: &RecommendationRequest, bundle: &ContextBundle) -> String {
    let gender = if request.gender == 1 { "Female" } else { "Male" };
    let mut out = format!(
        "Patient examination:\n\
         - Age: {} years\n\
         - Gender: {}\n\
         - Height: {} cm\n\
         - Weight: {} kg\n\
         - Blood pressure: {}/{} mmHg\n\
         - BMI: {}\n\
         - Cardiovascular risk: {} ({:.1}%)\n",
        request.age,
        gender,
        request.height,
        request.weight,
        request.systolic_blood_pressure,
        request.diastolic_blood_pressure,
        request.bmi,
        request.risk_level.as_str(),
        request.prob_disease,
    );
    if let Some(v) = request.cholesterol {
        let _ = writeln!(out, "- Cholesterol: {}", level_text(v));
    }
    if let Some(v) = request.glucose {
        let _ = writeln!(out, "- Glucose: {}", level_text(v));
    }
    if let Some(v) = request.smoking {
        let _ = writeln!(out, "- Smoker: {}", yes_no(v));
    }
    if let Some(v) = request.alcohol {
        let _ = writeln!(out, "- Drinks alcohol: {}", yes_no(v));
    }
    if let Some(v) = request.physical_activity {
        let _ = writeln!(out, "- Physically active: {}", yes_no(v));
    }
    out.push_str("\nWrite personalised lifestyle recommendations for this patient.");
    if !bundle.available_ids.is_empty() {
        out.push_str(" Support each recommendation with citations to the reference material.");
    }
    out
}

/// Natural-language query sent to the evaluator for a recommendation.
pub fn recommendation_eval_query(request: &RecommendationRequest) -> String {
    let gender = if request.gender == 1 { "female" } else { "male" };
    let mut parts = vec![
        format!("age {} years", request.age),
        format!("gender {}", gender),
        format!(
            "blood pressure {}/{} mmHg",
            request.systolic_blood_pressure, request.diastolic_blood_pressure
        ),
        format!("BMI {}", request.bmi),
        format!("risk level {}", request.risk_level.as_str()),
    ];
    if let Some(v) = request.cholesterol {
        parts.push(format!("cholesterol {}", level_text(v).to_lowercase()));
    }
    if let Some(v) = request.glucose {
        parts.push(format!("glucose {}", level_text(v).to_lowercase()));
    }
    if let Some(v) = request.smoking {
        parts.push(format!("smoker {}", yes_no(v).to_lowercase()));
    }
    if let Some(v) = request.alcohol {
        parts.push(format!("alcohol {}", yes_no(v).to_lowercase()));
    }
    if let Some(v) = request.physical_activity {
        parts.push(format!("physically active {}", yes_no(v).to_lowercase()));
    }
    format!("Healthy lifestyle recommendations for: {}", parts.join(", "))
}

fn or_na<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "N/A".to_string())
}

pub fn chat_system(
    bundle: &ContextBundle,
    risk_level: RiskLevel,
    patient: Option<&PatientData>,
    language: Language,
) -> String {
    let mut out = String::from(
        "You are a friendly health assistant helping a patient understand their \
         cardiovascular risk result and how to live more healthily. Answer the question \
         directly, keep it practical, and recommend seeing a doctor for anything that \
         needs a diagnosis.\n",
    );
    let _ = writeln!(out, "\n# Patient\n- Risk level: {}", risk_level.as_str());
    if let Some(p) = patient {
        let _ = writeln!(out, "- Age: {}", or_na(p.age));
        let _ = writeln!(
            out,
            "- Blood pressure: {}/{} mmHg",
            or_na(p.systolic_bp),
            or_na(p.diastolic_bp)
        );
        let _ = writeln!(out, "- BMI: {}", or_na(p.bmi));
        if let Some(prob) = p.prob_disease {
            let _ = writeln!(out, "- Disease probability: {:.1}%", prob);
        }
    }
    let _ = writeln!(out, "\nReply in {}.", language.name());
    context_section(&mut out, bundle);
    citation_rules(&mut out, bundle);
    out
}
