//! Cardiovascular risk scoring from examination vitals.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{PredictionRequest, PredictionResult, Probabilities, RiskLevel};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidVitals {
    #[error("Age must be between 20 and 70 years")]
    Age,
    #[error("Gender must be 1 (Female) or 2 (Male)")]
    Gender,
    #[error("Height must be between 140 and 220 cm")]
    Height,
    #[error("Weight must be between 40 and 200 kg")]
    Weight,
    #[error("Systolic blood pressure must be between 60 and 250 mmHg")]
    Systolic,
    #[error("Diastolic blood pressure must be between 40 and 200 mmHg")]
    Diastolic,
    #[error("Systolic blood pressure must be greater than diastolic")]
    PressureOrder,
}

pub fn validate(request: &PredictionRequest) -> Result<(), InvalidVitals> {
    if !(20..=70).contains(&request.age) {
        return Err(InvalidVitals::Age);
    }
    if request.gender != 1 && request.gender != 2 {
        return Err(InvalidVitals::Gender);
    }
    if !(140.0..=220.0).contains(&request.height) {
        return Err(InvalidVitals::Height);
    }
    if !(40.0..=200.0).contains(&request.weight) {
        return Err(InvalidVitals::Weight);
    }
    if !(60..=250).contains(&request.systolic_blood_pressure) {
        return Err(InvalidVitals::Systolic);
    }
    if !(40..=200).contains(&request.diastolic_blood_pressure) {
        return Err(InvalidVitals::Diastolic);
    }
    if request.systolic_blood_pressure <= request.diastolic_blood_pressure {
        return Err(InvalidVitals::PressureOrder);
    }
    Ok(())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn bmi(height_cm: f64, weight_kg: f64) -> f64 {
    let meters = height_cm / 100.0;
    round2(weight_kg / (meters * meters))
}

/// Model inputs with unset lifestyle fields filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskFeatures {
    pub age: f64,
    pub gender: f64,
    pub height: f64,
    pub weight: f64,
    pub bmi: f64,
    pub systolic_bp: f64,
    pub diastolic_bp: f64,
    pub pulse_pressure: f64,
    pub cholesterol: f64,
    pub glucose: f64,
    pub smoking: f64,
    pub alcohol: f64,
    pub physical_activity: f64,
}

impl RiskFeatures {
    pub fn from_request(request: &PredictionRequest) -> Self {
        let systolic = f64::from(request.systolic_blood_pressure);
        let diastolic = f64::from(request.diastolic_blood_pressure);
        Self {
            age: f64::from(request.age),
            gender: f64::from(request.gender),
            height: request.height,
            weight: request.weight,
            bmi: bmi(request.height, request.weight),
            systolic_bp: systolic,
            diastolic_bp: diastolic,
            pulse_pressure: systolic - diastolic,
            cholesterol: f64::from(request.cholesterol.unwrap_or(1)),
            glucose: f64::from(request.glucose.unwrap_or(1)),
            smoking: f64::from(request.smoking.unwrap_or(0)),
            alcohol: f64::from(request.alcohol.unwrap_or(0)),
            physical_activity: f64::from(request.physical_activity.unwrap_or(0)),
        }
    }

    fn get(&self, name: &str) -> Option<f64> {
        let value = match name {
            "age" => self.age,
            "gender" => self.gender,
            "height" => self.height,
            "weight" => self.weight,
            "bmi" => self.bmi,
            "systolic_bp" => self.systolic_bp,
            "diastolic_bp" => self.diastolic_bp,
            "pulse_pressure" => self.pulse_pressure,
            "cholesterol" => self.cholesterol,
            "glucose" => self.glucose,
            "smoking" => self.smoking,
            "alcohol" => self.alcohol,
            "physical_activity" => self.physical_activity,
            _ => return None,
        };
        Some(value)
    }
}

pub trait RiskModel: Send + Sync {
    /// Probability of cardiovascular disease in `[0, 1]`.
    fn probability(&self, features: &RiskFeatures) -> f64;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureWeight {
    pub name: String,
    pub mean: f64,
    pub scale: f64,
    pub weight: f64,
}

/// Standardised logistic regression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRiskModel {
    pub intercept: f64,
    pub features: Vec<FeatureWeight>,
}

impl LogisticRiskModel {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading risk model {}", path.display()))?;
        let model: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing risk model {}", path.display()))?;
        Ok(model)
    }
}

impl Default for LogisticRiskModel {
    fn default() -> Self {
        let features = [
            ("age", 53.3, 6.8, 0.33),
            ("gender", 1.35, 0.48, 0.0),
            ("height", 164.4, 8.2, -0.02),
            ("weight", 74.2, 14.4, 0.05),
            ("bmi", 27.5, 5.0, 0.07),
            ("systolic_bp", 126.6, 16.5, 0.85),
            ("diastolic_bp", 81.3, 9.4, 0.12),
            ("pulse_pressure", 45.3, 11.6, 0.10),
            ("cholesterol", 1.37, 0.68, 0.36),
            ("glucose", 1.23, 0.57, -0.05),
            ("smoking", 0.09, 0.28, -0.04),
            ("alcohol", 0.05, 0.23, -0.05),
            ("physical_activity", 0.80, 0.40, -0.09),
        ]
        .into_iter()
        .map(|(name, mean, scale, weight)| FeatureWeight {
            name: name.to_string(),
            mean,
            scale,
            weight,
        })
        .collect();

        Self {
            intercept: -0.02,
            features,
        }
    }
}

impl RiskModel for LogisticRiskModel {
    fn probability(&self, features: &RiskFeatures) -> f64 {
        let logit = self
            .features
            .iter()
            .filter(|f| f.scale != 0.0)
            .map(|f| {
                let value = features.get(&f.name).unwrap_or(0.0);
                f.weight * (value - f.mean) / f.scale
            })
            .sum::<f64>()
            + self.intercept;
        1.0 / (1.0 + (-logit).exp())
    }
}

pub fn predict(model: &dyn RiskModel, request: &PredictionRequest) -> Result<PredictionResult, InvalidVitals> {
    validate(request)?;

    let features = RiskFeatures::from_request(request);
    let prob_disease = model.probability(&features).clamp(0.0, 1.0);
    let prob_no_disease = 1.0 - prob_disease;

    Ok(PredictionResult {
        prediction: u8::from(prob_disease >= 0.5),
        risk_level: RiskLevel::from_probability(prob_disease),
        confidence: round2(prob_disease.max(prob_no_disease) * 100.0),
        probabilities: Probabilities {
            no_disease: round2(prob_no_disease * 100.0),
            disease: round2(prob_disease * 100.0),
        },
        bmi: features.bmi,
        pulse_pressure: features.pulse_pressure,
    })
}

/// Body-mass category shown in the examination summary.
pub fn bmi_category(bmi: f64) -> &'static str {
    if bmi < 18.5 {
        "Underweight"
    } else if bmi < 25.0 {
        "Normal"
    } else if bmi < 30.0 {
        "Overweight"
    } else {
        "Obese"
    }
}

pub fn bp_category(systolic: i32, diastolic: i32) -> &'static str {
    if systolic < 120 && diastolic < 80 {
        "Normal"
    } else if systolic < 130 && diastolic < 80 {
        "Elevated"
    } else if systolic < 140 || diastolic < 90 {
        "Hypertension Stage 1"
    } else if systolic < 180 || diastolic < 120 {
        "Hypertension Stage 2"
    } else {
        "Hypertensive Crisis"
    }
}
