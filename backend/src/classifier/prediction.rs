use shared::{ClassProbabilities, ImageClass, PredictionResponse};

use crate::config::ClassLabels;

/// Logistic function, rounded to single precision like the network output.
/// Logits too small to move an `f32` away from 0.5 stay on the threshold.
pub fn sigmoid(logit: f64) -> f64 {
    (1.0 / (1.0 + (-logit).exp())) as f32 as f64
}

/// Outcome of one classification. Built only through `from_probability`, which
/// keeps label, confidence and the per-class pair consistent.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    class: ImageClass,
    label: String,
    confidence: f64,
    raw_probability: f64,
}

impl PredictionResult {
    /// `probability` is P(real). Strictly above `threshold` is `Real`, anything
    /// else (including the threshold itself) is `AiGenerated`.
    pub fn from_probability(probability: f64, threshold: f64, labels: &ClassLabels) -> Self {
        let probability = probability.clamp(0.0, 1.0);
        let (class, label, confidence) = if probability > threshold {
            (ImageClass::Real, &labels.positive, probability)
        } else {
            (ImageClass::AiGenerated, &labels.negative, 1.0 - probability)
        };
        Self {
            class,
            label: label.clone(),
            confidence,
            raw_probability: probability,
        }
    }

    pub fn from_logit(logit: f64, threshold: f64, labels: &ClassLabels) -> Self {
        Self::from_probability(sigmoid(logit), threshold, labels)
    }

    pub fn class(&self) -> ImageClass {
        self.class
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn raw_probability(&self) -> f64 {
        self.raw_probability
    }

    pub fn percentage(&self) -> String {
        format!("{:.2}%", self.confidence * 100.0)
    }

    pub fn probabilities(&self) -> ClassProbabilities {
        ClassProbabilities {
            ai_generated_probability: 1.0 - self.raw_probability,
            real_image_probability: self.raw_probability,
        }
    }

    pub fn band(&self) -> ConfidenceBand {
        ConfidenceBand::from_confidence(self.confidence)
    }
}

impl From<&PredictionResult> for PredictionResponse {
    fn from(result: &PredictionResult) -> Self {
        PredictionResponse {
            success: true,
            prediction: result.label.clone(),
            confidence: result.confidence,
            percentage: result.percentage(),
            raw_probability: result.raw_probability,
            details: result.probabilities(),
        }
    }
}

/// Coarse reading of a confidence value for human-facing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceBand {
    VeryHigh,
    High,
    Moderate,
}

impl ConfidenceBand {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence > 0.9 {
            Self::VeryHigh
        } else if confidence > 0.7 {
            Self::High
        } else {
            Self::Moderate
        }
    }

    pub fn describe(&self, class: ImageClass) -> &'static str {
        match (self, class) {
            (Self::VeryHigh, ImageClass::AiGenerated) => "Very high confidence - Likely AI-generated",
            (Self::High, ImageClass::AiGenerated) => "High confidence - Probably AI-generated",
            (Self::Moderate, ImageClass::AiGenerated) => "Moderate confidence - Possibly AI-generated",
            (Self::VeryHigh, ImageClass::Real) => "Very high confidence - Likely authentic",
            (Self::High, ImageClass::Real) => "High confidence - Probably authentic",
            (Self::Moderate, ImageClass::Real) => "Moderate confidence - Possibly authentic",
        }
    }
}
