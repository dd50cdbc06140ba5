use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

/// The two outcomes of the detector, in logit order: the network's single
/// output is the logit of `Real`.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, EnumIter,
)]
pub enum ImageClass {
    #[serde(rename = "AI-Generated Images")]
    #[strum(to_string = "AI-Generated Images", serialize = "ai", serialize = "ai-generated")]
    AiGenerated,
    #[serde(rename = "Real Images")]
    #[strum(to_string = "Real Images", serialize = "real")]
    Real,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ClassProbabilities {
    pub ai_generated_probability: f64,
    pub real_image_probability: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PredictionResponse {
    pub success: bool,
    pub prediction: String,
    pub confidence: f64,
    pub percentage: String,
    pub raw_probability: f64,
    pub details: ClassProbabilities,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub model_loaded: bool,
    pub device: String,
}
