use std::path::Path;
use std::sync::Arc;

use super::error::{ImageDecodeError, PredictError};
use super::model::ModelHandle;
use super::prediction::PredictionResult;
use super::preprocess::{self, PreprocessedImage};
use crate::config::InferenceConfig;

/// Turns image files into predictions against one loaded model.
#[derive(Clone)]
pub struct InferenceService {
    model: Arc<ModelHandle>,
    config: InferenceConfig,
}

impl InferenceService {
    pub fn new(model: Arc<ModelHandle>, config: InferenceConfig) -> Self {
        Self { model, config }
    }

    pub fn model(&self) -> &ModelHandle {
        &self.model
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    pub fn preprocess(&self, image_path: &Path) -> Result<PreprocessedImage, ImageDecodeError> {
        preprocess::preprocess(image_path, &self.config.image)
    }

    pub fn predict(&self, image_path: &Path) -> Result<PredictionResult, PredictError> {
        let image = self.preprocess(image_path)?;
        let logit = self.model.forward(&image.to_tensor()?)?;
        let result = PredictionResult::from_logit(
            logit,
            self.config.classification.threshold,
            self.model.labels(),
        );

        log::info!(
            "Predicted {} for {} (p_real={:.4}, confidence={})",
            result.label(),
            image_path.display(),
            result.raw_probability(),
            result.percentage()
        );
        Ok(result)
    }
}
