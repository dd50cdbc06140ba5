pub mod checkpoint;
pub mod error;
pub mod model;
pub mod prediction;
pub mod preprocess;
pub mod resnet;
pub mod service;
mod torch_pickle;

pub use checkpoint::CheckpointLayout;
pub use error::{ImageDecodeError, InferenceError, ModelLoadError, PredictError};
pub use model::{ModelHandle, ModelOptions, SharedModel};
pub use prediction::{ConfidenceBand, PredictionResult};
pub use preprocess::PreprocessedImage;
pub use service::InferenceService;
