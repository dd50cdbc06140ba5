use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("Checkpoint not found at {0}")]
    NotFound(PathBuf),
    #[error("Failed to read checkpoint {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: tch::TchError,
    },
    #[error("Failed to unpickle checkpoint {path}: {source}")]
    Pickle {
        path: PathBuf,
        #[source]
        source: candle_core::Error,
    },
    #[error("Checkpoint {0} contains no tensors under any known layout")]
    NoMatchingLayout(PathBuf),
    #[error("Checkpoint is missing tensor '{0}'")]
    MissingTensor(String),
    #[error("Checkpoint has tensor '{0}' that the network does not own")]
    UnexpectedTensor(String),
    #[error("Shape mismatch for '{name}': network expects {expected:?}, checkpoint has {found:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<i64>,
        found: Vec<i64>,
    },
    #[error("Failed to copy tensor '{name}' into the network: {source}")]
    Copy {
        name: String,
        #[source]
        source: tch::TchError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ImageDecodeError {
    #[error("Cannot read image {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unrecognised image format for {0}")]
    UnknownFormat(PathBuf),
    #[error("Failed to decode image {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("Decoded image {0} has zero width or height")]
    Empty(PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Forward pass failed: {0}")]
    Forward(#[from] tch::TchError),
    #[error("Expected a single logit, network produced shape {0:?}")]
    UnexpectedOutput(Vec<i64>),
    #[error("Network produced a non-finite logit ({0})")]
    NonFinite(f64),
    #[error("Preprocessed image is not contiguous")]
    NonContiguousInput,
}

#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error(transparent)]
    Decode(#[from] ImageDecodeError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}
