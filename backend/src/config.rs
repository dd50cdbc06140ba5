use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::imageops::FilterType;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable {0}")]
    MissingVar(&'static str),
    #[error("Invalid value '{value}' for {name}")]
    InvalidVar { name: &'static str, value: String },
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid inference config: {0}")]
    Invalid(String),
}

/// Where the network runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl DevicePreference {
    pub fn resolve(&self) -> tch::Device {
        match self {
            Self::Auto => tch::Device::cuda_if_available(),
            Self::Cpu => tch::Device::Cpu,
            Self::Cuda => tch::Device::Cuda(0),
        }
    }
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "default" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            other => Err(format!("unknown device '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeMethod {
    Nearest,
    #[default]
    Bilinear,
    CatmullRom,
    Gaussian,
    Lanczos3,
}

impl ResizeMethod {
    pub fn filter(&self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Bilinear => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Gaussian => FilterType::Gaussian,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// `[width, height]` fed to the network.
    pub size: [u32; 2],
    pub resize_method: ResizeMethod,
    pub normalization: NormalizationConfig,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            size: [256, 256],
            resize_method: ResizeMethod::default(),
            normalization: NormalizationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassLabels {
    /// Reported when the probability is at or below the threshold.
    pub negative: String,
    /// Reported when the probability is above the threshold.
    pub positive: String,
}

impl Default for ClassLabels {
    fn default() -> Self {
        Self {
            negative: shared::ImageClass::AiGenerated.to_string(),
            positive: shared::ImageClass::Real.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub threshold: f64,
    pub labels: ClassLabels,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            labels: ClassLabels::default(),
        }
    }
}

/// Preprocessing and decision settings tied to one trained checkpoint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub image: ImageConfig,
    pub classification: ClassificationConfig,
}

impl InferenceConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: InferenceConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&config_str)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let [width, height] = self.image.size;
        if width == 0 || height == 0 {
            return Err(ConfigError::Invalid(format!(
                "image.size must be positive, got {}x{}",
                width, height
            )));
        }
        if let Some(std) = self
            .image
            .normalization
            .std
            .iter()
            .find(|std| !(std.is_finite() && **std > 0.0))
        {
            return Err(ConfigError::Invalid(format!(
                "normalization std must be positive, got {}",
                std
            )));
        }
        if !self.image.normalization.mean.iter().all(|mean| mean.is_finite()) {
            return Err(ConfigError::Invalid("normalization mean must be finite".into()));
        }
        let threshold = self.classification.threshold;
        if !(threshold > 0.0 && threshold < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "classification.threshold must lie in (0, 1), got {}",
                threshold
            )));
        }
        Ok(())
    }
}

/// Process settings read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub model_path: PathBuf,
    pub inference_config: Option<PathBuf>,
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub device: DevicePreference,
}

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let model_path = env::var("MODEL_PATH")
            .map(PathBuf::from)
            .map_err(|_| ConfigError::MissingVar("MODEL_PATH"))?;

        Ok(Self {
            model_path,
            inference_config: env::var("INFERENCE_CONFIG").ok().map(PathBuf::from),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_var("PORT", 5000)?,
            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("uploads")),
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            device: parse_var("DEVICE", DevicePreference::Auto)?,
        })
    }

    pub fn inference(&self) -> Result<InferenceConfig, ConfigError> {
        match &self.inference_config {
            Some(path) => InferenceConfig::load(path),
            None => Ok(InferenceConfig::default()),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidVar { name, value }),
        Err(_) => Ok(default),
    }
}
