use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tch::{Device, Tensor};

use super::error::ModelLoadError;
use super::torch_pickle;

/// Batch-norm step counters are saved with every PyTorch state dict but have
/// no counterpart in the network.
const TRACKING_SUFFIX: &str = "num_batches_tracked";

/// Where the weights sit inside a checkpoint. Nested mappings are flattened to
/// dotted keys on export, so a layout is a key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointLayout {
    StateDict,
    ModelStateDict,
    Raw,
}

impl CheckpointLayout {
    /// Tried in this order; the first layout present in the checkpoint wins.
    pub const SEARCH_ORDER: &'static [Self] = &[Self::StateDict, Self::ModelStateDict, Self::Raw];

    pub const fn key_prefix(&self) -> &'static str {
        match self {
            Self::StateDict => "state_dict.",
            Self::ModelStateDict => "model_state_dict.",
            Self::Raw => "",
        }
    }

    /// Top-level `torch.save` key holding the weights, if nested.
    pub const fn pickle_key(&self) -> Option<&'static str> {
        match self {
            Self::StateDict => Some("state_dict"),
            Self::ModelStateDict => Some("model_state_dict"),
            Self::Raw => None,
        }
    }

    /// Returns the tensors under this layout with the prefix stripped, or `None`
    /// when the checkpoint holds nothing under it.
    pub fn extract(&self, named: &[(String, Tensor)]) -> Option<HashMap<String, Tensor>> {
        let prefix = self.key_prefix();
        let tensors: HashMap<String, Tensor> = named
            .iter()
            .filter_map(|(name, tensor)| {
                name.strip_prefix(prefix)
                    .map(|stripped| (stripped.to_string(), tensor.shallow_clone()))
            })
            .collect();
        (!tensors.is_empty()).then_some(tensors)
    }
}

impl std::fmt::Display for CheckpointLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StateDict => write!(f, "state_dict"),
            Self::ModelStateDict => write!(f, "model_state_dict"),
            Self::Raw => write!(f, "raw state mapping"),
        }
    }
}

/// On-disk container, picked from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointFormat {
    SafeTensors,
    Npz,
    TorchArchive,
    TorchZip,
}

impl CheckpointFormat {
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("safetensors") => Self::SafeTensors,
            Some("npz") => Self::Npz,
            Some("ot") => Self::TorchArchive,
            _ => Self::TorchZip,
        }
    }

    fn read(&self, path: &Path, device: Device) -> Result<Vec<(String, Tensor)>, ModelLoadError> {
        let named = match self {
            Self::SafeTensors => Tensor::read_safetensors(path),
            Self::Npz => Tensor::read_npz(path),
            Self::TorchArchive => Tensor::load_multi_with_device(path, device),
            Self::TorchZip => return torch_pickle::read(path, device),
        };
        named.map_err(|source| ModelLoadError::Read {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Weights pulled out of a checkpoint file, keyed by network variable name.
pub struct Checkpoint {
    pub path: PathBuf,
    pub layout: CheckpointLayout,
    tensors: HashMap<String, Tensor>,
}

impl Checkpoint {
    pub fn read(path: &Path, device: Device) -> Result<Self, ModelLoadError> {
        if !path.is_file() {
            return Err(ModelLoadError::NotFound(path.to_path_buf()));
        }

        let format = CheckpointFormat::from_path(path);
        log::debug!("Reading checkpoint {} as {:?}", path.display(), format);
        let named = format.read(path, device)?;

        Self::from_named(path, named)
    }

    pub fn from_named(path: &Path, named: Vec<(String, Tensor)>) -> Result<Self, ModelLoadError> {
        CheckpointLayout::SEARCH_ORDER
            .iter()
            .find_map(|layout| {
                layout.extract(&named).map(|tensors| Self {
                    path: path.to_path_buf(),
                    layout: *layout,
                    tensors,
                })
            })
            .ok_or_else(|| ModelLoadError::NoMatchingLayout(path.to_path_buf()))
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Copies the checkpoint into every variable of `variables`. Every
    /// checkpoint entry must belong to the network, batch-norm counters aside.
    pub fn copy_into(&self, variables: HashMap<String, Tensor>) -> Result<(), ModelLoadError> {
        let unexpected = self
            .tensors
            .keys()
            .filter(|name| !variables.contains_key(*name) && !name.ends_with(TRACKING_SUFFIX))
            .min();
        if let Some(name) = unexpected {
            return Err(ModelLoadError::UnexpectedTensor(name.clone()));
        }

        let mut names: Vec<&String> = variables.keys().collect();
        names.sort();

        for name in names {
            let src = self
                .tensors
                .get(name)
                .ok_or_else(|| ModelLoadError::MissingTensor(name.clone()))?;
            let mut dst = variables[name].shallow_clone();
            if src.size() != dst.size() {
                return Err(ModelLoadError::ShapeMismatch {
                    name: name.clone(),
                    expected: dst.size(),
                    found: src.size(),
                });
            }
            tch::no_grad(|| dst.f_copy_(src)).map_err(|source| ModelLoadError::Copy {
                name: name.clone(),
                source,
            })?;
        }

        Ok(())
    }
}
