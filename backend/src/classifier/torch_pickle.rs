//! Reader for `torch.save` zip archives.
//!
//! The pickle is walked with candle's reader, which only yields tensors that
//! sit directly in a dict. A nested `state_dict` / `model_state_dict` entry is
//! read separately and its names are prefixed with the layout key, so the
//! result resolves through `CheckpointLayout` like any flat container.

use std::path::Path;

use candle_core::DType;
use candle_core::pickle::PthTensors;
use tch::{Device, Tensor};

use super::checkpoint::CheckpointLayout;
use super::error::ModelLoadError;

pub fn read(path: &Path, device: Device) -> Result<Vec<(String, Tensor)>, ModelLoadError> {
    let top = PthTensors::new(path, None).map_err(|source| pickle_error(path, source))?;
    let mut named = convert(path, &top, "", device)?;

    for layout in CheckpointLayout::SEARCH_ORDER {
        let Some(key) = layout.pickle_key() else {
            continue;
        };
        // The file already parsed, so an error here means the key is absent.
        if let Ok(nested) = PthTensors::new(path, Some(key)) {
            named.extend(convert(path, &nested, layout.key_prefix(), device)?);
        }
    }

    Ok(named)
}

fn convert(
    path: &Path,
    pth: &PthTensors,
    prefix: &str,
    device: Device,
) -> Result<Vec<(String, Tensor)>, ModelLoadError> {
    let mut names: Vec<&String> = pth.tensor_infos().keys().collect();
    names.sort();

    let mut named = Vec::with_capacity(names.len());
    for name in names {
        let Some(tensor) = pth.get(name).map_err(|source| pickle_error(path, source))? else {
            continue;
        };
        let dims: Vec<i64> = tensor.dims().iter().map(|&d| d as i64).collect();
        let values = tensor
            .to_dtype(DType::F32)
            .and_then(|t| t.flatten_all())
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|source| pickle_error(path, source))?;
        let tensor = Tensor::f_from_slice(&values)
            .and_then(|t| t.f_reshape(dims.as_slice()))
            .map_err(|source| ModelLoadError::Read {
                path: path.to_path_buf(),
                source,
            })?
            .to_device(device);
        named.push((format!("{}{}", prefix, name), tensor));
    }

    Ok(named)
}

fn pickle_error(path: &Path, source: candle_core::Error) -> ModelLoadError {
    ModelLoadError::Pickle {
        path: path.to_path_buf(),
        source,
    }
}
