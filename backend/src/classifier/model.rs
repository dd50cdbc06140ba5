use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::OnceCell;
use tch::{Device, Tensor, nn};

use super::checkpoint::{Checkpoint, CheckpointLayout};
use super::error::{InferenceError, ModelLoadError};
use super::resnet::BinaryResNet50;
use crate::config::{ClassLabels, DevicePreference};

#[derive(Debug, Clone, Default)]
pub struct ModelOptions {
    pub device: DevicePreference,
    pub labels: ClassLabels,
}

/// Loaded network weights pinned to one device. Immutable after `load`, so a
/// single handle serves concurrent forwards without locking.
pub struct ModelHandle {
    // Owns the variables `net` reads from.
    _vs: nn::VarStore,
    net: BinaryResNet50,
    device: Device,
    labels: ClassLabels,
    layout: CheckpointLayout,
}

impl ModelHandle {
    pub fn load(path: impl AsRef<Path>, options: &ModelOptions) -> Result<Self, ModelLoadError> {
        let path = path.as_ref();
        let started = Instant::now();
        let device = options.device.resolve();
        log::info!("Loading model from {} on {:?}", path.display(), device);

        let vs = nn::VarStore::new(device);
        let net = BinaryResNet50::new(&vs.root());
        let checkpoint = Checkpoint::read(path, device)?;
        log::debug!(
            "Checkpoint {} holds {} tensors under {}",
            checkpoint.path.display(),
            checkpoint.len(),
            checkpoint.layout
        );
        checkpoint.copy_into(vs.variables())?;

        log::info!(
            "Model ready ({} layout, {} variables) in {:.2?}",
            checkpoint.layout,
            vs.len(),
            started.elapsed()
        );

        Ok(Self {
            _vs: vs,
            net,
            device,
            labels: options.labels.clone(),
            layout: checkpoint.layout,
        })
    }

    /// Runs `[1, 3, H, W]` input through the network and returns the raw logit.
    pub fn forward(&self, xs: &Tensor) -> Result<f64, InferenceError> {
        let xs = xs.to_device(self.device);
        let logits = tch::no_grad(|| self.net.forward(&xs))?;
        if logits.numel() != 1 {
            return Err(InferenceError::UnexpectedOutput(logits.size()));
        }
        let logit = logits.f_view([-1])?.f_double_value(&[0])?;
        if !logit.is_finite() {
            return Err(InferenceError::NonFinite(logit));
        }
        Ok(logit)
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn labels(&self) -> &ClassLabels {
        &self.labels
    }

    pub fn layout(&self) -> CheckpointLayout {
        self.layout
    }
}

/// The process-wide model slot. Built once in `main` and handed to every
/// request handler; the first successful `get_or_load` fixes the handle, a
/// failed one leaves the slot empty so the next call tries again.
pub struct SharedModel {
    path: PathBuf,
    options: ModelOptions,
    cell: OnceCell<Arc<ModelHandle>>,
}

impl SharedModel {
    pub fn new(path: impl Into<PathBuf>, options: ModelOptions) -> Self {
        Self {
            path: path.into(),
            options,
            cell: OnceCell::new(),
        }
    }

    pub fn get_or_load(&self) -> Result<Arc<ModelHandle>, ModelLoadError> {
        self.cell
            .get_or_try_init(|| ModelHandle::load(&self.path, &self.options).map(Arc::new))
            .map(Arc::clone)
    }

    pub fn get(&self) -> Option<Arc<ModelHandle>> {
        self.cell.get().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the slot's reference; the weights are freed once in-flight
    /// requests drop theirs.
    pub fn unload(&mut self) -> Option<Arc<ModelHandle>> {
        self.cell.take()
    }
}
