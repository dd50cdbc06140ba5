//! ResNet-50 backbone with a single-logit head.
//!
//! Variable names follow the torchvision layout (`layer2.0.downsample.1.running_var`,
//! `fc.weight`, ...) so checkpoints exported from PyTorch map onto the var store
//! one to one. Every op in the forward pass uses the fallible `f_*` variants so a
//! libtorch failure reaches the caller as an error instead of a panic.

use tch::{Tensor, nn};

const BN_EPS: f64 = 1e-5;
const BN_MOMENTUM: f64 = 0.1;
const EXPANSION: i64 = 4;
const FEATURES: i64 = 512 * EXPANSION;

/// (planes, blocks, stride) for each of the four stages.
const STAGES: [(i64, usize, i64); 4] = [(64, 3, 1), (128, 4, 2), (256, 6, 2), (512, 3, 2)];

#[derive(Debug)]
struct Conv {
    weight: Tensor,
    stride: i64,
    padding: i64,
}

impl Conv {
    fn new(p: nn::Path, c_in: i64, c_out: i64, ksize: i64, stride: i64, padding: i64) -> Self {
        let weight = p.var(
            "weight",
            &[c_out, c_in, ksize, ksize],
            nn::Init::Randn {
                mean: 0.,
                stdev: (2.0 / (c_in * ksize * ksize) as f64).sqrt(),
            },
        );
        Self {
            weight,
            stride,
            padding,
        }
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor, tch::TchError> {
        xs.f_conv2d(
            &self.weight,
            None::<Tensor>,
            [self.stride, self.stride],
            [self.padding, self.padding],
            [1, 1],
            1,
        )
    }
}

#[derive(Debug)]
struct BatchNorm {
    weight: Tensor,
    bias: Tensor,
    running_mean: Tensor,
    running_var: Tensor,
}

impl BatchNorm {
    fn new(p: nn::Path, channels: i64) -> Self {
        Self {
            weight: p.ones("weight", &[channels]),
            bias: p.zeros("bias", &[channels]),
            running_mean: p.zeros_no_train("running_mean", &[channels]),
            running_var: p.ones_no_train("running_var", &[channels]),
        }
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor, tch::TchError> {
        xs.f_batch_norm(
            Some(&self.weight),
            Some(&self.bias),
            Some(&self.running_mean),
            Some(&self.running_var),
            false,
            BN_MOMENTUM,
            BN_EPS,
            true,
        )
    }
}

#[derive(Debug)]
struct Bottleneck {
    conv1: Conv,
    bn1: BatchNorm,
    conv2: Conv,
    bn2: BatchNorm,
    conv3: Conv,
    bn3: BatchNorm,
    downsample: Option<(Conv, BatchNorm)>,
}

impl Bottleneck {
    fn new(p: nn::Path, c_in: i64, planes: i64, stride: i64) -> Self {
        let c_out = planes * EXPANSION;
        let downsample = (stride != 1 || c_in != c_out).then(|| {
            (
                Conv::new(&p / "downsample" / 0, c_in, c_out, 1, stride, 0),
                BatchNorm::new(&p / "downsample" / 1, c_out),
            )
        });
        Self {
            conv1: Conv::new(&p / "conv1", c_in, planes, 1, 1, 0),
            bn1: BatchNorm::new(&p / "bn1", planes),
            conv2: Conv::new(&p / "conv2", planes, planes, 3, stride, 1),
            bn2: BatchNorm::new(&p / "bn2", planes),
            conv3: Conv::new(&p / "conv3", planes, c_out, 1, 1, 0),
            bn3: BatchNorm::new(&p / "bn3", c_out),
            downsample,
        }
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor, tch::TchError> {
        let ys = self.bn1.forward(&self.conv1.forward(xs)?)?.f_relu()?;
        let ys = self.bn2.forward(&self.conv2.forward(&ys)?)?.f_relu()?;
        let ys = self.bn3.forward(&self.conv3.forward(&ys)?)?;
        let identity = match &self.downsample {
            Some((conv, bn)) => bn.forward(&conv.forward(xs)?)?,
            None => xs.shallow_clone(),
        };
        ys.f_add(&identity)?.f_relu()
    }
}

#[derive(Debug)]
pub struct BinaryResNet50 {
    conv1: Conv,
    bn1: BatchNorm,
    stages: Vec<Vec<Bottleneck>>,
    fc_weight: Tensor,
    fc_bias: Tensor,
}

impl BinaryResNet50 {
    /// Registers every variable of the network under `p`.
    pub fn new(p: &nn::Path) -> Self {
        let mut c_in = 64;
        let stages: Vec<Vec<Bottleneck>> = STAGES
            .iter()
            .enumerate()
            .map(|(idx, &(planes, blocks, stride))| {
                let stage = p / format!("layer{}", idx + 1);
                (0..blocks)
                    .map(|block| {
                        let stride = if block == 0 { stride } else { 1 };
                        let bottleneck = Bottleneck::new(&stage / block, c_in, planes, stride);
                        c_in = planes * EXPANSION;
                        bottleneck
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        let fc = p / "fc";
        Self {
            conv1: Conv::new(p / "conv1", 3, 64, 7, 2, 3),
            bn1: BatchNorm::new(p / "bn1", 64),
            stages,
            fc_weight: fc.var(
                "weight",
                &[1, FEATURES],
                nn::Init::Randn {
                    mean: 0.,
                    stdev: (1.0 / FEATURES as f64).sqrt(),
                },
            ),
            fc_bias: fc.zeros("bias", &[1]),
        }
    }

    /// `xs` is `[N, 3, H, W]`; returns `[N, 1]` logits.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor, tch::TchError> {
        let mut ys = self
            .bn1
            .forward(&self.conv1.forward(xs)?)?
            .f_relu()?
            .f_max_pool2d([3, 3], [2, 2], [1, 1], [1, 1], false)?;
        for block in self.stages.iter().flatten() {
            ys = block.forward(&ys)?;
        }
        ys.f_adaptive_avg_pool2d([1, 1])?
            .f_flatten(1, -1)?
            .f_linear(&self.fc_weight, Some(&self.fc_bias))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    #[test]
    fn registers_torchvision_names() {
        let vs = nn::VarStore::new(Device::Cpu);
        let _net = BinaryResNet50::new(&vs.root());
        let vars = vs.variables();

        assert_eq!(vars["conv1.weight"].size(), vec![64, 3, 7, 7]);
        assert_eq!(vars["layer1.0.downsample.0.weight"].size(), vec![256, 64, 1, 1]);
        assert_eq!(vars["layer4.2.bn3.running_var"].size(), vec![2048]);
        assert_eq!(vars["fc.weight"].size(), vec![1, 2048]);
        assert_eq!(vars["fc.bias"].size(), vec![1]);
        assert!(!vars.contains_key("layer1.1.downsample.0.weight"));
        // 53 convs, 53 batch norms with 4 tensors each, fc weight and bias.
        assert_eq!(vars.len(), 53 + 53 * 4 + 2);
    }

    #[test]
    fn produces_one_logit_per_image() {
        tch::manual_seed(7);
        let vs = nn::VarStore::new(Device::Cpu);
        let net = BinaryResNet50::new(&vs.root());
        let xs = Tensor::randn([2, 3, 64, 64], (Kind::Float, Device::Cpu));
        let out = tch::no_grad(|| net.forward(&xs)).unwrap();
        assert_eq!(out.size(), vec![2, 1]);
    }
}
