#![allow(dead_code)]

use image::{Rgb, RgbImage};
use once_cell::sync::Lazy;
use realcheck::classifier::resnet::BinaryResNet50;
use std::io::Write;
use std::path::{Path, PathBuf};
use tch::{Device, Kind, Tensor, nn};

pub const SEED: i64 = 7;

/// Variables of the network, named the way PyTorch names them. Conv and
/// linear weights get a deterministic He-scaled pattern derived from `seed`
/// so the values do not depend on the global RNG other tests are using.
pub fn network_tensors(seed: i64) -> Vec<(String, Tensor)> {
    let vs = nn::VarStore::new(Device::Cpu);
    let _net = BinaryResNet50::new(&vs.root());
    let mut named: Vec<(String, Tensor)> = vs
        .variables()
        .into_iter()
        .map(|(name, tensor)| (name, tensor.detach()))
        .collect();
    named.sort_by(|a, b| a.0.cmp(&b.0));

    for (idx, (_, tensor)) in named.iter_mut().enumerate() {
        let size = tensor.size();
        if size.len() < 2 {
            continue;
        }
        let numel: i64 = size.iter().product();
        let fan_in = numel / size[0];
        let frequency = 0.37 + 0.013 * idx as f64 + 0.001 * seed as f64;
        *tensor = (Tensor::arange(numel, (Kind::Float, Device::Cpu)) * frequency + seed as f64)
            .sin()
            .view(size.as_slice())
            * (2.0 / (fan_in as f64).sqrt());
    }
    named
}

pub fn write_checkpoint(path: &Path, named: &[(String, Tensor)]) {
    Tensor::write_safetensors(named, path).unwrap();
}

pub fn write_prefixed_checkpoint(path: &Path, prefix: &str, seed: i64) {
    let named: Vec<(String, Tensor)> = network_tensors(seed)
        .into_iter()
        .map(|(name, tensor)| (format!("{}{}", prefix, name), tensor))
        .collect();
    write_checkpoint(path, &named);
}

/// Writes `named` the way `torch.save` lays out a zip archive: a protocol 2
/// pickle in `archive/data.pkl` and one raw little-endian storage per tensor
/// under `archive/data/`. With `nested_key` the state dict sits under that
/// key next to an `epoch` counter, as in a training checkpoint.
pub fn write_torch_save(path: &Path, nested_key: Option<&str>, named: &[(String, Tensor)]) {
    let mut pickle = TorchPickle::default();
    let mut storages = Vec::new();

    pickle.proto();
    if let Some(key) = nested_key {
        pickle.op(b'}');
        pickle.op(b'(');
        pickle.unicode(key);
        pickle.state_dict(named, &mut storages);
        pickle.unicode("epoch");
        pickle.int(12);
        pickle.op(b'u');
    } else {
        pickle.state_dict(named, &mut storages);
    }
    pickle.op(b'.');

    let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
    let options =
        zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    zip.start_file("archive/data.pkl", options).unwrap();
    zip.write_all(&pickle.bytes).unwrap();
    for (key, bytes) in storages {
        zip.start_file(format!("archive/data/{}", key), options).unwrap();
        zip.write_all(&bytes).unwrap();
    }
    zip.start_file("archive/version", options).unwrap();
    zip.write_all(b"3\n").unwrap();
    zip.finish().unwrap();
}

#[derive(Default)]
struct TorchPickle {
    bytes: Vec<u8>,
}

impl TorchPickle {
    fn proto(&mut self) {
        self.bytes.extend_from_slice(&[0x80, 2]);
    }

    fn op(&mut self, code: u8) {
        self.bytes.push(code);
    }

    fn unicode(&mut self, text: &str) {
        self.op(b'X');
        self.bytes.extend_from_slice(&(text.len() as u32).to_le_bytes());
        self.bytes.extend_from_slice(text.as_bytes());
    }

    fn int(&mut self, value: i64) {
        self.op(b'J');
        self.bytes.extend_from_slice(&(value as i32).to_le_bytes());
    }

    fn global(&mut self, module: &str, name: &str) {
        self.op(b'c');
        self.bytes.extend_from_slice(format!("{}\n{}\n", module, name).as_bytes());
    }

    fn int_tuple(&mut self, values: &[i64]) {
        self.op(b'(');
        for &value in values {
            self.int(value);
        }
        self.op(b't');
    }

    /// Pushes a dict of name to `_rebuild_tensor_v2(...)`, collecting the
    /// storage bytes each tensor points at.
    fn state_dict(&mut self, named: &[(String, Tensor)], storages: &mut Vec<(String, Vec<u8>)>) {
        self.op(b'}');
        self.op(b'(');
        for (name, tensor) in named {
            let key = storages.len().to_string();
            let size = tensor.size();
            let numel: i64 = size.iter().product();
            let mut strides = vec![1i64; size.len()];
            for dim in (0..size.len().saturating_sub(1)).rev() {
                strides[dim] = strides[dim + 1] * size[dim + 1];
            }
            let (storage_class, bytes) = match tensor.kind() {
                Kind::Int64 => {
                    let values = Vec::<i64>::try_from(&tensor.flatten(0, -1)).unwrap();
                    ("LongStorage", values.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>())
                }
                _ => {
                    let values = Vec::<f32>::try_from(&tensor.to_kind(Kind::Float).flatten(0, -1)).unwrap();
                    ("FloatStorage", values.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>())
                }
            };

            self.unicode(name);
            self.global("torch._utils", "_rebuild_tensor_v2");
            self.op(b'(');
            self.op(b'(');
            self.unicode("storage");
            self.global("torch", storage_class);
            self.unicode(&key);
            self.unicode("cpu");
            self.int(numel);
            self.op(b't');
            self.op(b'Q');
            self.int(0);
            self.int_tuple(&size);
            self.int_tuple(&strides);
            self.op(0x89);
            self.op(b'}');
            self.op(b't');
            self.op(b'R');

            storages.push((key, bytes));
        }
        self.op(b'u');
    }
}

static CHECKPOINT: Lazy<PathBuf> = Lazy::new(|| {
    let path = Path::new(env!("CARGO_TARGET_TMPDIR")).join(format!("resnet50-seed{}.safetensors", SEED));
    if !path.is_file() {
        let partial = path.with_extension(format!("{}.partial", std::process::id()));
        write_prefixed_checkpoint(&partial, "", SEED);
        std::fs::rename(&partial, &path).unwrap();
    }
    path
});

/// A raw-layout checkpoint shared by every test in the binary.
pub fn checkpoint() -> &'static Path {
    &CHECKPOINT
}

pub fn write_png(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_fn(96, 64, |x, y| Rgb([(x * 2) as u8, (y * 3) as u8, ((x + y) % 256) as u8]))
        .save(&path)
        .unwrap();
    path
}

pub fn png_bytes() -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    std::fs::read(write_png(dir.path(), "sample.png")).unwrap()
}
