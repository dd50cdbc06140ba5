use std::path::Path;

use image::{ImageReader, RgbImage};
use ndarray::Array4;
use tch::Tensor;

use super::error::{ImageDecodeError, InferenceError};
use crate::config::ImageConfig;

/// Network input: a normalized `[1, 3, H, W]` batch of one image.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedImage {
    data: Array4<f32>,
}

impl PreprocessedImage {
    pub fn shape(&self) -> [usize; 4] {
        let (n, c, h, w) = self.data.dim();
        [n, c, h, w]
    }

    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }

    pub fn to_tensor(&self) -> Result<Tensor, InferenceError> {
        let values = self.data.as_slice().ok_or(InferenceError::NonContiguousInput)?;
        let shape = self.shape().map(|dim| dim as i64);
        Ok(Tensor::from_slice(values).f_view(shape)?)
    }
}

/// Decodes the image at `path`, guessing the format from its content rather
/// than its extension.
pub fn load_rgb(path: &Path) -> Result<RgbImage, ImageDecodeError> {
    let reader = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|source| ImageDecodeError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
    if reader.format().is_none() {
        return Err(ImageDecodeError::UnknownFormat(path.to_path_buf()));
    }
    let image = reader.decode().map_err(|source| ImageDecodeError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    if image.width() == 0 || image.height() == 0 {
        return Err(ImageDecodeError::Empty(path.to_path_buf()));
    }
    Ok(image.to_rgb8())
}

/// Stretches `rgb` to the configured size (aspect ratio is not kept), scales
/// to [0, 1] and normalizes each channel.
pub fn normalize(rgb: &RgbImage, config: &ImageConfig) -> PreprocessedImage {
    let [width, height] = config.size;
    let resized = if rgb.dimensions() == (width, height) {
        rgb.clone()
    } else {
        image::imageops::resize(rgb, width, height, config.resize_method.filter())
    };

    let norm = &config.normalization;
    let data = Array4::from_shape_fn(
        (1, 3, height as usize, width as usize),
        |(_, c, y, x)| {
            let value = resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
            (value - norm.mean[c]) / norm.std[c]
        },
    );
    PreprocessedImage { data }
}

pub fn preprocess(path: &Path, config: &ImageConfig) -> Result<PreprocessedImage, ImageDecodeError> {
    let rgb = load_rgb(path)?;
    Ok(normalize(&rgb, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResizeMethod;
    use image::Rgb;

    fn write_png(dir: &Path, name: &str, width: u32, height: u32, pixel: [u8; 3]) -> std::path::PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(width, height, Rgb(pixel)).save(&path).unwrap();
        path
    }

    #[test]
    fn stretches_to_network_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "wide.png", 640, 90, [10, 20, 30]);

        let image = preprocess(&path, &ImageConfig::default()).unwrap();
        assert_eq!(image.shape(), [1, 3, 256, 256]);
    }

    #[test]
    fn normalizes_each_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "solid.png", 32, 48, [255, 0, 255]);

        let image = preprocess(&path, &ImageConfig::default()).unwrap();
        let data = image.data();
        let expected = [
            (1.0 - 0.485) / 0.229,
            (0.0 - 0.456) / 0.224,
            (1.0 - 0.406) / 0.225,
        ];
        for (c, want) in expected.iter().enumerate() {
            for &(y, x) in &[(0, 0), (128, 17), (255, 255)] {
                let got = data[[0, c, y, x]];
                assert!((got - want).abs() < 1e-4, "channel {c}: {got} vs {want}");
            }
        }
    }

    #[test]
    fn honours_configured_size_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "small.png", 8, 8, [0, 0, 0]);
        let config = ImageConfig {
            size: [64, 32],
            resize_method: ResizeMethod::Nearest,
            ..ImageConfig::default()
        };

        let image = preprocess(&path, &config).unwrap();
        assert_eq!(image.shape(), [1, 3, 32, 64]);
    }

    #[test]
    fn grayscale_and_alpha_become_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let gray = dir.path().join("gray.png");
        image::GrayImage::from_pixel(16, 16, image::Luma([200])).save(&gray).unwrap();
        let rgba = dir.path().join("rgba.png");
        image::RgbaImage::from_pixel(16, 16, image::Rgba([200, 200, 200, 10]))
            .save(&rgba)
            .unwrap();

        let from_gray = preprocess(&gray, &ImageConfig::default()).unwrap();
        let from_rgba = preprocess(&rgba, &ImageConfig::default()).unwrap();
        assert_eq!(from_gray.shape(), [1, 3, 256, 256]);
        assert_eq!(from_gray, from_rgba);
    }

    #[test]
    fn format_is_sniffed_from_content() {
        let dir = tempfile::tempdir().unwrap();
        let png = write_png(dir.path(), "actually_png.png", 4, 4, [1, 2, 3]);
        let misnamed = dir.path().join("upload.jpg");
        std::fs::copy(&png, &misnamed).unwrap();

        assert!(preprocess(&misnamed, &ImageConfig::default()).is_ok());
    }

    #[test]
    fn non_image_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("notes.txt");
        std::fs::write(&text, "definitely not pixels").unwrap();
        let fake = dir.path().join("fake.png");
        std::fs::write(&fake, "definitely not pixels").unwrap();

        assert!(matches!(
            preprocess(&text, &ImageConfig::default()),
            Err(ImageDecodeError::UnknownFormat(_))
        ));
        assert!(matches!(
            preprocess(&fake, &ImageConfig::default()),
            Err(ImageDecodeError::Decode { .. })
        ));
    }

    #[test]
    fn missing_file_is_unreadable() {
        let err = preprocess(Path::new("/nonexistent/image.png"), &ImageConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, ImageDecodeError::Unreadable { .. }));
    }

    #[test]
    fn tensor_keeps_layout() {
        let rgb = RgbImage::from_fn(4, 2, |x, y| Rgb([(x * 60) as u8, (y * 100) as u8, 0]));
        let config = ImageConfig {
            size: [4, 2],
            ..ImageConfig::default()
        };
        let image = normalize(&rgb, &config);
        let tensor = image.to_tensor().unwrap();

        assert_eq!(tensor.size(), vec![1, 3, 2, 4]);
        let got = tensor.double_value(&[0, 0, 1, 3]) as f32;
        assert!((got - image.data()[[0, 0, 1, 3]]).abs() < 1e-6);
    }
}
