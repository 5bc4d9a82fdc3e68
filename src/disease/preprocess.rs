//! Image preprocessing for the ONNX backends.
//!
//! The legacy classifier was trained on 28x28 images with the channel order
//! reversed (BGR) and values scaled to [0, 1]; that exact pipeline is
//! reproduced here.

use std::path::Path;

use image::imageops::FilterType;
use image::DynamicImage;
use tract_onnx::prelude::tract_ndarray::Array4;

use crate::error::RecognizerError;

/// Square side of the legacy classifier input
pub const LEGACY_INPUT_SIZE: u32 = 28;

/// Decode an image file, sniffing the format from its content (upload temp
/// files carry no reliable extension)
pub fn open_image(path: &Path) -> Result<DynamicImage, RecognizerError> {
    let fail = |reason: String| RecognizerError::Image {
        path: path.to_path_buf(),
        reason,
    };

    image::ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| fail(e.to_string()))?
        .decode()
        .map_err(|e| fail(e.to_string()))
}

/// Legacy input: resize to 28x28, reverse channels, scale to [0, 1], NHWC batch of one
pub fn legacy_tensor(img: &DynamicImage) -> Array4<f32> {
    let size = LEGACY_INPUT_SIZE;
    let resized = image::imageops::resize(&img.to_rgb8(), size, size, FilterType::Triangle);

    Array4::from_shape_fn((1, size as usize, size as usize, 3), |(_, y, x, c)| {
        let pixel = resized.get_pixel(x as u32, y as u32);
        pixel[2 - c] as f32 / 255.0
    })
}

pub fn preprocess_legacy(path: &Path) -> Result<Array4<f32>, RecognizerError> {
    let img = open_image(path)?;
    Ok(legacy_tensor(&img))
}

/// Detector input: stretch to `size`x`size`, RGB, scale to [0, 1], NCHW batch of one
pub fn detector_tensor(img: &DynamicImage, size: u32) -> Array4<f32> {
    let resized = image::imageops::resize(&img.to_rgb8(), size, size, FilterType::Triangle);

    Array4::from_shape_fn((1, 3, size as usize, size as usize), |(_, c, y, x)| {
        resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::{Rgb, RgbImage};

    fn solid(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    #[test]
    fn test_legacy_shape_and_channel_order() {
        let tensor = legacy_tensor(&solid(64, 48, [255, 128, 0]));
        assert_eq!(tensor.shape(), &[1, 28, 28, 3]);

        // Channels come out as B, G, R
        assert_relative_eq!(tensor[[0, 5, 7, 0]], 0.0, epsilon = 1e-6);
        assert_relative_eq!(tensor[[0, 5, 7, 1]], 128.0 / 255.0, epsilon = 1e-6);
        assert_relative_eq!(tensor[[0, 5, 7, 2]], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_legacy_values_in_unit_range() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(40, 40, |x, y| {
            Rgb([(x * 6) as u8, (y * 6) as u8, ((x + y) * 3) as u8])
        }));
        let tensor = legacy_tensor(&img);
        assert!(tensor.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_detector_layout_is_nchw_rgb() {
        let tensor = detector_tensor(&solid(10, 20, [255, 0, 51]), 32);
        assert_eq!(tensor.shape(), &[1, 3, 32, 32]);
        assert_relative_eq!(tensor[[0, 0, 3, 3]], 1.0, epsilon = 1e-6);
        assert_relative_eq!(tensor[[0, 1, 3, 3]], 0.0, epsilon = 1e-6);
        assert_relative_eq!(tensor[[0, 2, 3, 3]], 0.2, epsilon = 1e-6);
    }

    #[test]
    fn test_unreadable_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"definitely not a png").unwrap();
        assert!(matches!(
            preprocess_legacy(file.path()),
            Err(RecognizerError::Image { .. })
        ));
    }
}
