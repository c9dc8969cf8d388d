//! Image decoding and tensor preprocessing shared by training and inference

use crate::error::{PipelineError, Result};
use image::{imageops::FilterType, DynamicImage, ImageBuffer, ImageReader, RgbImage};
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// ImageNet channel means
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet channel standard deviations
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// How an image is brought to the square network input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMethod {
    /// Stretch to the target square, ignoring aspect ratio
    #[default]
    Squish,
    /// Keep aspect ratio and center on a padded canvas
    Pad,
}

/// Deterministic transform applied to every image before it reaches the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// Side of the square input
    pub image_size: u32,
    pub resize_method: ResizeMethod,
    pub normalization_mean: [f32; 3],
    pub normalization_std: [f32; 3],
    /// Canvas color for `ResizeMethod::Pad`
    pub padding_color: [u8; 3],
}

impl PreprocessingConfig {
    #[must_use]
    pub fn new(image_size: u32, resize_method: ResizeMethod) -> Self {
        Self {
            image_size,
            resize_method,
            normalization_mean: IMAGENET_MEAN,
            normalization_std: IMAGENET_STD,
            padding_color: [0, 0, 0],
        }
    }
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self::new(192, ResizeMethod::Squish)
    }
}

/// Decode an image, trusting its content over its file extension
///
/// Search results routinely serve PNG or WebP bytes behind a `.jpg` URL.
///
/// # Errors
/// - File cannot be opened
/// - Content is not a decodable image
pub fn open_image(path: &Path) -> Result<DynamicImage> {
    let reader = ImageReader::open(path)
        .map_err(|e| PipelineError::file_io_error("open image", path, &e))?
        .with_guessed_format()
        .map_err(|e| PipelineError::file_io_error("read image header", path, &e))?;
    Ok(reader.decode()?)
}

/// Scale so the longest side equals `dim`, keeping the aspect ratio
#[must_use]
pub fn resize_longest_side(image: &DynamicImage, dim: u32) -> DynamicImage {
    image.resize(dim, dim, FilterType::Lanczos3)
}

/// Image to normalized NCHW tensor conversion
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Preprocess an image into a `[1, 3, size, size]` tensor
    ///
    /// Handles RGB conversion, resizing per `ResizeMethod`, and per-channel
    /// normalization.
    ///
    /// # Errors
    /// - Zero image size
    /// - Source image with a zero dimension
    pub fn preprocess(image: &DynamicImage, config: &PreprocessingConfig) -> Result<Array4<f32>> {
        let canvas = Self::resize_to_canvas(image, config)?;
        Ok(Self::canvas_to_tensor(&canvas, config))
    }

    /// Resize into the square canvas the network expects
    ///
    /// # Errors
    /// - Zero image size
    /// - Source image with a zero dimension
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn resize_to_canvas(image: &DynamicImage, config: &PreprocessingConfig) -> Result<RgbImage> {
        let target_size = config.image_size;
        if target_size == 0 {
            return Err(PipelineError::invalid_config("image size must be at least 1"));
        }

        let rgb_image = image.to_rgb8();
        let (orig_width, orig_height) = rgb_image.dimensions();
        if orig_width == 0 || orig_height == 0 {
            return Err(PipelineError::data("cannot preprocess an empty image"));
        }

        match config.resize_method {
            ResizeMethod::Squish => Ok(image::imageops::resize(
                &rgb_image,
                target_size,
                target_size,
                FilterType::Triangle,
            )),
            ResizeMethod::Pad => {
                let target_size_f32 = target_size as f32;
                let scale = (target_size_f32 / orig_width as f32)
                    .min(target_size_f32 / orig_height as f32);

                let new_width = ((orig_width as f32 * scale).round() as u32).clamp(1, target_size);
                let new_height = ((orig_height as f32 * scale).round() as u32).clamp(1, target_size);

                let resized = image::imageops::resize(
                    &rgb_image,
                    new_width,
                    new_height,
                    FilterType::Triangle,
                );

                let padding = config.padding_color;
                let mut canvas = ImageBuffer::from_pixel(
                    target_size,
                    target_size,
                    image::Rgb([padding[0], padding[1], padding[2]]),
                );

                let offset_x = (target_size - new_width) / 2;
                let offset_y = (target_size - new_height) / 2;
                image::imageops::replace(
                    &mut canvas,
                    &resized,
                    i64::from(offset_x),
                    i64::from(offset_y),
                );
                Ok(canvas)
            },
        }
    }

    fn canvas_to_tensor(canvas: &RgbImage, config: &PreprocessingConfig) -> Array4<f32> {
        let (width, height) = canvas.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        #[allow(clippy::indexing_slicing)]
        // Safe: tensor dimensions pre-allocated to match canvas size
        for (y, row) in canvas.rows().enumerate() {
            for (x, pixel) in row.enumerate() {
                for channel in 0..3 {
                    tensor[[0, channel, y, x]] = (f32::from(pixel[channel]) / 255.0
                        - config.normalization_mean[channel])
                        / config.normalization_std[channel];
                }
            }
        }

        tensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    fn solid_image(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb(color)))
    }

    #[test]
    fn test_squish_shape_and_normalization() {
        let image = solid_image(100, 40, [255, 0, 0]);
        let config = PreprocessingConfig::new(32, ResizeMethod::Squish);

        let tensor = ImagePreprocessor::preprocess(&image, &config).unwrap();

        assert_eq!(tensor.shape(), &[1, 3, 32, 32]);
        let expected_red = (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        let expected_green = (0.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
        assert!((tensor[[0, 0, 5, 5]] - expected_red).abs() < 1e-4);
        assert!((tensor[[0, 1, 31, 0]] - expected_green).abs() < 1e-4);
    }

    #[test]
    fn test_pad_centers_image() {
        let image = solid_image(100, 50, [255, 255, 255]);
        let config = PreprocessingConfig::new(20, ResizeMethod::Pad);

        let canvas = ImagePreprocessor::resize_to_canvas(&image, &config).unwrap();

        assert_eq!(canvas.dimensions(), (20, 20));
        // 20x10 content centered vertically: rows 0..5 are padding
        assert_eq!(canvas.get_pixel(10, 0), &Rgb([0, 0, 0]));
        assert_eq!(canvas.get_pixel(10, 10), &Rgb([255, 255, 255]));
        assert_eq!(canvas.get_pixel(10, 19), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_preprocess_is_deterministic() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_fn(37, 23, |x, y| {
            Rgb([(x * 7) as u8, (y * 11) as u8, ((x + y) * 3) as u8])
        }));
        let config = PreprocessingConfig::default();

        let first = ImagePreprocessor::preprocess(&image, &config).unwrap();
        let second = ImagePreprocessor::preprocess(&image, &config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_zero_size_rejected() {
        let image = solid_image(10, 10, [1, 2, 3]);
        let config = PreprocessingConfig::new(0, ResizeMethod::Squish);
        assert!(ImagePreprocessor::preprocess(&image, &config).is_err());
    }

    #[test]
    fn test_resize_longest_side() {
        let landscape = solid_image(800, 400, [0, 0, 0]);
        let resized = resize_longest_side(&landscape, 200);
        assert_eq!((resized.width(), resized.height()), (200, 100));

        let portrait = solid_image(30, 60, [0, 0, 0]);
        let resized = resize_longest_side(&portrait, 120);
        assert_eq!((resized.width(), resized.height()), (60, 120));
    }

    #[test]
    fn test_open_image_ignores_misleading_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("actually_png.jpg");
        solid_image(4, 4, [9, 9, 9])
            .save_with_format(&path, image::ImageFormat::Png)
            .unwrap();

        let image = open_image(&path).unwrap();
        assert_eq!(image.width(), 4);

        let garbage = dir.path().join("garbage.png");
        std::fs::write(&garbage, b"not an image").unwrap();
        assert!(open_image(&garbage).is_err());
    }
}
