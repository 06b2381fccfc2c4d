//! Image normalization
//!
//! Raw upload bytes -> `(1, 3, H, W)` standardized tensor:
//! 1. Decode (any format the `image` crate recognizes) and convert to 8-bit RGB
//! 2. Resize to the stored target size (bilinear, deterministic)
//! 3. Scale to [0, 1] and standardize per channel with stored mean/std

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use tracing::debug;

use crate::artifacts::NormalizationParams;
use crate::error::{PipelineError, Result};

/// Resampling filter used for resizing
const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// Converts encoded image bytes into the model input tensor
#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    height: u32,
    width: u32,
    means: [f32; 3],
    stds: [f32; 3],
}

impl ImageNormalizer {
    pub fn new(params: &NormalizationParams) -> Self {
        let (height, width) = params.dimensions();
        Self {
            height,
            width,
            means: params.means,
            stds: params.stds,
        }
    }

    /// Shape of every tensor this normalizer produces
    pub fn output_shape(&self) -> [usize; 4] {
        [1, 3, self.height as usize, self.width as usize]
    }

    /// Decode, resize and standardize an encoded image
    ///
    /// # Errors
    ///
    /// [`PipelineError::Validation`] if the bytes are empty or not a decodable image.
    pub fn normalize(&self, bytes: &[u8]) -> Result<Array4<f32>> {
        if bytes.is_empty() {
            return Err(PipelineError::Validation(
                "Error processing image: empty payload".to_string(),
            ));
        }

        let decoded = image::load_from_memory(bytes)
            .map_err(|e| PipelineError::Validation(format!("Error processing image: {}", e)))?;
        debug!(
            width = decoded.width(),
            height = decoded.height(),
            color = ?decoded.color(),
            "Decoded image"
        );

        let rgb = decoded.to_rgb8();
        let resized = if rgb.dimensions() == (self.width, self.height) {
            rgb
        } else {
            image::imageops::resize(&rgb, self.width, self.height, RESIZE_FILTER)
        };

        Ok(self.standardize(&resized))
    }

    fn standardize(&self, image: &RgbImage) -> Array4<f32> {
        let mut tensor = Array4::<f32>::zeros(self.output_shape());
        for (x, y, pixel) in image.enumerate_pixels() {
            for c in 0..3 {
                let value = f32::from(pixel[c]) / 255.0;
                tensor[[0, c, y as usize, x as usize]] = (value - self.means[c]) / self.stds[c];
            }
        }
        tensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ImageSize;
    use image::{DynamicImage, GrayImage, ImageBuffer, ImageFormat, Luma, Rgb, Rgba};
    use std::io::Cursor;

    fn params(size: u32) -> NormalizationParams {
        NormalizationParams {
            image_size: ImageSize::Square(size),
            means: [0.5, 0.5, 0.5],
            stds: [0.25, 0.25, 0.25],
        }
    }

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        image.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    #[test]
    fn test_output_shape_and_standardization() {
        let img = ImageBuffer::from_pixel(4, 4, Rgb([255u8, 0, 128]));
        let bytes = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);

        let normalizer = ImageNormalizer::new(&params(4));
        let tensor = normalizer.normalize(&bytes).unwrap();

        assert_eq!(tensor.shape(), &[1, 3, 4, 4]);
        assert!((tensor[[0, 0, 2, 2]] - 2.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 2, 2]] + 2.0).abs() < 1e-6);
        let expected_blue = (128.0 / 255.0 - 0.5) / 0.25;
        assert!((tensor[[0, 2, 2, 2]] - expected_blue).abs() < 1e-6);
    }

    #[test]
    fn test_resizes_to_target_dimensions() {
        let img = ImageBuffer::from_fn(37, 21, |x, y| Rgb([(x * 6) as u8, (y * 12) as u8, 77]));
        let bytes = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);

        let normalizer = ImageNormalizer::new(&NormalizationParams {
            image_size: ImageSize::Dims([8, 16]),
            means: [0.485, 0.456, 0.406],
            stds: [0.229, 0.224, 0.225],
        });
        let tensor = normalizer.normalize(&bytes).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 8, 16]);
        assert!(tensor.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_grayscale_is_expanded_to_rgb() {
        let img: GrayImage = ImageBuffer::from_pixel(4, 4, Luma([200u8]));
        let bytes = encode(DynamicImage::ImageLuma8(img), ImageFormat::Png);

        let tensor = ImageNormalizer::new(&params(4)).normalize(&bytes).unwrap();
        let expected = (200.0 / 255.0 - 0.5) / 0.25;
        for c in 0..3 {
            assert!((tensor[[0, c, 1, 1]] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_sixteen_bit_and_alpha_modes_are_accepted() {
        let gray16 = ImageBuffer::<Luma<u16>, Vec<u16>>::from_pixel(4, 4, Luma([40_000u16]));
        let bytes = encode(DynamicImage::ImageLuma16(gray16), ImageFormat::Png);
        let tensor = ImageNormalizer::new(&params(4)).normalize(&bytes).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 4, 4]);

        let rgba = ImageBuffer::from_pixel(4, 4, Rgba([10u8, 20, 30, 0]));
        let bytes = encode(DynamicImage::ImageRgba8(rgba), ImageFormat::Png);
        let tensor = ImageNormalizer::new(&params(4)).normalize(&bytes).unwrap();
        let expected_red = (10.0 / 255.0 - 0.5) / 0.25;
        assert!((tensor[[0, 0, 0, 0]] - expected_red).abs() < 1e-6);
    }

    #[test]
    fn test_non_image_bytes_are_validation_errors() {
        let normalizer = ImageNormalizer::new(&params(4));

        let err = normalizer.normalize(b"this is a plain text file").unwrap_err();
        assert!(err.is_client_error());

        let err = normalizer.normalize(&[]).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn test_truncated_image_is_validation_error() {
        let img = ImageBuffer::from_pixel(16, 16, Rgb([1u8, 2, 3]));
        let bytes = encode(DynamicImage::ImageRgb8(img), ImageFormat::Png);
        let truncated = &bytes[..bytes.len() / 2];

        let err = ImageNormalizer::new(&params(4)).normalize(truncated).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn test_normalization_is_deterministic() {
        let img = ImageBuffer::from_fn(30, 30, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, ((x + y) * 4) as u8]));
        let bytes = encode(DynamicImage::ImageRgb8(img), ImageFormat::Jpeg);

        let normalizer = ImageNormalizer::new(&params(12));
        let first = normalizer.normalize(&bytes).unwrap();
        let second = normalizer.normalize(&bytes).unwrap();
        assert_eq!(first, second);
    }
}
