//! Core types for background removal operations

use crate::{
    config::OutputFormat,
    error::{BgRemovalError, Result},
    models::ModelKind,
};
use image::{imageops::FilterType, GrayImage};

/// Per-pixel confidence mask, row-major, 0 = background, 255 = subject
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMask {
    /// Mask values, `width * height` bytes
    pub data: Vec<u8>,

    /// Mask dimensions (width, height)
    pub dimensions: (u32, u32),
}

impl SegmentationMask {
    /// Create a new segmentation mask
    #[must_use]
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Self {
        Self { data, dimensions }
    }

    /// Mask filled with a single value
    #[must_use]
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self::new(vec![value; width as usize * height as usize], (width, height))
    }

    /// Create mask from grayscale image
    #[must_use]
    pub fn from_image(image: &GrayImage) -> Self {
        Self::new(image.as_raw().clone(), image.dimensions())
    }

    /// Convert mask to grayscale image
    ///
    /// # Errors
    /// - Data length does not match the dimensions
    pub fn to_image(&self) -> Result<GrayImage> {
        let (width, height) = self.dimensions;
        GrayImage::from_raw(width, height, self.data.clone()).ok_or_else(|| {
            BgRemovalError::processing(format!(
                "Mask data length {} does not match {}x{}",
                self.data.len(),
                width,
                height
            ))
        })
    }

    /// Resize mask to new dimensions (bilinear)
    ///
    /// # Errors
    /// - Data length does not match the dimensions
    pub fn resize(&self, new_width: u32, new_height: u32) -> Result<SegmentationMask> {
        if self.dimensions == (new_width, new_height) {
            return Ok(self.clone());
        }
        let current = self.to_image()?;
        let resized =
            image::imageops::resize(&current, new_width, new_height, FilterType::Triangle);
        Ok(SegmentationMask::from_image(&resized))
    }

    /// Number of pixels at full opacity
    #[must_use]
    pub fn opaque_count(&self) -> usize {
        self.data.iter().filter(|&&v| v == 255).count()
    }

    /// Get mask statistics
    #[must_use]
    pub fn statistics(&self) -> MaskStatistics {
        let total_pixels = self.data.len();
        let foreground_pixels = self.data.iter().filter(|&&x| x > 127).count();
        let background_pixels = total_pixels - foreground_pixels;
        let ratio = |count: usize| {
            if total_pixels == 0 {
                0.0
            } else {
                count as f32 / total_pixels as f32
            }
        };

        MaskStatistics {
            total_pixels,
            foreground_pixels,
            background_pixels,
            foreground_ratio: ratio(foreground_pixels),
            background_ratio: ratio(background_pixels),
        }
    }
}

/// Statistics about a segmentation mask
#[derive(Debug, Clone)]
pub struct MaskStatistics {
    pub total_pixels: usize,
    pub foreground_pixels: usize,
    pub background_pixels: usize,
    pub foreground_ratio: f32,
    pub background_ratio: f32,
}

/// Detailed timing breakdown for one call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingTimings {
    /// Model acquisition time; zero when the cached session was reused
    pub model_load_ms: u64,

    /// Decode, letterbox and tensor encoding
    pub preprocessing_ms: u64,

    /// Forward pass
    pub inference_ms: u64,

    /// Mask decode and compositing
    pub postprocessing_ms: u64,

    /// Output encoding
    pub image_encode_ms: u64,

    /// Wall-clock total
    pub total_ms: u64,
}

impl ProcessingTimings {
    /// Fraction of the total spent in inference
    #[must_use]
    pub fn inference_ratio(&self) -> f64 {
        if self.total_ms == 0 {
            0.0
        } else {
            self.inference_ms as f64 / self.total_ms as f64
        }
    }
}

/// Terminal value of a successful background removal
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    /// Encoded output image
    pub data: Vec<u8>,
    /// Encoding of `data`
    pub format: OutputFormat,
    /// Output width in pixels
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
    /// Wall-clock time of the call
    pub processing_time_ms: u64,
    /// Runtime and model that produced the mask, e.g. "onnx:u2net"
    pub method_used: String,
    /// Model architecture used
    pub model: ModelKind,
    /// Per-stage timings
    pub timings: ProcessingTimings,
}

impl ProcessingResult {
    /// Write the encoded image to a file
    ///
    /// # Errors
    /// - File system errors
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, &self.data)
            .map_err(|e| BgRemovalError::file_io_error("write output image", path, &e))
    }

    /// Get image dimensions
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_statistics() {
        let mask = SegmentationMask::new(vec![0, 255, 255, 100], (2, 2));
        let stats = mask.statistics();
        assert_eq!(stats.total_pixels, 4);
        assert_eq!(stats.foreground_pixels, 2);
        assert!((stats.foreground_ratio - 0.5).abs() < f32::EPSILON);
        assert_eq!(mask.opaque_count(), 2);
    }

    #[test]
    fn test_mask_to_image_rejects_bad_length() {
        let mask = SegmentationMask::new(vec![0; 3], (2, 2));
        assert!(mask.to_image().is_err());
    }

    #[test]
    fn test_mask_resize_constant_stays_constant() {
        let mask = SegmentationMask::filled(10, 10, 255);
        let resized = mask.resize(37, 21).unwrap();
        assert_eq!(resized.dimensions, (37, 21));
        assert!(resized.data.iter().all(|&v| v == 255));
    }

    #[test]
    fn test_timings_ratio() {
        let timings = ProcessingTimings {
            inference_ms: 50,
            total_ms: 200,
            ..ProcessingTimings::default()
        };
        assert!((timings.inference_ratio() - 0.25).abs() < f64::EPSILON);
        assert!(ProcessingTimings::default().inference_ratio().abs() < f64::EPSILON);
    }
}
