//! Tensor codec: pixels to normalized tensors and model output to masks
//!
//! All functions here are pure. Tensors are NCHW with a batch of one:
//! inputs are `[1, 3, S, S]`, mask outputs are `[1, 1, H, W]`.

use crate::{
    error::{BgRemovalError, Result},
    models::{ModelConfig, OutputRange},
    types::SegmentationMask,
};
use image::{RgbImage, RgbaImage};
use ndarray::{Array4, ArrayView2};

/// Magnitude beyond which a value cannot be a probability and is read as a logit
pub const LOGIT_DETECTION_BOUND: f32 = 10.0;

/// Logistic sigmoid
#[must_use]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Map one raw output value to a probability in [0, 1]
#[must_use]
pub fn to_probability(value: f32, range: OutputRange) -> f32 {
    let probability = match range {
        OutputRange::Probability => value,
        OutputRange::Logits => sigmoid(value),
        OutputRange::Detect => {
            if value.abs() > LOGIT_DETECTION_BOUND {
                sigmoid(value)
            } else {
                value
            }
        },
    };
    probability.clamp(0.0, 1.0)
}

/// Encode a letterboxed canvas into a normalized NCHW tensor.
///
/// Alpha is dropped; each channel becomes `(v / 255 - mean[c]) / std[c]`.
///
/// # Errors
/// - Canvas is not `input_size × input_size`
#[allow(clippy::indexing_slicing)] // tensor is allocated to the canvas size
pub fn encode(canvas: &RgbaImage, config: &ModelConfig) -> Result<Array4<f32>> {
    let size = config.input_size;
    if canvas.dimensions() != (size, size) {
        return Err(BgRemovalError::processing(format!(
            "Canvas is {}x{}, model '{}' expects {size}x{size}",
            canvas.width(),
            canvas.height(),
            config.name
        )));
    }

    let side = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));

    for (y, row) in canvas.rows().enumerate() {
        for (x, pixel) in row.enumerate() {
            for c in 0..3 {
                tensor[[0, c, y, x]] =
                    (f32::from(pixel[c]) / 255.0 - config.mean[c]) / config.std[c];
            }
        }
    }

    Ok(tensor)
}

/// Approximate inverse of [`encode`]: denormalize a tensor back to RGB pixels
///
/// # Errors
/// - Tensor is not `[1, 3, H, W]`
pub fn decode_pixels(tensor: &Array4<f32>, config: &ModelConfig) -> Result<RgbImage> {
    let shape = tensor.shape();
    if shape.first() != Some(&1) || shape.get(1) != Some(&3) {
        return Err(BgRemovalError::processing(format!(
            "Expected [1, 3, H, W] tensor, got {shape:?}"
        )));
    }
    let height = shape.get(2).copied().unwrap_or(0);
    let width = shape.get(3).copied().unwrap_or(0);

    let mut image = RgbImage::new(width as u32, height as u32);
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        for c in 0..3 {
            let normalized = tensor
                .get([0, c, y as usize, x as usize])
                .copied()
                .unwrap_or(0.0);
            let value = (normalized * config.std[c] + config.mean[c]) * 255.0;
            pixel[c] = value.round().clamp(0.0, 255.0) as u8;
        }
    }
    Ok(image)
}

/// Validate a `[1, 1, H, W]` output and return its single plane
fn mask_plane(output: &Array4<f32>) -> Result<ArrayView2<'_, f32>> {
    let shape = output.shape();
    let (batch, channels, height, width) = match shape {
        [b, c, h, w] => (*b, *c, *h, *w),
        _ => (0, 0, 0, 0),
    };
    if batch != 1 || channels != 1 || height == 0 || width == 0 {
        return Err(BgRemovalError::processing(format!(
            "Model output has shape {shape:?}, expected [1, 1, H, W]"
        )));
    }
    if output.len() != height * width {
        return Err(BgRemovalError::processing(format!(
            "Model output has {} values, expected {}",
            output.len(),
            height * width
        )));
    }
    Ok(output.slice(ndarray::s![0, 0, .., ..]))
}

fn decode_with<F: Fn(f32) -> u8>(output: &Array4<f32>, map: F) -> Result<SegmentationMask> {
    let plane = mask_plane(output)?;
    let (height, width) = plane.dim();
    let data: Vec<u8> = plane.iter().map(|&v| map(v)).collect();
    Ok(SegmentationMask::new(data, (width as u32, height as u32)))
}

/// Binary mask: probability `>= threshold` becomes 255, everything else 0
///
/// # Errors
/// - Output is not a single-channel `[1, 1, H, W]` tensor
pub fn decode(output: &Array4<f32>, threshold: f32, range: OutputRange) -> Result<SegmentationMask> {
    decode_with(output, |v| {
        if to_probability(v, range) >= threshold {
            255
        } else {
            0
        }
    })
}

/// Continuous mask: probability scaled to 0..=255, no threshold
///
/// # Errors
/// - Output is not a single-channel `[1, 1, H, W]` tensor
pub fn decode_continuous(output: &Array4<f32>, range: OutputRange) -> Result<SegmentationMask> {
    decode_with(output, |v| (to_probability(v, range) * 255.0).round() as u8)
}

/// Rebuild a `[1, 1, S, S]` output from a flat buffer of a square mask
///
/// # Errors
/// - Empty buffer or a length that is not a perfect square
pub fn output_from_flat(data: Vec<f32>) -> Result<Array4<f32>> {
    let len = data.len();
    let side = (len as f64).sqrt().round() as usize;
    if len == 0 || side * side != len {
        return Err(BgRemovalError::processing(format!(
            "Flat model output of length {len} is not a square mask"
        )));
    }
    Array4::from_shape_vec((1, 1, side, side), data)
        .map_err(|e| BgRemovalError::processing(format!("Failed to reshape model output: {e}")))
}
