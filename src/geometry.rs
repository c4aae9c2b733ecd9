//! Image geometry: letterboxing into the model square and the inverse mapping
//!
//! [`PlacementGeometry`] is computed once per image and is the only source of
//! scale and offset for both directions, so the mask always lands back on
//! the pixels it was computed from.

use crate::{
    error::{BgRemovalError, Result},
    types::SegmentationMask,
};
use image::{imageops, imageops::FilterType, DynamicImage, GenericImageView, Rgba, RgbaImage};
use std::io::Cursor;

/// Canvas fill behind the letterboxed image
pub const LETTERBOX_FILL: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Where an image sits inside the model's square input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementGeometry {
    /// Side length of the square model input
    pub input_size: u32,
    /// Width of the image that was fitted
    pub original_width: u32,
    /// Height of the image that was fitted
    pub original_height: u32,
    /// Uniform scale factor, `min(S / w, S / h)`
    pub scale: f64,
    /// Width of the scaled image on the canvas
    pub scaled_width: u32,
    /// Height of the scaled image on the canvas
    pub scaled_height: u32,
    /// Left edge of the scaled image on the canvas
    pub offset_x: u32,
    /// Top edge of the scaled image on the canvas
    pub offset_y: u32,
}

impl PlacementGeometry {
    /// Compute the centered, aspect-preserving placement of a `width × height`
    /// image inside an `input_size × input_size` square.
    ///
    /// # Errors
    /// - Zero width, height or input size
    pub fn compute(width: u32, height: u32, input_size: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(BgRemovalError::invalid_image(format!(
                "Image has zero dimension ({width}x{height})"
            )));
        }
        if input_size == 0 {
            return Err(BgRemovalError::processing("Model input size is zero"));
        }

        let side = f64::from(input_size);
        let scale = (side / f64::from(width)).min(side / f64::from(height));
        if !scale.is_finite() || scale <= 0.0 {
            return Err(BgRemovalError::invalid_image(format!(
                "Degenerate scale {scale} for {width}x{height} image"
            )));
        }

        let scaled = |dim: u32| ((f64::from(dim) * scale).round() as u32).clamp(1, input_size);
        let scaled_width = scaled(width);
        let scaled_height = scaled(height);

        Ok(Self {
            input_size,
            original_width: width,
            original_height: height,
            scale,
            scaled_width,
            scaled_height,
            offset_x: (input_size - scaled_width) / 2,
            offset_y: (input_size - scaled_height) / 2,
        })
    }

    /// Region of the canvas covered by the image: `(x, y, width, height)`
    #[must_use]
    pub fn content_rect(&self) -> (u32, u32, u32, u32) {
        (
            self.offset_x,
            self.offset_y,
            self.scaled_width,
            self.scaled_height,
        )
    }
}

/// A decoded image together with its letterboxed model input
#[derive(Debug, Clone)]
pub struct FittedImage {
    /// The image the mask will be composited onto
    pub original: RgbaImage,
    /// `input_size × input_size` canvas handed to the tensor codec
    pub canvas: RgbaImage,
    /// Placement shared by encode and composite
    pub placement: PlacementGeometry,
}

/// Decode encoded image bytes
///
/// # Errors
/// - Unknown format or corrupt data
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(BgRemovalError::invalid_image("Input is empty"));
    }
    image::load_from_memory(bytes)
        .map_err(|e| BgRemovalError::invalid_image(format!("Failed to decode image: {e}")))
}

/// Read only the image header to get its dimensions
///
/// # Errors
/// - Unknown format or unreadable header
pub fn probe_dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
    image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| BgRemovalError::invalid_image(format!("Failed to read image header: {e}")))?
        .into_dimensions()
        .map_err(|e| BgRemovalError::invalid_image(format!("Failed to read image header: {e}")))
}

/// Shrink an image so its longest side is at most `max_dimension`.
/// Images that already fit are returned unchanged.
#[must_use]
pub fn downscale_to_max_dimension(image: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    if max_dimension == 0 || (width <= max_dimension && height <= max_dimension) {
        return image;
    }
    // resize() preserves aspect ratio within the bounding box
    image.resize(max_dimension, max_dimension, FilterType::Triangle)
}

/// Letterbox an already-decoded image into the model square
///
/// # Errors
/// - Zero-dimension image
pub fn fit_image(image: &DynamicImage, input_size: u32) -> Result<FittedImage> {
    let original = image.to_rgba8();
    let letterbox = Letterbox::compute(original.dimensions(), input_size)?.draw(&original);
    Ok(letterbox.into_fitted(original))
}

/// Letterbox with a resampling source capped at `max_dimension`.
///
/// Only the model input is built from the shrunken copy. `original` and the
/// placement keep the full decoded resolution, so the mask is composited
/// back at the input's own size.
///
/// # Errors
/// - Zero-dimension image
pub fn fit_image_with_limit(image: DynamicImage, input_size: u32, max_dimension: u32) -> Result<FittedImage> {
    let original = image.to_rgba8();
    let source = downscale_to_max_dimension(image, max_dimension).to_rgba8();
    let letterbox = Letterbox::compute(original.dimensions(), input_size)?.draw(&source);
    Ok(letterbox.into_fitted(original))
}

struct Letterbox {
    placement: PlacementGeometry,
    canvas: RgbaImage,
}

impl Letterbox {
    fn compute((width, height): (u32, u32), input_size: u32) -> Result<Self> {
        let placement = PlacementGeometry::compute(width, height, input_size)?;
        Ok(Self {
            placement,
            canvas: RgbaImage::from_pixel(input_size, input_size, LETTERBOX_FILL),
        })
    }

    fn draw(mut self, source: &RgbaImage) -> Self {
        let placement = self.placement;
        let scaled = imageops::resize(
            source,
            placement.scaled_width,
            placement.scaled_height,
            FilterType::Triangle,
        );
        // Transparent source pixels are drawn over the white fill, as a canvas would
        for (x, y, pixel) in scaled.enumerate_pixels() {
            let target = self
                .canvas
                .get_pixel_mut(x + placement.offset_x, y + placement.offset_y);
            blend_over(target, *pixel);
        }
        self
    }

    fn into_fitted(self, original: RgbaImage) -> FittedImage {
        FittedImage {
            original,
            canvas: self.canvas,
            placement: self.placement,
        }
    }
}

fn blend_over(target: &mut Rgba<u8>, source: Rgba<u8>) {
    let alpha = u32::from(source[3]);
    for c in 0..3 {
        let blended = (u32::from(source[c]) * alpha + u32::from(target[c]) * (255 - alpha) + 127) / 255;
        target[c] = blended as u8;
    }
    target[3] = 255;
}

/// Decode input bytes and letterbox into the model square.
///
/// `max_dimension` caps the resampling source for the model input only; the
/// returned `original` is always the full decoded image.
///
/// # Errors
/// - Undecodable input
/// - Zero-dimension image
pub fn load_and_fit(bytes: &[u8], input_size: u32, max_dimension: Option<u32>) -> Result<FittedImage> {
    let image = decode_image(bytes)?;
    match max_dimension {
        Some(max_dimension) => fit_image_with_limit(image, input_size, max_dimension),
        None => fit_image(&image, input_size),
    }
}

/// Undo the letterbox: bring a model-resolution mask to the original size.
///
/// The mask is first resized to the `S × S` canvas, the content rectangle is
/// cropped out, and the crop is resized to the original dimensions.
///
/// # Errors
/// - Mask data inconsistent with its dimensions
pub fn mask_to_original(mask: &SegmentationMask, placement: &PlacementGeometry) -> Result<SegmentationMask> {
    let square = mask.resize(placement.input_size, placement.input_size)?;
    let square = square.to_image()?;

    let (x, y, width, height) = placement.content_rect();
    let cropped = imageops::crop_imm(&square, x, y, width, height).to_image();

    let restored = imageops::resize(
        &cropped,
        placement.original_width,
        placement.original_height,
        FilterType::Triangle,
    );
    Ok(SegmentationMask::from_image(&restored))
}

/// Box blur with a `(2r + 1)²` window clamped at the borders.
#[must_use]
pub fn feather(mask: &SegmentationMask, radius: u32) -> SegmentationMask {
    let (width, height) = mask.dimensions;
    if radius == 0 || width == 0 || height == 0 {
        return mask.clone();
    }
    let (w, h, r) = (width as usize, height as usize, radius as usize);

    // Summed-area table with a zero border row and column
    let stride = w + 1;
    let mut table = vec![0u64; stride * (h + 1)];
    for y in 0..h {
        let mut row_sum = 0u64;
        for x in 0..w {
            row_sum += u64::from(mask.data.get(y * w + x).copied().unwrap_or(0));
            let above = table.get(y * stride + x + 1).copied().unwrap_or(0);
            if let Some(cell) = table.get_mut((y + 1) * stride + x + 1) {
                *cell = above + row_sum;
            }
        }
    }
    let at = |x: usize, y: usize| table.get(y * stride + x).copied().unwrap_or(0);

    let mut data = Vec::with_capacity(w * h);
    for y in 0..h {
        let (y0, y1) = (y.saturating_sub(r), (y + r + 1).min(h));
        for x in 0..w {
            let (x0, x1) = (x.saturating_sub(r), (x + r + 1).min(w));
            let sum = at(x1, y1) + at(x0, y0) - at(x0, y1) - at(x1, y0);
            let count = ((x1 - x0) * (y1 - y0)) as u64;
            data.push(((sum + count / 2) / count) as u8);
        }
    }

    SegmentationMask::new(data, mask.dimensions)
}

/// Apply a model-resolution mask to the original image.
///
/// Result alpha is `original alpha × mask / 255` (destination-in). With
/// `feather_radius > 0` the restored mask is box-blurred first.
///
/// # Errors
/// - Original image size differs from the placement
/// - Mask data inconsistent with its dimensions
pub fn composite_mask_to_original(
    mask: &SegmentationMask,
    placement: &PlacementGeometry,
    original: &RgbaImage,
    feather_radius: u32,
) -> Result<RgbaImage> {
    if original.dimensions() != (placement.original_width, placement.original_height) {
        return Err(BgRemovalError::processing(format!(
            "Image is {}x{} but placement was computed for {}x{}",
            original.width(),
            original.height(),
            placement.original_width,
            placement.original_height
        )));
    }

    let mut alpha = mask_to_original(mask, placement)?;
    if feather_radius > 0 {
        alpha = feather(&alpha, feather_radius);
    }

    let mut result = original.clone();
    for (pixel, &m) in result.pixels_mut().zip(alpha.data.iter()) {
        let combined = (u32::from(pixel[3]) * u32::from(m) + 127) / 255;
        pixel[3] = combined as u8;
    }
    Ok(result)
}
