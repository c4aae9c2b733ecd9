//! Output format handling service
//!
//! Every supported format keeps the alpha channel, so the handler never has
//! to flatten a cut-out onto a background.

use crate::{
    config::OutputFormat,
    error::{BgRemovalError, Result},
};
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;

/// Service for encoding results into output formats
pub struct OutputFormatHandler;

impl OutputFormatHandler {
    /// Encode an RGBA image
    ///
    /// # Errors
    /// - WebP requested in a build without the `webp-support` feature
    /// - Encoder failures
    ///
    /// # Examples
    /// ```rust
    /// use sticker_bgremove::{services::OutputFormatHandler, OutputFormat};
    /// use image::RgbaImage;
    ///
    /// let bytes = OutputFormatHandler::encode(&RgbaImage::new(4, 4), OutputFormat::Png)?;
    /// assert_eq!(&bytes[..4], b"\x89PNG");
    /// # Ok::<(), sticker_bgremove::BgRemovalError>(())
    /// ```
    pub fn encode(image: &RgbaImage, format: OutputFormat) -> Result<Vec<u8>> {
        let image_format = Self::image_format(format)?;
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(image.clone())
            .write_to(&mut bytes, image_format)
            .map_err(|e| {
                BgRemovalError::processing_stage_error(
                    "encode",
                    &e.to_string(),
                    Some(&format!("{}x{} {format}", image.width(), image.height())),
                )
            })?;
        Ok(bytes.into_inner())
    }

    fn image_format(format: OutputFormat) -> Result<ImageFormat> {
        match format {
            OutputFormat::Png => Ok(ImageFormat::Png),
            OutputFormat::Tiff => Ok(ImageFormat::Tiff),
            #[cfg(feature = "webp-support")]
            OutputFormat::WebP => Ok(ImageFormat::WebP),
            #[cfg(not(feature = "webp-support"))]
            OutputFormat::WebP => Err(BgRemovalError::invalid_config(
                "WebP output requires the 'webp-support' feature",
            )),
        }
    }

    /// File extension for a format (without the dot)
    #[must_use]
    pub fn get_extension(format: OutputFormat) -> &'static str {
        match format {
            OutputFormat::Png => "png",
            OutputFormat::WebP => "webp",
            OutputFormat::Tiff => "tiff",
        }
    }

    #[must_use]
    pub fn mime_type(format: OutputFormat) -> &'static str {
        match format {
            OutputFormat::Png => "image/png",
            OutputFormat::WebP => "image/webp",
            OutputFormat::Tiff => "image/tiff",
        }
    }

    /// Output format for a file extension, case-insensitive
    #[must_use]
    pub fn from_extension(extension: &str) -> Option<OutputFormat> {
        match extension.to_ascii_lowercase().as_str() {
            "png" => Some(OutputFormat::Png),
            "webp" => Some(OutputFormat::WebP),
            "tif" | "tiff" => Some(OutputFormat::Tiff),
            _ => None,
        }
    }
}
