#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::unused_async)]

//! # Sticker Background Removal
//!
//! Client-side background removal for sticker creation. An image is
//! letterboxed into a square model input, segmented by a U²-Net family model
//! running on ONNX Runtime or Tract, and the resulting mask is mapped back onto
//! the original pixels as an alpha channel.
//!
//! ## Features
//!
//! - **Models**: `u2net`, `u2netp` and a `MobileNet` segmenter, selected by quality preset
//! - **Backends**: ONNX Runtime (CUDA, `CoreML`, CPU) and Tract (pure Rust)
//! - **Model acquisition**: local files first, then CDN with an on-disk cache and SHA-256 checks
//! - **Output**: PNG, WebP (lossless) and TIFF, always with alpha
//! - **Progress and cancellation**: staged progress reports and a cancellation token
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sticker_bgremove::{
//!     BackgroundRemover, NoOpProgressReporter, PipelineConfig, ProcessingOptions, Quality,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut remover = BackgroundRemover::new(PipelineConfig::default())?;
//! let input = std::fs::read("cat.jpg")?;
//! let options = ProcessingOptions::builder()
//!     .quality(Quality::High)
//!     .feather_radius(2)
//!     .build()?;
//!
//! let result = remover
//!     .remove_background(&input, &options, &NoOpProgressReporter)
//!     .await?;
//! result.save("cat_sticker.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `onnx` (default): ONNX Runtime backend with GPU acceleration support
//! - `tract` (default): Pure Rust backend
//! - `cli` (default): the `sticker-bgremove` binary and its tracing setup
//! - `webp-support` (default): WebP output
//! - `tracing-json`: JSON log lines for the CLI

pub mod acquisition;
pub mod backends;
pub mod cache;
#[cfg(feature = "cli")]
pub mod cli;
pub mod codec;
pub mod config;
pub mod download;
pub mod error;
pub mod geometry;
pub mod inference;
pub mod models;
pub mod processor;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;

use tokio::io::{AsyncRead, AsyncReadExt};

pub use acquisition::{first_success, CandidateAttempt, DefaultModelFetcher, ModelAcquisition, ModelFetcher};
pub use cache::{format_size, CachedModelInfo, ModelCache};
pub use config::{
    ExecutionProvider, OutputFormat, PipelineConfig, ProcessingOptions, Quality, ResolvedOptions,
};
pub use download::ModelDownloader;
pub use error::{BgRemovalError, ErrorKind, Result};
pub use geometry::{FittedImage, PlacementGeometry};
pub use inference::{
    BackendFactory, BackendType, DefaultBackendFactory, EngineState, InferenceBackend,
    InferenceEngine, SessionInfo, SessionOptions,
};
pub use models::{ModelCandidate, ModelConfig, ModelKind, ModelSource, OutputRange};
pub use processor::BackgroundRemover;
pub use services::{
    ConsoleProgressReporter, FnProgressReporter, NoOpProgressReporter, OutputFormatHandler,
    ProcessingStage, ProgressReporter, ProgressUpdate,
};
pub use types::{ProcessingResult, ProcessingTimings, SegmentationMask};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, TracingConfig, TracingFormat};

/// One-shot background removal with the default pipeline configuration
///
/// Builds a fresh [`BackgroundRemover`], so the model is acquired on every
/// call. Keep a remover around when processing more than one image.
///
/// ```rust,no_run
/// use sticker_bgremove::{remove_background_from_bytes, ProcessingOptions};
///
/// # async fn example(upload: Vec<u8>) -> anyhow::Result<()> {
/// let result = remove_background_from_bytes(&upload, &ProcessingOptions::default()).await?;
/// assert_eq!(result.format, sticker_bgremove::OutputFormat::Png);
/// # Ok(())
/// # }
/// ```
pub async fn remove_background_from_bytes(
    image_bytes: &[u8],
    options: &ProcessingOptions,
) -> Result<ProcessingResult> {
    let mut remover = BackgroundRemover::new(PipelineConfig::default())?;
    let result = remover
        .remove_background(image_bytes, options, &NoOpProgressReporter)
        .await;
    remover.dispose();
    result
}

/// Remove the background of an image read from an async stream
///
/// Reads at most one byte past the configured size limit, so oversized
/// streams are rejected without buffering them whole.
pub async fn remove_background_from_reader<R: AsyncRead + Unpin>(
    reader: R,
    config: PipelineConfig,
    options: &ProcessingOptions,
) -> Result<ProcessingResult> {
    let mut buffer = Vec::new();
    reader
        .take(config.max_file_size.saturating_add(1))
        .read_to_end(&mut buffer)
        .await?;

    let mut remover = BackgroundRemover::new(config)?;
    let result = remover
        .remove_background(&buffer, options, &NoOpProgressReporter)
        .await;
    remover.dispose();
    result
}
