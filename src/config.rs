//! Configuration types for background removal operations
//!
//! Two layers are kept apart:
//! - [`PipelineConfig`]: long-lived settings of a [`crate::BackgroundRemover`]
//!   (limits, runtime selection, model locations).
//! - [`ProcessingOptions`]: per-call choices (quality, model, output format,
//!   feathering). Options carry no state; resolving them is a pure function.

use crate::{
    error::{BgRemovalError, Result},
    inference::BackendType,
    models::ModelKind,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default maximum accepted input size in bytes (10 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
/// Default maximum accepted input width or height in pixels
pub const DEFAULT_MAX_IMAGE_DIMENSION: u32 = 4096;
/// Default remote location for model files
pub const DEFAULT_CDN_BASE_URL: &str = "https://github.com/danielgatis/rembg/releases/download/v0.0.0";

/// Execution provider options for ONNX Runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    /// Auto-detect best available provider (CUDA > `CoreML` > CPU)
    #[default]
    Auto,
    /// CPU execution (always available)
    Cpu,
    /// NVIDIA CUDA GPU acceleration
    Cuda,
    /// Apple Silicon acceleration
    CoreMl,
}

impl std::fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda => write!(f, "cuda"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl std::str::FromStr for ExecutionProvider {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "coreml" => Ok(Self::CoreMl),
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown execution provider '{other}'. Expected one of: auto, cpu, cuda, coreml"
            ))),
        }
    }
}

/// Output image format options. All of them keep the alpha channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG with alpha channel transparency
    #[default]
    Png,
    /// Lossless WebP with alpha channel transparency
    WebP,
    /// TIFF with alpha channel transparency
    Tiff,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Png => write!(f, "png"),
            Self::WebP => write!(f, "webp"),
            Self::Tiff => write!(f, "tiff"),
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        crate::services::OutputFormatHandler::from_extension(s).ok_or_else(|| {
            BgRemovalError::invalid_config(format!(
                "Unknown output format '{s}'. Expected one of: png, webp, tiff"
            ))
        })
    }
}

/// Coarse quality selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
}

impl std::str::FromStr for Quality {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown quality '{other}'. Expected one of: low, medium, high"
            ))),
        }
    }
}

/// What a quality level expands to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityPreset {
    /// Longest side of the resampling source for the model input; output keeps full size
    pub max_dimension: u32,
    /// Model used at this quality
    pub model: ModelKind,
    /// Probability at or above which a pixel is kept
    pub confidence_threshold: f32,
}

impl Quality {
    #[must_use]
    pub fn preset(self) -> QualityPreset {
        match self {
            Self::Low => QualityPreset {
                max_dimension: 512,
                model: ModelKind::MobileNet,
                confidence_threshold: 0.5,
            },
            Self::Medium => QualityPreset {
                max_dimension: 1024,
                model: ModelKind::U2Net,
                confidence_threshold: 0.6,
            },
            Self::High => QualityPreset {
                max_dimension: 2048,
                model: ModelKind::U2Net,
                confidence_threshold: 0.7,
            },
        }
    }
}

/// Per-call processing options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ProcessingOptions {
    /// Quality level; supplies defaults for the fields below
    pub quality: Quality,
    /// Model override
    pub model: Option<ModelKind>,
    /// Encoded output format
    pub output_format: OutputFormat,
    /// Box-blur radius applied to a continuous mask. 0 = hard threshold.
    pub feather_radius: u32,
    /// Threshold override for the hard-threshold path
    pub confidence_threshold: Option<f32>,
    /// Downscale bound override
    pub max_dimension: Option<u32>,
}

/// Fully resolved options; every quality default has been applied
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedOptions {
    pub max_dimension: u32,
    pub model: ModelKind,
    pub confidence_threshold: f32,
    pub feather_radius: u32,
    pub output_format: OutputFormat,
}

impl ProcessingOptions {
    /// Create a new options builder
    #[must_use]
    pub fn builder() -> ProcessingOptionsBuilder {
        ProcessingOptionsBuilder::default()
    }

    /// Options for a quality level with every other field defaulted
    #[must_use]
    pub fn with_quality(quality: Quality) -> Self {
        Self {
            quality,
            ..Self::default()
        }
    }

    /// Expand quality defaults and overrides into concrete values
    #[must_use]
    pub fn resolve(&self) -> ResolvedOptions {
        let preset = self.quality.preset();
        ResolvedOptions {
            max_dimension: self.max_dimension.unwrap_or(preset.max_dimension),
            model: self.model.unwrap_or(preset.model),
            confidence_threshold: self
                .confidence_threshold
                .unwrap_or(preset.confidence_threshold),
            feather_radius: self.feather_radius,
            output_format: self.output_format,
        }
    }

    /// Validate all option values
    ///
    /// # Errors
    /// - Confidence threshold outside 0.0-1.0
    /// - Zero max dimension
    pub fn validate(&self) -> Result<()> {
        if let Some(threshold) = self.confidence_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(BgRemovalError::config_value_error(
                    "confidence threshold",
                    threshold,
                    "0.0-1.0",
                    Some(0.5),
                ));
            }
        }
        if self.max_dimension == Some(0) {
            return Err(BgRemovalError::config_value_error(
                "max dimension",
                0,
                "1-4096",
                Some(1024),
            ));
        }
        Ok(())
    }
}

/// Builder for `ProcessingOptions`
#[derive(Debug, Default)]
pub struct ProcessingOptionsBuilder {
    options: ProcessingOptions,
}

impl ProcessingOptionsBuilder {
    #[must_use]
    pub fn quality(mut self, quality: Quality) -> Self {
        self.options.quality = quality;
        self
    }

    #[must_use]
    pub fn model(mut self, model: ModelKind) -> Self {
        self.options.model = Some(model);
        self
    }

    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.options.output_format = format;
        self
    }

    #[must_use]
    pub fn feather_radius(mut self, radius: u32) -> Self {
        self.options.feather_radius = radius;
        self
    }

    #[must_use]
    pub fn confidence_threshold(mut self, threshold: f32) -> Self {
        self.options.confidence_threshold = Some(threshold.clamp(0.0, 1.0));
        self
    }

    #[must_use]
    pub fn max_dimension(mut self, max_dimension: u32) -> Self {
        self.options.max_dimension = Some(max_dimension);
        self
    }

    /// Build the options
    ///
    /// # Errors
    /// - Invalid option values (see [`ProcessingOptions::validate`])
    pub fn build(self) -> Result<ProcessingOptions> {
        self.options.validate()?;
        Ok(self.options)
    }
}

/// Long-lived pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum accepted input size in bytes
    pub max_file_size: u64,
    /// Maximum accepted input width or height in pixels
    pub max_image_dimension: u32,
    /// Runtime for local model candidates
    pub backend_type: BackendType,
    /// Runtime for the remote model candidate
    pub fallback_backend_type: BackendType,
    /// Execution provider for the ONNX Runtime backend
    pub execution_provider: ExecutionProvider,
    /// Number of intra-op threads for inference (0 = auto)
    pub intra_threads: usize,
    /// Number of inter-op threads for inference (0 = auto)
    pub inter_threads: usize,
    /// Run inference on a dedicated worker thread
    pub use_worker_thread: bool,
    /// Directory searched for local model files
    pub model_dir: PathBuf,
    /// Base URL for remote model files
    pub cdn_base_url: String,
    /// Download cache location (None = platform cache dir)
    pub cache_dir: Option<PathBuf>,
    /// Always re-download remote models
    pub disable_cache: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_image_dimension: DEFAULT_MAX_IMAGE_DIMENSION,
            backend_type: BackendType::Onnx,
            fallback_backend_type: BackendType::Tract,
            execution_provider: ExecutionProvider::default(),
            intra_threads: 0,
            inter_threads: 0,
            use_worker_thread: false,
            model_dir: PathBuf::from("models"),
            cdn_base_url: DEFAULT_CDN_BASE_URL.to_string(),
            cache_dir: None,
            disable_cache: false,
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder for fluent API construction
    ///
    /// # Examples
    ///
    /// ```rust
    /// use sticker_bgremove::{PipelineConfig, ExecutionProvider};
    ///
    /// let config = PipelineConfig::builder()
    ///     .execution_provider(ExecutionProvider::Cpu)
    ///     .max_file_size(5 * 1024 * 1024)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.max_file_size, 5 * 1024 * 1024);
    /// ```
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Parse a configuration from JSON; missing fields take their defaults
    ///
    /// # Errors
    /// - Malformed JSON
    /// - Values rejected by [`PipelineConfig::validate`]
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BgRemovalError::invalid_config(format!("Invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    ///
    /// # Errors
    /// - File cannot be read
    /// - Contents rejected by [`PipelineConfig::from_json_str`]
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| BgRemovalError::file_io_error("read config file", path, &e))?;
        Self::from_json_str(&json)
    }

    /// Validate all configuration parameters
    ///
    /// # Errors
    /// - Zero file size or image dimension limit
    /// - Remote base URL that is not http(s)
    pub fn validate(&self) -> Result<()> {
        if self.max_file_size == 0 {
            return Err(BgRemovalError::config_value_error(
                "max file size",
                self.max_file_size,
                "> 0 bytes",
                Some(DEFAULT_MAX_FILE_SIZE),
            ));
        }

        if self.max_image_dimension == 0 {
            return Err(BgRemovalError::config_value_error(
                "max image dimension",
                self.max_image_dimension,
                "> 0 pixels",
                Some(DEFAULT_MAX_IMAGE_DIMENSION),
            ));
        }

        if !self.cdn_base_url.starts_with("https://") && !self.cdn_base_url.starts_with("http://")
        {
            return Err(BgRemovalError::invalid_config(format!(
                "CDN base URL must start with http:// or https://, got '{}'",
                self.cdn_base_url
            )));
        }

        Ok(())
    }
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    #[must_use]
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.max_file_size = bytes;
        self
    }

    #[must_use]
    pub fn max_image_dimension(mut self, pixels: u32) -> Self {
        self.config.max_image_dimension = pixels;
        self
    }

    #[must_use]
    pub fn backend_type(mut self, backend_type: BackendType) -> Self {
        self.config.backend_type = backend_type;
        self
    }

    #[must_use]
    pub fn fallback_backend_type(mut self, backend_type: BackendType) -> Self {
        self.config.fallback_backend_type = backend_type;
        self
    }

    #[must_use]
    pub fn execution_provider(mut self, provider: ExecutionProvider) -> Self {
        self.config.execution_provider = provider;
        self
    }

    #[must_use]
    pub fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[must_use]
    pub fn inter_threads(mut self, threads: usize) -> Self {
        self.config.inter_threads = threads;
        self
    }

    #[must_use]
    pub fn use_worker_thread(mut self, enabled: bool) -> Self {
        self.config.use_worker_thread = enabled;
        self
    }

    #[must_use]
    pub fn model_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.model_dir = dir.into();
        self
    }

    #[must_use]
    pub fn cdn_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.cdn_base_url = url.into();
        self
    }

    #[must_use]
    pub fn cache_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.cache_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn disable_cache(mut self, disable: bool) -> Self {
        self.config.disable_cache = disable;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// - Values rejected by [`PipelineConfig::validate`]
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
