//! Background removal pipeline
//!
//! [`BackgroundRemover`] runs one call through the fixed stage order
//! validate → init → load → preprocess → infer → mask → composite → encode →
//! complete. Any stage failure short-circuits the rest, is reported to the
//! progress reporter, and is returned as a single [`BgRemovalError`]. All
//! intermediate buffers are owned by the call and dropped on every path.

use crate::{
    acquisition::ModelAcquisition,
    codec,
    config::{PipelineConfig, ProcessingOptions, ResolvedOptions},
    error::{BgRemovalError, Result},
    geometry::{self, FittedImage},
    inference::{BackendFactory, DefaultBackendFactory, EngineState, InferenceEngine, SessionOptions},
    models::ModelConfig,
    services::{
        NoOpProgressReporter, OutputFormatHandler, ProcessingStage, ProgressReporter,
        ProgressTracker,
    },
    types::{ProcessingResult, ProcessingTimings, SegmentationMask},
};
use instant::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, span, Level};

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Stage boundary: give other tasks a turn, then honor cancellation
async fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    tokio::task::yield_now().await;
    if cancel.is_cancelled() {
        Err(BgRemovalError::Cancelled)
    } else {
        Ok(())
    }
}

/// Everything produced up to the mask stage
struct InferredMask {
    fitted: FittedImage,
    mask: SegmentationMask,
    resolved: ResolvedOptions,
    config: ModelConfig,
}

/// Client-side background remover
///
/// Owns the inference engine and the model acquisition state. Calls take
/// `&mut self`, so one remover processes one image at a time.
pub struct BackgroundRemover {
    config: PipelineConfig,
    engine: InferenceEngine,
    acquisition: ModelAcquisition,
    disposed: bool,
}

impl std::fmt::Debug for BackgroundRemover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRemover")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl BackgroundRemover {
    /// Remover with the backends compiled into this build and the default
    /// model catalog (local files, then CDN)
    ///
    /// # Errors
    /// - Invalid configuration
    /// - Failed to create the HTTP client
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let factory = DefaultBackendFactory::with_worker_thread(config.use_worker_thread);
        let acquisition = ModelAcquisition::new(&config)?;
        Ok(Self::with_components(config, Box::new(factory), acquisition))
    }

    /// Remover with an injected backend factory and acquisition strategy
    #[must_use]
    pub fn with_components(
        config: PipelineConfig,
        factory: Box<dyn BackendFactory>,
        acquisition: ModelAcquisition,
    ) -> Self {
        let options = SessionOptions {
            execution_provider: config.execution_provider,
            intra_threads: config.intra_threads,
            inter_threads: config.inter_threads,
            ..SessionOptions::default()
        };
        Self {
            config,
            engine: InferenceEngine::new(factory, options),
            acquisition,
            disposed: false,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn engine(&self) -> &InferenceEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut InferenceEngine {
        &mut self.engine
    }

    #[must_use]
    pub fn acquisition(&self) -> &ModelAcquisition {
        &self.acquisition
    }

    pub fn acquisition_mut(&mut self) -> &mut ModelAcquisition {
        &mut self.acquisition
    }

    /// Remove the background of an encoded image
    ///
    /// # Errors
    /// - `SizeLimitExceeded` before any model work when the input is too large
    /// - `InvalidImage` for undecodable or zero-sized input
    /// - `ModelLoadFailed` when no model candidate could be loaded
    /// - `ProcessingFailed` for inference and postprocessing failures
    /// - `SessionReleased` after [`dispose`](Self::dispose)
    pub async fn remove_background(
        &mut self,
        input: &[u8],
        options: &ProcessingOptions,
        progress: &dyn ProgressReporter,
    ) -> Result<ProcessingResult> {
        let never_cancelled = CancellationToken::new();
        self.remove_background_with_cancel(input, options, progress, &never_cancelled)
            .await
    }

    /// [`remove_background`](Self::remove_background) with cooperative
    /// cancellation, checked at every stage boundary. Once `cancel` fires no
    /// further progress is reported and `Cancelled` is returned.
    ///
    /// # Errors
    /// - Everything [`remove_background`](Self::remove_background) returns
    /// - `Cancelled`
    #[instrument(skip_all, fields(input_bytes = input.len(), quality = ?options.quality))]
    pub async fn remove_background_with_cancel(
        &mut self,
        input: &[u8],
        options: &ProcessingOptions,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ProcessingResult> {
        let mut tracker = ProgressTracker::new(progress, Some(cancel));
        let outcome = self.process(input, options, &mut tracker, cancel).await;
        if let Err(e) = &outcome {
            log::debug!(
                "Background removal failed at stage '{}': {e}",
                tracker.current_stage().unwrap_or(ProcessingStage::Validation)
            );
            tracker.report_error(&e.to_string());
        }
        outcome
    }

    /// Compute only the alpha mask, at the input's full resolution
    ///
    /// # Errors
    /// - Same as [`remove_background`](Self::remove_background) up to the mask stage
    pub async fn segment_foreground(
        &mut self,
        input: &[u8],
        options: &ProcessingOptions,
    ) -> Result<SegmentationMask> {
        let never_cancelled = CancellationToken::new();
        let reporter = NoOpProgressReporter;
        let mut tracker = ProgressTracker::new(&reporter, None);
        let mut timings = ProcessingTimings::default();

        let inferred = self
            .infer_mask(input, options, &mut tracker, &never_cancelled, &mut timings)
            .await?;
        let restored = geometry::mask_to_original(&inferred.mask, &inferred.fitted.placement)?;
        Ok(geometry::feather(&restored, inferred.resolved.feather_radius))
    }

    /// Release the inference session. Later calls fail with `SessionReleased`.
    pub fn dispose(&mut self) {
        self.engine.dispose();
        self.disposed = true;
    }

    async fn process(
        &mut self,
        input: &[u8],
        options: &ProcessingOptions,
        tracker: &mut ProgressTracker<'_>,
        cancel: &CancellationToken,
    ) -> Result<ProcessingResult> {
        let total_start = Instant::now();
        let mut timings = ProcessingTimings::default();

        let inferred = self
            .infer_mask(input, options, tracker, cancel, &mut timings)
            .await?;
        checkpoint(cancel).await?;

        tracker.report_stage(ProcessingStage::Compositing);
        let composite_start = Instant::now();
        let image = {
            let placement = &inferred.fitted.placement;
            let _span = span!(
                Level::DEBUG,
                "compositing",
                width = placement.original_width,
                height = placement.original_height,
                feather = inferred.resolved.feather_radius
            )
            .entered();
            geometry::composite_mask_to_original(
                &inferred.mask,
                placement,
                &inferred.fitted.original,
                inferred.resolved.feather_radius,
            )?
        };
        timings.postprocessing_ms += elapsed_ms(composite_start);
        let InferredMask {
            resolved, config, ..
        } = inferred;
        checkpoint(cancel).await?;

        tracker.report_stage(ProcessingStage::Encoding);
        let encode_start = Instant::now();
        let data = OutputFormatHandler::encode(&image, resolved.output_format)?;
        timings.image_encode_ms = elapsed_ms(encode_start);
        let (width, height) = image.dimensions();
        drop(image);
        checkpoint(cancel).await?;

        timings.total_ms = elapsed_ms(total_start);
        tracker.report_stage(ProcessingStage::Completed);
        tracker.report_completion(timings.clone());

        let method_used = self
            .engine
            .active_method()
            .unwrap_or_else(|| format!("unknown:{}", config.name));
        log::info!(
            "Removed background of {width}x{height} image with {method_used} in {}ms",
            timings.total_ms
        );

        Ok(ProcessingResult {
            data,
            format: resolved.output_format,
            width,
            height,
            processing_time_ms: timings.total_ms,
            method_used,
            model: config.kind,
            timings,
        })
    }

    async fn infer_mask(
        &mut self,
        input: &[u8],
        options: &ProcessingOptions,
        tracker: &mut ProgressTracker<'_>,
        cancel: &CancellationToken,
        timings: &mut ProcessingTimings,
    ) -> Result<InferredMask> {
        tracker.report_stage(ProcessingStage::Validation);
        self.validate_input(input)?;
        options.validate()?;
        checkpoint(cancel).await?;

        tracker.report_stage(ProcessingStage::Initialization);
        if self.disposed {
            return Err(BgRemovalError::session_released(
                "Background remover was disposed",
            ));
        }
        let resolved = options.resolve();
        let preset = ModelConfig::preset(resolved.model);
        log::debug!(
            "Resolved options: model={}, max_dimension={}, threshold={}, feather={}",
            resolved.model,
            resolved.max_dimension,
            resolved.confidence_threshold,
            resolved.feather_radius
        );
        let load_start = Instant::now();
        let config = self.ensure_model(&preset).await?;
        timings.model_load_ms = elapsed_ms(load_start);
        checkpoint(cancel).await?;

        tracker.report_stage(ProcessingStage::ImageLoading);
        let preprocess_start = Instant::now();
        let fitted = {
            let _span = span!(
                Level::DEBUG,
                "image_loading",
                input_size = config.input_size,
                max_dimension = resolved.max_dimension
            )
            .entered();
            geometry::load_and_fit(input, config.input_size, Some(resolved.max_dimension))?
        };
        checkpoint(cancel).await?;

        tracker.report_stage(ProcessingStage::Preprocessing);
        let tensor = {
            let _span = span!(Level::DEBUG, "preprocessing", model = %config.name).entered();
            codec::encode(&fitted.canvas, &config)?
        };
        timings.preprocessing_ms = elapsed_ms(preprocess_start);
        checkpoint(cancel).await?;

        tracker.report_stage(ProcessingStage::Inference);
        let inference_start = Instant::now();
        let output = {
            let _span = span!(Level::INFO, "inference", model = %config.name).entered();
            self.engine.run(&tensor)?
        };
        drop(tensor);
        timings.inference_ms = elapsed_ms(inference_start);
        checkpoint(cancel).await?;

        tracker.report_stage(ProcessingStage::MaskGeneration);
        let mask_start = Instant::now();
        let mask = if resolved.feather_radius == 0 {
            codec::decode(&output, resolved.confidence_threshold, config.output_range)?
        } else {
            codec::decode_continuous(&output, config.output_range)?
        };
        timings.postprocessing_ms = elapsed_ms(mask_start);

        Ok(InferredMask {
            fitted,
            mask,
            resolved,
            config,
        })
    }

    /// Byte size first, then the header, so oversized input does no model work
    fn validate_input(&self, input: &[u8]) -> Result<()> {
        let size = input.len() as u64;
        if size > self.config.max_file_size {
            return Err(BgRemovalError::size_limit(
                "Input size in bytes",
                size,
                self.config.max_file_size,
            ));
        }
        if input.is_empty() {
            return Err(BgRemovalError::invalid_image("Input is empty"));
        }

        let (width, height) = geometry::probe_dimensions(input)?;
        if width == 0 || height == 0 {
            return Err(BgRemovalError::invalid_image(format!(
                "Image has zero dimension ({width}x{height})"
            )));
        }
        let limit = self.config.max_image_dimension;
        if width > limit || height > limit {
            return Err(BgRemovalError::size_limit(
                "Image dimension in pixels",
                width.max(height),
                limit,
            ));
        }
        Ok(())
    }

    /// Reuse the loaded session when it already serves this model kind
    async fn ensure_model(&mut self, preset: &ModelConfig) -> Result<ModelConfig> {
        if self.engine.state() == EngineState::Ready {
            if let Some(active) = self.engine.active_config() {
                if active.kind == preset.kind {
                    return Ok(active.clone());
                }
            }
        }
        self.acquisition.acquire(&mut self.engine, preset).await
    }
}
