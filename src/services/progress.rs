//! Progress reporting service
//!
//! The pipeline only talks to [`ProgressReporter`]; frontends decide how
//! updates are shown. [`ProgressTracker`] adds timing, remembers the current
//! stage for error reports, and goes quiet once a call has been cancelled.

use crate::types::ProcessingTimings;
use instant::Instant;
use tokio_util::sync::CancellationToken;

/// Pipeline stages, in the order a successful call reports them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessingStage {
    /// Checking input size and header
    Validation,
    /// Acquiring and initializing the model session
    Initialization,
    /// Decoding the input image
    ImageLoading,
    /// Letterboxing and tensor encoding
    Preprocessing,
    /// Running model inference
    Inference,
    /// Converting output tensor to mask
    MaskGeneration,
    /// Applying the mask to the original image
    Compositing,
    /// Encoding the output image
    Encoding,
    /// Processing completed
    Completed,
}

impl ProcessingStage {
    /// All stages in pipeline order
    pub const ALL: [Self; 9] = [
        Self::Validation,
        Self::Initialization,
        Self::ImageLoading,
        Self::Preprocessing,
        Self::Inference,
        Self::MaskGeneration,
        Self::Compositing,
        Self::Encoding,
        Self::Completed,
    ];

    /// Short stage identifier
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Validation => "validate",
            Self::Initialization => "init",
            Self::ImageLoading => "load",
            Self::Preprocessing => "preprocess",
            Self::Inference => "infer",
            Self::MaskGeneration => "mask",
            Self::Compositing => "composite",
            Self::Encoding => "encode",
            Self::Completed => "complete",
        }
    }

    /// Get a human-readable description of the processing stage
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Validation => "Validating input",
            Self::Initialization => "Initializing segmentation model",
            Self::ImageLoading => "Loading image",
            Self::Preprocessing => "Preprocessing image",
            Self::Inference => "Running AI inference",
            Self::MaskGeneration => "Generating segmentation mask",
            Self::Compositing => "Removing background",
            Self::Encoding => "Encoding output image",
            Self::Completed => "Processing completed",
        }
    }

    /// Get the typical progress percentage for this stage
    #[must_use]
    pub fn progress_percentage(self) -> u8 {
        match self {
            Self::Validation => 5,
            Self::Initialization => 10,
            Self::ImageLoading => 20,
            Self::Preprocessing => 30,
            Self::Inference => 50,
            Self::MaskGeneration => 70,
            Self::Compositing => 80,
            Self::Encoding => 90,
            Self::Completed => 100,
        }
    }
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Progress update containing stage and timing information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Current processing stage
    pub stage: ProcessingStage,
    /// Progress percentage (0-100)
    pub progress: u8,
    /// Human-readable stage description
    pub description: String,
    /// Elapsed time since processing started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new(stage: ProcessingStage, start_time: Instant) -> Self {
        Self::with_description(stage, stage.description().to_string(), start_time)
    }

    #[must_use]
    pub fn with_description(stage: ProcessingStage, description: String, start_time: Instant) -> Self {
        Self {
            stage,
            progress: stage.progress_percentage(),
            description,
            elapsed_ms: start_time.elapsed().as_millis() as u64,
        }
    }
}

/// Trait for reporting progress during background removal operations
pub trait ProgressReporter: Send + Sync {
    /// Report a progress update
    fn report_progress(&self, update: ProgressUpdate);

    /// Report processing completion with final timings
    fn report_completion(&self, timings: ProcessingTimings);

    /// Report an error during processing
    ///
    /// # Arguments
    /// * `stage` - Stage where error occurred
    /// * `error` - Error description
    fn report_error(&self, stage: ProcessingStage, error: &str);
}

/// No-op progress reporter that discards all progress updates
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _timings: ProcessingTimings) {}

    fn report_error(&self, _stage: ProcessingStage, _error: &str) {}
}

/// Progress reporter that writes through the `log` facade
#[derive(Debug, Clone, Copy)]
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    /// # Arguments
    /// * `verbose` - Whether to show elapsed time and per-stage timings
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            log::info!(
                "[{}%] {} ({}ms elapsed)",
                update.progress,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::info!("[{}%] {}", update.progress, update.description);
        }
    }

    fn report_completion(&self, timings: ProcessingTimings) {
        log::info!("Background removal completed in {}ms", timings.total_ms);

        if self.verbose {
            log::info!("  Detailed timings:");
            log::info!("    Model load: {}ms", timings.model_load_ms);
            log::info!("    Preprocessing: {}ms", timings.preprocessing_ms);
            log::info!("    Inference: {}ms", timings.inference_ms);
            log::info!("    Postprocessing: {}ms", timings.postprocessing_ms);
            log::info!("    Encode: {}ms", timings.image_encode_ms);
        }
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        log::error!("Error during {}: {}", stage.description(), error);
    }
}

/// Adapts a closure into a progress reporter; completion and errors are ignored
pub struct FnProgressReporter<F> {
    callback: F,
}

impl<F> FnProgressReporter<F>
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    #[must_use]
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for FnProgressReporter<F>
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    fn report_progress(&self, update: ProgressUpdate) {
        (self.callback)(&update);
    }

    fn report_completion(&self, _timings: ProcessingTimings) {}

    fn report_error(&self, _stage: ProcessingStage, _error: &str) {}
}

/// Per-call progress tracker
pub struct ProgressTracker<'a> {
    reporter: &'a dyn ProgressReporter,
    cancel: Option<&'a CancellationToken>,
    start_time: Instant,
    current_stage: Option<ProcessingStage>,
}

impl<'a> ProgressTracker<'a> {
    #[must_use]
    pub fn new(reporter: &'a dyn ProgressReporter, cancel: Option<&'a CancellationToken>) -> Self {
        Self {
            reporter,
            cancel,
            start_time: Instant::now(),
            current_stage: None,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(CancellationToken::is_cancelled)
    }

    /// Enter a stage and report it
    pub fn report_stage(&mut self, stage: ProcessingStage) {
        self.current_stage = Some(stage);
        if self.is_cancelled() {
            return;
        }
        self.reporter
            .report_progress(ProgressUpdate::new(stage, self.start_time));
    }

    /// Report completion with final timings
    pub fn report_completion(&self, timings: ProcessingTimings) {
        if !self.is_cancelled() {
            self.reporter.report_completion(timings);
        }
    }

    /// Report an error at the current stage
    pub fn report_error(&self, error: &str) {
        if self.is_cancelled() {
            return;
        }
        let stage = self.current_stage.unwrap_or(ProcessingStage::Validation);
        self.reporter.report_error(stage, error);
    }

    /// Get the elapsed time since tracking started
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    #[must_use]
    pub fn current_stage(&self) -> Option<ProcessingStage> {
        self.current_stage
    }
}
