//! Services separating frontend concerns from the pipeline

pub mod format;
pub mod progress;

pub use format::OutputFormatHandler;
pub use progress::{
    ConsoleProgressReporter, FnProgressReporter, NoOpProgressReporter, ProcessingStage,
    ProgressReporter, ProgressTracker, ProgressUpdate,
};
