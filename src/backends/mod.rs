//! Backend implementations for different inference engines
//!
//! - ONNX Runtime backend (hardware acceleration through execution providers)
//! - Tract backend (pure Rust, no external dependencies)
//! - Worker backend (runs either of the above on a dedicated thread)

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

pub mod worker;

#[cfg(test)]
pub mod test_utils;

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

#[cfg(feature = "tract")]
pub use self::tract::TractBackend;

pub use self::worker::{WorkerBackend, WorkerRequest, WorkerResponse};
