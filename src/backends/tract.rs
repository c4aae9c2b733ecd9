//! Tract backend: pure Rust CPU inference
//!
//! Tract needs concrete input dimensions to optimize a graph. Models that
//! declare a fixed `[1, 3, S, S]` input keep it; models with dynamic spatial
//! dimensions are pinned to the size hint from [`SessionOptions`].

use crate::error::{BgRemovalError, Result};
use crate::inference::{InferenceBackend, SessionInfo, SessionOptions};
use instant::Instant;
use ndarray::Array4;
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Tract backend for running segmentation models without native dependencies
#[derive(Debug, Default)]
pub struct TractBackend {
    model: Option<TractModel>,
}

impl TractBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tract only runs on the CPU
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        vec![(
            "CPU".to_string(),
            true,
            "Pure Rust CPU inference with no external dependencies".to_string(),
        )]
    }

    /// Spatial size of a fully concrete `[1, 3, S, S]` input fact
    fn declared_input_size(model: &InferenceModel) -> Option<u32> {
        let typed = model.clone().into_typed().ok()?;
        let dims = typed.input_fact(0).ok()?.shape.as_concrete()?.to_vec();
        let height = *dims.get(2)?;
        let width = *dims.get(3)?;
        if height > 0 && height == width {
            u32::try_from(height).ok()
        } else {
            None
        }
    }
}

impl InferenceBackend for TractBackend {
    fn load_session(&mut self, model: &[u8], options: &SessionOptions) -> Result<SessionInfo> {
        let start = Instant::now();
        self.model = None;

        let mut inference_model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model))
            .map_err(|e| BgRemovalError::model_load(format!("Failed to load ONNX model: {e}")))?;

        let declared = Self::declared_input_size(&inference_model);
        let side = declared.unwrap_or(options.input_size_hint) as usize;
        if declared.is_none() {
            log::debug!("Model input is not fixed, pinning it to {side}x{side}");
        }

        inference_model
            .set_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec![1, 3, side, side]))
            .map_err(|e| BgRemovalError::model_load(format!("Failed to set input shape: {e}")))?;

        let runnable = inference_model
            .into_optimized()
            .map_err(|e| BgRemovalError::model_load(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| {
                BgRemovalError::model_load(format!("Failed to create runnable model: {e}"))
            })?;

        self.model = Some(runnable);
        let load_time = start.elapsed();
        log::info!(
            "Tract backend initialized in {}ms",
            load_time.as_millis()
        );

        Ok(SessionInfo {
            input_size: declared,
            backend: self.name().to_string(),
            providers: vec!["CPU".to_string()],
            load_time,
        })
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| BgRemovalError::processing("Tract model not initialized"))?;

        log::debug!("Running Tract inference on {:?}", input.shape());
        let start = Instant::now();

        let input_tensor = Tensor::from(input.clone());
        let outputs = model
            .run(tvec![input_tensor.into()])
            .map_err(|e| BgRemovalError::processing(format!("Tract inference failed: {e}")))?;

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| BgRemovalError::processing("No output tensor found"))?
            .into_arc_tensor();
        let output_view = output_tensor.to_array_view::<f32>().map_err(|e| {
            BgRemovalError::processing(format!("Failed to convert output tensor: {e}"))
        })?;

        let &[batch, channels, height, width] = output_view.shape() else {
            return Err(BgRemovalError::processing(format!(
                "Expected 4D output tensor, got {}D",
                output_view.ndim()
            )));
        };
        let data: Vec<f32> = output_view.iter().copied().collect();
        let output = Array4::from_shape_vec((batch, channels, height, width), data).map_err(|e| {
            BgRemovalError::processing(format!("Failed to reshape output tensor: {e}"))
        })?;

        log::debug!(
            "Tract inference completed in {}ms, output {:?}",
            start.elapsed().as_millis(),
            output.shape()
        );
        Ok(output)
    }

    fn release(&mut self) {
        if self.model.take().is_some() {
            log::debug!("Tract model released");
        }
    }

    fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn name(&self) -> &'static str {
        "tract"
    }
}

#[cfg(all(test, feature = "tract"))]
mod tests {
    use super::*;

    #[test]
    fn test_new_backend_is_unloaded() {
        let backend = TractBackend::new();
        assert!(!backend.is_loaded());
        assert_eq!(backend.name(), "tract");
    }

    #[test]
    fn test_garbage_model_fails_to_load() {
        let mut backend = TractBackend::new();
        let err = backend
            .load_session(b"not an onnx model", &SessionOptions::default())
            .unwrap_err();
        assert!(matches!(err, BgRemovalError::ModelLoadFailed(_)));
        assert!(!backend.is_loaded());
    }

    #[test]
    fn test_infer_without_model_fails() {
        let mut backend = TractBackend::new();
        assert!(backend.infer(&Array4::zeros((1, 3, 4, 4))).is_err());
    }

    #[test]
    fn test_only_cpu_provider() {
        let providers = TractBackend::list_providers();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].0, "CPU");
    }
}
