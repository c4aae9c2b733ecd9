//! ONNX Runtime backend
//!
//! Sessions are created from in-memory model bytes. Execution providers are
//! negotiated per session: the requested accelerator is registered only when
//! ONNX Runtime reports it available, and CPU is always the implicit fallback.

use crate::config::ExecutionProvider;
use crate::error::{BgRemovalError, Result};
use crate::inference::{InferenceBackend, SessionInfo, SessionOptions};
use instant::Instant;
use ndarray::Array4;
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;

/// ONNX Runtime backend for segmentation models
#[derive(Debug, Default)]
pub struct OnnxBackend {
    session: Option<Session>,
}

fn cuda_available() -> bool {
    OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false)
}

fn coreml_available() -> bool {
    OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default()).unwrap_or(false)
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(8)
}

impl OnnxBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// List execution providers as `(name, available, description)`
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!(
            "Probing execution providers on {}/{}",
            std::env::consts::OS,
            std::env::consts::ARCH
        );
        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available(),
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available(),
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }

    /// Providers to register for a request, in priority order, with their names
    fn negotiate_providers(
        requested: ExecutionProvider,
    ) -> (Vec<ExecutionProviderDispatch>, Vec<String>) {
        let mut providers = Vec::new();
        let mut names = Vec::new();

        let want_cuda = matches!(requested, ExecutionProvider::Auto | ExecutionProvider::Cuda);
        let want_coreml = matches!(requested, ExecutionProvider::Auto | ExecutionProvider::CoreMl);

        if want_cuda {
            if cuda_available() {
                log::info!("CUDA execution provider is available and will be used");
                providers.push(CUDAExecutionProvider::default().build());
                names.push("CUDA".to_string());
            } else if requested == ExecutionProvider::Cuda {
                log::warn!("CUDA execution provider requested but not available, falling back to CPU");
            }
        }

        if want_coreml {
            if coreml_available() {
                log::info!("CoreML execution provider is available and will be used");
                providers.push(CoreMLExecutionProvider::default().with_subgraphs(true).build());
                names.push("CoreML".to_string());
            } else if requested == ExecutionProvider::CoreMl {
                log::warn!("CoreML execution provider requested but not available, falling back to CPU");
            }
        }

        if providers.is_empty() && requested == ExecutionProvider::Auto {
            log::debug!("No hardware acceleration available, using CPU");
        }
        names.push("CPU".to_string());
        (providers, names)
    }

    fn declared_input_size(session: &Session) -> Option<u32> {
        let input = session.inputs.first()?;
        let shape = input.input_type.tensor_shape()?;
        // Dynamic dimensions are reported as -1
        let height = shape.get(2).copied()?;
        let width = shape.get(3).copied()?;
        if height > 0 && height == width {
            u32::try_from(height).ok()
        } else {
            None
        }
    }
}

impl InferenceBackend for OnnxBackend {
    fn load_session(&mut self, model: &[u8], options: &SessionOptions) -> Result<SessionInfo> {
        let start = Instant::now();
        self.session = None;

        let (providers, provider_names) = Self::negotiate_providers(options.execution_provider);

        let intra_threads = if options.intra_threads > 0 {
            options.intra_threads
        } else {
            available_parallelism()
        };
        let inter_threads = if options.inter_threads > 0 {
            options.inter_threads
        } else {
            (available_parallelism() / 4).max(1)
        };

        let mut builder = Session::builder()
            .map_err(|e| BgRemovalError::model_load(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| BgRemovalError::model_load(format!("Failed to set optimization level: {e}")))?;

        if !providers.is_empty() {
            builder = builder.with_execution_providers(providers).map_err(|e| {
                BgRemovalError::model_load(format!("Failed to register execution providers: {e}"))
            })?;
        }

        let session = builder
            .with_intra_threads(intra_threads)
            .map_err(|e| BgRemovalError::model_load(format!("Failed to set intra threads: {e}")))?
            .with_inter_threads(inter_threads)
            .map_err(|e| BgRemovalError::model_load(format!("Failed to set inter threads: {e}")))?
            .commit_from_memory(model)
            .map_err(|e| {
                BgRemovalError::model_load(format!("Failed to create session from model data: {e}"))
            })?;

        let input_size = Self::declared_input_size(&session);
        log::debug!(
            "ONNX session created: {intra_threads} intra-op threads, {inter_threads} inter-op threads, declared input {input_size:?}"
        );
        // Model size in MB (precision loss acceptable for display)
        #[allow(clippy::cast_precision_loss)]
        let size_mb = model.len() as f64 / (1024.0 * 1024.0);
        log::debug!("Model size: {size_mb:.2} MB");

        self.session = Some(session);
        let load_time = start.elapsed();
        log::info!(
            "Model loading complete: {:.0}ms",
            load_time.as_secs_f64() * 1000.0
        );

        Ok(SessionInfo {
            input_size,
            backend: self.name().to_string(),
            providers: provider_names,
            load_time,
        })
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| BgRemovalError::processing("ONNX session not initialized"))?;

        let start = Instant::now();
        log::debug!("Starting ONNX inference with input shape {:?}", input.dim());

        let input_value = Value::from_array(input.clone())
            .map_err(|e| BgRemovalError::processing(format!("Failed to convert input tensor: {e}")))?;

        // Positional input and output access, so tensor names do not matter
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(|e| BgRemovalError::processing(format!("ONNX inference failed: {e}")))?;

        let keys: Vec<_> = outputs.keys().collect();
        let first_key = keys
            .first()
            .ok_or_else(|| BgRemovalError::processing("No output tensors found"))?;
        let output_tensor = outputs
            .get(first_key)
            .ok_or_else(|| BgRemovalError::processing("First output tensor not found"))?
            .try_extract_array::<f32>()
            .map_err(|e| BgRemovalError::processing(format!("Failed to extract output tensor: {e}")))?;

        let shape = output_tensor.shape().to_vec();
        let &[batch, channels, height, width] = shape.as_slice() else {
            return Err(BgRemovalError::processing(format!(
                "Expected 4D output tensor, got {}D",
                shape.len()
            )));
        };
        let data: Vec<f32> = output_tensor.iter().copied().collect();
        let output = Array4::from_shape_vec((batch, channels, height, width), data)
            .map_err(|e| BgRemovalError::processing(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "ONNX inference complete: {:.2}ms, output shape {:?}",
            start.elapsed().as_secs_f64() * 1000.0,
            output.shape()
        );
        Ok(output)
    }

    fn release(&mut self) {
        if self.session.take().is_some() {
            log::debug!("ONNX session released");
        }
    }

    fn is_loaded(&self) -> bool {
        self.session.is_some()
    }

    fn name(&self) -> &'static str {
        "onnx"
    }
}
