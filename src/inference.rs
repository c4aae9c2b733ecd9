//! Inference engine adapter
//!
//! [`InferenceBackend`] is the pluggable runtime seam. [`InferenceEngine`]
//! owns exactly one backend session and enforces the session lifecycle:
//! `Uninitialized → Loading → Ready → Disposed`, with re-initialization
//! allowed from `Ready` or `Disposed` after the previous session is released.

use crate::{
    config::ExecutionProvider,
    error::{BgRemovalError, Result},
    models::ModelConfig,
};
use instant::{Duration, Instant};
use ndarray::Array4;
use serde::{Deserialize, Serialize};

/// Available inference runtimes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// ONNX Runtime with hardware acceleration
    #[default]
    Onnx,
    /// Pure Rust Tract runtime (CPU only)
    Tract,
}

impl BackendType {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Onnx => "onnx",
            Self::Tract => "tract",
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for BackendType {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "tract" => Ok(Self::Tract),
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown backend '{other}'. Expected one of: onnx, tract"
            ))),
        }
    }
}

/// Runtime settings passed to a backend when a session is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Requested execution provider; unavailable providers fall back to CPU
    pub execution_provider: ExecutionProvider,
    /// Intra-op threads (0 = auto)
    pub intra_threads: usize,
    /// Inter-op threads (0 = auto)
    pub inter_threads: usize,
    /// Input size to assume when the model does not declare a fixed one
    pub input_size_hint: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            execution_provider: ExecutionProvider::Auto,
            intra_threads: 0,
            inter_threads: 0,
            input_size_hint: 320,
        }
    }
}

/// What a backend learned while creating a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    /// Square input size declared by the model, if it has a fixed one
    pub input_size: Option<u32>,
    /// Backend name, e.g. "onnx"
    pub backend: String,
    /// Execution providers registered with the session, in priority order
    pub providers: Vec<String>,
    /// Time spent creating the session
    pub load_time: Duration,
}

/// Trait for inference backends
pub trait InferenceBackend: Send {
    /// Create a session from serialized model bytes
    ///
    /// # Errors
    /// - Model bytes the runtime cannot parse
    /// - Session creation failures
    fn load_session(&mut self, model: &[u8], options: &SessionOptions) -> Result<SessionInfo>;

    /// Run inference on the input tensor
    ///
    /// # Errors
    /// - No session loaded
    /// - Runtime failures during the forward pass
    /// - Output that is not a 4D `f32` tensor
    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>>;

    /// Drop the session and its runtime resources. Safe to call repeatedly.
    fn release(&mut self);

    /// Check if a session is loaded
    fn is_loaded(&self) -> bool;

    /// Short backend name used in diagnostics
    fn name(&self) -> &'static str;
}

/// Creates backends by type
pub trait BackendFactory: Send + Sync {
    /// Create a fresh, unloaded backend
    ///
    /// # Errors
    /// - Backend type not compiled into this build
    fn create_backend(&self, backend_type: BackendType) -> Result<Box<dyn InferenceBackend>>;

    /// Backend types this factory can create
    fn available_backends(&self) -> Vec<BackendType>;
}

/// Factory for the backends compiled into this build
#[derive(Debug, Clone, Default)]
pub struct DefaultBackendFactory {
    use_worker_thread: bool,
}

impl DefaultBackendFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every created backend on its own worker thread
    #[must_use]
    pub fn with_worker_thread(use_worker_thread: bool) -> Self {
        Self { use_worker_thread }
    }

    fn create_direct(backend_type: BackendType) -> Result<Box<dyn InferenceBackend>> {
        match backend_type {
            #[cfg(feature = "onnx")]
            BackendType::Onnx => Ok(Box::new(crate::backends::OnnxBackend::new())),
            #[cfg(feature = "tract")]
            BackendType::Tract => Ok(Box::new(crate::backends::TractBackend::new())),
            #[allow(unreachable_patterns)]
            other => Err(BgRemovalError::invalid_config(format!(
                "Backend '{other}' is not compiled into this build"
            ))),
        }
    }
}

impl BackendFactory for DefaultBackendFactory {
    fn create_backend(&self, backend_type: BackendType) -> Result<Box<dyn InferenceBackend>> {
        let backend = Self::create_direct(backend_type)?;
        if self.use_worker_thread {
            let worker = crate::backends::WorkerBackend::spawn(backend)?;
            Ok(Box::new(worker))
        } else {
            Ok(backend)
        }
    }

    fn available_backends(&self) -> Vec<BackendType> {
        let mut backends = Vec::new();
        #[cfg(feature = "onnx")]
        backends.push(BackendType::Onnx);
        #[cfg(feature = "tract")]
        backends.push(BackendType::Tract);
        backends
    }
}

/// Lifecycle state of the engine's session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Loading,
    Ready,
    Disposed,
}

/// The model that is currently loaded
#[derive(Debug, Clone)]
struct ActiveSession {
    config: ModelConfig,
    backend_type: BackendType,
    info: SessionInfo,
}

/// Owns one inference session and guards its lifecycle
pub struct InferenceEngine {
    factory: Box<dyn BackendFactory>,
    options: SessionOptions,
    backend: Option<Box<dyn InferenceBackend>>,
    state: EngineState,
    active: Option<ActiveSession>,
}

impl std::fmt::Debug for InferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceEngine")
            .field("state", &self.state)
            .field("options", &self.options)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl InferenceEngine {
    #[must_use]
    pub fn new(factory: Box<dyn BackendFactory>, options: SessionOptions) -> Self {
        Self {
            factory,
            options,
            backend: None,
            state: EngineState::Uninitialized,
            active: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Config of the loaded model, with the input size the model declared
    #[must_use]
    pub fn active_config(&self) -> Option<&ModelConfig> {
        self.active.as_ref().map(|active| &active.config)
    }

    /// Session details of the loaded model
    #[must_use]
    pub fn session_info(&self) -> Option<&SessionInfo> {
        self.active.as_ref().map(|active| &active.info)
    }

    /// "backend:model" label of the loaded session
    #[must_use]
    pub fn active_method(&self) -> Option<String> {
        self.active
            .as_ref()
            .map(|active| format!("{}:{}", active.backend_type, active.config.name))
    }

    /// Load a model, replacing any existing session.
    ///
    /// Returns the effective config: `config` with its input size replaced by
    /// the model's declared size when the two differ.
    ///
    /// # Errors
    /// - `ModelLoadFailed` for any backend creation or session failure; the
    ///   engine is left without a session
    pub fn initialize(
        &mut self,
        model: &[u8],
        backend_type: BackendType,
        config: &ModelConfig,
    ) -> Result<ModelConfig> {
        self.release_backend();
        self.state = EngineState::Loading;

        let span = tracing::span!(
            tracing::Level::DEBUG,
            "session_init",
            model = %config.name,
            backend = %backend_type,
            bytes = model.len()
        );
        let _enter = span.enter();
        let start = Instant::now();

        match self.create_session(model, backend_type, config) {
            Ok((backend, info)) => {
                let effective = match info.input_size {
                    Some(declared) if declared != config.input_size => {
                        log::info!(
                            "Model '{}' declares {declared}x{declared} input, using it instead of {}",
                            config.name,
                            config.input_size
                        );
                        config.with_input_size(declared)
                    },
                    _ => config.clone(),
                };
                log::debug!(
                    "Session ready on {} in {:.0}ms (providers: {:?})",
                    backend.name(),
                    start.elapsed().as_secs_f64() * 1000.0,
                    info.providers
                );

                self.backend = Some(backend);
                self.active = Some(ActiveSession {
                    config: effective.clone(),
                    backend_type,
                    info,
                });
                self.state = EngineState::Ready;
                Ok(effective)
            },
            Err(e) => {
                self.state = EngineState::Uninitialized;
                Err(match e {
                    BgRemovalError::ModelLoadFailed(_) => e,
                    other => BgRemovalError::model_load(format!(
                        "Failed to load '{}' on {backend_type}: {other}",
                        config.name
                    )),
                })
            },
        }
    }

    fn create_session(
        &self,
        model: &[u8],
        backend_type: BackendType,
        config: &ModelConfig,
    ) -> Result<(Box<dyn InferenceBackend>, SessionInfo)> {
        config.validate()?;
        let mut backend = self.factory.create_backend(backend_type)?;
        let options = SessionOptions {
            input_size_hint: config.input_size,
            ..self.options.clone()
        };
        match backend.load_session(model, &options) {
            Ok(info) => Ok((backend, info)),
            Err(e) => {
                backend.release();
                Err(e)
            },
        }
    }

    /// Run one forward pass. No retry.
    ///
    /// # Errors
    /// - `ProcessingFailed` when no session is ready or the input is not `[1, 3, S, S]`
    /// - `SessionReleased` after [`dispose`](Self::dispose)
    /// - Backend inference failures
    pub fn run(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        match self.state {
            EngineState::Ready => {},
            EngineState::Disposed => {
                return Err(BgRemovalError::session_released(
                    "Inference session was disposed",
                ))
            },
            EngineState::Uninitialized | EngineState::Loading => {
                return Err(BgRemovalError::processing(
                    "Inference session is not initialized",
                ))
            },
        }

        let expected = self
            .active
            .as_ref()
            .map_or(0, |active| active.config.input_size as usize);
        if input.shape() != [1, 3, expected, expected] {
            return Err(BgRemovalError::processing(format!(
                "Input tensor has shape {:?}, expected [1, 3, {expected}, {expected}]",
                input.shape()
            )));
        }

        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| BgRemovalError::processing("Inference session is not initialized"))?;
        backend.infer(input)
    }

    /// Release the session. Idempotent.
    pub fn dispose(&mut self) {
        if self.state == EngineState::Disposed {
            return;
        }
        self.release_backend();
        self.state = EngineState::Disposed;
    }

    fn release_backend(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            log::debug!("Releasing {} session", backend.name());
            backend.release();
        }
        self.active = None;
    }
}

impl Drop for InferenceEngine {
    fn drop(&mut self) {
        self.release_backend();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::test_utils::{MockBackend, MockFactory};
    use crate::models::ModelKind;

    fn engine_with(factory: MockFactory) -> InferenceEngine {
        InferenceEngine::new(Box::new(factory), SessionOptions::default())
    }

    #[test]
    fn test_initialize_and_run() {
        let factory = MockFactory::new(MockBackend::new(None));
        let mut engine = engine_with(factory);
        let config = ModelConfig::preset(ModelKind::U2Net).with_input_size(8);

        let effective = engine.initialize(b"model", BackendType::Onnx, &config).unwrap();
        assert_eq!(effective, config);
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.active_method().as_deref(), Some("onnx:u2net"));

        let output = engine.run(&Array4::zeros((1, 3, 8, 8))).unwrap();
        assert_eq!(output.shape(), &[1, 1, 8, 8]);
    }

    #[test]
    fn test_declared_input_size_is_adopted() {
        let factory = MockFactory::new(MockBackend::new(Some(16)));
        let mut engine = engine_with(factory);
        let config = ModelConfig::preset(ModelKind::U2Net);

        let effective = engine.initialize(b"model", BackendType::Tract, &config).unwrap();
        assert_eq!(effective.input_size, 16);
        assert_eq!(engine.active_config().map(|c| c.input_size), Some(16));

        assert!(engine.run(&Array4::zeros((1, 3, 320, 320))).is_err());
        assert!(engine.run(&Array4::zeros((1, 3, 16, 16))).is_ok());
    }

    #[test]
    fn test_run_before_initialize_is_processing_failed() {
        let mut engine = engine_with(MockFactory::new(MockBackend::new(None)));
        let err = engine.run(&Array4::zeros((1, 3, 8, 8))).unwrap_err();
        assert!(matches!(err, BgRemovalError::ProcessingFailed(_)));
    }

    #[test]
    fn test_run_after_dispose_is_session_released() {
        let mut engine = engine_with(MockFactory::new(MockBackend::new(None)));
        let config = ModelConfig::preset(ModelKind::U2Net).with_input_size(8);
        engine.initialize(b"model", BackendType::Onnx, &config).unwrap();

        engine.dispose();
        engine.dispose();
        assert_eq!(engine.state(), EngineState::Disposed);

        let err = engine.run(&Array4::zeros((1, 3, 8, 8))).unwrap_err();
        assert!(matches!(err, BgRemovalError::SessionReleased(_)));

        // A disposed engine can be initialized again
        engine.initialize(b"model", BackendType::Onnx, &config).unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[test]
    fn test_failed_load_reports_model_load_failed() {
        let factory = MockFactory::new(MockBackend::failing_load());
        let mut engine = engine_with(factory);
        let config = ModelConfig::preset(ModelKind::U2Net);

        let err = engine.initialize(b"model", BackendType::Onnx, &config).unwrap_err();
        assert!(matches!(err, BgRemovalError::ModelLoadFailed(_)));
        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert!(engine.active_config().is_none());
    }

    #[test]
    fn test_reinitialize_releases_previous_session() {
        let factory = MockFactory::new(MockBackend::new(None));
        let releases = factory.release_counter();
        let mut engine = engine_with(factory);
        let config = ModelConfig::preset(ModelKind::U2Net).with_input_size(8);

        engine.initialize(b"a", BackendType::Onnx, &config).unwrap();
        engine.initialize(b"b", BackendType::Onnx, &config).unwrap();
        assert_eq!(releases.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backend_type_parsing() {
        assert_eq!("ONNX".parse::<BackendType>().unwrap(), BackendType::Onnx);
        assert_eq!("tract".parse::<BackendType>().unwrap(), BackendType::Tract);
        assert!("tflite".parse::<BackendType>().is_err());
    }
}
