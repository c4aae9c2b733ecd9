//! Mock backends for unit tests
//!
//! These implement [`InferenceBackend`] without a real runtime so the engine,
//! the worker thread and the pipeline can be tested without model files.

use crate::{
    error::{BgRemovalError, Result},
    inference::{BackendFactory, BackendType, InferenceBackend, SessionInfo, SessionOptions},
};
use instant::Duration;
use ndarray::Array4;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// Backend that returns a constant mask of the input's spatial size
#[derive(Debug, Clone)]
pub struct MockBackend {
    declared_input_size: Option<u32>,
    fill: f32,
    fail_load: bool,
    fail_inference: bool,
    loaded: bool,
    releases: Arc<AtomicUsize>,
    call_history: Arc<Mutex<Vec<String>>>,
}

impl MockBackend {
    /// Mock whose model declares `declared_input_size`, or nothing when `None`
    #[must_use]
    pub fn new(declared_input_size: Option<u32>) -> Self {
        Self {
            declared_input_size,
            fill: 1.0,
            fail_load: false,
            fail_inference: false,
            loaded: false,
            releases: Arc::new(AtomicUsize::new(0)),
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[must_use]
    pub fn failing_load() -> Self {
        Self {
            fail_load: true,
            ..Self::new(None)
        }
    }

    #[must_use]
    pub fn failing_inference() -> Self {
        Self {
            fail_inference: true,
            ..Self::new(None)
        }
    }

    /// Value written to every output element
    #[must_use]
    pub fn with_fill(mut self, fill: f32) -> Self {
        self.fill = fill;
        self
    }

    pub fn call_history(&self) -> Vec<String> {
        self.call_history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(method.to_string());
        }
    }
}

impl InferenceBackend for MockBackend {
    fn load_session(&mut self, model: &[u8], _options: &SessionOptions) -> Result<SessionInfo> {
        self.record_call("load_session");
        if self.fail_load || model.is_empty() {
            return Err(BgRemovalError::model_load("Mock backend refused the model"));
        }
        self.loaded = true;
        Ok(SessionInfo {
            input_size: self.declared_input_size,
            backend: "mock".to_string(),
            providers: vec!["CPU".to_string()],
            load_time: Duration::from_millis(1),
        })
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        self.record_call("infer");
        if !self.loaded {
            return Err(BgRemovalError::processing("Mock backend not loaded"));
        }
        if self.fail_inference {
            return Err(BgRemovalError::processing("Mock inference failure"));
        }
        let (_, _, height, width) = input.dim();
        Ok(Array4::from_elem((1, 1, height, width), self.fill))
    }

    fn release(&mut self) {
        self.record_call("release");
        if self.loaded {
            self.loaded = false;
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Factory handing out clones of a template [`MockBackend`]
#[derive(Debug)]
pub struct MockFactory {
    template: MockBackend,
}

impl MockFactory {
    #[must_use]
    pub fn new(template: MockBackend) -> Self {
        Self { template }
    }

    /// Number of loaded sessions released across all created backends
    #[must_use]
    pub fn release_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.template.releases)
    }
}

impl BackendFactory for MockFactory {
    fn create_backend(&self, _backend_type: BackendType) -> Result<Box<dyn InferenceBackend>> {
        Ok(Box::new(self.template.clone()))
    }

    fn available_backends(&self) -> Vec<BackendType> {
        vec![BackendType::Onnx, BackendType::Tract]
    }
}
