//! Shared fakes and fixtures for the integration tests
//!
//! The fakes implement the public backend and fetcher traits, so the whole
//! pipeline runs without model files or a network.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use ndarray::Array4;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sticker_bgremove::{
    error::Result, BackendFactory, BackendType, BackgroundRemover, BgRemovalError,
    InferenceBackend, ModelAcquisition, ModelCandidate, ModelFetcher, ModelKind, ModelSource,
    PipelineConfig, ProcessingStage, ProcessingTimings, ProgressReporter, ProgressUpdate,
    SessionInfo, SessionOptions,
};

/// Model bytes the fake backend refuses to load
pub const BROKEN_MODEL: &[u8] = b"broken";

/// What the fake backend writes into its output tensor
#[derive(Debug, Clone, Copy)]
pub enum FakeOutput {
    /// Every value is the same
    Fill(f32),
    /// 1.0 wherever the input pixel is not the white letterbox fill
    NonWhite,
    /// Forward pass fails
    Fail,
}

/// Shared log of what fake backends were asked to do
#[derive(Debug, Default, Clone)]
pub struct FakeLog {
    pub created: Arc<Mutex<Vec<BackendType>>>,
    pub loads: Arc<AtomicUsize>,
    pub infers: Arc<AtomicUsize>,
    pub releases: Arc<AtomicUsize>,
}

#[derive(Debug)]
pub struct FakeBackend {
    declared_input_size: Option<u32>,
    output: FakeOutput,
    loaded: bool,
    log: FakeLog,
}

impl InferenceBackend for FakeBackend {
    fn load_session(&mut self, model: &[u8], _options: &SessionOptions) -> Result<SessionInfo> {
        if model == BROKEN_MODEL {
            return Err(BgRemovalError::model_load("fake runtime cannot parse model"));
        }
        self.log.loads.fetch_add(1, Ordering::SeqCst);
        self.loaded = true;
        Ok(SessionInfo {
            input_size: self.declared_input_size,
            backend: "fake".to_string(),
            providers: vec!["cpu".to_string()],
            load_time: Duration::ZERO,
        })
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        if !self.loaded {
            return Err(BgRemovalError::processing("fake backend not loaded"));
        }
        self.log.infers.fetch_add(1, Ordering::SeqCst);
        let (_, _, height, width) = input.dim();
        match self.output {
            FakeOutput::Fill(value) => Ok(Array4::from_elem((1, 1, height, width), value)),
            FakeOutput::NonWhite => Ok(Array4::from_shape_fn((1, 1, height, width), |(_, _, y, x)| {
                let white = sticker_bgremove::models::IMAGENET_MEAN
                    .iter()
                    .zip(sticker_bgremove::models::IMAGENET_STD.iter())
                    .enumerate()
                    .all(|(c, (mean, std))| ((input[[0, c, y, x]] - (1.0 - mean) / std).abs()) < 1e-3);
                if white {
                    0.0
                } else {
                    1.0
                }
            })),
            FakeOutput::Fail => Err(BgRemovalError::processing("fake forward pass failed")),
        }
    }

    fn release(&mut self) {
        if self.loaded {
            self.loaded = false;
            self.log.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

#[derive(Debug, Clone)]
pub struct FakeFactory {
    pub declared_input_size: Option<u32>,
    pub output: FakeOutput,
    pub log: FakeLog,
}

impl FakeFactory {
    pub fn new(output: FakeOutput) -> Self {
        Self {
            declared_input_size: None,
            output,
            log: FakeLog::default(),
        }
    }

    pub fn declaring(mut self, input_size: u32) -> Self {
        self.declared_input_size = Some(input_size);
        self
    }
}

impl BackendFactory for FakeFactory {
    fn create_backend(&self, backend_type: BackendType) -> Result<Box<dyn InferenceBackend>> {
        if let Ok(mut created) = self.log.created.lock() {
            created.push(backend_type);
        }
        Ok(Box::new(FakeBackend {
            declared_input_size: self.declared_input_size,
            output: self.output,
            loaded: false,
            log: self.log.clone(),
        }))
    }

    fn available_backends(&self) -> Vec<BackendType> {
        vec![BackendType::Onnx, BackendType::Tract]
    }
}

/// Serves in-memory candidates and fails everything else, counting calls
#[derive(Debug, Default, Clone)]
pub struct CountingFetcher {
    pub calls: Arc<AtomicUsize>,
    pub labels: Arc<Mutex<Vec<String>>>,
}

impl CountingFetcher {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn labels(&self) -> Vec<String> {
        self.labels.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ModelFetcher for CountingFetcher {
    async fn fetch(&self, candidate: &ModelCandidate) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut labels) = self.labels.lock() {
            labels.push(candidate.label.clone());
        }
        match &candidate.source {
            ModelSource::Memory(bytes) => Ok(bytes.to_vec()),
            other => Err(BgRemovalError::model_load(format!(
                "{} is not reachable in tests",
                other.display_name()
            ))),
        }
    }
}

pub fn memory_candidate(label: &str, bytes: &[u8], backend: BackendType) -> ModelCandidate {
    ModelCandidate::new(label, ModelSource::Memory(Arc::from(bytes.to_vec())), backend)
}

/// One working in-memory candidate per model kind
pub fn working_catalog() -> HashMap<ModelKind, Vec<ModelCandidate>> {
    ModelKind::all()
        .into_iter()
        .map(|kind| {
            let candidate = memory_candidate(&format!("memory {kind}"), b"model", BackendType::Onnx);
            (kind, vec![candidate])
        })
        .collect()
}

pub fn remover_with(
    config: PipelineConfig,
    factory: FakeFactory,
    fetcher: CountingFetcher,
    catalog: HashMap<ModelKind, Vec<ModelCandidate>>,
) -> BackgroundRemover {
    BackgroundRemover::with_components(
        config,
        Box::new(factory),
        ModelAcquisition::with_candidates(Arc::new(fetcher), catalog),
    )
}

/// Remover with default config, a working catalog and the given output
pub fn fake_remover(output: FakeOutput) -> (BackgroundRemover, FakeLog, CountingFetcher) {
    let factory = FakeFactory::new(output);
    let log = factory.log.clone();
    let fetcher = CountingFetcher::default();
    let remover = remover_with(
        PipelineConfig::default(),
        factory,
        fetcher.clone(),
        working_catalog(),
    );
    (remover, log, fetcher)
}

pub fn encode_png(image: &RgbaImage) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    image
        .write_to(&mut bytes, image::ImageFormat::Png)
        .expect("png encoding");
    bytes.into_inner()
}

pub fn solid_png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    encode_png(&RgbaImage::from_pixel(width, height, Rgba(color)))
}

/// Left half white, right half red
pub fn half_white_png(width: u32, height: u32) -> Vec<u8> {
    encode_png(&RgbaImage::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([220, 20, 20, 255])
        }
    }))
}

pub fn decode_rgba(bytes: &[u8]) -> RgbaImage {
    image::load_from_memory(bytes).expect("decodable output").to_rgba8()
}

#[derive(Debug, Default)]
pub struct RecordingReporter {
    pub updates: Mutex<Vec<ProgressUpdate>>,
    pub completions: Mutex<Vec<ProcessingTimings>>,
    pub errors: Mutex<Vec<(ProcessingStage, String)>>,
}

impl RecordingReporter {
    pub fn stages(&self) -> Vec<ProcessingStage> {
        self.updates
            .lock()
            .map(|u| u.iter().map(|update| update.stage).collect())
            .unwrap_or_default()
    }

    pub fn errors(&self) -> Vec<(ProcessingStage, String)> {
        self.errors.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn completion_count(&self) -> usize {
        self.completions.lock().map(|c| c.len()).unwrap_or_default()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        if let Ok(mut updates) = self.updates.lock() {
            updates.push(update);
        }
    }

    fn report_completion(&self, timings: ProcessingTimings) {
        if let Ok(mut completions) = self.completions.lock() {
            completions.push(timings);
        }
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push((stage, error.to_string()));
        }
    }
}
