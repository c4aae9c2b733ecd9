//! Worker-thread backend
//!
//! Moves any [`InferenceBackend`] onto a dedicated thread and talks to it
//! through typed request/response messages. Every request gets exactly one
//! response, so the channel pair acts as a synchronous RPC.

use crate::{
    codec,
    error::{BgRemovalError, Result},
    inference::{InferenceBackend, SessionInfo, SessionOptions},
};
use ndarray::Array4;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

/// Messages sent to the worker
#[derive(Debug)]
pub enum WorkerRequest {
    /// Create a session from model bytes
    Init {
        model: Vec<u8>,
        options: SessionOptions,
    },
    /// Run one forward pass
    Process { input: Array4<f32> },
    /// Release the session; the thread keeps running
    Dispose,
}

/// Messages sent back by the worker
#[derive(Debug)]
pub enum WorkerResponse {
    InitComplete(SessionInfo),
    /// Square mask flattened in row-major order
    ProcessComplete { output: Vec<f32> },
    DisposeComplete,
    Error(BgRemovalError),
}

/// Backend proxy whose session lives on another thread
#[derive(Debug)]
pub struct WorkerBackend {
    requests: Option<Sender<WorkerRequest>>,
    responses: Receiver<WorkerResponse>,
    handle: Option<JoinHandle<()>>,
    inner_name: &'static str,
    loaded: bool,
}

impl WorkerBackend {
    /// Start a worker thread that owns `backend`
    ///
    /// # Errors
    /// - The OS refuses to spawn the thread
    pub fn spawn(backend: Box<dyn InferenceBackend>) -> Result<Self> {
        let inner_name = backend.name();
        let (request_tx, request_rx) = mpsc::channel();
        let (response_tx, response_rx) = mpsc::channel();

        let handle = std::thread::Builder::new()
            .name("inference-worker".to_string())
            .spawn(move || worker_loop(backend, &request_rx, &response_tx))
            .map_err(|e| {
                BgRemovalError::processing(format!("Failed to spawn inference worker: {e}"))
            })?;

        log::debug!("Inference worker started for {inner_name} backend");
        Ok(Self {
            requests: Some(request_tx),
            responses: response_rx,
            handle: Some(handle),
            inner_name,
            loaded: false,
        })
    }

    fn request(&self, request: WorkerRequest) -> Result<WorkerResponse> {
        let stopped = || BgRemovalError::processing("Inference worker stopped unexpectedly");
        self.requests
            .as_ref()
            .ok_or_else(stopped)?
            .send(request)
            .map_err(|_| stopped())?;
        self.responses.recv().map_err(|_| stopped())
    }
}

fn unexpected(response: &WorkerResponse) -> BgRemovalError {
    BgRemovalError::processing(format!("Unexpected worker response: {response:?}"))
}

fn worker_loop(
    mut backend: Box<dyn InferenceBackend>,
    requests: &Receiver<WorkerRequest>,
    responses: &Sender<WorkerResponse>,
) {
    for request in requests {
        let response = match request {
            WorkerRequest::Init { model, options } => match backend.load_session(&model, &options) {
                Ok(info) => WorkerResponse::InitComplete(info),
                Err(e) => WorkerResponse::Error(e),
            },
            WorkerRequest::Process { input } => match backend.infer(&input) {
                Ok(output) => flatten_square_mask(&output)
                    .map_or_else(WorkerResponse::Error, |output| WorkerResponse::ProcessComplete {
                        output,
                    }),
                Err(e) => WorkerResponse::Error(e),
            },
            WorkerRequest::Dispose => {
                backend.release();
                WorkerResponse::DisposeComplete
            },
        };
        if responses.send(response).is_err() {
            break;
        }
    }
    backend.release();
    log::debug!("Inference worker for {} backend stopped", backend.name());
}

fn flatten_square_mask(output: &Array4<f32>) -> Result<Vec<f32>> {
    match output.shape() {
        &[1, 1, h, w] if h == w && h > 0 => Ok(output.iter().copied().collect()),
        shape => Err(BgRemovalError::processing(format!(
            "Worker can only return square [1, 1, S, S] masks, got {shape:?}"
        ))),
    }
}

impl InferenceBackend for WorkerBackend {
    fn load_session(&mut self, model: &[u8], options: &SessionOptions) -> Result<SessionInfo> {
        let response = self.request(WorkerRequest::Init {
            model: model.to_vec(),
            options: options.clone(),
        })?;
        match response {
            WorkerResponse::InitComplete(info) => {
                self.loaded = true;
                Ok(info)
            },
            WorkerResponse::Error(e) => {
                self.loaded = false;
                Err(e)
            },
            other => Err(unexpected(&other)),
        }
    }

    fn infer(&mut self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let response = self.request(WorkerRequest::Process {
            input: input.clone(),
        })?;
        match response {
            WorkerResponse::ProcessComplete { output } => codec::output_from_flat(output),
            WorkerResponse::Error(e) => Err(e),
            other => Err(unexpected(&other)),
        }
    }

    fn release(&mut self) {
        if !self.loaded {
            return;
        }
        self.loaded = false;
        match self.request(WorkerRequest::Dispose) {
            Ok(WorkerResponse::DisposeComplete) => {},
            Ok(other) => log::warn!("{}", unexpected(&other)),
            Err(e) => log::warn!("Failed to release worker session: {e}"),
        }
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn name(&self) -> &'static str {
        self.inner_name
    }
}

impl Drop for WorkerBackend {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop
        self.requests = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("Inference worker panicked");
            }
        }
    }
}
