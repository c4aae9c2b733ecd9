//! Model acquisition: ordered candidates, first success wins
//!
//! Each model kind has an ordered list of [`ModelCandidate`]s. Candidates are
//! tried in order by fetching their bytes and initializing the engine; a
//! failed candidate releases whatever it partially created before the next
//! one is tried. The winning index is remembered per kind so later calls go
//! straight to it.

use crate::{
    cache::ModelCache,
    config::PipelineConfig,
    download::ModelDownloader,
    error::{BgRemovalError, Result},
    inference::InferenceEngine,
    models::{default_candidates, ModelCandidate, ModelConfig, ModelKind, ModelSource},
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

/// Source of model bytes
#[async_trait]
pub trait ModelFetcher: Send + Sync {
    /// Fetch the serialized model of a candidate
    ///
    /// # Errors
    /// - Missing files, network failures, checksum mismatches
    async fn fetch(&self, candidate: &ModelCandidate) -> Result<Vec<u8>>;
}

/// Reads local files and downloads URLs through the model cache
#[derive(Debug, Clone)]
pub struct DefaultModelFetcher {
    downloader: ModelDownloader,
}

impl DefaultModelFetcher {
    /// Build a fetcher for the cache settings of `config`.
    ///
    /// An unusable cache directory only disables caching.
    ///
    /// # Errors
    /// - Failed to create the HTTP client
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let cache = if config.disable_cache {
            None
        } else {
            let cache = match &config.cache_dir {
                Some(dir) => ModelCache::with_custom_cache_dir(dir),
                None => ModelCache::new(),
            };
            match cache {
                Ok(cache) => Some(cache),
                Err(e) => {
                    log::warn!("Model cache unavailable, downloads will not be cached: {e}");
                    None
                },
            }
        };
        Ok(Self {
            downloader: ModelDownloader::new(cache)?,
        })
    }
}

#[async_trait]
impl ModelFetcher for DefaultModelFetcher {
    async fn fetch(&self, candidate: &ModelCandidate) -> Result<Vec<u8>> {
        let bytes = match &candidate.source {
            ModelSource::File(path) => {
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|e| BgRemovalError::file_io_error("read model file", path, &e))?;
                if !crate::download::verify_bytes(&bytes, candidate.sha256.as_deref()) {
                    return Err(BgRemovalError::model_load(format!(
                        "Checksum mismatch for {}",
                        path.display()
                    )));
                }
                bytes
            },
            ModelSource::Url(url) => self.downloader.fetch(url, candidate.sha256.as_deref()).await?,
            ModelSource::Memory(bytes) => bytes.to_vec(),
        };
        if bytes.is_empty() {
            return Err(BgRemovalError::model_load(format!(
                "Model from {} is empty",
                candidate.source.display_name()
            )));
        }
        Ok(bytes)
    }
}

/// One failed candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    pub label: String,
    pub message: String,
}

/// A step that can be tried against each candidate in turn
#[async_trait]
pub trait CandidateAttempt: Send {
    type Output: Send;

    /// Try one candidate
    ///
    /// # Errors
    /// - Any failure; the combinator moves on to the next candidate
    async fn attempt(&mut self, candidate: &ModelCandidate) -> Result<Self::Output>;

    /// Clean up after a failed attempt
    fn on_failure(&mut self, _candidate: &ModelCandidate) {}
}

/// Try candidates in order and return the first success with its index.
///
/// # Errors
/// - Every candidate failed; failures are returned in attempt order
pub async fn first_success<A: CandidateAttempt>(
    candidates: &[ModelCandidate],
    attempt: &mut A,
) -> std::result::Result<(usize, A::Output), Vec<AttemptFailure>> {
    let mut failures = Vec::new();
    for (index, candidate) in candidates.iter().enumerate() {
        match attempt.attempt(candidate).await {
            Ok(output) => {
                log::debug!("Candidate '{}' succeeded", candidate.label);
                return Ok((index, output));
            },
            Err(e) => {
                log::warn!("Candidate '{}' failed: {e}", candidate.label);
                attempt.on_failure(candidate);
                failures.push(AttemptFailure {
                    label: candidate.label.clone(),
                    message: e.to_string(),
                });
            },
        }
    }
    Err(failures)
}

/// Fetch a candidate's bytes and initialize the engine with them
struct EngineAttempt<'a> {
    engine: &'a mut InferenceEngine,
    fetcher: &'a dyn ModelFetcher,
    config: &'a ModelConfig,
}

#[async_trait]
impl<'a> CandidateAttempt for EngineAttempt<'a> {
    type Output = ModelConfig;

    async fn attempt(&mut self, candidate: &ModelCandidate) -> Result<ModelConfig> {
        log::debug!(
            "Trying model candidate '{}' from {} on {}",
            candidate.label,
            candidate.source.display_name(),
            candidate.backend
        );
        let bytes = self.fetcher.fetch(candidate).await?;
        self.engine.initialize(&bytes, candidate.backend, self.config)
    }

    fn on_failure(&mut self, _candidate: &ModelCandidate) {
        self.engine.dispose();
    }
}

fn aggregate_failures(model: &str, failures: &[AttemptFailure]) -> BgRemovalError {
    let mut tried = String::new();
    for (i, failure) in failures.iter().enumerate() {
        if i > 0 {
            tried.push_str("; ");
        }
        let _ = write!(tried, "{}: {}", failure.label, failure.message);
    }
    let last = failures
        .last()
        .map_or("none", |failure| failure.message.as_str());
    BgRemovalError::model_load(format!(
        "Failed to initialize any model for '{model}' ({} candidates tried: {tried}). Last error: {last}",
        failures.len()
    ))
}

/// Per-kind candidate catalog with a cached winner
pub struct ModelAcquisition {
    fetcher: Arc<dyn ModelFetcher>,
    catalog: HashMap<ModelKind, Vec<ModelCandidate>>,
    resolved: HashMap<ModelKind, usize>,
    acquire_calls: usize,
}

impl std::fmt::Debug for ModelAcquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelAcquisition")
            .field("catalog", &self.catalog)
            .field("resolved", &self.resolved)
            .field("acquire_calls", &self.acquire_calls)
            .finish_non_exhaustive()
    }
}

impl ModelAcquisition {
    /// Default catalog: local files under `model_dir`, then the CDN copy
    ///
    /// # Errors
    /// - Failed to create the HTTP client
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let catalog = ModelKind::all()
            .into_iter()
            .map(|kind| {
                let candidates = default_candidates(
                    kind,
                    &config.model_dir,
                    &config.cdn_base_url,
                    config.backend_type,
                    config.fallback_backend_type,
                );
                (kind, candidates)
            })
            .collect();
        Ok(Self::with_candidates(
            Arc::new(DefaultModelFetcher::new(config)?),
            catalog,
        ))
    }

    #[must_use]
    pub fn with_candidates(
        fetcher: Arc<dyn ModelFetcher>,
        catalog: HashMap<ModelKind, Vec<ModelCandidate>>,
    ) -> Self {
        Self {
            fetcher,
            catalog,
            resolved: HashMap::new(),
            acquire_calls: 0,
        }
    }

    /// Replace the candidate list of one kind and forget its cached winner
    pub fn set_candidates(&mut self, kind: ModelKind, candidates: Vec<ModelCandidate>) {
        self.resolved.remove(&kind);
        self.catalog.insert(kind, candidates);
    }

    #[must_use]
    pub fn candidates(&self, kind: ModelKind) -> &[ModelCandidate] {
        self.catalog.get(&kind).map_or(&[], Vec::as_slice)
    }

    /// Index of the candidate that last succeeded for `kind`
    #[must_use]
    pub fn resolved_index(&self, kind: ModelKind) -> Option<usize> {
        self.resolved.get(&kind).copied()
    }

    /// Number of times [`acquire`](Self::acquire) has been called
    #[must_use]
    pub fn acquire_calls(&self) -> usize {
        self.acquire_calls
    }

    /// Load `config`'s model into `engine`, returning the effective config
    ///
    /// # Errors
    /// - `ModelLoadFailed` naming every failed candidate and the last error
    pub async fn acquire(
        &mut self,
        engine: &mut InferenceEngine,
        config: &ModelConfig,
    ) -> Result<ModelConfig> {
        self.acquire_calls += 1;
        let kind = config.kind;
        let candidates = self.candidates(kind).to_vec();
        if candidates.is_empty() {
            return Err(BgRemovalError::model_load(format!(
                "No model candidates configured for '{}'",
                config.name
            )));
        }

        let fetcher = Arc::clone(&self.fetcher);
        let mut attempt = EngineAttempt {
            engine,
            fetcher: fetcher.as_ref(),
            config,
        };

        let mut cached_failure = None;
        if let Some(index) = self.resolved_index(kind) {
            if let Some(candidate) = candidates.get(index) {
                match attempt.attempt(candidate).await {
                    Ok(effective) => return Ok(effective),
                    Err(e) => {
                        log::warn!(
                            "Previously working candidate '{}' failed, probing the others: {e}",
                            candidate.label
                        );
                        attempt.on_failure(candidate);
                        self.resolved.remove(&kind);
                        cached_failure = Some((
                            index,
                            AttemptFailure {
                                label: candidate.label.clone(),
                                message: e.to_string(),
                            },
                        ));
                    },
                }
            }
        }

        // The candidate that just failed is not tried twice
        let skipped = cached_failure.as_ref().map(|(index, _)| *index);
        let (positions, remaining): (Vec<usize>, Vec<ModelCandidate>) = candidates
            .iter()
            .enumerate()
            .filter(|(index, _)| Some(*index) != skipped)
            .map(|(index, candidate)| (index, candidate.clone()))
            .unzip();

        match first_success(&remaining, &mut attempt).await {
            Ok((position, effective)) => {
                let index = positions.get(position).copied().unwrap_or(position);
                if let Some(candidate) = candidates.get(index) {
                    log::info!("Model '{}' acquired from '{}'", config.name, candidate.label);
                }
                self.resolved.insert(kind, index);
                Ok(effective)
            },
            Err(mut failures) => {
                if let Some((_, failure)) = cached_failure {
                    failures.insert(0, failure);
                }
                Err(aggregate_failures(&config.name, &failures))
            },
        }
    }
}
