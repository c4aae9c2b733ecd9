//! Model presets and model asset descriptions
//!
//! A [`ModelConfig`] fixes the tensor geometry and normalization of one
//! segmentation network. Configs are immutable once selected; switching
//! models means acquiring a new session, never mutating a live config.

use crate::{
    error::{BgRemovalError, Result},
    inference::BackendType,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// ImageNet channel means used by the u2net family
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations used by the u2net family
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Named segmentation architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Full U²-Net, 320×320 input
    #[default]
    U2Net,
    /// Reduced U²-Net (u2netp), 320×320 input
    U2NetP,
    /// MobileNet-based segmenter, 224×224 input
    MobileNet,
}

impl ModelKind {
    /// Stable lowercase identifier
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::U2Net => "u2net",
            Self::U2NetP => "u2netp",
            Self::MobileNet => "mobilenet",
        }
    }

    /// All known kinds, in catalog order
    #[must_use]
    pub fn all() -> [Self; 3] {
        [Self::U2Net, Self::U2NetP, Self::MobileNet]
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ModelKind {
    type Err = BgRemovalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "u2net" => Ok(Self::U2Net),
            "u2netp" | "u2net-small" | "u2net_small" => Ok(Self::U2NetP),
            "mobilenet" => Ok(Self::MobileNet),
            other => Err(BgRemovalError::invalid_config(format!(
                "Unknown model '{other}'. Expected one of: u2net, u2netp, mobilenet"
            ))),
        }
    }
}

/// How raw model output values should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputRange {
    /// Values are already probabilities in [0, 1]
    Probability,
    /// Values are logits; sigmoid is always applied
    Logits,
    /// Decide per element: values outside [-10, 10] are treated as logits
    #[default]
    Detect,
}

/// Tensor geometry and normalization for one segmentation model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Display name, e.g. "u2net"
    pub name: String,
    /// Architecture this config belongs to
    pub kind: ModelKind,
    /// Side length of the square model input, in pixels
    pub input_size: u32,
    /// Per-channel mean (RGB) applied after scaling to [0, 1]
    pub mean: [f32; 3],
    /// Per-channel standard deviation (RGB)
    pub std: [f32; 3],
    /// Interpretation of the raw output values
    pub output_range: OutputRange,
    /// Optional canonical download location
    pub source_url: Option<String>,
}

impl ModelConfig {
    /// Built-in preset for a model kind
    #[must_use]
    pub fn preset(kind: ModelKind) -> Self {
        let input_size = match kind {
            ModelKind::U2Net | ModelKind::U2NetP => 320,
            ModelKind::MobileNet => 224,
        };
        Self {
            name: kind.name().to_string(),
            kind,
            input_size,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
            output_range: OutputRange::Detect,
            source_url: None,
        }
    }

    /// Copy of this config with a different square input size.
    ///
    /// Used when a loaded model declares its own input shape.
    #[must_use]
    pub fn with_input_size(&self, input_size: u32) -> Self {
        Self {
            input_size,
            ..self.clone()
        }
    }

    /// Copy of this config with an explicit output range
    #[must_use]
    pub fn with_output_range(&self, output_range: OutputRange) -> Self {
        Self {
            output_range,
            ..self.clone()
        }
    }

    /// Check that the config can produce a valid tensor
    ///
    /// # Errors
    /// - Zero input size
    /// - Non-positive or non-finite standard deviation
    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 {
            return Err(BgRemovalError::config_value_error(
                "model input size",
                self.input_size,
                "1-4096",
                Some(320),
            ));
        }
        if self.std.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(BgRemovalError::invalid_config(format!(
                "Model '{}' has invalid normalization std {:?}",
                self.name, self.std
            )));
        }
        Ok(())
    }
}

/// Where the bytes of a model come from
#[derive(Debug, Clone)]
pub enum ModelSource {
    /// Local ONNX file
    File(PathBuf),
    /// Remote ONNX file fetched over HTTP(S) and cached on disk
    Url(String),
    /// Bytes already in memory
    Memory(Arc<[u8]>),
}

impl ModelSource {
    /// Get display name for this model source
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Url(url) => url.clone(),
            Self::Memory(bytes) => format!("<memory: {} bytes>", bytes.len()),
        }
    }
}

/// One entry in an ordered acquisition list
#[derive(Debug, Clone)]
pub struct ModelCandidate {
    /// Short label used in diagnostics
    pub label: String,
    /// Where to fetch the model from
    pub source: ModelSource,
    /// Runtime used to load this candidate
    pub backend: BackendType,
    /// Expected SHA-256 of the model bytes (hex), if known
    pub sha256: Option<String>,
}

impl ModelCandidate {
    #[must_use]
    pub fn new<S: Into<String>>(label: S, source: ModelSource, backend: BackendType) -> Self {
        Self {
            label: label.into(),
            source,
            backend,
            sha256: None,
        }
    }

    #[must_use]
    pub fn with_sha256<S: Into<String>>(mut self, sha256: S) -> Self {
        self.sha256 = Some(sha256.into());
        self
    }
}

/// File names tried for each kind, primary first
fn local_file_names(kind: ModelKind) -> &'static [&'static str] {
    match kind {
        ModelKind::U2Net => &["u2net.onnx", "u2net_small.onnx"],
        ModelKind::U2NetP => &["u2netp.onnx"],
        ModelKind::MobileNet => &["mobilenet.onnx", "mobilenet_quant.onnx"],
    }
}

/// Remote file name for each kind
fn remote_file_name(kind: ModelKind) -> &'static str {
    match kind {
        ModelKind::U2Net => "u2net.onnx",
        ModelKind::U2NetP => "u2netp.onnx",
        ModelKind::MobileNet => "mobilenet.onnx",
    }
}

/// Default acquisition list: local files on the primary backend, then the
/// remote copy on the fallback backend.
#[must_use]
pub fn default_candidates(
    kind: ModelKind,
    model_dir: &std::path::Path,
    cdn_base_url: &str,
    primary: BackendType,
    fallback: BackendType,
) -> Vec<ModelCandidate> {
    let mut candidates: Vec<ModelCandidate> = local_file_names(kind)
        .iter()
        .map(|file| {
            ModelCandidate::new(
                format!("local {file}"),
                ModelSource::File(model_dir.join(file)),
                primary,
            )
        })
        .collect();

    let url = format!(
        "{}/{}",
        cdn_base_url.trim_end_matches('/'),
        remote_file_name(kind)
    );
    candidates.push(ModelCandidate::new(
        format!("cdn {}", remote_file_name(kind)),
        ModelSource::Url(url),
        fallback,
    ));
    candidates
}
