//! On-disk cache for downloaded model files
//!
//! Downloaded models are stored as flat files named after the URL they came
//! from, so two CDNs serving `u2net.onnx` never collide.

use crate::error::{BgRemovalError, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the cache location
pub const CACHE_DIR_ENV: &str = "STICKER_BGREMOVE_CACHE_DIR";

/// A model file found in the cache
#[derive(Debug, Clone)]
pub struct CachedModelInfo {
    /// Cache file name
    pub file_name: String,
    /// Full path to the cached file
    pub path: PathBuf,
    /// File size in bytes
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Cache in the platform cache directory:
    /// - Linux: `~/.cache/sticker-bgremove/models/`
    /// - macOS: `~/Library/Caches/sticker-bgremove/models/`
    /// - Windows: `%LOCALAPPDATA%/sticker-bgremove/models/`
    ///
    /// `STICKER_BGREMOVE_CACHE_DIR` takes precedence when set.
    ///
    /// # Errors
    /// - No cache directory could be determined
    /// - The directory could not be created
    pub fn new() -> Result<Self> {
        let cache_dir = Self::default_cache_dir()?;
        Self::at(cache_dir)
    }

    /// Cache rooted at `cache_dir/models`
    ///
    /// # Errors
    /// - The directory could not be created
    pub fn with_custom_cache_dir(cache_dir: &Path) -> Result<Self> {
        Self::at(cache_dir.join("models"))
    }

    fn at(cache_dir: PathBuf) -> Result<Self> {
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir).map_err(|e| {
                BgRemovalError::file_io_error("create cache directory", &cache_dir, &e)
            })?;
        }
        Ok(Self { cache_dir })
    }

    fn default_cache_dir() -> Result<PathBuf> {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(cache_override).join("models"));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                BgRemovalError::invalid_config(format!(
                    "Failed to determine cache directory. Set {CACHE_DIR_ENV} environment variable."
                ))
            })?
            .join("sticker-bgremove")
            .join("models"))
    }

    /// Cache file name for a URL: a short hash of the full URL plus its basename
    ///
    /// # Examples
    /// ```
    /// use sticker_bgremove::cache::ModelCache;
    ///
    /// let name = ModelCache::url_to_file_name("https://cdn.example.com/v1/u2net.onnx");
    /// assert!(name.ends_with("-u2net.onnx"));
    /// assert_eq!(name.len(), 16 + 1 + "u2net.onnx".len());
    /// ```
    #[must_use]
    pub fn url_to_file_name(url: &str) -> String {
        let digest = Sha256::digest(url.as_bytes());
        let hash = format!("{digest:x}");
        let prefix = hash.get(..16).unwrap_or(&hash);

        let basename = url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .filter(|name| !name.is_empty())
            .unwrap_or("model.onnx");
        let basename: String = basename
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
            .collect();

        format!("{prefix}-{basename}")
    }

    /// Path a URL is (or would be) cached at
    #[must_use]
    pub fn cached_path(&self, url: &str) -> PathBuf {
        self.cache_dir.join(Self::url_to_file_name(url))
    }

    /// Check if a URL has a non-empty cached file
    #[must_use]
    pub fn is_cached(&self, url: &str) -> bool {
        fs::metadata(self.cached_path(url)).is_ok_and(|meta| meta.is_file() && meta.len() > 0)
    }

    /// All cached model files, sorted by name
    ///
    /// # Errors
    /// - Failed to read the cache directory
    pub fn list_cached(&self) -> Result<Vec<CachedModelInfo>> {
        let mut models = Vec::new();
        if !self.cache_dir.exists() {
            return Ok(models);
        }

        let entries = fs::read_dir(&self.cache_dir).map_err(|e| {
            BgRemovalError::file_io_error("read cache directory", &self.cache_dir, &e)
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| {
                BgRemovalError::file_io_error("read cache directory entry", &self.cache_dir, &e)
            })?;
            let path = entry.path();
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            models.push(CachedModelInfo {
                file_name: entry.file_name().to_string_lossy().into_owned(),
                path,
                size_bytes: meta.len(),
            });
        }
        models.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(models)
    }

    /// Remove every cached model file
    ///
    /// # Returns
    /// Names of the removed files
    ///
    /// # Errors
    /// - Failed to read the cache directory or remove a file
    pub fn clear_all_models(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for model in self.list_cached()? {
            log::info!("Removing cached model: {}", model.file_name);
            fs::remove_file(&model.path).map_err(|e| {
                BgRemovalError::file_io_error("remove cached model", &model.path, &e)
            })?;
            removed.push(model.file_name);
        }
        Ok(removed)
    }

    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

/// Format file size in human-readable format
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    #[allow(clippy::cast_precision_loss)]
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    let unit = UNITS.get(unit_index).unwrap_or(&"B");
    if unit_index == 0 {
        format!("{bytes} {unit}")
    } else {
        format!("{size:.1} {unit}")
    }
}
