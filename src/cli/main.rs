//! Background removal CLI tool

use super::config::CliConfigBuilder;
use crate::{
    cache::{format_size, ModelCache, CACHE_DIR_ENV},
    config::{OutputFormat, ProcessingOptions},
    processor::BackgroundRemover,
    services::{OutputFormatHandler, ProcessingStage, ProgressReporter, ProgressUpdate},
    types::ProcessingTimings,
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "webp", "bmp", "tiff", "tif"];

/// Remove image backgrounds for sticker creation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "sticker-bgremove")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image files or directories (use "-" for stdin)
    #[arg(value_name = "INPUT", required_unless_present_any = &["show_providers", "clear_cache", "show_cache_dir"])]
    pub input: Vec<String>,

    /// Output file (single input) or directory (several inputs). Use "-" for stdout.
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<String>,

    /// Quality preset: low, medium or high
    #[arg(short, long, default_value = "medium")]
    pub quality: String,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = CliOutputFormat::Png)]
    pub format: CliOutputFormat,

    /// Edge feather radius in pixels (0 = hard threshold)
    #[arg(long, default_value_t = 0)]
    pub feather: u32,

    /// Foreground confidence threshold (0.0-1.0) [default: from quality preset]
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Longest side before processing [default: from quality preset]
    #[arg(long)]
    pub max_dimension: Option<u32>,

    /// Model: u2net, u2netp or mobilenet [default: from quality preset]
    #[arg(short, long)]
    pub model: Option<String>,

    /// Directory holding local model files
    #[arg(long, alias = "model-path", value_name = "DIR")]
    pub model_dir: Option<PathBuf>,

    /// Base URL for model downloads
    #[arg(long, value_name = "URL")]
    pub cdn_url: Option<String>,

    /// Inference backend: onnx or tract
    #[arg(short, long, default_value = "onnx")]
    pub backend: String,

    /// Execution provider: auto, cpu, cuda or coreml
    #[arg(short, long, default_value = "auto")]
    pub provider: String,

    /// Number of threads (0 = backend default)
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,

    /// Largest accepted input in bytes
    #[arg(long)]
    pub max_file_size: Option<u64>,

    /// Largest accepted image side in pixels
    #[arg(long)]
    pub max_image_dimension: Option<u32>,

    /// Run inference on a dedicated worker thread
    #[arg(long)]
    pub worker: bool,

    /// JSON file with pipeline configuration
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Use custom cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Do not read or write the model cache
    #[arg(long)]
    pub no_cache: bool,

    /// Process directories recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// File name pattern for directory inputs (e.g. "*.jpg")
    #[arg(long)]
    pub pattern: Option<String>,

    /// Show execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,

    /// Show the model cache directory and exit
    #[arg(long)]
    pub show_cache_dir: bool,

    /// Delete cached model files and exit
    #[arg(long)]
    pub clear_cache: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliOutputFormat {
    Png,
    Webp,
    Tiff,
}

/// Per-stage progress bar for a single image
struct BarProgressReporter {
    bar: ProgressBar,
}

impl BarProgressReporter {
    fn new() -> Self {
        let bar = ProgressBar::new(100);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        Self { bar }
    }
}

impl ProgressReporter for BarProgressReporter {
    fn report_progress(&self, update: ProgressUpdate) {
        self.bar.set_position(u64::from(update.progress));
        self.bar.set_message(update.description);
    }

    fn report_completion(&self, timings: ProcessingTimings) {
        self.bar
            .finish_with_message(format!("Done in {}ms", timings.total_ms));
    }

    fn report_error(&self, stage: ProcessingStage, error: &str) {
        self.bar
            .abandon_with_message(format!("Failed during {}: {error}", stage.description()));
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    crate::tracing_config::init_cli_tracing(cli.verbose)
        .context("Failed to initialize tracing")?;

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }
    if cli.show_cache_dir {
        return show_cache_dir(&cli);
    }
    if cli.clear_cache {
        return clear_cache(&cli);
    }
    if cli.input.is_empty() {
        anyhow::bail!("At least one input is required");
    }

    let config = CliConfigBuilder::pipeline_config(&cli)?;
    let options = CliConfigBuilder::processing_options(&cli)?;
    info!(
        "Backend: {}, provider: {}, quality: {}",
        config.backend_type, config.execution_provider, cli.quality
    );

    let mut remover =
        BackgroundRemover::new(config).context("Failed to create background remover")?;

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            ctrl_c_token.cancel();
        }
    });

    let start_time = Instant::now();
    let outcome = process_inputs(&cli, &mut remover, &options, &cancel).await;
    remover.dispose();
    let processed = outcome?;

    info!(
        "Processed {processed} image(s) in {:.2}s",
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}

fn show_provider_diagnostics() {
    println!("Backends and execution providers");
    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("System: {cpu_count} CPU cores");

    #[cfg(feature = "onnx")]
    {
        println!("\nonnx (default):");
        for (name, available, description) in crate::backends::OnnxBackend::list_providers() {
            let status = if available { "available" } else { "not available" };
            println!("  {name}: {status} - {description}");
        }
    }
    #[cfg(feature = "tract")]
    {
        println!("\ntract:");
        for (name, available, description) in crate::backends::TractBackend::list_providers() {
            let status = if available { "available" } else { "not available" };
            println!("  {name}: {status} - {description}");
        }
    }
}

fn open_cache(cli: &Cli) -> Result<ModelCache> {
    match &cli.cache_dir {
        Some(dir) => ModelCache::with_custom_cache_dir(dir)
            .with_context(|| format!("Failed to open cache directory {}", dir.display())),
        None => ModelCache::new().context("Failed to open model cache"),
    }
}

fn show_cache_dir(cli: &Cli) -> Result<()> {
    let cache = open_cache(cli)?;
    println!("Model cache: {}", cache.cache_dir().display());
    if cli.cache_dir.is_some() {
        println!("Source: --cache-dir");
    } else if std::env::var(CACHE_DIR_ENV).is_ok() {
        println!("Source: {CACHE_DIR_ENV} environment variable");
    } else {
        println!("Source: platform cache directory");
    }

    let cached = cache.list_cached().context("Failed to list cached models")?;
    for model in &cached {
        println!("  {} ({})", model.file_name, format_size(model.size_bytes));
    }
    if cached.is_empty() {
        println!("  (empty)");
    }
    Ok(())
}

fn clear_cache(cli: &Cli) -> Result<()> {
    let cache = open_cache(cli)?;
    let removed = cache.clear_all_models().context("Failed to clear cache")?;
    if removed.is_empty() {
        println!("Cache was already empty");
    } else {
        println!("Removed {} model file(s):", removed.len());
        for name in &removed {
            println!("  {name}");
        }
    }
    Ok(())
}

async fn process_inputs(
    cli: &Cli,
    remover: &mut BackgroundRemover,
    options: &ProcessingOptions,
    cancel: &CancellationToken,
) -> Result<usize> {
    if cli.input.len() == 1 && cli.input.first().is_some_and(|s| s == "-") {
        return process_stdin(cli.output.as_deref(), remover, options, cancel).await;
    }

    let mut files = collect_input_files(cli)?;
    if files.is_empty() {
        warn!("No supported image files found in the provided inputs");
        return Ok(0);
    }
    files.sort();

    let format = CliConfigBuilder::output_format(cli.format);
    if let [input] = files.as_slice() {
        let output = match cli.output.as_deref() {
            Some("-") => None,
            Some(path) => Some(PathBuf::from(path)),
            None => Some(generate_output_path(input, None, format)),
        };
        let reporter = BarProgressReporter::new();
        process_file(remover, input, output.as_deref(), options, &reporter, cancel).await?;
        return Ok(1);
    }

    let output_dir = prepare_output_dir(cli.output.as_deref())?;
    let bar = ProgressBar::new(files.len() as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        bar.set_style(style.progress_chars("#>-"));
    }

    let mut processed = 0;
    let mut failed = 0;
    for input in &files {
        bar.set_message(input.display().to_string());
        let output = generate_output_path(input, output_dir.as_deref(), format);
        let reporter = crate::services::NoOpProgressReporter;
        match process_file(remover, input, Some(&output), options, &reporter, cancel).await {
            Ok(()) => processed += 1,
            Err(e) => {
                if cancel.is_cancelled() {
                    bar.abandon_with_message("Cancelled");
                    return Err(e);
                }
                failed += 1;
                error!("{}: {e:#}", input.display());
            },
        }
        bar.inc(1);
    }
    bar.finish_with_message(format!("{processed} done, {failed} failed"));

    if processed == 0 {
        anyhow::bail!("All {failed} input(s) failed");
    }
    Ok(processed)
}

async fn process_stdin(
    output: Option<&str>,
    remover: &mut BackgroundRemover,
    options: &ProcessingOptions,
    cancel: &CancellationToken,
) -> Result<usize> {
    let mut buffer = Vec::new();
    io::stdin()
        .read_to_end(&mut buffer)
        .context("Failed to read image data from stdin")?;
    if buffer.is_empty() {
        anyhow::bail!("No data received from stdin");
    }

    let result = remover
        .remove_background_with_cancel(&buffer, options, &crate::services::NoOpProgressReporter, cancel)
        .await
        .context("Failed to remove background")?;

    match output {
        Some(path) if path != "-" => {
            result
                .save(path)
                .with_context(|| format!("Failed to write {path}"))?;
            info!("Image saved to {path}");
        },
        _ => write_stdout(&result.data)?,
    }
    Ok(1)
}

/// Process one file; `output` of `None` writes to stdout
async fn process_file(
    remover: &mut BackgroundRemover,
    input: &Path,
    output: Option<&Path>,
    options: &ProcessingOptions,
    reporter: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> Result<()> {
    let bytes = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;

    let result = remover
        .remove_background_with_cancel(&bytes, options, reporter, cancel)
        .await
        .with_context(|| format!("Failed to remove background from {}", input.display()))?;

    match output {
        Some(path) => {
            result
                .save(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(
                "{} -> {} ({}x{}, {} via {}, {}ms)",
                input.display(),
                path.display(),
                result.width,
                result.height,
                result.model,
                result.method_used,
                result.processing_time_ms
            );
        },
        None => write_stdout(&result.data)?,
    }
    Ok(())
}

fn write_stdout(data: &[u8]) -> Result<()> {
    let mut stdout = io::stdout().lock();
    stdout
        .write_all(data)
        .context("Failed to write image data to stdout")?;
    stdout.flush().context("Failed to flush stdout")?;
    Ok(())
}

fn collect_input_files(cli: &Cli) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in &cli.input {
        let path = PathBuf::from(input);
        if path.is_file() {
            if is_image_file(&path) {
                files.push(path);
            } else {
                warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            files.extend(find_image_files(&path, cli.recursive, cli.pattern.as_deref())?);
        } else {
            anyhow::bail!("Input path does not exist: {}", path.display());
        }
    }
    Ok(files)
}

fn find_image_files(dir: &Path, recursive: bool, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let pattern = pattern
        .map(glob::Pattern::new)
        .transpose()
        .context("Invalid --pattern")?;
    let max_depth = if recursive { usize::MAX } else { 1 };

    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(dir).max_depth(max_depth) {
        let entry = entry.with_context(|| format!("Failed to read directory {}", dir.display()))?;
        let path = entry.path();
        if entry.file_type().is_file() && is_image_file(path) && matches_pattern(path, pattern.as_ref()) {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

fn matches_pattern(path: &Path, pattern: Option<&glob::Pattern>) -> bool {
    match pattern {
        Some(pattern) => path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| pattern.matches(name)),
        None => true,
    }
}

fn prepare_output_dir(output: Option<&str>) -> Result<Option<PathBuf>> {
    let Some(output) = output else {
        return Ok(None);
    };
    if output == "-" {
        anyhow::bail!("Cannot use stdout (-) as output when processing multiple files");
    }
    let dir = PathBuf::from(output);
    if dir.is_file() {
        anyhow::bail!("Output path is a file, not a directory: {}", dir.display());
    }
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    Ok(Some(dir))
}

/// `<stem>_no_bg.<ext>` next to the input, or inside `output_dir`
fn generate_output_path(input: &Path, output_dir: Option<&Path>, format: OutputFormat) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let file_name = format!("{stem}_no_bg.{}", OutputFormatHandler::get_extension(format));
    let dir = output_dir.unwrap_or_else(|| input.parent().unwrap_or(Path::new(".")));
    dir.join(file_name)
}
