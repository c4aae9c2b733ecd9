//! Conversion from command-line arguments to library configuration

use crate::cli::main_impl::{Cli, CliOutputFormat};
use crate::{
    config::{OutputFormat, PipelineConfig, ProcessingOptions, Quality},
    inference::BackendType,
    models::ModelKind,
};
use anyhow::{Context, Result};

pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Pipeline configuration: `--config` JSON first, then flag overrides
    pub(crate) fn pipeline_config(cli: &Cli) -> Result<PipelineConfig> {
        let mut config = match &cli.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config file {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        config.backend_type = cli
            .backend
            .parse::<BackendType>()
            .context("Invalid --backend")?;
        config.execution_provider = cli.provider.parse().context("Invalid --provider")?;
        if cli.threads > 0 {
            config.intra_threads = cli.threads;
            config.inter_threads = cli.threads;
        }
        if let Some(bytes) = cli.max_file_size {
            config.max_file_size = bytes;
        }
        if let Some(pixels) = cli.max_image_dimension {
            config.max_image_dimension = pixels;
        }
        if let Some(dir) = &cli.model_dir {
            config.model_dir = dir.clone();
        }
        if let Some(url) = &cli.cdn_url {
            config.cdn_base_url = url.clone();
        }
        if let Some(dir) = &cli.cache_dir {
            config.cache_dir = Some(dir.clone());
        }
        config.disable_cache |= cli.no_cache;
        config.use_worker_thread |= cli.worker;

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Per-call options from the quality and tuning flags
    pub(crate) fn processing_options(cli: &Cli) -> Result<ProcessingOptions> {
        let quality: Quality = cli.quality.parse().context("Invalid --quality")?;
        let mut builder = ProcessingOptions::builder()
            .quality(quality)
            .output_format(Self::output_format(cli.format))
            .feather_radius(cli.feather);

        if let Some(model) = &cli.model {
            builder = builder.model(model.parse::<ModelKind>().context("Invalid --model")?);
        }
        if let Some(threshold) = cli.threshold {
            builder = builder.confidence_threshold(threshold);
        }
        if let Some(max_dimension) = cli.max_dimension {
            builder = builder.max_dimension(max_dimension);
        }

        builder.build().context("Invalid processing options")
    }

    pub(crate) fn output_format(format: CliOutputFormat) -> OutputFormat {
        match format {
            CliOutputFormat::Png => OutputFormat::Png,
            CliOutputFormat::Webp => OutputFormat::WebP,
            CliOutputFormat::Tiff => OutputFormat::Tiff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionProvider;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("sticker-bgremove").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["photo.jpg"]);
        let config = CliConfigBuilder::pipeline_config(&cli).unwrap();
        assert_eq!(config.backend_type, BackendType::Onnx);
        assert_eq!(config.execution_provider, ExecutionProvider::Auto);

        let options = CliConfigBuilder::processing_options(&cli).unwrap();
        let resolved = options.resolve();
        assert_eq!(resolved.model, ModelKind::U2Net);
        assert_eq!(resolved.output_format, OutputFormat::Png);
        assert_eq!(resolved.feather_radius, 0);
    }

    #[test]
    fn test_overrides() {
        let cli = parse(&[
            "photo.jpg",
            "--quality",
            "low",
            "--model",
            "u2netp",
            "--threshold",
            "0.3",
            "--backend",
            "tract",
            "--model-path",
            "/opt/models",
            "--max-file-size",
            "1024",
            "--format",
            "tiff",
        ]);
        let config = CliConfigBuilder::pipeline_config(&cli).unwrap();
        assert_eq!(config.backend_type, BackendType::Tract);
        assert_eq!(config.model_dir, std::path::PathBuf::from("/opt/models"));
        assert_eq!(config.max_file_size, 1024);

        let resolved = CliConfigBuilder::processing_options(&cli).unwrap().resolve();
        assert_eq!(resolved.model, ModelKind::U2NetP);
        assert_eq!(resolved.max_dimension, 512);
        assert!((resolved.confidence_threshold - 0.3).abs() < f32::EPSILON);
        assert_eq!(resolved.output_format, OutputFormat::Tiff);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(CliConfigBuilder::pipeline_config(&parse(&["a.png", "--backend", "gpu"])).is_err());
        assert!(CliConfigBuilder::processing_options(&parse(&["a.png", "--quality", "ultra"])).is_err());
        assert!(CliConfigBuilder::processing_options(&parse(&["a.png", "--model", "isnet"])).is_err());
    }
}
