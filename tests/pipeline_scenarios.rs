//! End-to-end pipeline behavior with fake backends

mod common;

use common::{
    decode_rgba, fake_remover, half_white_png, remover_with, solid_png, working_catalog,
    CountingFetcher, FakeFactory, FakeOutput, RecordingReporter,
};
use sticker_bgremove::{
    BgRemovalError, FnProgressReporter, ModelKind, NoOpProgressReporter, OutputFormat,
    PipelineConfig, PlacementGeometry, ProcessingOptions, ProcessingStage, ProgressUpdate, Quality,
};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn wide_image_maps_back_to_original_size() {
    let placement = PlacementGeometry::compute(800, 400, 320).unwrap();
    assert!((placement.scale - 0.4).abs() < 1e-9);
    assert_eq!((placement.scaled_width, placement.scaled_height), (320, 160));
    assert_eq!((placement.offset_x, placement.offset_y), (0, 80));

    let (mut remover, _, _) = fake_remover(FakeOutput::NonWhite);
    let result = remover
        .remove_background(
            &solid_png(800, 400, [200, 30, 30, 255]),
            &ProcessingOptions::default(),
            &NoOpProgressReporter,
        )
        .await
        .unwrap();

    assert_eq!(result.dimensions(), (800, 400));
    let output = decode_rgba(&result.data);
    assert_eq!(output.dimensions(), (800, 400));
    assert!(output.pixels().all(|p| p[3] == 255));
    assert_eq!(output.get_pixel(400, 200).0, [200, 30, 30, 255]);
}

#[tokio::test]
async fn background_half_becomes_transparent() {
    let (mut remover, _, _) = fake_remover(FakeOutput::NonWhite);
    let result = remover
        .remove_background(&half_white_png(400, 200), &ProcessingOptions::default(), &NoOpProgressReporter)
        .await
        .unwrap();

    let output = decode_rgba(&result.data);
    assert_eq!(output.get_pixel(20, 100)[3], 0);
    assert_eq!(output.get_pixel(150, 10)[3], 0);
    assert_eq!(output.get_pixel(380, 100)[3], 255);
    assert_eq!(output.get_pixel(260, 190)[3], 255);
}

#[tokio::test]
async fn feathering_softens_the_edge() {
    let (mut remover, _, _) = fake_remover(FakeOutput::NonWhite);
    let options = ProcessingOptions::builder().feather_radius(4).build().unwrap();
    let result = remover
        .remove_background(&half_white_png(320, 160), &options, &NoOpProgressReporter)
        .await
        .unwrap();

    let output = decode_rgba(&result.data);
    let row: Vec<u8> = (0..320).map(|x| output.get_pixel(x, 80)[3]).collect();
    assert_eq!(row.first(), Some(&0));
    assert_eq!(row.last(), Some(&255));
    assert!(row.iter().any(|&a| a > 0 && a < 255));
    assert!(row.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[tokio::test]
async fn logit_outputs_are_detected() {
    let (mut remover, _, _) = fake_remover(FakeOutput::Fill(12.0));
    let result = remover
        .remove_background(&solid_png(64, 64, [0, 0, 255, 255]), &ProcessingOptions::default(), &NoOpProgressReporter)
        .await
        .unwrap();
    assert!(decode_rgba(&result.data).pixels().all(|p| p[3] == 255));

    let (mut remover, _, _) = fake_remover(FakeOutput::Fill(-12.0));
    let result = remover
        .remove_background(&solid_png(64, 64, [0, 0, 255, 255]), &ProcessingOptions::default(), &NoOpProgressReporter)
        .await
        .unwrap();
    assert!(decode_rgba(&result.data).pixels().all(|p| p[3] == 0));
}

#[tokio::test]
async fn threshold_decides_hard_masks() {
    let input = solid_png(32, 32, [10, 200, 10, 255]);

    let (mut remover, _, _) = fake_remover(FakeOutput::Fill(0.55));
    let lenient = ProcessingOptions::builder().confidence_threshold(0.5).build().unwrap();
    let strict = ProcessingOptions::builder().confidence_threshold(0.6).build().unwrap();

    let kept = remover.remove_background(&input, &lenient, &NoOpProgressReporter).await.unwrap();
    let dropped = remover.remove_background(&input, &strict, &NoOpProgressReporter).await.unwrap();
    assert!(decode_rgba(&kept.data).pixels().all(|p| p[3] == 255));
    assert!(decode_rgba(&dropped.data).pixels().all(|p| p[3] == 0));
}

#[tokio::test]
async fn low_quality_uses_small_model_at_full_resolution() {
    let (mut remover, _, _) = fake_remover(FakeOutput::Fill(1.0));
    let result = remover
        .remove_background(
            &solid_png(1000, 500, [90, 90, 90, 255]),
            &ProcessingOptions::with_quality(Quality::Low),
            &NoOpProgressReporter,
        )
        .await
        .unwrap();

    assert_eq!(result.model, ModelKind::MobileNet);
    assert_eq!(result.method_used, "onnx:mobilenet");
    assert_eq!(result.dimensions(), (1000, 500));
    assert_eq!(decode_rgba(&result.data).dimensions(), (1000, 500));
    assert_eq!(
        remover.engine().active_config().map(|c| c.input_size),
        Some(224)
    );
}

#[tokio::test]
async fn declared_input_size_overrides_preset() {
    let factory = FakeFactory::new(FakeOutput::NonWhite).declaring(256);
    let mut remover = remover_with(
        PipelineConfig::default(),
        factory,
        CountingFetcher::default(),
        working_catalog(),
    );

    let result = remover
        .remove_background(&solid_png(100, 50, [1, 2, 3, 255]), &ProcessingOptions::default(), &NoOpProgressReporter)
        .await
        .unwrap();
    assert_eq!(result.dimensions(), (100, 50));
    assert_eq!(
        remover.engine().active_config().map(|c| c.input_size),
        Some(256)
    );
}

#[tokio::test]
async fn large_input_is_composited_at_its_own_size() {
    let (mut remover, _, _) = fake_remover(FakeOutput::NonWhite);
    let result = remover
        .remove_background(&half_white_png(2000, 1000), &ProcessingOptions::default(), &NoOpProgressReporter)
        .await
        .unwrap();

    assert_eq!(result.dimensions(), (2000, 1000));
    let output = decode_rgba(&result.data);
    assert_eq!(output.dimensions(), (2000, 1000));
    assert_eq!(output.get_pixel(100, 500)[3], 0);
    assert_eq!(output.get_pixel(1900, 500)[3], 255);
}

#[tokio::test]
async fn stages_are_reported_in_order() {
    let (mut remover, _, _) = fake_remover(FakeOutput::Fill(1.0));
    let reporter = RecordingReporter::default();
    remover
        .remove_background(&solid_png(16, 16, [5, 5, 5, 255]), &ProcessingOptions::default(), &reporter)
        .await
        .unwrap();

    assert_eq!(reporter.stages(), ProcessingStage::ALL.to_vec());
    assert_eq!(reporter.completion_count(), 1);
    assert!(reporter.errors().is_empty());

    let progress: Vec<u8> = reporter
        .updates
        .lock()
        .unwrap()
        .iter()
        .map(|update| update.progress)
        .collect();
    assert!(progress.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn cancellation_before_start_reports_nothing() {
    let (mut remover, log, fetcher) = fake_remover(FakeOutput::Fill(1.0));
    let reporter = RecordingReporter::default();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = remover
        .remove_background_with_cancel(&solid_png(16, 16, [5, 5, 5, 255]), &ProcessingOptions::default(), &reporter, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, BgRemovalError::Cancelled));
    assert!(reporter.stages().is_empty());
    assert!(reporter.errors().is_empty());
    assert_eq!(fetcher.calls(), 0);
    assert_eq!(log.infers.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancellation_during_inference_stops_the_call() {
    let (mut remover, _, _) = fake_remover(FakeOutput::Fill(1.0));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let seen = std::sync::Mutex::new(Vec::new());
    let reporter = FnProgressReporter::new(|update: &ProgressUpdate| {
        seen.lock().unwrap().push(update.stage);
        if update.stage == ProcessingStage::Inference {
            trigger.cancel();
        }
    });

    let err = remover
        .remove_background_with_cancel(&solid_png(16, 16, [5, 5, 5, 255]), &ProcessingOptions::default(), &reporter, &cancel)
        .await
        .unwrap_err();
    drop(reporter);

    assert!(matches!(err, BgRemovalError::Cancelled));
    let seen = seen.into_inner().unwrap();
    assert_eq!(seen.last(), Some(&ProcessingStage::Inference));
    assert!(!seen.contains(&ProcessingStage::Completed));

    let result = remover
        .remove_background(&solid_png(16, 16, [5, 5, 5, 255]), &ProcessingOptions::default(), &NoOpProgressReporter)
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn tiff_output_keeps_alpha() {
    let (mut remover, _, _) = fake_remover(FakeOutput::NonWhite);
    let options = ProcessingOptions::builder()
        .output_format(OutputFormat::Tiff)
        .build()
        .unwrap();
    let result = remover
        .remove_background(&half_white_png(64, 32), &options, &NoOpProgressReporter)
        .await
        .unwrap();

    assert_eq!(result.format, OutputFormat::Tiff);
    let output = decode_rgba(&result.data);
    assert_eq!(output.get_pixel(2, 16)[3], 0);
    assert_eq!(output.get_pixel(61, 16)[3], 255);
}

#[tokio::test]
async fn segment_foreground_matches_input_size() {
    let (mut remover, _, _) = fake_remover(FakeOutput::NonWhite);
    let mask = remover
        .segment_foreground(&half_white_png(200, 100), &ProcessingOptions::default())
        .await
        .unwrap();

    assert_eq!(mask.dimensions, (200, 100));
    let stats = mask.statistics();
    assert!(stats.foreground_ratio > 0.4 && stats.foreground_ratio < 0.6);
}
