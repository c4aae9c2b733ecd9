//! Candidate ordering, fallback and caching of the winning candidate

mod common;

use async_trait::async_trait;
use common::{
    memory_candidate, remover_with, solid_png, working_catalog, CountingFetcher, FakeFactory,
    FakeOutput, BROKEN_MODEL,
};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use sticker_bgremove::{
    error::Result, first_success, BackendType, BgRemovalError, CandidateAttempt, ModelCandidate,
    ModelKind, ModelSource, NoOpProgressReporter, PipelineConfig, ProcessingOptions,
};

fn three_candidates() -> Vec<ModelCandidate> {
    vec![
        ModelCandidate::new(
            "local u2net",
            ModelSource::File(PathBuf::from("/missing/u2net.onnx")),
            BackendType::Onnx,
        ),
        memory_candidate("corrupt mirror", BROKEN_MODEL, BackendType::Onnx),
        memory_candidate("cdn u2net", b"model", BackendType::Tract),
    ]
}

#[tokio::test]
async fn third_candidate_wins_and_is_remembered() {
    let factory = FakeFactory::new(FakeOutput::Fill(1.0));
    let log = factory.log.clone();
    let fetcher = CountingFetcher::default();
    let mut catalog = working_catalog();
    catalog.insert(ModelKind::U2Net, three_candidates());
    let mut remover = remover_with(PipelineConfig::default(), factory, fetcher.clone(), catalog);
    let input = solid_png(24, 24, [9, 9, 9, 255]);

    let result = remover
        .remove_background(&input, &ProcessingOptions::default(), &NoOpProgressReporter)
        .await
        .unwrap();

    assert_eq!(result.method_used, "tract:u2net");
    assert_eq!(fetcher.calls(), 3);
    assert_eq!(
        fetcher.labels(),
        vec!["local u2net", "corrupt mirror", "cdn u2net"]
    );
    assert_eq!(remover.acquisition().resolved_index(ModelKind::U2Net), Some(2));

    // A different model evicts the session; coming back goes straight to the winner.
    let low = ProcessingOptions::with_quality(sticker_bgremove::Quality::Low);
    remover.remove_background(&input, &low, &NoOpProgressReporter).await.unwrap();
    remover
        .remove_background(&input, &ProcessingOptions::default(), &NoOpProgressReporter)
        .await
        .unwrap();

    assert_eq!(fetcher.calls(), 5);
    assert_eq!(fetcher.labels().last().map(String::as_str), Some("cdn u2net"));
    assert_eq!(log.loads.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn loaded_session_is_reused_without_fetching() {
    let fetcher = CountingFetcher::default();
    let mut remover = remover_with(
        PipelineConfig::default(),
        FakeFactory::new(FakeOutput::Fill(1.0)),
        fetcher.clone(),
        working_catalog(),
    );
    let input = solid_png(8, 8, [1, 1, 1, 255]);

    for _ in 0..4 {
        remover
            .remove_background(&input, &ProcessingOptions::default(), &NoOpProgressReporter)
            .await
            .unwrap();
    }
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(remover.acquisition().acquire_calls(), 1);
}

#[tokio::test]
async fn all_candidates_failing_is_one_model_load_error() {
    let fetcher = CountingFetcher::default();
    let mut catalog = working_catalog();
    catalog.insert(
        ModelKind::U2Net,
        vec![
            ModelCandidate::new(
                "local u2net",
                ModelSource::File(PathBuf::from("/missing/u2net.onnx")),
                BackendType::Onnx,
            ),
            memory_candidate("corrupt mirror", BROKEN_MODEL, BackendType::Onnx),
        ],
    );
    let mut remover = remover_with(
        PipelineConfig::default(),
        FakeFactory::new(FakeOutput::Fill(1.0)),
        fetcher.clone(),
        catalog,
    );
    let input = solid_png(8, 8, [1, 1, 1, 255]);

    let err = remover
        .remove_background(&input, &ProcessingOptions::default(), &NoOpProgressReporter)
        .await
        .unwrap_err();
    let BgRemovalError::ModelLoadFailed(message) = &err else {
        panic!("expected ModelLoadFailed, got {err:?}");
    };
    assert!(message.contains("local u2net"));
    assert!(message.contains("corrupt mirror"));
    assert!(message.contains("2 candidates"));

    // Failures are not cached; the next call probes every candidate again.
    let retry = remover
        .remove_background(&input, &ProcessingOptions::default(), &NoOpProgressReporter)
        .await;
    assert!(retry.is_err());
    assert_eq!(fetcher.calls(), 4);
}

#[tokio::test]
async fn replacing_candidates_forgets_the_winner() {
    let fetcher = CountingFetcher::default();
    let mut remover = remover_with(
        PipelineConfig::default(),
        FakeFactory::new(FakeOutput::Fill(1.0)),
        fetcher.clone(),
        working_catalog(),
    );
    let input = solid_png(8, 8, [1, 1, 1, 255]);
    remover
        .remove_background(&input, &ProcessingOptions::default(), &NoOpProgressReporter)
        .await
        .unwrap();
    assert_eq!(remover.acquisition().resolved_index(ModelKind::U2Net), Some(0));

    remover.acquisition_mut().set_candidates(ModelKind::U2Net, three_candidates());
    assert_eq!(remover.acquisition().resolved_index(ModelKind::U2Net), None);
    assert_eq!(remover.acquisition().candidates(ModelKind::U2Net).len(), 3);
}

struct Recorder {
    tried: Vec<String>,
    cleaned: Vec<String>,
    succeed_on: &'static str,
}

#[async_trait]
impl CandidateAttempt for Recorder {
    type Output = String;

    async fn attempt(&mut self, candidate: &ModelCandidate) -> Result<String> {
        self.tried.push(candidate.label.clone());
        if candidate.label == self.succeed_on {
            Ok(format!("loaded {}", candidate.label))
        } else {
            Err(BgRemovalError::model_load(format!("{} unavailable", candidate.label)))
        }
    }

    fn on_failure(&mut self, candidate: &ModelCandidate) {
        self.cleaned.push(candidate.label.clone());
    }
}

#[tokio::test]
async fn first_success_stops_at_the_first_working_candidate() {
    let candidates: Vec<ModelCandidate> = ["a", "b", "c", "d"]
        .iter()
        .map(|label| memory_candidate(label, b"x", BackendType::Onnx))
        .collect();
    let mut recorder = Recorder {
        tried: Vec::new(),
        cleaned: Vec::new(),
        succeed_on: "c",
    };

    let (index, output) = first_success(&candidates, &mut recorder).await.unwrap();
    assert_eq!(index, 2);
    assert_eq!(output, "loaded c");
    assert_eq!(recorder.tried, vec!["a", "b", "c"]);
    assert_eq!(recorder.cleaned, vec!["a", "b"]);

    recorder.succeed_on = "none";
    recorder.tried.clear();
    let failures = first_success(&candidates, &mut recorder).await.unwrap_err();
    assert_eq!(failures.len(), 4);
    assert_eq!(failures.first().map(|f| f.label.as_str()), Some("a"));
    assert!(failures.iter().all(|f| f.message.contains("unavailable")));
}
