// エラーハンドリングの統合テスト - 再配信・除外・設定エラー
use crate::fixtures::{
    scripted_evaluator, scripted_worker, write_image, ScriptedEmbeddingProvider, ScriptedOcrEngine,
    TestEnvironment, EXPERIMENT_ID,
};
use ocr_experiment::cli::context::load_config;
use ocr_experiment::core::{ErrorDisposition, ExperimentError, RequestMessage, ResultTable};
use ocr_experiment::engine::{JobLeaseManager, LeaseOutcome};
use ocr_experiment::queue::QueueTransport;
use ocr_experiment::services::{ExperimentConfig, FilterRegistry};
use std::sync::Arc;
use std::time::Duration;

fn queued_files(env: &TestEnvironment) -> usize {
    std::fs::read_dir(env.config.queue_dir())
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
        .count()
}

#[tokio::test]
async fn test_malformed_message_is_redelivered_after_lease_expiry() {
    let env = TestEnvironment::new(&["grayscale"]);
    let queue = env.queue();
    queue.send("{not json").await.unwrap();

    let lease_manager = JobLeaseManager::new(Arc::new(queue), Arc::new(env.store()), "training-images")
        .with_lease_duration(Duration::from_secs(1));

    let first = lease_manager.try_lease_next().await;
    assert!(matches!(first, LeaseOutcome::Malformed { .. }));

    // リース中は見えない
    assert_eq!(lease_manager.try_lease_next().await, LeaseOutcome::Empty);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    let second = lease_manager.try_lease_next().await;
    assert_eq!(first, second);
    assert_eq!(queued_files(&env), 1);
}

#[tokio::test]
async fn test_failed_job_is_not_committed() {
    let env = TestEnvironment::new(&["grayscale"]);
    let body = RequestMessage::new(EXPERIMENT_ID, "missing.png", "single", "gone")
        .to_json()
        .unwrap();
    env.queue().send(&body).await.unwrap();

    let worker = scripted_worker(&env, ScriptedOcrEngine::new(), "cat");
    let stats = worker.drain().await.unwrap();

    assert_eq!(stats.jobs_failed, 1);
    assert_eq!(stats.jobs_processed, 0);
    assert_eq!(stats.aggregations, 0);
    assert_eq!(queued_files(&env), 1);
    assert!(env.table().query_all("results").await.unwrap().is_empty());

    // 作業領域は失敗後も空
    let input_dir = env.config.scratch_dir.join("input");
    assert_eq!(std::fs::read_dir(input_dir).unwrap().count(), 0);
}

#[tokio::test]
async fn test_partial_technique_failures_are_excluded() {
    let temp_dir = tempfile::tempdir().unwrap();
    let input = temp_dir.path().join("page.png");
    write_image(&input);

    let ocr = ScriptedOcrEngine::new()
        .reading_all(&[("cat", 90.0)])
        .failing("canny");
    let evaluator = scripted_evaluator(
        ocr,
        ScriptedEmbeddingProvider::new(),
        FilterRegistry::with_builtin_filters(&Default::default()),
        "cat",
    );
    let techniques: Vec<String> = ["grayscale", "canny", "sharpen"].iter().map(|t| t.to_string()).collect();

    let report = evaluator.evaluate(&input, &techniques, &temp_dir.path().join("out")).await;

    assert_eq!(report.attempted, 3);
    assert_eq!(report.ranked.len(), 1);
    assert_eq!(report.best().unwrap().technique_name, "grayscale");
    assert!(report.failures.contains_key("canny"));
    assert!(report.failures.contains_key("sharpen"));
    // 単独成功は比較対象がないので類似度0
    assert_eq!(report.best().unwrap().mean_embedding_similarity, 0.0);
}

#[test]
fn test_invalid_configuration_is_fatal() {
    let err = ExperimentConfig::from_json(
        r#"{"group_id": "lab", "storage_root": "/tmp/storage", "techniques": [], "lease_duration_secs": 5000}"#,
    )
    .and_then(|config| config.validate())
    .unwrap_err();

    assert!(matches!(err, ExperimentError::Configuration { .. }));
    assert_eq!(err.disposition(), ErrorDisposition::Fatal);
    assert!(!err.is_recoverable());
}

#[test]
fn test_missing_configuration_file_is_fatal() {
    let temp_dir = tempfile::tempdir().unwrap();
    let err = load_config(&temp_dir.path().join("config.json")).unwrap_err();
    assert_eq!(err.disposition(), ErrorDisposition::Fatal);
}
