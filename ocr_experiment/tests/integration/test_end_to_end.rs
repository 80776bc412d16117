// エンドツーエンド統合テスト - キュー投入から集計まで
use crate::fixtures::{scripted_worker, ScriptedOcrEngine, TestEnvironment, EXPERIMENT_ID};
use ocr_experiment::cli::{execute_enqueue, execute_run};
use ocr_experiment::core::{RequestMessage, ResultTable, NOT_PROCESSED};
use ocr_experiment::engine::{build_histogram, FAN_OUT_DISPLAY_NAME};
use ocr_experiment::queue::QueueTransport;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn cat_reader() -> ScriptedOcrEngine {
    ScriptedOcrEngine::new().reading_all(&[("cat", 90.0), ("dog", 80.0)])
}

async fn send(env: &TestEnvironment, input: &str, name: &str, description: &str) {
    let body = RequestMessage::new(EXPERIMENT_ID, input, name, description)
        .to_json()
        .unwrap();
    env.queue().send(&body).await.unwrap();
}

#[tokio::test]
async fn test_folder_request_fans_out_and_aggregates_once() {
    let env = TestEnvironment::new(&["grayscale", "binarization", "invert"]);
    env.seed_training_image("batch/img1.png");
    env.seed_training_image("batch/img2.jpg");
    env.seed_training_file("batch/notes.txt", "not an image");
    send(&env, "batch/", "Batch", "two images").await;

    let worker = scripted_worker(&env, cat_reader(), "cat\ndog");
    let stats = worker.drain().await.unwrap();

    assert_eq!(stats.expansions, 1);
    assert_eq!(stats.jobs_processed, 2);
    assert_eq!(stats.jobs_failed, 0);
    assert_eq!(stats.aggregations, 1);

    // フォルダメッセージと2件の個別メッセージはすべてコミット済み
    let remaining = env.queue().receive(1, Duration::from_secs(60)).await.unwrap();
    assert!(remaining.is_empty());

    let rows = env.table().query_all("results").await.unwrap();
    assert_eq!(rows.len(), 2);
    let mut inputs: Vec<_> = rows.iter().filter_map(|r| r.get_str("InputImage")).collect();
    inputs.sort();
    assert_eq!(inputs, vec!["batch/img1.png", "batch/img2.jpg"]);
    for row in &rows {
        assert_eq!(row.partition_key, "lab");
        assert_eq!(row.get_str("Name"), Some(FAN_OUT_DISPLAY_NAME));
        assert!(row.get_str("Description").unwrap().starts_with("two images for image batch/"));
        assert!(!row.get_str("Technique").unwrap().is_empty());
    }

    let histogram = build_histogram(&rows, EXPERIMENT_ID);
    assert_eq!(histogram.total, 2);
    assert_eq!(histogram.not_processed(), 0);
    assert_eq!(histogram.counts.values().sum::<usize>(), histogram.total);

    // ジョブごとに勝者画像とレポート、集計グラフが1つ
    let objects = env.result_objects();
    assert_eq!(objects.iter().filter(|o| o.ends_with("/technique_scores.json")).count(), 2);
    assert_eq!(objects.iter().filter(|o| o.ends_with("/technique_comparison.json")).count(), 2);
    assert_eq!(objects.iter().filter(|o| o.ends_with(".png")).count(), 2);
    assert_eq!(objects.iter().filter(|o| o.ends_with("histogram-E1.json")).count(), 1);
}

#[tokio::test]
async fn test_single_job_drain_aggregates_with_total_one() {
    let env = TestEnvironment::new(&["grayscale", "mirror"]);
    env.seed_training_image("cat.png");
    send(&env, "cat.png", "single", "one cat").await;

    let worker = scripted_worker(&env, cat_reader(), "cat");
    let stats = worker.drain().await.unwrap();

    assert_eq!(stats.jobs_processed, 1);
    assert_eq!(stats.aggregations, 1);

    let rows = env.table().query_all("results").await.unwrap();
    let histogram = build_histogram(&rows, EXPERIMENT_ID);
    assert_eq!(histogram.total, 1);
    assert_eq!(histogram.successful_count, 1);
    assert!(histogram.counts.contains_key(NOT_PROCESSED));

    // 2回目のドレインは何も処理せず集計もしない
    let stats = worker.drain().await.unwrap();
    assert_eq!(stats.jobs_processed, 0);
    assert_eq!(stats.aggregations, 0);
}

#[tokio::test]
async fn test_commands_run_with_unavailable_ocr_binary() {
    let mut env = TestEnvironment::new(&["grayscale", "canny"]);
    env.config.ocr.binary = "ocr-binary-that-does-not-exist".to_string();
    env.seed_setup_file("dictionary.txt", "cat\n");
    env.seed_training_image("cat.png");

    execute_enqueue(env.config.clone(), RequestMessage::new(EXPERIMENT_ID, "cat.png", "single", "cli"))
        .await
        .unwrap();
    execute_run(env.config.clone(), true, CancellationToken::new())
        .await
        .unwrap();

    // setupコンテナが作業領域へ同期されている
    assert!(env.config.scratch_dir.join("setup").join("dictionary.txt").exists());

    // OCRが全テクニックで失敗しても結果行は残り、メッセージはコミットされる
    let rows = env.table().query_all("results").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_str("Technique"), Some(""));
    assert_eq!(rows[0].get_str("Description"), Some("cli"));

    let histogram = build_histogram(&rows, EXPERIMENT_ID);
    assert_eq!(histogram.not_processed(), 1);
    assert_eq!(histogram.success_rate(), 0.0);

    let remaining = env.queue().receive(1, Duration::from_secs(60)).await.unwrap();
    assert!(remaining.is_empty());
}
