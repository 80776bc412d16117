// テクニック選択の統合テスト - 順位付けと入力順への非依存
use crate::fixtures::{scripted_evaluator, write_image, ScriptedEmbeddingProvider, ScriptedOcrEngine};
use ocr_experiment::services::FilterRegistry;
use tempfile::tempdir;

fn words(known: usize, marker: &str, markers: usize) -> Vec<(&'static str, f32)> {
    let marker: &'static str = match marker {
        "alpha" => "alpha",
        "beta" => "beta",
        _ => "gamma",
    };
    std::iter::repeat(("cat", 90.0))
        .take(known)
        .chain(std::iter::repeat((marker, 60.0)).take(markers))
        .collect()
}

/// 画像をそのまま返すテクニックA/B/C
fn identity_registry() -> FilterRegistry {
    let mut registry = FilterRegistry::new();
    for name in ["A", "B", "C"] {
        registry.register(name, |image| image.clone());
    }
    registry
}

fn to_strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[tokio::test]
async fn test_accuracy_tie_is_broken_by_similarity() {
    let temp_dir = tempdir().unwrap();
    let input = temp_dir.path().join("page.png");
    write_image(&input);

    // 一致率 A=0.9, B=0.5, C=0.9 / 類似度 A≈0.35, B≈0.35, C≈0.71
    let ocr = ScriptedOcrEngine::new()
        .reading("A", &words(9, "alpha", 1))
        .reading("B", &words(5, "beta", 5))
        .reading("C", &words(9, "gamma", 1));
    let embedding = ScriptedEmbeddingProvider::new()
        .marker("alpha", &[1.0, 0.0])
        .marker("beta", &[0.0, 1.0])
        .marker("gamma", &[1.0, 1.0]);
    let evaluator = scripted_evaluator(ocr, embedding, identity_registry(), "cat");

    let report = evaluator
        .evaluate(&input, &to_strings(&["A", "B", "C"]), &temp_dir.path().join("out"))
        .await;

    let order: Vec<_> = report.ranked.iter().map(|s| s.technique_name.as_str()).collect();
    assert_eq!(order, vec!["C", "A", "B"]);
    let best = report.best().unwrap();
    assert!((best.dictionary_accuracy - 0.9).abs() < 1e-9);
    assert!(best.output_artifact_ref.as_ref().unwrap().exists());
    // 敗者の中間画像は削除済み
    assert!(report.ranked[1..].iter().all(|s| s.output_artifact_ref.is_none()));
    assert!(!temp_dir.path().join("out").join("page-A.png").exists());
}

#[tokio::test]
async fn test_selection_is_independent_of_technique_order() {
    let temp_dir = tempdir().unwrap();
    let input = temp_dir.path().join("page.png");
    write_image(&input);

    let ocr = ScriptedOcrEngine::new()
        .reading_all(&[("cat", 80.0), ("dog", 70.0)])
        .reading("invert", &[("cat", 90.0), ("zzz", 10.0)])
        .reading("mirror", &[("tac", 95.0)]);
    let evaluator = scripted_evaluator(
        ocr,
        ScriptedEmbeddingProvider::new().marker("zzz", &[0.2, 1.0]),
        FilterRegistry::with_builtin_filters(&Default::default()),
        "cat\ndog",
    );

    let forward = to_strings(&["grayscale", "invert", "mirror", "histogram"]);
    let shuffled = to_strings(&["mirror", "histogram", "grayscale", "invert"]);
    let first = evaluator.evaluate(&input, &forward, &temp_dir.path().join("first")).await;
    let second = evaluator.evaluate(&input, &shuffled, &temp_dir.path().join("second")).await;

    let summary = |report: &ocr_experiment::core::EvaluationReport| {
        report
            .ranked
            .iter()
            .map(|s| (s.technique_name.clone(), s.dictionary_accuracy, s.mean_embedding_similarity))
            .collect::<Vec<_>>()
    };
    assert_eq!(summary(&first), summary(&second));
    assert_eq!(first.similarity, second.similarity);
    // grayscale と histogram は完全に同点なので名前順
    assert_eq!(first.best().unwrap().technique_name, "grayscale");
}
