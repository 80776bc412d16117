// テクニック評価エンジン
// 前処理 + OCR はテクニックごとに並列、埋め込み類似度は全テクニックの合流後に計算する

use crate::core::{
    EmbeddingProvider, EvaluationReport, ExperimentError, ExperimentResult, OcrEngine, OcrExtraction,
    TechniqueScore, TechniqueStage,
};
use crate::engine::scoring::{self, Dictionary};
use crate::services::embedding::EmbeddingAdapter;
use crate::services::ocr::OcrAdapter;
use crate::services::preprocessing::PreprocessingRunner;
use crate::services::processing::{process_single_technique, TechniqueOutcome};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// 評価レポートのファイル名
pub const REPORT_FILE_NAME: &str = "technique_scores.json";

struct Extracted {
    technique: String,
    output_path: PathBuf,
    extraction: OcrExtraction,
}

/// テクニック評価エンジン
pub struct TechniqueEvaluator<O, E>
where
    O: OcrEngine,
    E: EmbeddingProvider,
{
    runner: PreprocessingRunner,
    ocr: OcrAdapter<O>,
    embedding: EmbeddingAdapter<E>,
    dictionary: Arc<Dictionary>,
    max_concurrent: usize,
}

impl<O, E> TechniqueEvaluator<O, E>
where
    O: OcrEngine + 'static,
    E: EmbeddingProvider + 'static,
{
    pub fn new(runner: PreprocessingRunner, ocr_engine: O, embedding_provider: E) -> Self {
        Self {
            runner,
            ocr: OcrAdapter::new(ocr_engine),
            embedding: EmbeddingAdapter::new(embedding_provider),
            dictionary: Arc::new(Dictionary::new()),
            max_concurrent: num_cpus::get().max(1),
        }
    }

    pub fn with_dictionary(mut self, dictionary: Dictionary) -> Self {
        self.dictionary = Arc::new(dictionary);
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// 入力画像に対して全テクニックを評価し、順位付きのレポートを返す
    ///
    /// 個別テクニックの失敗は除外して続行し、全滅した場合も空のレポートを返す。
    pub async fn evaluate(&self, input: &Path, techniques: &[String], output_dir: &Path) -> EvaluationReport {
        let techniques = unique_techniques(techniques);
        let mut report = EvaluationReport {
            attempted: techniques.len(),
            ..EvaluationReport::default()
        };
        if techniques.is_empty() {
            warn!(input = %input.display(), "No techniques configured; job will be recorded as not processed");
            return report;
        }

        if let Err(e) = tokio::fs::create_dir_all(output_dir).await {
            warn!(dir = %output_dir.display(), error = %e, "Failed to create output directory");
        }

        let extracted = self
            .transform_and_extract(input, &techniques, output_dir, &mut report.failures)
            .await;
        let embedded = self.embed(extracted, &mut report.failures).await;

        // 名前順で行列を作り、入力順に依存しない結果にする
        let matrix_input: Vec<(String, Vec<f32>)> = embedded
            .iter()
            .map(|(item, vector)| (item.technique.clone(), vector.clone()))
            .collect();
        let matrix = scoring::similarity_matrix(&matrix_input);

        let mut scores: Vec<TechniqueScore> = embedded
            .into_iter()
            .enumerate()
            .map(|(index, (item, _))| TechniqueScore {
                mean_embedding_similarity: scoring::mean_similarity_excluding_self(&matrix, index),
                dictionary_accuracy: scoring::dictionary_accuracy(&item.extraction.words, &self.dictionary),
                mean_confidence: scoring::mean_confidence(&item.extraction.words),
                total_words: scoring::scored_words(&item.extraction.words).count(),
                extracted_text: item.extraction.text,
                output_artifact_ref: Some(item.output_path),
                technique_name: item.technique,
            })
            .collect();
        scoring::rank(&mut scores);

        // 勝者以外の中間画像は破棄
        for loser in scores.iter_mut().skip(1) {
            if let Some(path) = loser.output_artifact_ref.take() {
                remove_quietly(&path).await;
            }
        }

        report.similarity = matrix;
        report.ranked = scores;

        match report.best() {
            Some(best) => info!(
                input = %input.display(),
                technique = %best.technique_name,
                accuracy = best.dictionary_accuracy,
                similarity = best.mean_embedding_similarity,
                confidence = best.mean_confidence,
                succeeded = report.ranked.len(),
                attempted = report.attempted,
                "Technique evaluation finished"
            ),
            None => {
                let error = ExperimentError::TotalEvaluationFailure {
                    attempted: report.attempted,
                };
                warn!(input = %input.display(), error = %error, "All techniques failed");
            }
        }
        report
    }

    /// 前処理 + OCR（テクニックごとに並列、同時実行数はセマフォで制限）
    async fn transform_and_extract(
        &self,
        input: &Path,
        techniques: &[String],
        output_dir: &Path,
        failures: &mut BTreeMap<String, String>,
    ) -> Vec<Extracted> {
        let image = match PreprocessingRunner::load_input(input).await {
            Ok(image) => image,
            Err(e) => {
                for technique in techniques {
                    let error = ExperimentError::technique(
                        technique.as_str(),
                        TechniqueStage::Transform,
                        anyhow::anyhow!("{e:#}"),
                    );
                    record_failure(failures, technique, &error);
                }
                return Vec::new();
            }
        };

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(techniques.len());
        for technique in techniques {
            let runner = self.runner.clone();
            let ocr = self.ocr.clone();
            let image = Arc::clone(&image);
            let semaphore = Arc::clone(&semaphore);
            let input = input.to_path_buf();
            let output_dir = output_dir.to_path_buf();
            let name = technique.clone();

            let handle = tokio::spawn(async move {
                // セマフォで同時実行数制御
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return TechniqueOutcome::Failure {
                            technique: name.clone(),
                            error: ExperimentError::technique(
                                name.as_str(),
                                TechniqueStage::Transform,
                                anyhow::anyhow!("Semaphore error: {e}"),
                            ),
                        }
                    }
                };
                process_single_technique(&runner, &ocr, image, &input, &name, &output_dir).await
            });
            handles.push((technique.clone(), handle));
        }

        let mut extracted = Vec::new();
        for (technique, handle) in handles {
            let outcome = handle.await.unwrap_or_else(|join_error| TechniqueOutcome::Failure {
                technique: technique.clone(),
                error: ExperimentError::technique(
                    technique.as_str(),
                    TechniqueStage::Transform,
                    anyhow::anyhow!("タスクが異常終了しました: {join_error}"),
                ),
            });

            match outcome {
                TechniqueOutcome::Success {
                    technique,
                    output_path,
                    extraction,
                    elapsed_ms,
                } => {
                    debug!(technique = %technique, words = extraction.words.len(), elapsed_ms, "Technique extracted");
                    extracted.push(Extracted {
                        technique,
                        output_path,
                        extraction,
                    });
                }
                TechniqueOutcome::Failure { technique, error } => {
                    record_failure(failures, &technique, &error);
                }
            }
        }
        extracted
    }

    /// 埋め込み（合流点）。失敗したテクニックは除外し、出力画像も削除する
    async fn embed(
        &self,
        mut extracted: Vec<Extracted>,
        failures: &mut BTreeMap<String, String>,
    ) -> Vec<(Extracted, Vec<f32>)> {
        extracted.sort_by(|a, b| a.technique.cmp(&b.technique));

        let mut embedded = Vec::with_capacity(extracted.len());
        for item in extracted {
            match self.embedding.embed_for(&item.technique, &item.extraction.text).await {
                Ok(vector) => embedded.push((item, vector)),
                Err(error) => {
                    record_failure(failures, &item.technique, &error);
                    remove_quietly(&item.output_path).await;
                }
            }
        }
        embedded
    }
}

/// 重複を除いたテクニック名（最初の出現順）
fn unique_techniques(techniques: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    techniques
        .iter()
        .filter(|t| seen.insert(t.as_str()))
        .cloned()
        .collect()
}

fn record_failure(failures: &mut BTreeMap<String, String>, technique: &str, error: &ExperimentError) {
    warn!(technique = %technique, error = %error, "Technique excluded from ranking");
    failures.insert(technique.to_string(), format!("{error:#}"));
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!(path = %path.display(), error = %e, "Failed to remove intermediate image");
        }
    }
}

/// 評価レポートをJSONで書き出す
pub async fn write_report(report: &EvaluationReport, reports_dir: &Path) -> ExperimentResult<PathBuf> {
    tokio::fs::create_dir_all(reports_dir)
        .await
        .map_err(|e| ExperimentError::io(reports_dir.display().to_string(), e))?;
    let path = reports_dir.join(REPORT_FILE_NAME);
    let json = serde_json::to_string_pretty(report).map_err(|e| ExperimentError::internal(e.into()))?;
    tokio::fs::write(&path, json)
        .await
        .map_err(|e| ExperimentError::io(path.display().to_string(), e))?;
    Ok(path)
}
