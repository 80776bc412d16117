// テストユーティリティとスクリプト化した外部コラボレーター
// OCRと埋め込みは決まった値を返し、ストレージ・キュー・テーブルは実装をそのまま使う

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use ocr_experiment::core::{EmbeddingProvider, OcrEngine, OcrExtraction, WordConfidence};
use ocr_experiment::engine::{
    parse_dictionary, ExperimentRunner, JobLeaseManager, ResultAggregator, RunnerSettings, TechniqueEvaluator,
    WorkerLoop,
};
use ocr_experiment::queue::DirectoryQueue;
use ocr_experiment::services::{
    ExperimentConfig, FilterRegistry, JsonChartRenderer, JsonlResultTable, PreprocessingRunner, ScratchArea,
};
use ocr_experiment::storage::local::LocalObjectStore;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const EXPERIMENT_ID: &str = "E1";

/// 出力画像のファイル名（`{stem}-{technique}.png`）からテクニックごとの読み取り結果を返すOCR
#[derive(Debug, Clone, Default)]
pub struct ScriptedOcrEngine {
    readings: HashMap<String, Vec<(String, f32)>>,
    default_reading: Vec<(String, f32)>,
    failing: HashSet<String>,
}

impl ScriptedOcrEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全テクニック共通の読み取り結果
    pub fn reading_all(mut self, words: &[(&str, f32)]) -> Self {
        self.default_reading = to_owned_words(words);
        self
    }

    pub fn reading(mut self, technique: &str, words: &[(&str, f32)]) -> Self {
        self.readings.insert(technique.to_string(), to_owned_words(words));
        self
    }

    pub fn failing(mut self, technique: &str) -> Self {
        self.failing.insert(technique.to_string());
        self
    }

    fn technique_of(image_path: &Path) -> Option<String> {
        let stem = image_path.file_stem()?.to_str()?;
        stem.rsplit_once('-').map(|(_, technique)| technique.to_string())
    }
}

fn to_owned_words(words: &[(&str, f32)]) -> Vec<(String, f32)> {
    words.iter().map(|(w, c)| (w.to_string(), *c)).collect()
}

#[async_trait]
impl OcrEngine for ScriptedOcrEngine {
    async fn extract(&self, image_path: &Path) -> Result<OcrExtraction> {
        let technique = Self::technique_of(image_path).unwrap_or_default();
        if self.failing.contains(&technique) {
            return Err(anyhow!("scripted OCR failure for {technique}"));
        }
        let words = self.readings.get(&technique).unwrap_or(&self.default_reading);
        Ok(OcrExtraction {
            text: words.iter().map(|(w, _)| w.as_str()).collect::<Vec<_>>().join(" "),
            words: words.iter().map(|(w, c)| WordConfidence::new(w.as_str(), *c)).collect(),
        })
    }

    fn engine_name(&self) -> &'static str {
        "scripted"
    }
}

/// テキストに含まれる目印の単語でベクトルを決める埋め込みプロバイダー
#[derive(Debug, Clone, Default)]
pub struct ScriptedEmbeddingProvider {
    markers: Vec<(String, Vec<f32>)>,
}

impl ScriptedEmbeddingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn marker(mut self, word: &str, vector: &[f32]) -> Self {
        self.markers.push((word.to_string(), vector.to_vec()));
        self
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self
            .markers
            .iter()
            .find(|(word, _)| text.split_whitespace().any(|w| w == word))
            .map(|(_, vector)| vector.clone())
            .unwrap_or_else(|| vec![1.0, 1.0]))
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

/// 画像ファイルを作成（親ディレクトリも作る）
pub fn write_image(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut image = RgbImage::from_pixel(16, 16, Rgb([255, 255, 255]));
    for x in 4..12 {
        image.put_pixel(x, 8, Rgb([0, 0, 0]));
    }
    DynamicImage::ImageRgb8(image).save(path).unwrap();
}

/// 一時ディレクトリ上のストレージ・キュー・作業領域
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub config: ExperimentConfig,
}

impl TestEnvironment {
    pub fn new(techniques: &[&str]) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config = ExperimentConfig::new("lab", temp_dir.path().join("storage"))
            .with_scratch_dir(temp_dir.path().join("scratch"))
            .with_techniques(techniques.iter().copied())
            .with_lease_duration_secs(60)
            .with_idle_interval_secs(1)
            .with_max_concurrent_techniques(2);
        Self { temp_dir, config }
    }

    /// コンテナ内のオブジェクトのローカルパス
    pub fn object_path(&self, container: &str, name: &str) -> PathBuf {
        self.config.storage_root.join(container).join(name)
    }

    pub fn seed_training_image(&self, name: &str) {
        write_image(&self.object_path(&self.config.training_container, name));
    }

    pub fn seed_training_file(&self, name: &str, content: &str) {
        let path = self.object_path(&self.config.training_container, name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    pub fn seed_setup_file(&self, name: &str, content: &str) {
        let path = self.object_path(&self.config.setup_container, name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    pub fn queue(&self) -> DirectoryQueue {
        DirectoryQueue::open(self.config.queue_dir()).unwrap()
    }

    pub fn table(&self) -> JsonlResultTable {
        JsonlResultTable::new(self.config.table_dir())
    }

    pub fn store(&self) -> LocalObjectStore {
        LocalObjectStore::new(&self.config.storage_root)
    }

    /// 結果コンテナ配下の全ファイル（コンテナからの相対パス）
    pub fn result_objects(&self) -> Vec<String> {
        let root = self.config.storage_root.join(&self.config.result_container);
        if !root.is_dir() {
            return Vec::new();
        }
        let mut names: Vec<String> = walkdir::WalkDir::new(&root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| {
                entry
                    .path()
                    .strip_prefix(&root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        names.sort();
        names
    }
}

pub type ScriptedWorker = WorkerLoop<
    DirectoryQueue,
    LocalObjectStore,
    ScriptedOcrEngine,
    ScriptedEmbeddingProvider,
    JsonlResultTable,
    JsonChartRenderer,
>;

pub fn scripted_evaluator(
    ocr: ScriptedOcrEngine,
    embedding: ScriptedEmbeddingProvider,
    registry: FilterRegistry,
    dictionary: &str,
) -> TechniqueEvaluator<ScriptedOcrEngine, ScriptedEmbeddingProvider> {
    TechniqueEvaluator::new(PreprocessingRunner::new(registry), ocr, embedding)
        .with_dictionary(parse_dictionary(dictionary))
        .with_max_concurrent(2)
}

/// 実装のキュー・ストレージ・テーブルにスクリプト化したOCRを組み合わせたワーカー
pub fn scripted_worker(env: &TestEnvironment, ocr: ScriptedOcrEngine, dictionary: &str) -> ScriptedWorker {
    let config = &env.config;
    let store = Arc::new(env.store());
    let table = Arc::new(env.table());
    let charts = Arc::new(JsonChartRenderer::new());
    let scratch = ScratchArea::new(&config.scratch_dir);

    let evaluator = scripted_evaluator(
        ocr,
        ScriptedEmbeddingProvider::new(),
        FilterRegistry::with_builtin_filters(&config.filters),
        dictionary,
    );
    let runner = ExperimentRunner::new(
        Arc::new(evaluator),
        Arc::clone(&store),
        Arc::clone(&table),
        Arc::clone(&charts),
        scratch.clone(),
        RunnerSettings::from_config(config),
    );
    let aggregator = ResultAggregator::new(
        Arc::clone(&table),
        Arc::clone(&store),
        charts,
        config.result_table.clone(),
        config.result_container.clone(),
        scratch.reports_dir(),
    );
    let lease_manager = JobLeaseManager::new(Arc::new(env.queue()), store, config.training_container.clone())
        .with_lease_duration(config.lease_duration())
        .with_receive_timeout(Duration::from_secs(5));

    WorkerLoop::new(lease_manager, runner, aggregator).with_idle_interval(Duration::from_millis(10))
}
