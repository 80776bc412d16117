// 設定からの依存関係の組み立て
// 各コマンドは同じ具象型の組み合わせを使う

use crate::core::{EmbeddingProvider, ExperimentError, ExperimentResult};
use crate::engine::{
    load_dictionary, ExperimentRunner, JobLeaseManager, ResultAggregator, RunnerSettings, TechniqueEvaluator,
    WorkerLoop,
};
use crate::queue::DirectoryQueue;
use crate::services::{
    create_embedding_provider, ExperimentConfig, FilterRegistry, JsonChartRenderer, JsonlResultTable,
    PreprocessingRunner, ScratchArea, TesseractCliEngine,
};
use crate::storage::local::LocalObjectStore;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub type DynEmbeddingProvider = Box<dyn EmbeddingProvider>;
pub type ConfiguredEvaluator = TechniqueEvaluator<TesseractCliEngine, DynEmbeddingProvider>;
pub type ConfiguredAggregator = ResultAggregator<JsonlResultTable, LocalObjectStore, JsonChartRenderer>;
pub type ConfiguredWorker = WorkerLoop<
    DirectoryQueue,
    LocalObjectStore,
    TesseractCliEngine,
    DynEmbeddingProvider,
    JsonlResultTable,
    JsonChartRenderer,
>;

/// 設定ファイルを読み込む（環境変数の上書きと検証を含む）
pub fn load_config(path: &Path) -> ExperimentResult<ExperimentConfig> {
    let config = ExperimentConfig::from_file(path)?;
    info!(
        config = %path.display(),
        group_id = %config.group_id,
        storage_root = %config.storage_root.display(),
        techniques = config.techniques.len(),
        "Configuration loaded"
    );
    Ok(config)
}

/// 設定から組み立てたワーカーの構成要素
pub struct WorkerContext {
    pub config: ExperimentConfig,
    pub scratch: ScratchArea,
    pub store: Arc<LocalObjectStore>,
    pub table: Arc<JsonlResultTable>,
    pub charts: Arc<JsonChartRenderer>,
}

impl WorkerContext {
    pub fn new(config: ExperimentConfig) -> Self {
        let scratch = ScratchArea::new(&config.scratch_dir);
        let store = Arc::new(LocalObjectStore::new(&config.storage_root));
        let table = Arc::new(JsonlResultTable::new(config.table_dir()));
        Self {
            config,
            scratch,
            store,
            table,
            charts: Arc::new(JsonChartRenderer::new()),
        }
    }

    pub fn open_queue(&self) -> ExperimentResult<DirectoryQueue> {
        let dir = self.config.queue_dir();
        DirectoryQueue::open(&dir).map_err(|e| {
            ExperimentError::configuration(format!("キューを開けません {}: {e}", dir.display()))
        })
    }

    /// 評価エンジンを組み立てる（辞書と学習データはsetupディレクトリから読む）
    pub fn build_evaluator(&self) -> ExperimentResult<ConfiguredEvaluator> {
        let setup_dir = self.scratch.setup_dir();
        let dictionary = load_dictionary(&setup_dir.join(&self.config.dictionary_file));
        let ocr = TesseractCliEngine::new(self.config.ocr.clone()).with_tessdata_dir(&setup_dir);
        let embedding = create_embedding_provider(&self.config.embedding)
            .map_err(|e| ExperimentError::configuration(e.to_string()))?;
        let registry = FilterRegistry::with_builtin_filters(&self.config.filters);

        info!(
            dictionary_words = dictionary.len(),
            embedding_provider = embedding.provider_name(),
            max_concurrent = self.config.max_concurrent_techniques,
            "Evaluator configured"
        );
        Ok(TechniqueEvaluator::new(PreprocessingRunner::new(registry), ocr, embedding)
            .with_dictionary(dictionary)
            .with_max_concurrent(self.config.max_concurrent_techniques))
    }

    pub fn build_aggregator(&self) -> ConfiguredAggregator {
        ResultAggregator::new(
            Arc::clone(&self.table),
            Arc::clone(&self.store),
            Arc::clone(&self.charts),
            self.config.result_table.clone(),
            self.config.result_container.clone(),
            self.scratch.reports_dir(),
        )
    }

    pub fn build_lease_manager(&self) -> ExperimentResult<JobLeaseManager<DirectoryQueue, LocalObjectStore>> {
        Ok(JobLeaseManager::new(
            Arc::new(self.open_queue()?),
            Arc::clone(&self.store),
            self.config.training_container.clone(),
        )
        .with_lease_duration(self.config.lease_duration())
        .with_receive_timeout(self.config.receive_timeout()))
    }

    pub fn build_worker(&self) -> ExperimentResult<ConfiguredWorker> {
        let runner = ExperimentRunner::new(
            Arc::new(self.build_evaluator()?),
            Arc::clone(&self.store),
            Arc::clone(&self.table),
            Arc::clone(&self.charts),
            self.scratch.clone(),
            RunnerSettings::from_config(&self.config),
        );
        Ok(
            WorkerLoop::new(self.build_lease_manager()?, runner, self.build_aggregator())
                .with_idle_interval(self.config.idle_interval()),
        )
    }
}
