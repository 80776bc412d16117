// ジョブ実行 - 配信されたリクエストを評価して結果を永続化する

use crate::core::{
    ChartRenderer, EmbeddingProvider, ExperimentError, ExperimentResult, JobRequest, JobResult, OcrEngine,
    ResultTable,
};
use crate::engine::evaluator::{write_report, TechniqueEvaluator};
use crate::services::config::ExperimentConfig;
use crate::services::scratch::ScratchArea;
use crate::storage::ObjectStore;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// ジョブ実行に必要な設定値
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub group_id: String,
    pub training_container: String,
    pub result_container: String,
    pub result_table: String,
    pub techniques: Vec<String>,
}

impl RunnerSettings {
    pub fn from_config(config: &ExperimentConfig) -> Self {
        Self {
            group_id: config.group_id.clone(),
            training_container: config.training_container.clone(),
            result_container: config.result_container.clone(),
            result_table: config.result_table.clone(),
            techniques: config.techniques.clone(),
        }
    }
}

/// ジョブ単位のドライバー
pub struct ExperimentRunner<O, E, S, T, C>
where
    O: OcrEngine,
    E: EmbeddingProvider,
    S: ObjectStore,
    T: ResultTable,
    C: ChartRenderer,
{
    evaluator: Arc<TechniqueEvaluator<O, E>>,
    store: Arc<S>,
    table: Arc<T>,
    charts: Arc<C>,
    scratch: ScratchArea,
    settings: RunnerSettings,
}

impl<O, E, S, T, C> ExperimentRunner<O, E, S, T, C>
where
    O: OcrEngine + 'static,
    E: EmbeddingProvider + 'static,
    S: ObjectStore,
    T: ResultTable,
    C: ChartRenderer,
{
    pub fn new(
        evaluator: Arc<TechniqueEvaluator<O, E>>,
        store: Arc<S>,
        table: Arc<T>,
        charts: Arc<C>,
        scratch: ScratchArea,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            evaluator,
            store,
            table,
            charts,
            scratch,
            settings,
        }
    }

    /// 1ジョブを処理する。成否にかかわらず作業領域は消去する
    ///
    /// エラーはコミット前の失敗で、メッセージはリース切れ後に再配信される。
    pub async fn process_job(&self, request: &JobRequest) -> ExperimentResult<JobResult> {
        let result = self.process_job_inner(request).await;
        if let Err(e) = self.scratch.clear().await {
            warn!(error = %e, "Failed to clear scratch area");
        }
        result
    }

    async fn process_job_inner(&self, request: &JobRequest) -> ExperimentResult<JobResult> {
        let start_time = Utc::now();
        let started = Instant::now();
        self.scratch.clear().await?;

        let file_name = object_file_name(&request.input_ref);
        let local_input = self.scratch.input_dir().join(&file_name);
        self.store
            .download(&self.settings.training_container, &request.input_ref, &local_input)
            .await
            .map_err(|e| ExperimentError::transport("download", e))?;

        let report = self
            .evaluator
            .evaluate(&local_input, &self.settings.techniques, &self.scratch.output_dir())
            .await;

        let upload_prefix = format!(
            "{}-{}-{}",
            request.experiment_id,
            Uuid::new_v4(),
            file_stem(&file_name)
        );

        // 勝者画像のアップロード（失敗はジョブ失敗として再配信に任せる）
        let mut result_artifact = None;
        if let Some(path) = report.best().and_then(|best| best.output_artifact_ref.as_ref()) {
            let name = format!("{upload_prefix}/{}", object_file_name(&path.to_string_lossy()));
            self.store
                .upload(&self.settings.result_container, &name, path, true)
                .await
                .map_err(|e| ExperimentError::transport("upload", e))?;
            result_artifact = Some(name);
        }

        // 評価レポートとグラフは補助的な成果物なので失敗してもジョブは続行
        let reports_dir = self.scratch.reports_dir();
        let mut report_files = Vec::new();
        match write_report(&report, &reports_dir).await {
            Ok(path) => report_files.push(path),
            Err(e) => warn!(error = %e, "Failed to write technique report"),
        }
        match self.charts.render_technique_comparison(&report, &reports_dir) {
            Ok(path) => report_files.push(path),
            Err(e) => warn!(error = %e, "Failed to render technique comparison"),
        }
        for path in &report_files {
            let name = format!("{upload_prefix}/{}", object_file_name(&path.to_string_lossy()));
            if let Err(e) = self
                .store
                .upload(&self.settings.result_container, &name, path, true)
                .await
            {
                warn!(object = %name, error = %e, "Failed to upload report");
            }
        }

        let best = report.best().cloned();
        let result = JobResult {
            partition_key: self.settings.group_id.clone(),
            row_key: Uuid::new_v4().to_string(),
            experiment_id: request.experiment_id.clone(),
            input_file: request.input_ref.clone(),
            display_name: request.display_name.clone(),
            description: request.description.clone(),
            start_time,
            end_time: Utc::now(),
            duration: started.elapsed(),
            accuracy: best.as_ref().map(|b| b.dictionary_accuracy).unwrap_or(0.0),
            best,
            technique_failures: report.failures.clone(),
            result_artifact,
        };

        self.table
            .upsert_row(&self.settings.result_table, &result.to_row())
            .await
            .map_err(|e| ExperimentError::transport("upsert_row", e))?;

        info!(
            experiment_id = %result.experiment_id,
            input = %result.input_file,
            technique = %result.technique_name(),
            accuracy = result.accuracy,
            duration_secs = result.duration.as_secs(),
            "Job result persisted"
        );
        Ok(result)
    }
}

/// オブジェクト名の最後の要素
fn object_file_name(name: &str) -> String {
    let trimmed = name.trim_end_matches(['/', '\\']);
    trimmed
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("input")
        .to_string()
}

fn file_stem(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string())
}
