// データセット集計 - 永続化済みの結果からテクニック別件数を作る

use crate::core::{ChartRenderer, DatasetHistogram, ExperimentError, ExperimentResult, ResultTable, TableRow};
use crate::storage::ObjectStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// 結果行からヒストグラムを作る（実験IDは大文字小文字を区別しない）
pub fn build_histogram(rows: &[TableRow], experiment_id: &str) -> DatasetHistogram {
    let wanted = experiment_id.to_lowercase();
    let mut histogram = DatasetHistogram::new(experiment_id);
    for row in rows
        .iter()
        .filter(|row| row.get_str("ExperimentId").map(str::to_lowercase).as_deref() == Some(wanted.as_str()))
    {
        histogram.record(row.get_str("Technique"));
    }
    histogram
}

pub struct ResultAggregator<T, S, C>
where
    T: ResultTable,
    S: ObjectStore,
    C: ChartRenderer,
{
    table: Arc<T>,
    store: Arc<S>,
    charts: Arc<C>,
    result_table: String,
    result_container: String,
    work_dir: PathBuf,
}

impl<T, S, C> ResultAggregator<T, S, C>
where
    T: ResultTable,
    S: ObjectStore,
    C: ChartRenderer,
{
    pub fn new(
        table: Arc<T>,
        store: Arc<S>,
        charts: Arc<C>,
        result_table: impl Into<String>,
        result_container: impl Into<String>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            table,
            store,
            charts,
            result_table: result_table.into(),
            result_container: result_container.into(),
            work_dir: work_dir.into(),
        }
    }

    /// 全件を読み直して集計し、グラフを公開する
    pub async fn aggregate(&self, experiment_id: &str) -> ExperimentResult<DatasetHistogram> {
        let rows = self
            .table
            .query_all(&self.result_table)
            .await
            .map_err(|e| ExperimentError::transport("query_all", e))?;
        let histogram = build_histogram(&rows, experiment_id);

        info!(
            experiment_id = %experiment_id,
            total = histogram.total,
            not_processed = histogram.not_processed(),
            success_rate = histogram.success_rate(),
            best_technique = histogram.best_technique().unwrap_or("-"),
            "Dataset aggregated"
        );

        if let Some(name) = self.publish_chart(&histogram).await {
            info!(experiment_id = %experiment_id, object = %name, "Dataset chart uploaded");
        }
        Ok(histogram)
    }

    /// グラフを描画してアップロードし、ローカルファイルを消す（失敗はログのみ）
    async fn publish_chart(&self, histogram: &DatasetHistogram) -> Option<String> {
        let path = match self.charts.render_dataset_histogram(histogram, &self.work_dir) {
            Ok(path) => path,
            Err(e) => {
                warn!(experiment_id = %histogram.experiment_id, error = %e, "Failed to render dataset chart");
                return None;
            }
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "chart".to_string());
        let name = format!("{}-{}-{}", histogram.experiment_id, Uuid::new_v4(), file_name);

        let uploaded = match self.store.upload(&self.result_container, &name, &path, true).await {
            Ok(()) => Some(name),
            Err(e) => {
                warn!(experiment_id = %histogram.experiment_id, error = %e, "Failed to upload dataset chart");
                None
            }
        };
        remove_local(&path).await;
        uploaded
    }
}

async fn remove_local(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove local chart");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::MockChartRenderer;
    use crate::core::NOT_PROCESSED;
    use crate::services::charts::JsonChartRenderer;
    use crate::services::persistence::MemoryResultTable;
    use crate::storage::MockObjectStore;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn row(row_key: &str, experiment_id: &str, technique: Option<&str>) -> TableRow {
        let mut fields = BTreeMap::new();
        fields.insert("ExperimentId".to_string(), experiment_id.into());
        if let Some(technique) = technique {
            fields.insert("Technique".to_string(), technique.into());
        }
        TableRow {
            partition_key: "lab".to_string(),
            row_key: row_key.to_string(),
            fields,
        }
    }

    #[test]
    fn test_build_histogram_matches_experiment_case_insensitively() {
        let rows = vec![
            row("1", "E1", Some("canny")),
            row("2", "e1", Some("canny")),
            row("3", "E1", Some("  ")),
            row("4", "E1", None),
            row("5", "E2", Some("mirror")),
        ];
        let histogram = build_histogram(&rows, "E1");

        assert_eq!(histogram.total, 4);
        assert_eq!(histogram.counts["canny"], 2);
        assert_eq!(histogram.counts[NOT_PROCESSED], 2);
        assert!(!histogram.counts.contains_key("mirror"));
        assert_eq!(histogram.counts.values().sum::<usize>(), histogram.total);
        assert!((histogram.success_rate() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_build_histogram_without_rows() {
        let histogram = build_histogram(&[], "E1");
        assert_eq!(histogram.total, 0);
        assert_eq!(histogram.counts[NOT_PROCESSED], 0);
        assert_eq!(histogram.success_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_aggregate_uploads_chart_and_removes_local_file() {
        let temp_dir = tempdir().unwrap();
        let table = MemoryResultTable::new();
        table.upsert_row("results", &row("1", "E1", Some("grayscale"))).await.unwrap();

        let mut store = MockObjectStore::new();
        store
            .expect_upload()
            .withf(|container, name, _, overwrite| {
                container == "charts" && name.starts_with("E1-") && name.ends_with("-histogram-E1.json") && *overwrite
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let aggregator = ResultAggregator::new(
            Arc::new(table),
            Arc::new(store),
            Arc::new(JsonChartRenderer::new()),
            "results",
            "charts",
            temp_dir.path(),
        );
        let histogram = aggregator.aggregate("E1").await.unwrap();

        assert_eq!(histogram.total, 1);
        assert_eq!(histogram.best_technique(), Some("grayscale"));
        assert!(!temp_dir.path().join("histogram-E1.json").exists());
    }

    #[tokio::test]
    async fn test_chart_failure_still_returns_histogram() {
        let temp_dir = tempdir().unwrap();
        let mut charts = MockChartRenderer::new();
        charts
            .expect_render_dataset_histogram()
            .returning(|_, _| Err(anyhow::anyhow!("renderer unavailable")));
        let mut store = MockObjectStore::new();
        store.expect_upload().times(0);

        let aggregator = ResultAggregator::new(
            Arc::new(MemoryResultTable::new()),
            Arc::new(store),
            Arc::new(charts),
            "results",
            "charts",
            temp_dir.path(),
        );
        let histogram = aggregator.aggregate("E1").await.unwrap();
        assert_eq!(histogram.total, 0);
    }

    #[tokio::test]
    async fn test_query_failure_is_transport_error() {
        let temp_dir = tempdir().unwrap();
        let mut table = crate::core::traits::MockResultTable::new();
        table
            .expect_query_all()
            .returning(|_| Err(anyhow::anyhow!("table offline")));

        let aggregator = ResultAggregator::new(
            Arc::new(table),
            Arc::new(MockObjectStore::new()),
            Arc::new(MockChartRenderer::new()),
            "results",
            "charts",
            temp_dir.path(),
        );
        let err = aggregator.aggregate("E1").await.unwrap_err();
        assert!(matches!(err, ExperimentError::TransientTransport { .. }));
    }
}
