// グラフ描画ルーチンの実装
// 描画自体は外部ツールに任せ、グラフのデータセットをJSONで書き出す

use crate::core::{ChartRenderer, DatasetHistogram, EvaluationReport};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
struct BarChart<'a> {
    title: String,
    labels: Vec<&'a str>,
    series: Vec<Series<'a>>,
}

#[derive(Debug, Serialize)]
struct Series<'a> {
    name: &'a str,
    values: Vec<f64>,
}

/// グラフのデータセットをJSONファイルとして書き出すレンダラー
#[derive(Debug, Default, Clone)]
pub struct JsonChartRenderer;

impl JsonChartRenderer {
    pub fn new() -> Self {
        Self
    }

    fn write_chart(chart: &BarChart<'_>, output_dir: &Path, file_name: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create chart directory: {}", output_dir.display()))?;
        let path = output_dir.join(file_name);
        let json = serde_json::to_string_pretty(chart)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write chart: {}", path.display()))?;
        Ok(path)
    }
}

/// ファイル名に使えない文字を置換
fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

impl ChartRenderer for JsonChartRenderer {
    fn render_dataset_histogram(&self, histogram: &DatasetHistogram, output_dir: &Path) -> Result<PathBuf> {
        let chart = BarChart {
            title: format!(
                "{} - success rate {:.1}%",
                histogram.experiment_id,
                histogram.success_rate() * 100.0
            ),
            labels: histogram.counts.keys().map(String::as_str).collect(),
            series: vec![Series {
                name: "images",
                values: histogram.counts.values().map(|&count| count as f64).collect(),
            }],
        };

        let file_name = format!("histogram-{}.json", file_safe(&histogram.experiment_id));
        Self::write_chart(&chart, output_dir, &file_name)
    }

    fn render_technique_comparison(&self, report: &EvaluationReport, output_dir: &Path) -> Result<PathBuf> {
        let chart = BarChart {
            title: "technique comparison".to_string(),
            labels: report.ranked.iter().map(|s| s.technique_name.as_str()).collect(),
            series: vec![
                Series {
                    name: "dictionary_accuracy",
                    values: report.ranked.iter().map(|s| s.dictionary_accuracy).collect(),
                },
                Series {
                    name: "mean_embedding_similarity",
                    values: report.ranked.iter().map(|s| s.mean_embedding_similarity).collect(),
                },
                Series {
                    name: "mean_confidence",
                    values: report.ranked.iter().map(|s| s.mean_confidence).collect(),
                },
            ],
        };

        Self::write_chart(&chart, output_dir, "technique_comparison.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NOT_PROCESSED;
    use tempfile::tempdir;

    #[test]
    fn test_render_dataset_histogram() {
        let temp_dir = tempdir().unwrap();
        let mut histogram = DatasetHistogram::new("E1/batch");
        histogram.record(Some("canny"));
        histogram.record(None);

        let path = JsonChartRenderer::new()
            .render_dataset_histogram(&histogram, temp_dir.path())
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "histogram-E1_batch.json");

        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let labels = value["labels"].as_array().unwrap();
        assert!(labels.iter().any(|l| l == NOT_PROCESSED));
        assert_eq!(value["series"][0]["values"].as_array().unwrap().len(), labels.len());
        assert!(value["title"].as_str().unwrap().contains("50.0%"));
    }

    #[test]
    fn test_render_empty_comparison() {
        let temp_dir = tempdir().unwrap();
        let path = JsonChartRenderer::new()
            .render_technique_comparison(&EvaluationReport::default(), temp_dir.path())
            .unwrap();
        assert!(path.exists());
    }
}
