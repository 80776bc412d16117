// 外部コラボレーターのトレイト定義
// キューとオブジェクトストレージはそれぞれ queue / storage モジュールで定義

use super::types::{DatasetHistogram, EvaluationReport, OcrExtraction, TableRow};
use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use std::path::{Path, PathBuf};

/// 結果テーブル（表形式ストレージ）の抽象化トレイト
#[automock]
#[async_trait]
pub trait ResultTable: Send + Sync {
    /// パーティションキー + 行キーで1行を挿入または置換
    async fn upsert_row(&self, table: &str, row: &TableRow) -> Result<()>;

    /// テーブルの全行を取得
    async fn query_all(&self, table: &str) -> Result<Vec<TableRow>>;
}

/// OCRエンジンの抽象化トレイト
#[automock]
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// 画像からテキストと単語ごとの信頼度（0-100）を抽出
    async fn extract(&self, image_path: &Path) -> Result<OcrExtraction>;

    fn engine_name(&self) -> &'static str;
}

/// テキスト埋め込みプロバイダーの抽象化トレイト
#[automock]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn provider_name(&self) -> &'static str;
}

// EmbeddingProvider for Box<dyn EmbeddingProvider>
#[async_trait]
impl EmbeddingProvider for Box<dyn EmbeddingProvider> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.as_ref().embed(text).await
    }

    fn provider_name(&self) -> &'static str {
        self.as_ref().provider_name()
    }
}

/// グラフ描画ルーチンの抽象化トレイト
#[automock]
pub trait ChartRenderer: Send + Sync {
    /// データセット全体のテクニック別件数を描画し、出力ファイルのパスを返す
    fn render_dataset_histogram(
        &self,
        histogram: &DatasetHistogram,
        output_dir: &Path,
    ) -> Result<PathBuf>;

    /// 1ジョブ分のテクニック比較を描画し、出力ファイルのパスを返す
    fn render_technique_comparison(
        &self,
        report: &EvaluationReport,
        output_dir: &Path,
    ) -> Result<PathBuf>;
}
