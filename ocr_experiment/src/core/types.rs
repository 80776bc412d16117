// ジョブ・評価・集計で共有されるデータ型定義

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// 勝者テクニックが存在しない結果の集計バケット名
pub const NOT_PROCESSED: &str = "Not Processed";

/// キューに流れるリクエストメッセージ（ワイヤーフォーマット）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestMessage {
    pub experiment_id: String,
    pub input_file: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl RequestMessage {
    pub fn new(
        experiment_id: impl Into<String>,
        input_file: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            input_file: input_file.into(),
            name: name.into(),
            description: description.into(),
        }
    }

    /// JSON本文を解析し、必須フィールドを検証
    pub fn parse(body: &str) -> Result<Self, String> {
        let message: Self = serde_json::from_str(body).map_err(|e| e.to_string())?;
        if message.experiment_id.trim().is_empty() {
            return Err("ExperimentId is empty".to_string());
        }
        if message.input_file.trim().is_empty() {
            return Err("InputFile is empty".to_string());
        }
        Ok(message)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// メッセージのリース情報（メッセージID + 受領トークン）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseHandle {
    pub message_id: String,
    pub receipt: String,
}

impl LeaseHandle {
    pub fn new(message_id: impl Into<String>, receipt: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            receipt: receipt.into(),
        }
    }

    /// コミットに使えないハンドルかどうか
    pub fn is_empty(&self) -> bool {
        self.message_id.is_empty() || self.receipt.is_empty()
    }
}

/// 配信されたジョブリクエスト
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub experiment_id: String,
    /// 単一画像のオブジェクト名、またはフォルダのプレフィックス
    pub input_ref: String,
    pub display_name: String,
    pub description: String,
    pub lease: LeaseHandle,
}

impl JobRequest {
    pub fn from_message(message: RequestMessage, lease: LeaseHandle) -> Self {
        Self {
            experiment_id: message.experiment_id,
            input_ref: message.input_file,
            display_name: message.name,
            description: message.description,
            lease,
        }
    }
}

/// OCRが返す単語ごとの信頼度（0-100）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordConfidence {
    pub word: String,
    pub confidence: f32,
}

impl WordConfidence {
    pub fn new(word: impl Into<String>, confidence: f32) -> Self {
        Self {
            word: word.into(),
            confidence,
        }
    }
}

/// OCR抽出結果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrExtraction {
    pub text: String,
    pub words: Vec<WordConfidence>,
}

/// テクニックごとの評価スコア
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechniqueScore {
    pub technique_name: String,
    pub mean_embedding_similarity: f64,
    pub dictionary_accuracy: f64,
    pub mean_confidence: f64,
    pub total_words: usize,
    pub extracted_text: String,
    pub output_artifact_ref: Option<PathBuf>,
}

/// テクニック間のコサイン類似度行列
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatrix {
    pub techniques: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

/// 1ジョブ分の評価結果（勝者が先頭）
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvaluationReport {
    pub ranked: Vec<TechniqueScore>,
    pub similarity: SimilarityMatrix,
    pub failures: BTreeMap<String, String>,
    pub attempted: usize,
}

impl EvaluationReport {
    pub fn best(&self) -> Option<&TechniqueScore> {
        self.ranked.first()
    }

    /// 1つもテクニックが成功しなかったか（空集合を含む）
    pub fn is_total_failure(&self) -> bool {
        self.ranked.is_empty()
    }
}

/// 1ジョブの最終結果
#[derive(Debug, Clone)]
pub struct JobResult {
    pub partition_key: String,
    pub row_key: String,
    pub experiment_id: String,
    pub input_file: String,
    pub display_name: String,
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration: Duration,
    pub best: Option<TechniqueScore>,
    pub accuracy: f64,
    pub technique_failures: BTreeMap<String, String>,
    /// 結果コンテナにアップロードした勝者画像のオブジェクト名
    pub result_artifact: Option<String>,
}

impl JobResult {
    /// 勝者テクニック名（勝者なしは空文字列）
    pub fn technique_name(&self) -> &str {
        self.best
            .as_ref()
            .map(|score| score.technique_name.as_str())
            .unwrap_or("")
    }

    /// 結果テーブルに保存する行
    pub fn to_row(&self) -> TableRow {
        let best = self.best.as_ref();
        let mut fields = BTreeMap::new();
        fields.insert("ExperimentId".to_string(), self.experiment_id.clone().into());
        fields.insert("InputImage".to_string(), self.input_file.clone().into());
        fields.insert("Name".to_string(), self.display_name.clone().into());
        fields.insert("Description".to_string(), self.description.clone().into());
        fields.insert("StartTimeUtc".to_string(), self.start_time.to_rfc3339().into());
        fields.insert("EndTimeUtc".to_string(), self.end_time.to_rfc3339().into());
        fields.insert("DurationInSec".to_string(), self.duration.as_secs().into());
        fields.insert("Technique".to_string(), self.technique_name().into());
        fields.insert(
            "ExtractedText".to_string(),
            best.map(|s| s.extracted_text.clone()).unwrap_or_default().into(),
        );
        fields.insert(
            "CosineSimilarityMean".to_string(),
            best.map(|s| s.mean_embedding_similarity).unwrap_or(0.0).into(),
        );
        fields.insert("DictionaryAccuracy".to_string(), self.accuracy.into());
        fields.insert(
            "MeanConfidence".to_string(),
            best.map(|s| s.mean_confidence).unwrap_or(0.0).into(),
        );
        fields.insert(
            "OutputArtifact".to_string(),
            self.result_artifact.clone().unwrap_or_default().into(),
        );

        TableRow {
            partition_key: self.partition_key.clone(),
            row_key: self.row_key.clone(),
            fields,
        }
    }
}

/// 結果テーブルの1行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub partition_key: String,
    pub row_key: String,
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl TableRow {
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|value| value.as_str())
    }
}

/// データセット単位のテクニック別件数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetHistogram {
    pub experiment_id: String,
    pub counts: BTreeMap<String, usize>,
    pub total: usize,
    pub successful_count: usize,
}

impl DatasetHistogram {
    /// "Not Processed"バケットだけを持つ空のヒストグラム
    pub fn new(experiment_id: impl Into<String>) -> Self {
        let mut counts = BTreeMap::new();
        counts.insert(NOT_PROCESSED.to_string(), 0);
        Self {
            experiment_id: experiment_id.into(),
            counts,
            total: 0,
            successful_count: 0,
        }
    }

    /// 1件の結果を記録（空白・欠損は"Not Processed"）
    pub fn record(&mut self, technique: Option<&str>) {
        let bucket = match technique.map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => NOT_PROCESSED,
        };
        *self.counts.entry(bucket.to_string()).or_insert(0) += 1;
        self.total += 1;
        if bucket != NOT_PROCESSED {
            self.successful_count += 1;
        }
    }

    pub fn not_processed(&self) -> usize {
        self.counts.get(NOT_PROCESSED).copied().unwrap_or(0)
    }

    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.total - self.not_processed()) as f64 / self.total as f64
        }
    }

    /// 最多件数のテクニック（同数は名前の昇順）
    pub fn best_technique(&self) -> Option<&str> {
        self.counts
            .iter()
            .filter(|(name, count)| name.as_str() != NOT_PROCESSED && **count > 0)
            .max_by(|(a_name, a), (b_name, b)| a.cmp(b).then_with(|| b_name.cmp(a_name)))
            .map(|(name, _)| name.as_str())
    }
}
