// ワーカー設定の具象実装

use crate::core::{ExperimentError, ExperimentResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 環境変数による上書きのプレフィックス
pub const ENV_PREFIX: &str = "OCR_EXPERIMENT_";

/// リース期間の上限（最悪ケースの処理時間、約17分）
pub const MAX_LEASE_DURATION_SECS: u64 = 1020;

/// OCRエンジン（tesseract CLI）の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    pub binary: String,
    pub language: String,
    /// ページ分割モード
    pub psm: u8,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            language: "eng".to_string(),
            psm: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    #[default]
    Hashing,
    Http,
}

/// 埋め込みプロバイダーの設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProviderKind,
    pub dimensions: usize,
    pub endpoint: Option<String>,
    pub model: Option<String>,
    /// APIキーを読む環境変数名
    pub api_key_env: Option<String>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Hashing,
            dimensions: 256,
            endpoint: None,
            model: None,
            api_key_env: None,
        }
    }
}

/// パラメーター付きフィルターの設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub rotation_degrees: f32,
    pub target_dpi: u32,
    /// 入力画像の想定DPI
    pub source_dpi: u32,
    pub max_dimension: u32,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            rotation_degrees: 90.0,
            target_dpi: 300,
            source_dpi: 96,
            max_dimension: 10_000,
        }
    }
}

/// ワーカー全体の設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// 結果行のパーティションキー
    pub group_id: String,
    /// ローカルオブジェクトストレージのルート
    pub storage_root: PathBuf,
    #[serde(default)]
    pub queue_dir: Option<PathBuf>,
    #[serde(default = "default_training_container")]
    pub training_container: String,
    #[serde(default = "default_result_container")]
    pub result_container: String,
    #[serde(default = "default_setup_container")]
    pub setup_container: String,
    #[serde(default = "default_result_table")]
    pub result_table: String,
    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
    /// 評価するテクニック名（空も可）
    pub techniques: Vec<String>,
    #[serde(default = "default_lease_duration_secs")]
    pub lease_duration_secs: u64,
    #[serde(default = "default_receive_timeout_secs")]
    pub receive_timeout_secs: u64,
    #[serde(default = "default_idle_interval_secs")]
    pub idle_interval_secs: u64,
    #[serde(default = "default_max_concurrent_techniques")]
    pub max_concurrent_techniques: usize,
    /// setupディレクトリ内の参照辞書ファイル名
    #[serde(default = "default_dictionary_file")]
    pub dictionary_file: String,
    #[serde(default)]
    pub ocr: OcrSettings,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub filters: FilterSettings,
}

fn default_training_container() -> String {
    "training-images".to_string()
}

fn default_result_container() -> String {
    "result-images".to_string()
}

fn default_setup_container() -> String {
    "setup".to_string()
}

fn default_result_table() -> String {
    "results".to_string()
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("scratch")
}

fn default_lease_duration_secs() -> u64 {
    MAX_LEASE_DURATION_SECS
}

fn default_receive_timeout_secs() -> u64 {
    30
}

fn default_idle_interval_secs() -> u64 {
    5
}

fn default_max_concurrent_techniques() -> usize {
    num_cpus::get().max(1)
}

fn default_dictionary_file() -> String {
    "dictionary.txt".to_string()
}

impl ExperimentConfig {
    pub fn new(group_id: impl Into<String>, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            group_id: group_id.into(),
            storage_root: storage_root.into(),
            queue_dir: None,
            training_container: default_training_container(),
            result_container: default_result_container(),
            setup_container: default_setup_container(),
            result_table: default_result_table(),
            scratch_dir: default_scratch_dir(),
            techniques: Vec::new(),
            lease_duration_secs: default_lease_duration_secs(),
            receive_timeout_secs: default_receive_timeout_secs(),
            idle_interval_secs: default_idle_interval_secs(),
            max_concurrent_techniques: default_max_concurrent_techniques(),
            dictionary_file: default_dictionary_file(),
            ocr: OcrSettings::default(),
            embedding: EmbeddingSettings::default(),
            filters: FilterSettings::default(),
        }
    }

    pub fn with_techniques<I, S>(mut self, techniques: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.techniques = techniques.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_scratch_dir(mut self, scratch_dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = scratch_dir.into();
        self
    }

    pub fn with_queue_dir(mut self, queue_dir: impl Into<PathBuf>) -> Self {
        self.queue_dir = Some(queue_dir.into());
        self
    }

    pub fn with_lease_duration_secs(mut self, secs: u64) -> Self {
        self.lease_duration_secs = secs;
        self
    }

    pub fn with_idle_interval_secs(mut self, secs: u64) -> Self {
        self.idle_interval_secs = secs;
        self
    }

    pub fn with_max_concurrent_techniques(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent_techniques = max_concurrent;
        self
    }

    pub fn with_embedding(mut self, embedding: EmbeddingSettings) -> Self {
        self.embedding = embedding;
        self
    }

    /// JSON設定ファイルを読み込み、環境変数で上書きして検証
    pub fn from_file(path: &Path) -> ExperimentResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExperimentError::configuration(format!("設定ファイルを読み込めません {}: {e}", path.display()))
        })?;
        let mut config = Self::from_json(&content)?;
        config.apply_env_overrides_from(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> ExperimentResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| ExperimentError::configuration(format!("設定ファイルの形式が不正です: {e}")))
    }

    /// `OCR_EXPERIMENT_*`環境変数による上書き
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.trim().is_empty());

        if let Some(value) = var("GROUP_ID") {
            self.group_id = value;
        }
        if let Some(value) = var("STORAGE_ROOT") {
            self.storage_root = PathBuf::from(value);
        }
        if let Some(value) = var("QUEUE_DIR") {
            self.queue_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = var("SCRATCH_DIR") {
            self.scratch_dir = PathBuf::from(value);
        }
        if let Some(value) = var("EMBEDDING_ENDPOINT") {
            self.embedding.endpoint = Some(value);
        }
    }

    /// 起動時の検証（失敗は致命的な設定エラー）
    pub fn validate(&self) -> ExperimentResult<()> {
        if self.group_id.trim().is_empty() {
            return Err(ExperimentError::configuration("group_id が空です"));
        }
        if self.storage_root.as_os_str().is_empty() {
            return Err(ExperimentError::configuration("storage_root が空です"));
        }
        if !(1..=MAX_LEASE_DURATION_SECS).contains(&self.lease_duration_secs) {
            return Err(ExperimentError::configuration(format!(
                "lease_duration_secs は 1..={MAX_LEASE_DURATION_SECS} の範囲で指定してください: {}",
                self.lease_duration_secs
            )));
        }
        if self.receive_timeout_secs == 0 {
            return Err(ExperimentError::configuration("receive_timeout_secs は1以上が必要です"));
        }
        if self.idle_interval_secs == 0 {
            return Err(ExperimentError::configuration("idle_interval_secs は1以上が必要です"));
        }
        if self.max_concurrent_techniques == 0 {
            return Err(ExperimentError::configuration("max_concurrent_techniques は1以上が必要です"));
        }
        for container in [&self.training_container, &self.result_container, &self.setup_container] {
            if container.trim().is_empty() {
                return Err(ExperimentError::configuration("コンテナ名が空です"));
            }
        }

        let mut seen = HashSet::new();
        for technique in &self.techniques {
            if technique.trim().is_empty() {
                return Err(ExperimentError::configuration("空のテクニック名は指定できません"));
            }
            if !seen.insert(technique.as_str()) {
                return Err(ExperimentError::configuration(format!(
                    "テクニック名が重複しています: {technique}"
                )));
            }
        }

        if self.embedding.dimensions == 0 {
            return Err(ExperimentError::configuration("embedding.dimensions は1以上が必要です"));
        }
        if self.embedding.provider == EmbeddingProviderKind::Http && self.embedding.endpoint.is_none() {
            return Err(ExperimentError::configuration(
                "embedding.provider = http には endpoint が必要です",
            ));
        }
        Ok(())
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_secs)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.queue_dir
            .clone()
            .unwrap_or_else(|| self.storage_root.join("queue"))
    }

    pub fn table_dir(&self) -> PathBuf {
        self.storage_root.join("tables")
    }
}
