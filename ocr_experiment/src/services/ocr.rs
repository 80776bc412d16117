// OCRアダプター - 外部OCRエンジンの呼び出しと結果の整形

use crate::core::{ExperimentError, ExperimentResult, OcrEngine, OcrExtraction, TechniqueStage, WordConfidence};
use crate::services::config::OcrSettings;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// TSV出力で単語を表す行のレベル
const WORD_LEVEL: &str = "5";

/// `tesseract` CLIを実行するOCRエンジン
#[derive(Debug, Clone)]
pub struct TesseractCliEngine {
    settings: OcrSettings,
    tessdata_dir: Option<PathBuf>,
}

impl TesseractCliEngine {
    pub fn new(settings: OcrSettings) -> Self {
        Self {
            settings,
            tessdata_dir: None,
        }
    }

    /// 学習データのディレクトリを指定（setupコンテナの同期先）
    pub fn with_tessdata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tessdata_dir = Some(dir.into());
        self
    }
}

#[async_trait]
impl OcrEngine for TesseractCliEngine {
    async fn extract(&self, image_path: &Path) -> Result<OcrExtraction> {
        let mut command = tokio::process::Command::new(&self.settings.binary);
        command
            .arg(image_path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.settings.language)
            .arg("--psm")
            .arg(self.settings.psm.to_string());
        if let Some(dir) = &self.tessdata_dir {
            if dir.is_dir() {
                command.arg("--tessdata-dir").arg(dir);
            }
        }
        command.arg("tsv");

        let output = command
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.settings.binary))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{} failed for {}: {}",
                self.settings.binary,
                image_path.display(),
                stderr.trim()
            );
        }

        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }

    fn engine_name(&self) -> &'static str {
        "tesseract"
    }
}

/// tesseractのTSV出力を解析
///
/// 列: level page_num block_num par_num line_num word_num left top width height conf text
pub fn parse_tsv(tsv: &str) -> OcrExtraction {
    let mut words = Vec::new();
    let mut lines: Vec<String> = Vec::new();
    let mut current_line: Option<(String, String, String, String)> = None;

    for row in tsv.lines().skip(1) {
        let columns: Vec<&str> = row.split('\t').collect();
        if columns.len() < 12 || columns[0] != WORD_LEVEL {
            continue;
        }

        let word = columns[11].trim();
        if word.is_empty() {
            continue;
        }
        let confidence = columns[10].trim().parse::<f32>().unwrap_or(-1.0);

        let line_key = (
            columns[1].to_string(),
            columns[2].to_string(),
            columns[3].to_string(),
            columns[4].to_string(),
        );
        if current_line.as_ref() == Some(&line_key) {
            if let Some(line) = lines.last_mut() {
                line.push(' ');
                line.push_str(word);
            }
        } else {
            lines.push(word.to_string());
            current_line = Some(line_key);
        }

        words.push(WordConfidence::new(word, confidence));
    }

    OcrExtraction {
        text: lines.join("\n"),
        words,
    }
}

/// テクニックごとの画像に対してOCRを実行するアダプター
pub struct OcrAdapter<O: OcrEngine> {
    engine: Arc<O>,
}

impl<O: OcrEngine> Clone for OcrAdapter<O> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<O: OcrEngine> OcrAdapter<O> {
    pub fn new(engine: O) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }

    pub fn from_arc(engine: Arc<O>) -> Self {
        Self { engine }
    }

    /// 1テクニック分のOCR（失敗はテクニック単位のエラー）
    pub async fn extract_for(&self, technique: &str, image_path: &Path) -> ExperimentResult<OcrExtraction> {
        self.engine
            .extract(image_path)
            .await
            .map_err(|e| ExperimentError::technique(technique, TechniqueStage::Ocr, e))
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.engine_name()
    }
}
