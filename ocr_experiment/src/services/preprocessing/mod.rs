// 前処理ランナー - 入力画像にテクニックを適用して出力画像を作る

pub mod filters;

pub use filters::{Filter, FilterRegistry, BUILTIN_TECHNIQUES};

use crate::core::{ExperimentError, ExperimentResult, TechniqueStage};
use anyhow::Context;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 入力画像にフィルターを適用し、テクニックごとの出力画像を保存する
#[derive(Debug, Clone)]
pub struct PreprocessingRunner {
    registry: Arc<FilterRegistry>,
}

impl PreprocessingRunner {
    pub fn new(registry: FilterRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// 出力画像のパス（`{入力名}-{テクニック}.png`）
    pub fn output_path(input: &Path, technique: &str, output_dir: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_string());
        output_dir.join(format!("{stem}-{technique}.png"))
    }

    /// 入力画像を読み込む（ブロッキング処理を別スレッドで）
    pub async fn load_input(input: &Path) -> anyhow::Result<Arc<DynamicImage>> {
        let path = input.to_path_buf();
        let image = tokio::task::spawn_blocking(move || image::open(&path))
            .await
            .context("Failed to spawn blocking task for image loading")?
            .with_context(|| format!("Failed to load image: {}", input.display()))?;
        Ok(Arc::new(image))
    }

    /// 読み込み済み画像に1テクニックを適用して保存
    pub async fn apply_loaded(
        &self,
        image: Arc<DynamicImage>,
        input: &Path,
        technique: &str,
        output_dir: &Path,
    ) -> ExperimentResult<PathBuf> {
        let filter = self.registry.get(technique).ok_or_else(|| {
            ExperimentError::technique(
                technique,
                TechniqueStage::Lookup,
                anyhow::anyhow!("未登録のテクニックです: {technique}"),
            )
        })?;

        let output = Self::output_path(input, technique, output_dir);
        let target = output.clone();
        let result = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let transformed = filter(&image);
            transformed
                .save(&target)
                .with_context(|| format!("Failed to save image: {}", target.display()))
        })
        .await;

        match result {
            Ok(Ok(())) => Ok(output),
            Ok(Err(e)) => Err(ExperimentError::technique(technique, TechniqueStage::Transform, e)),
            Err(join_error) => Err(ExperimentError::technique(
                technique,
                TechniqueStage::Transform,
                anyhow::anyhow!("変換タスクが異常終了しました: {join_error}"),
            )),
        }
    }
}
