// Worker - 単一テクニックの処理

use crate::core::{ExperimentError, OcrEngine, OcrExtraction};
use crate::services::ocr::OcrAdapter;
use crate::services::preprocessing::PreprocessingRunner;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// 1テクニック分の処理結果
#[derive(Debug)]
pub enum TechniqueOutcome {
    Success {
        technique: String,
        output_path: PathBuf,
        extraction: OcrExtraction,
        elapsed_ms: u64,
    },
    Failure {
        technique: String,
        error: ExperimentError,
    },
}

/// 前処理とOCRを1テクニック分実行
pub async fn process_single_technique<O>(
    runner: &PreprocessingRunner,
    ocr: &OcrAdapter<O>,
    image: Arc<DynamicImage>,
    input: &Path,
    technique: &str,
    output_dir: &Path,
) -> TechniqueOutcome
where
    O: OcrEngine,
{
    let start_time = Instant::now();

    let result = async {
        let output_path = runner.apply_loaded(image, input, technique, output_dir).await?;
        let extraction = ocr.extract_for(technique, &output_path).await?;
        Ok::<_, ExperimentError>((output_path, extraction))
    }
    .await;

    match result {
        Ok((output_path, extraction)) => TechniqueOutcome::Success {
            technique: technique.to_string(),
            output_path,
            extraction,
            elapsed_ms: start_time.elapsed().as_millis() as u64,
        },
        Err(error) => TechniqueOutcome::Failure {
            technique: technique.to_string(),
            error,
        },
    }
}
