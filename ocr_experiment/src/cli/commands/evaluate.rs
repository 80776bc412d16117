use crate::cli::context::WorkerContext;
use crate::engine::write_report;
use crate::services::ExperimentConfig;
use anyhow::Result;
use std::path::PathBuf;

/// ローカル画像1枚に対して評価を実行し、順位をJSONで出力する（キューとストレージは使わない）
pub async fn execute_evaluate(
    config: ExperimentConfig,
    image: PathBuf,
    output: Option<PathBuf>,
    techniques: Vec<String>,
) -> Result<()> {
    if !image.is_file() {
        anyhow::bail!("Image file does not exist: {}", image.display());
    }

    let context = WorkerContext::new(config);
    let techniques = if techniques.is_empty() {
        context.config.techniques.clone()
    } else {
        techniques
    };
    let output_dir = output.unwrap_or_else(|| context.scratch.output_dir());

    let evaluator = context.build_evaluator()?;
    let report = evaluator.evaluate(&image, &techniques, &output_dir).await;
    let report_path = write_report(&report, &output_dir).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    eprintln!("📄 レポート: {}", report_path.display());
    Ok(())
}
