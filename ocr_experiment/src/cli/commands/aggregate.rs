use crate::cli::context::WorkerContext;
use crate::services::ExperimentConfig;
use anyhow::Result;

/// 永続化済みの結果を集計してヒストグラムをJSONで出力する
pub async fn execute_aggregate(config: ExperimentConfig, experiment_id: &str) -> Result<()> {
    let context = WorkerContext::new(config);
    context.scratch.prepare().await?;

    let histogram = context.build_aggregator().aggregate(experiment_id).await?;
    println!("{}", serde_json::to_string_pretty(&histogram)?);
    Ok(())
}
