use crate::cli::context::WorkerContext;
use crate::core::RequestMessage;
use crate::services::ExperimentConfig;
use anyhow::Result;

/// リクエストメッセージを1件キューに送る
pub async fn execute_enqueue(config: ExperimentConfig, message: RequestMessage) -> Result<()> {
    let context = WorkerContext::new(config);
    let lease_manager = context.build_lease_manager()?;
    let message_id = lease_manager.enqueue(&message).await?;

    println!("📨 キューに追加しました: {message_id}");
    println!("   - 実験ID: {}", message.experiment_id);
    println!("   - 入力: {}", message.input_file);
    Ok(())
}
