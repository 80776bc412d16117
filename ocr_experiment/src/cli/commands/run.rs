use crate::cli::context::WorkerContext;
use crate::engine::sync_setup;
use crate::services::ExperimentConfig;
use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// ワーカーループを実行する
///
/// `drain`が真ならキューが空になった時点で終了する。
pub async fn execute_run(config: ExperimentConfig, drain: bool, cancel: CancellationToken) -> Result<()> {
    let context = WorkerContext::new(config);
    context.scratch.prepare().await?;

    // 辞書と学習データは評価エンジンの構築前に揃える
    let setup = sync_setup(
        context.store.as_ref(),
        &context.config.setup_container,
        &context.scratch.setup_dir(),
    )
    .await;
    if setup.listing_failed {
        info!(container = %context.config.setup_container, "Continuing without setup files");
    }

    let worker = context.build_worker()?;
    let stats = if drain {
        worker.drain().await?
    } else {
        worker.run(cancel).await?
    };

    println!("📊 処理結果:");
    println!("   - サイクル数: {}", stats.cycles);
    println!("   - 処理ジョブ数: {}", stats.jobs_processed);
    println!("   - 失敗ジョブ数: {}", stats.jobs_failed);
    println!("   - フォルダ展開数: {}", stats.expansions);
    println!("   - 集計回数: {}", stats.aggregations);
    Ok(())
}
