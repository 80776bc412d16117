use anyhow::Result;
use clap::Parser;
use ocr_experiment::cli::{
    context::load_config, execute_aggregate, execute_enqueue, execute_evaluate, execute_run, Cli, Commands,
};
use ocr_experiment::core::RequestMessage;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Ctrl+Cでキャンセルトークンを発火する
fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested; finishing the current cycle");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    // .envは任意
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, severity = e.severity().as_str(), "Invalid configuration");
            return Err(e.into());
        }
    };

    match cli.command {
        Commands::Run { drain } => {
            let cancel = CancellationToken::new();
            spawn_shutdown_listener(cancel.clone());
            execute_run(config, drain, cancel).await
        }
        Commands::Enqueue {
            experiment_id,
            input_file,
            name,
            description,
        } => execute_enqueue(config, RequestMessage::new(experiment_id, input_file, name, description)).await,
        Commands::Aggregate { experiment_id } => execute_aggregate(config, &experiment_id).await,
        Commands::Evaluate {
            image,
            output,
            techniques,
        } => execute_evaluate(config, image, output, techniques).await,
    }
}
