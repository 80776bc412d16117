use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ocr_experiment")]
#[command(about = "Queue-driven worker that finds the best OCR preprocessing technique per image")]
#[command(version)]
pub struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, global = true, default_value = "config.json")]
    pub config: PathBuf,

    /// Log level filter (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Consume the request queue until interrupted
    Run {
        /// Stop once the queue is drained instead of idling
        #[arg(long)]
        drain: bool,
    },

    /// Send one request message to the queue
    Enqueue {
        /// Experiment (dataset) identifier
        experiment_id: String,

        /// Object name of an image, or a folder prefix to fan out
        input_file: String,

        /// Display name stored with the result
        #[arg(short, long, default_value = "")]
        name: String,

        /// Free-form description stored with the result
        #[arg(short, long, default_value = "")]
        description: String,
    },

    /// Aggregate persisted results of one experiment into a histogram
    Aggregate {
        /// Experiment (dataset) identifier
        experiment_id: String,
    },

    /// Evaluate the configured techniques against one local image
    Evaluate {
        /// Local image file
        image: PathBuf,

        /// Directory for transformed images and the report
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Technique to evaluate (repeatable, defaults to the configured set)
        #[arg(short, long = "technique")]
        techniques: Vec<String>,
    },
}
