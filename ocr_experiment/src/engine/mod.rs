// エンジン層 - キュー消費・評価・集計のオーケストレーション
// サービス層を組み合わせて高レベルな処理を提供

pub mod aggregator;
pub mod evaluator;
pub mod lease_manager;
pub mod runner;
pub mod scoring;
pub mod setup;
pub mod worker_loop;

// 公開API
pub use aggregator::{build_histogram, ResultAggregator};
pub use evaluator::{write_report, TechniqueEvaluator, REPORT_FILE_NAME};
pub use lease_manager::{FanOutReport, JobLeaseManager, LeaseOutcome, FAN_OUT_DISPLAY_NAME};
pub use runner::{ExperimentRunner, RunnerSettings};
pub use scoring::{load_dictionary, parse_dictionary, Dictionary};
pub use setup::{sync_setup, SetupSyncReport};
pub use worker_loop::{CycleReport, LoopState, LoopStats, NextStep, WorkerLoop};
