// 画像前処理テクニックのOCR比較実験ワーカー
//
// レイヤー構成: core（型・トレイト・エラー）→ queue / storage（外部トランスポート）
// → services（前処理・OCR・埋め込み・永続化）→ engine（評価とワーカーループ）→ cli

pub mod cli;
pub mod core;
pub mod engine;
pub mod queue;
pub mod services;
pub mod storage;

pub use crate::core::{ExperimentError, ExperimentResult};
pub use crate::engine::{TechniqueEvaluator, WorkerLoop};
pub use crate::services::ExperimentConfig;
