// サービス層 - 機能別のビジネスロジック
// 各サービスは特定の責任を持ち、疎結合で設計されている

pub mod charts;
pub mod config;
pub mod embedding;
pub mod ocr;
pub mod persistence;
pub mod preprocessing;
pub mod processing;
pub mod scratch;

// 公開API - 各サービスの主要機能を明示的にエクスポート
pub use charts::JsonChartRenderer;
pub use config::ExperimentConfig;
pub use embedding::{create_embedding_provider, EmbeddingAdapter, HashingEmbeddingProvider, HttpEmbeddingProvider};
pub use ocr::{OcrAdapter, TesseractCliEngine};
pub use persistence::{JsonlResultTable, MemoryResultTable};
pub use preprocessing::{FilterRegistry, PreprocessingRunner};
pub use processing::{process_single_technique, TechniqueOutcome};
pub use scratch::ScratchArea;
