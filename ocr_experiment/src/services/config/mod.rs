// 設定管理 - 設定ファイル・環境変数からのワーカー設定

pub mod implementations;

pub use implementations::{
    EmbeddingProviderKind, EmbeddingSettings, ExperimentConfig, FilterSettings, OcrSettings,
    ENV_PREFIX, MAX_LEASE_DURATION_SECS,
};
