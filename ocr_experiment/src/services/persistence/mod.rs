// 結果の永続化 - ジョブ結果行の表形式ストレージ

pub mod implementations;

// 公開API
pub use implementations::{JsonlResultTable, MemoryResultTable};
