// CLI層 - コマンドライン引数の定義と処理
// ユーザーインターフェースとワーカーの組み立ての橋渡し

pub mod args;
pub mod commands;
pub mod context;

// 公開API
pub use args::*;
pub use commands::*;
