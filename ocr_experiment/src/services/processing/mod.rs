// テクニック単位の処理
// 前処理 → OCR → 採点までを1テクニック分まとめて実行

pub mod worker;

// 公開API
pub use worker::{process_single_technique, TechniqueOutcome};
