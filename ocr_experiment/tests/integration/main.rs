// 統合テスト
// ローカルストレージ・ディレクトリキュー・JSONLテーブルを実際に使い、OCRと埋め込みだけを差し替える

#[path = "../fixtures/mod.rs"]
mod fixtures;

mod test_end_to_end;
mod test_error_handling;
mod test_technique_selection;
