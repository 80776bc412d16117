// 結果テーブルの具象実装

use crate::core::{ResultTable, TableRow};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

type RowKey = (String, String);

/// メモリ内の結果テーブル実装（テスト用および開発用）
#[derive(Debug, Clone, Default)]
pub struct MemoryResultTable {
    tables: Arc<Mutex<BTreeMap<String, BTreeMap<RowKey, TableRow>>>>,
    fail_writes: Arc<Mutex<bool>>,
}

impl MemoryResultTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// テスト用：テーブルの全行を取得
    pub fn rows(&self, table: &str) -> Vec<TableRow> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// テスト用：保存された行数
    pub fn row_count(&self, table: &str) -> usize {
        self.rows(table).len()
    }

    /// テスト用：書き込みを失敗させる
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap() = fail;
    }
}

#[async_trait]
impl ResultTable for MemoryResultTable {
    async fn upsert_row(&self, table: &str, row: &TableRow) -> Result<()> {
        if *self.fail_writes.lock().unwrap() {
            anyhow::bail!("memory table: write failure injected");
        }
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .insert((row.partition_key.clone(), row.row_key.clone()), row.clone());
        Ok(())
    }

    async fn query_all(&self, table: &str) -> Result<Vec<TableRow>> {
        Ok(self.rows(table))
    }
}

/// JSON Lines形式の結果テーブル実装
///
/// テーブルごとに `{table}.jsonl` を持ち、1行 = 1レコード。
/// upsertはファイル全体を書き直す（一時ファイル経由でアトミックに置換）。
#[derive(Debug, Clone)]
pub struct JsonlResultTable {
    dir: PathBuf,
    write_lock: Arc<AsyncMutex<()>>,
}

impl JsonlResultTable {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            write_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{table}.jsonl"))
    }

    async fn read_rows(path: &Path) -> Result<Vec<TableRow>> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read table: {}", path.display()))
            }
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(index, line)| {
                serde_json::from_str::<TableRow>(line)
                    .with_context(|| format!("Invalid row {} in {}", index + 1, path.display()))
            })
            .collect()
    }

    fn write_rows(dir: &Path, path: &Path, rows: &[TableRow]) -> Result<()> {
        let mut temp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in: {}", dir.display()))?;
        for row in rows {
            serde_json::to_writer(&mut temp, row)?;
            temp.write_all(b"\n")?;
        }
        temp.flush()?;
        temp.persist(path)
            .with_context(|| format!("Failed to replace table: {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl ResultTable for JsonlResultTable {
    async fn upsert_row(&self, table: &str, row: &TableRow) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create table directory: {}", self.dir.display()))?;

        let path = self.table_path(table);
        let mut rows = Self::read_rows(&path).await?;
        match rows
            .iter_mut()
            .find(|r| r.partition_key == row.partition_key && r.row_key == row.row_key)
        {
            Some(existing) => *existing = row.clone(),
            None => rows.push(row.clone()),
        }

        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || Self::write_rows(&dir, &path, &rows))
            .await
            .context("Table write task panicked")?
    }

    async fn query_all(&self, table: &str) -> Result<Vec<TableRow>> {
        Self::read_rows(&self.table_path(table)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn row(partition_key: &str, row_key: &str, technique: &str) -> TableRow {
        let mut fields = BTreeMap::new();
        fields.insert("ExperimentId".to_string(), "E1".into());
        fields.insert("Technique".to_string(), technique.into());
        TableRow {
            partition_key: partition_key.to_string(),
            row_key: row_key.to_string(),
            fields,
        }
    }

    #[tokio::test]
    async fn test_memory_table_upsert_replaces_by_key() {
        let table = MemoryResultTable::new();
        table.upsert_row("results", &row("lab", "r1", "canny")).await.unwrap();
        table.upsert_row("results", &row("lab", "r1", "mirror")).await.unwrap();
        table.upsert_row("results", &row("lab", "r2", "invert")).await.unwrap();

        let rows = table.query_all("results").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_str("Technique"), Some("mirror"));
        assert!(table.query_all("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_table_failure_injection() {
        let table = MemoryResultTable::new();
        table.set_fail_writes(true);
        assert!(table.upsert_row("results", &row("lab", "r1", "canny")).await.is_err());
        assert_eq!(table.row_count("results"), 0);
    }

    #[tokio::test]
    async fn test_jsonl_table_upsert_replaces_by_key() {
        let temp_dir = tempdir().unwrap();
        let table = JsonlResultTable::new(temp_dir.path().join("tables"));

        table.upsert_row("results", &row("lab", "r1", "canny")).await.unwrap();
        table.upsert_row("results", &row("lab", "r2", "invert")).await.unwrap();
        table.upsert_row("results", &row("lab", "r1", "grayscale")).await.unwrap();

        let rows = table.query_all("results").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row_key, "r1");
        assert_eq!(rows[0].get_str("Technique"), Some("grayscale"));

        let content = std::fs::read_to_string(table.table_path("results")).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_jsonl_table_missing_file_is_empty() {
        let temp_dir = tempdir().unwrap();
        let table = JsonlResultTable::new(temp_dir.path());
        assert!(table.query_all("results").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_jsonl_table_rejects_corrupted_rows() {
        let temp_dir = tempdir().unwrap();
        let table = JsonlResultTable::new(temp_dir.path());
        std::fs::write(table.table_path("results"), "{broken\n").unwrap();

        assert!(table.query_all("results").await.is_err());
    }
}
