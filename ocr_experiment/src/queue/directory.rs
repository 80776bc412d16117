// ディレクトリベースの永続キュー実装
// 1メッセージ = 1 JSONファイル。リース情報もファイル内に保持する

use super::{QueueMessage, QueueTransport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessageRecord {
    id: String,
    body: String,
    enqueued_at: DateTime<Utc>,
    visible_at: DateTime<Utc>,
    receipt: Option<String>,
    dequeue_count: u32,
}

/// ディレクトリ上のリース付きキュー
///
/// メッセージIDは送信時刻で始まるため、ファイル名順がそのまま送信順になる。
/// リースの取得はファイルの読み込みと書き戻しで行うため、プロセス間では排他されない。
/// 1つのキューディレクトリを消費するワーカープロセスは1つに限る。
#[derive(Debug, Clone)]
pub struct DirectoryQueue {
    dir: PathBuf,
}

impl DirectoryQueue {
    /// キューディレクトリを作成して開く
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create queue directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(dir: &Path, id: &str) -> PathBuf {
        dir.join(format!("{id}.json"))
    }

    /// メッセージファイルを名前順に列挙（書き込み途中の一時ファイルは除外）
    fn message_files(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read queue directory: {}", dir.display()))?
        {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn read_record(path: &Path) -> Result<MessageRecord> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read message file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Corrupted message file: {}", path.display()))
    }

    /// 一時ファイルに書いてからリネームする
    fn write_record(dir: &Path, record: &MessageRecord) -> Result<()> {
        let mut temp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in: {}", dir.display()))?;
        serde_json::to_writer(&mut temp, record)?;
        temp.flush()?;
        temp.persist(Self::record_path(dir, &record.id))
            .with_context(|| format!("Failed to persist message: {}", record.id))?;
        Ok(())
    }

    fn receive_blocking(dir: &Path, max_messages: usize, lease: chrono::Duration) -> Result<Vec<QueueMessage>> {
        let now = Utc::now();
        let mut received = Vec::new();

        for path in Self::message_files(dir)? {
            if received.len() >= max_messages {
                break;
            }

            let mut record = match Self::read_record(&path) {
                Ok(record) => record,
                Err(e) => {
                    // 削除と競合した場合などは次のファイルへ
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable message file");
                    continue;
                }
            };
            if record.visible_at > now {
                continue;
            }

            let receipt = Uuid::new_v4().to_string();
            record.receipt = Some(receipt.clone());
            record.visible_at = now + lease;
            record.dequeue_count += 1;
            Self::write_record(dir, &record)?;

            received.push(QueueMessage {
                message_id: record.id,
                receipt,
                body: record.body,
                dequeue_count: record.dequeue_count,
            });
        }

        Ok(received)
    }

    fn delete_blocking(dir: &Path, message_id: &str, receipt: &str) -> Result<()> {
        let path = Self::record_path(dir, message_id);
        let record = Self::read_record(&path)?;
        if record.receipt.as_deref() != Some(receipt) {
            anyhow::bail!("Receipt mismatch for message: {message_id}");
        }
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to delete message file: {}", path.display()))
    }

    fn send_blocking(dir: &Path, body: String) -> Result<String> {
        let now = Utc::now();
        let id = format!(
            "{:020}-{}",
            now.timestamp_nanos_opt().unwrap_or_default(),
            Uuid::new_v4().simple()
        );
        let record = MessageRecord {
            id: id.clone(),
            body,
            enqueued_at: now,
            visible_at: now,
            receipt: None,
            dequeue_count: 0,
        };
        Self::write_record(dir, &record)?;
        Ok(id)
    }
}

#[async_trait]
impl QueueTransport for DirectoryQueue {
    async fn receive(&self, max_messages: usize, lease_duration: Duration) -> Result<Vec<QueueMessage>> {
        let dir = self.dir.clone();
        let lease = chrono::Duration::from_std(lease_duration).context("Lease duration out of range")?;
        tokio::task::spawn_blocking(move || Self::receive_blocking(&dir, max_messages, lease))
            .await
            .context("Queue receive task panicked")?
    }

    async fn delete(&self, message_id: &str, receipt: &str) -> Result<()> {
        let dir = self.dir.clone();
        let message_id = message_id.to_string();
        let receipt = receipt.to_string();
        tokio::task::spawn_blocking(move || Self::delete_blocking(&dir, &message_id, &receipt))
            .await
            .context("Queue delete task panicked")?
    }

    async fn send(&self, body: &str) -> Result<String> {
        let dir = self.dir.clone();
        let body = body.to_string();
        tokio::task::spawn_blocking(move || Self::send_blocking(&dir, body))
            .await
            .context("Queue send task panicked")?
    }
}
