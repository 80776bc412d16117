// メモリ内キュー実装（テスト・単発実行用）

use super::{QueueMessage, QueueTransport};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    body: String,
    receipt: Option<String>,
    visible_at: Instant,
    dequeue_count: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    messages: Vec<StoredMessage>,
    deleted: Vec<String>,
    sent: Vec<String>,
    next_id: u64,
    fail_receive: bool,
    fail_delete: bool,
    fail_send_containing: Option<String>,
}

/// メモリ内のリース付きキュー
///
/// `Clone`は同じキューを共有する。テストではクローンを保持して中身を検査する。
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    state: Arc<Mutex<QueueState>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_locked(state: &mut QueueState, body: &str) -> String {
        state.next_id += 1;
        let id = format!("msg-{:06}", state.next_id);
        state.messages.push(StoredMessage {
            id: id.clone(),
            body: body.to_string(),
            receipt: None,
            visible_at: Instant::now(),
            dequeue_count: 0,
        });
        id
    }

    /// テスト用：送信記録を残さずにメッセージを積む
    pub fn push(&self, body: &str) -> String {
        let mut state = self.state.lock().unwrap();
        Self::push_locked(&mut state, body)
    }

    /// 削除されていないメッセージ数（リース中を含む）
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 現在受信可能なメッセージ数
    pub fn visible_len(&self) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.visible_at <= now)
            .count()
    }

    /// テスト用：削除されたメッセージIDの一覧
    pub fn deleted_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// テスト用：`send`で送信された本文の一覧
    pub fn sent_bodies(&self) -> Vec<String> {
        self.state.lock().unwrap().sent.clone()
    }

    /// テスト用：残っているメッセージの本文
    pub fn bodies(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .messages
            .iter()
            .map(|m| m.body.clone())
            .collect()
    }

    /// テスト用：全リースを期限切れにする
    pub fn expire_leases(&self) {
        let now = Instant::now();
        for message in self.state.lock().unwrap().messages.iter_mut() {
            if message.visible_at > now {
                message.visible_at = now;
            }
        }
    }

    pub fn set_fail_receive(&self, fail: bool) {
        self.state.lock().unwrap().fail_receive = fail;
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.state.lock().unwrap().fail_delete = fail;
    }

    /// テスト用：本文に指定文字列を含む送信を失敗させる
    pub fn fail_send_containing(&self, needle: impl Into<String>) {
        self.state.lock().unwrap().fail_send_containing = Some(needle.into());
    }
}

#[async_trait]
impl QueueTransport for MemoryQueue {
    async fn receive(&self, max_messages: usize, lease_duration: Duration) -> Result<Vec<QueueMessage>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_receive {
            anyhow::bail!("memory queue: receive failure injected");
        }

        let now = Instant::now();
        let mut received = Vec::new();
        for message in state.messages.iter_mut() {
            if received.len() >= max_messages {
                break;
            }
            if message.visible_at > now {
                continue;
            }

            let receipt = Uuid::new_v4().to_string();
            message.receipt = Some(receipt.clone());
            message.visible_at = now + lease_duration;
            message.dequeue_count += 1;
            received.push(QueueMessage {
                message_id: message.id.clone(),
                receipt,
                body: message.body.clone(),
                dequeue_count: message.dequeue_count,
            });
        }
        Ok(received)
    }

    async fn delete(&self, message_id: &str, receipt: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_delete {
            anyhow::bail!("memory queue: delete failure injected");
        }

        let position = state
            .messages
            .iter()
            .position(|m| m.id == message_id)
            .ok_or_else(|| anyhow::anyhow!("Message not found: {message_id}"))?;
        if state.messages[position].receipt.as_deref() != Some(receipt) {
            anyhow::bail!("Receipt mismatch for message: {message_id}");
        }

        state.messages.remove(position);
        state.deleted.push(message_id.to_string());
        Ok(())
    }

    async fn send(&self, body: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if let Some(needle) = &state.fail_send_containing {
            if body.contains(needle.as_str()) {
                anyhow::bail!("memory queue: send failure injected");
            }
        }

        state.sent.push(body.to_string());
        Ok(Self::push_locked(&mut state, body))
    }
}
