// キュートランスポート層 - リース付きメッセージキューの抽象化

use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use std::time::Duration;

pub mod directory;
pub mod memory;

pub use directory::DirectoryQueue;
pub use memory::MemoryQueue;

/// トランスポートから受信した1件のメッセージ
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub message_id: String,
    /// 削除に必要な受領トークン（リースごとに変わる）
    pub receipt: String,
    pub body: String,
    pub dequeue_count: u32,
}

/// 永続キュートランスポートのトレイト
///
/// 受信したメッセージはリース期間中ほかの受信者から見えなくなり、
/// 削除されないままリースが切れると再配信される。
#[automock]
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// 最大`max_messages`件をリース付きで受信
    async fn receive(&self, max_messages: usize, lease_duration: Duration) -> Result<Vec<QueueMessage>>;

    /// リース中のメッセージを削除（受領トークンが一致する場合のみ）
    async fn delete(&self, message_id: &str, receipt: &str) -> Result<()>;

    /// メッセージを送信し、新しいメッセージIDを返す
    async fn send(&self, body: &str) -> Result<String>;
}
