// ジョブリース管理 - キューからの受信・フォルダ展開・コミット
//
// 状態遷移: Idle → Leased → (フォルダのみ Expanding) → Delivered | Committed | Abandoned
// サイクルをまたぐ状態は持たない。「直前にジョブを処理したか」は呼び出し側が管理する。

use crate::core::{ExperimentError, ExperimentResult, JobRequest, LeaseHandle, RequestMessage};
use crate::queue::{QueueMessage, QueueTransport};
use crate::storage::{is_image_name, ObjectStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 展開で生成するメッセージの表示名
pub const FAN_OUT_DISPLAY_NAME: &str = "Dataset";

/// フォルダ展開の結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanOutReport {
    pub folder: String,
    /// 送信に成功したオブジェクト名
    pub enqueued: Vec<String>,
    /// 送信に失敗したオブジェクト名（ロールバックしない）
    pub failed: Vec<String>,
    /// フォルダの一覧取得自体に失敗した
    pub listing_failed: bool,
    pub parent_committed: bool,
}

/// 1回のリース試行の結果
#[derive(Debug, Clone, PartialEq)]
pub enum LeaseOutcome {
    /// 単一画像のジョブ（リース保持中）
    Delivered(JobRequest),
    /// キューが空
    Empty,
    /// フォルダを個別メッセージに展開した
    Expanded(FanOutReport),
    /// 本文が解析できない（触らずにリース切れでの再配信に任せる）
    Malformed { message_id: String },
    /// トランスポートの一時的な失敗
    TransportFailed,
}

impl LeaseOutcome {
    pub fn into_request(self) -> Option<JobRequest> {
        match self {
            Self::Delivered(request) => Some(request),
            _ => None,
        }
    }
}

/// キュー消費の状態機械
pub struct JobLeaseManager<Q, S>
where
    Q: QueueTransport,
    S: ObjectStore,
{
    queue: Arc<Q>,
    store: Arc<S>,
    training_container: String,
    lease_duration: Duration,
    receive_timeout: Duration,
}

impl<Q, S> JobLeaseManager<Q, S>
where
    Q: QueueTransport,
    S: ObjectStore,
{
    pub fn new(queue: Arc<Q>, store: Arc<S>, training_container: impl Into<String>) -> Self {
        Self {
            queue,
            store,
            training_container: training_container.into(),
            lease_duration: Duration::from_secs(crate::services::config::MAX_LEASE_DURATION_SECS),
            receive_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    pub fn with_receive_timeout(mut self, receive_timeout: Duration) -> Self {
        self.receive_timeout = receive_timeout;
        self
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// メッセージを最大1件リースし、入力を分類する
    pub async fn try_lease_next(&self) -> LeaseOutcome {
        let message = match self.receive_one().await {
            Ok(Some(message)) => message,
            Ok(None) => return LeaseOutcome::Empty,
            Err(e) => {
                warn!(error = %e, severity = e.severity().as_str(), "Failed to receive from queue");
                return LeaseOutcome::TransportFailed;
            }
        };

        let request = match RequestMessage::parse(&message.body) {
            Ok(parsed) => JobRequest::from_message(
                parsed,
                LeaseHandle::new(message.message_id.clone(), message.receipt.clone()),
            ),
            Err(reason) => {
                let error = ExperimentError::malformed(message.message_id.as_str(), reason);
                warn!(
                    message_id = %message.message_id,
                    dequeue_count = message.dequeue_count,
                    error = %error,
                    "Leaving malformed message for redelivery"
                );
                return LeaseOutcome::Malformed {
                    message_id: message.message_id,
                };
            }
        };

        if is_image_name(&request.input_ref) {
            info!(
                experiment_id = %request.experiment_id,
                message_id = %request.lease.message_id,
                input = %request.input_ref,
                "Job delivered"
            );
            return LeaseOutcome::Delivered(request);
        }

        LeaseOutcome::Expanded(self.expand_folder(&request).await)
    }

    /// 1件受信する。タイムアウト時に受信側で既にリースされていたメッセージは、
    /// リース期限が切れるまで見えず、その後再配信される
    async fn receive_one(&self) -> ExperimentResult<Option<QueueMessage>> {
        let received = tokio::time::timeout(
            self.receive_timeout,
            self.queue.receive(1, self.lease_duration),
        )
        .await
        .map_err(|_| {
            ExperimentError::transport(
                "receive",
                anyhow::anyhow!("timed out after {:?}", self.receive_timeout),
            )
        })?
        .map_err(|e| ExperimentError::transport("receive", e))?;

        Ok(received.into_iter().next())
    }

    /// フォルダ内の画像ごとにメッセージを送信し、元のメッセージをコミットする
    ///
    /// 送信失敗はロールバックしない。一覧取得に失敗した場合は元メッセージを残し、再配信に任せる。
    async fn expand_folder(&self, request: &JobRequest) -> FanOutReport {
        let mut report = FanOutReport {
            folder: request.input_ref.clone(),
            ..FanOutReport::default()
        };
        let prefix = folder_prefix(&request.input_ref);

        let items = match self.store.list(&self.training_container, &prefix).await {
            Ok(items) => items,
            Err(e) => {
                let error = ExperimentError::transport("list", e);
                warn!(
                    experiment_id = %request.experiment_id,
                    folder = %request.input_ref,
                    error = %error,
                    "Folder listing failed; message left for redelivery"
                );
                report.listing_failed = true;
                return report;
            }
        };

        for item in items.iter().filter(|item| item.is_image()) {
            let message = RequestMessage::new(
                request.experiment_id.clone(),
                item.name.clone(),
                FAN_OUT_DISPLAY_NAME,
                format!("{} for image {}", request.description, item.name),
            );

            let sent = match message.to_json() {
                Ok(body) => self.queue.send(&body).await,
                Err(e) => Err(e.into()),
            };
            match sent {
                Ok(message_id) => {
                    debug!(message_id = %message_id, input = %item.name, "Fan-out message enqueued");
                    report.enqueued.push(item.name.clone());
                }
                Err(e) => {
                    error!(
                        experiment_id = %request.experiment_id,
                        input = %item.name,
                        error = %e,
                        "Failed to enqueue fan-out message"
                    );
                    report.failed.push(item.name.clone());
                }
            }
        }

        report.parent_committed = self.commit(&request.lease).await;
        info!(
            experiment_id = %request.experiment_id,
            folder = %request.input_ref,
            enqueued = report.enqueued.len(),
            failed = report.failed.len(),
            parent_committed = report.parent_committed,
            "Folder expanded"
        );
        report
    }

    /// メッセージを削除する。失敗はログに残して握りつぶす（at-least-once）
    pub async fn commit(&self, lease: &LeaseHandle) -> bool {
        if lease.is_empty() {
            warn!("Commit requested with an empty lease handle");
            return false;
        }

        match self.queue.delete(&lease.message_id, &lease.receipt).await {
            Ok(()) => {
                debug!(message_id = %lease.message_id, "Message committed");
                true
            }
            Err(e) => {
                warn!(message_id = %lease.message_id, error = %e, "Failed to commit message; it may be redelivered");
                false
            }
        }
    }

    /// リクエストをキューに送信
    pub async fn enqueue(&self, message: &RequestMessage) -> ExperimentResult<String> {
        let body = message.to_json().map_err(|e| ExperimentError::internal(e.into()))?;
        self.queue
            .send(&body)
            .await
            .map_err(|e| ExperimentError::transport("send", e))
    }
}

/// フォルダ参照を一覧取得用のプレフィックスにする（"batch" → "batch/"）
fn folder_prefix(input_ref: &str) -> String {
    let trimmed = input_ref.trim().trim_start_matches('/');
    if trimmed.is_empty() || trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}
