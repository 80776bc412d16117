// 起動時のsetupコンテナ同期（参照辞書・OCR学習データ）

use crate::storage::ObjectStore;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetupSyncReport {
    pub downloaded: Vec<String>,
    pub failed: Vec<String>,
    pub listing_failed: bool,
}

/// setupコンテナの全オブジェクトをローカルへダウンロードする
///
/// 失敗はログに残すだけでワーカーは起動を続ける。
pub async fn sync_setup<S: ObjectStore + ?Sized>(store: &S, container: &str, setup_dir: &Path) -> SetupSyncReport {
    let mut report = SetupSyncReport::default();

    let items = match store.list_all(container).await {
        Ok(items) => items,
        Err(e) => {
            warn!(container = %container, error = %e, "Failed to list setup container");
            report.listing_failed = true;
            return report;
        }
    };

    for item in items {
        let local_path = setup_dir.join(&item.name);
        match store.download(container, &item.name, &local_path).await {
            Ok(()) => report.downloaded.push(item.name),
            Err(e) => {
                warn!(object = %item.name, error = %e, "Failed to download setup object");
                report.failed.push(item.name);
            }
        }
    }

    info!(
        container = %container,
        downloaded = report.downloaded.len(),
        failed = report.failed.len(),
        "Setup container synchronized"
    );
    report
}
