use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use std::path::Path;

pub mod local;

/// 単一画像として扱う拡張子
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp"];

/// オブジェクトストレージ内のアイテムを表す構造体
#[derive(Debug, Clone, PartialEq)]
pub struct StorageItem {
    /// コンテナ内のオブジェクト名（'/'区切り）
    pub name: String,
}

impl StorageItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn is_image(&self) -> bool {
        is_image_name(&self.name)
    }
}

fn extension_of(name: &str) -> Option<String> {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    file_name
        .rsplit_once('.')
        .filter(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
        .map(|(_, ext)| ext.to_string())
}

/// オブジェクト名が認識済みの画像拡張子で終わるか（大文字小文字を区別しない）
pub fn is_image_name(name: &str) -> bool {
    match extension_of(name) {
        Some(ext) => {
            let ext_lower = ext.to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext_lower.as_str())
        }
        None => false,
    }
}

/// オブジェクトストレージバックエンドのトレイト
#[automock]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// プレフィックスに一致するオブジェクトをリストする（名前順）
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<StorageItem>>;

    /// オブジェクトをローカルファイルへダウンロード
    async fn download(&self, container: &str, name: &str, local_path: &Path) -> Result<()>;

    /// ローカルファイルをオブジェクトとしてアップロード
    async fn upload(
        &self,
        container: &str,
        name: &str,
        local_path: &Path,
        overwrite: bool,
    ) -> Result<()>;

    /// コンテナ内の全オブジェクトをリストする
    async fn list_all(&self, container: &str) -> Result<Vec<StorageItem>> {
        self.list(container, "").await
    }
}
