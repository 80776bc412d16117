use super::{ObjectStore, StorageItem};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// ローカルファイルシステム用のオブジェクトストレージ
///
/// コンテナはルート直下のディレクトリ、オブジェクト名はその中の相対パスに対応する。
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn container_path(&self, container: &str) -> Result<PathBuf> {
        validate_segment_path(container)?;
        Ok(self.root.join(container))
    }

    fn object_path(&self, container: &str, name: &str) -> Result<PathBuf> {
        validate_segment_path(name)?;
        Ok(self.container_path(container)?.join(name))
    }

    /// コンテナ内のファイルを再帰的に取得（同期処理）
    fn walk_container(container_dir: &Path, prefix: &str) -> Result<Vec<StorageItem>> {
        let mut items = Vec::new();

        for entry in WalkDir::new(container_dir).follow_links(false) {
            let entry = entry
                .with_context(|| format!("Failed to walk container: {}", container_dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(container_dir)
                .with_context(|| format!("Unexpected path: {}", entry.path().display()))?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if name.starts_with(prefix) {
                items.push(StorageItem::new(name));
            }
        }

        items.sort_by(|a, b| a.name.cmp(&b.name)); // 一貫した順序で返す
        Ok(items)
    }
}

/// '..' や絶対パスでルート外に出る名前を拒否
fn validate_segment_path(name: &str) -> Result<()> {
    if name.starts_with('/') || name.split('/').any(|segment| segment == "..") {
        anyhow::bail!("Invalid object path: {name}");
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<StorageItem>> {
        let container_dir = self.container_path(container)?;
        if !container_dir.is_dir() {
            anyhow::bail!("Container not found: {}", container_dir.display());
        }

        let prefix = prefix.to_string();
        tokio::task::spawn_blocking(move || Self::walk_container(&container_dir, &prefix))
            .await
            .context("Failed to spawn blocking task for container listing")?
    }

    async fn download(&self, container: &str, name: &str, local_path: &Path) -> Result<()> {
        let source = self.object_path(container, name)?;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        tokio::fs::copy(&source, local_path)
            .await
            .with_context(|| format!("Failed to download {container}/{name}"))?;
        Ok(())
    }

    async fn upload(
        &self,
        container: &str,
        name: &str,
        local_path: &Path,
        overwrite: bool,
    ) -> Result<()> {
        let target = self.object_path(container, name)?;
        if !overwrite && target.exists() {
            anyhow::bail!("Object already exists: {container}/{name}");
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        tokio::fs::copy(local_path, &target)
            .await
            .with_context(|| format!("Failed to upload {} to {container}/{name}", local_path.display()))?;
        Ok(())
    }
}
