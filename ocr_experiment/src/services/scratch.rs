// ローカル作業領域の管理
// input/ output/ reports/ はジョブごとに全消去し、setup/ だけを残す

use crate::core::{ExperimentError, ExperimentResult};
use std::path::{Path, PathBuf};

const INPUT_DIR: &str = "input";
const OUTPUT_DIR: &str = "output";
const REPORTS_DIR: &str = "reports";
const SETUP_DIR: &str = "setup";

#[derive(Debug, Clone)]
pub struct ScratchArea {
    root: PathBuf,
}

impl ScratchArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_dir(&self) -> PathBuf {
        self.root.join(INPUT_DIR)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.root.join(OUTPUT_DIR)
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join(REPORTS_DIR)
    }

    /// 起動時に同期される永続ディレクトリ（辞書・OCR学習データ）
    pub fn setup_dir(&self) -> PathBuf {
        self.root.join(SETUP_DIR)
    }

    fn job_dirs(&self) -> [PathBuf; 3] {
        [self.input_dir(), self.output_dir(), self.reports_dir()]
    }

    /// 全ディレクトリを作成
    pub async fn prepare(&self) -> ExperimentResult<()> {
        for dir in self.job_dirs().into_iter().chain([self.setup_dir()]) {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| ExperimentError::io(dir.display().to_string(), e))?;
        }
        Ok(())
    }

    /// ジョブ用ディレクトリを空にする（setup/ は残す）
    pub async fn clear(&self) -> ExperimentResult<()> {
        for dir in self.job_dirs() {
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(ExperimentError::io(dir.display().to_string(), e)),
            }
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| ExperimentError::io(dir.display().to_string(), e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_clear_keeps_setup() {
        let temp_dir = tempdir().unwrap();
        let scratch = ScratchArea::new(temp_dir.path().join("scratch"));
        scratch.prepare().await.unwrap();

        std::fs::write(scratch.input_dir().join("cat.jpg"), b"x").unwrap();
        std::fs::write(scratch.output_dir().join("cat-canny.png"), b"x").unwrap();
        std::fs::write(scratch.setup_dir().join("dictionary.txt"), b"cat").unwrap();

        scratch.clear().await.unwrap();

        assert!(scratch.input_dir().is_dir());
        assert_eq!(std::fs::read_dir(scratch.input_dir()).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(scratch.output_dir()).unwrap().count(), 0);
        assert!(scratch.setup_dir().join("dictionary.txt").exists());
    }

    #[tokio::test]
    async fn test_clear_without_prepare() {
        let temp_dir = tempdir().unwrap();
        let scratch = ScratchArea::new(temp_dir.path());
        scratch.clear().await.unwrap();
        assert!(scratch.reports_dir().is_dir());
    }
}
