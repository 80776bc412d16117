// 実験ワーカー専用のカスタムエラー型定義

use std::fmt;
use thiserror::Error;

/// テクニック処理のどの段階で失敗したか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TechniqueStage {
    /// フィルタ名がレジストリに存在しない
    Lookup,
    /// 画像変換
    Transform,
    /// OCR抽出
    Ocr,
    /// 埋め込み計算
    Embedding,
}

impl TechniqueStage {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Lookup => "lookup",
            Self::Transform => "transform",
            Self::Ocr => "ocr",
            Self::Embedding => "embedding",
        }
    }
}

impl fmt::Display for TechniqueStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 実験ワーカー固有のエラー型
#[derive(Error, Debug)]
pub enum ExperimentError {
    #[error("トランスポートエラー: {operation} - {source}")]
    TransientTransport {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("不正なメッセージ: {message_id} - {reason}")]
    MalformedMessage { message_id: String, reason: String },

    #[error("テクニック処理エラー: {technique} ({stage}) - {source}")]
    TechniqueFailure {
        technique: String,
        stage: TechniqueStage,
        #[source]
        source: anyhow::Error,
    },

    #[error("全テクニック失敗: {attempted}件のテクニックが全て失敗しました")]
    TotalEvaluationFailure { attempted: usize },

    #[error("設定エラー: {message}")]
    Configuration { message: String },

    #[error("ファイルI/Oエラー: {path} - {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("内部エラー: {source}")]
    Internal {
        #[source]
        source: anyhow::Error,
    },
}

impl ExperimentError {
    /// トランスポートエラーの作成
    pub fn transport(operation: impl Into<String>, source: anyhow::Error) -> Self {
        Self::TransientTransport {
            operation: operation.into(),
            source,
        }
    }

    /// 不正メッセージエラーの作成
    pub fn malformed(message_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            message_id: message_id.into(),
            reason: reason.into(),
        }
    }

    /// テクニック処理エラーの作成
    pub fn technique(
        technique: impl Into<String>,
        stage: TechniqueStage,
        source: anyhow::Error,
    ) -> Self {
        Self::TechniqueFailure {
            technique: technique.into(),
            stage,
            source,
        }
    }

    /// 設定エラーの作成
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// I/Oエラーの作成
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// 内部エラーの作成
    pub fn internal(source: anyhow::Error) -> Self {
        Self::Internal { source }
    }

    /// オーケストレーターが取るべき対応
    pub fn disposition(&self) -> ErrorDisposition {
        match self {
            Self::TechniqueFailure { .. } | Self::TotalEvaluationFailure { .. } => {
                ErrorDisposition::ExcludeAndContinue
            }
            Self::Configuration { .. } => ErrorDisposition::Fatal,
            Self::TransientTransport { .. }
            | Self::MalformedMessage { .. }
            | Self::Io { .. }
            | Self::Internal { .. } => ErrorDisposition::RetryNextCycle,
        }
    }

    /// エラーの重要度を取得
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::TechniqueFailure { .. } => ErrorSeverity::Low,
            Self::TransientTransport { .. } | Self::MalformedMessage { .. } => {
                ErrorSeverity::Medium
            }
            Self::TotalEvaluationFailure { .. } | Self::Io { .. } => ErrorSeverity::Medium,
            Self::Internal { .. } => ErrorSeverity::High,
            Self::Configuration { .. } => ErrorSeverity::Critical,
        }
    }

    /// 次のサイクルで回復可能かどうか
    pub fn is_recoverable(&self) -> bool {
        self.disposition() != ErrorDisposition::Fatal
    }
}

/// エラー発生時にオーケストレーターが取る対応
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// ログを出して今回のサイクルを放棄し、再配信に任せる
    RetryNextCycle,
    /// 該当テクニック・ジョブを除外して処理を続行
    ExcludeAndContinue,
    /// 起動を中止する
    Fatal,
}

/// エラーの重要度レベル
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// 低重要度 - ログ出力程度
    Low,
    /// 中重要度 - 警告レベル
    Medium,
    /// 高重要度 - 要対応
    High,
    /// 致命的 - システム停止レベル
    Critical,
}

impl ErrorSeverity {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

/// 実験処理の結果型
pub type ExperimentResult<T> = std::result::Result<T, ExperimentError>;

impl From<anyhow::Error> for ExperimentError {
    fn from(error: anyhow::Error) -> Self {
        ExperimentError::Internal { source: error }
    }
}

impl From<tokio::task::JoinError> for ExperimentError {
    fn from(error: tokio::task::JoinError) -> Self {
        ExperimentError::Internal {
            source: anyhow::Error::new(error),
        }
    }
}
