use thiserror::Error;
use vigil_types::GapReason;

/// provider 调用错误
///
/// 采集层从不向上抛出这些错误，只把它们记录为数据缺失。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// 限流、网络错误，稍后可能恢复
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("malformed provider response: {0}")]
    Malformed(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl ProviderError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Transient(_) => "transient",
            ProviderError::Permission(_) => "permission",
            ProviderError::Malformed(_) => "malformed",
            ProviderError::NotFound(_) => "not_found",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    pub fn gap_reason(&self) -> GapReason {
        match self {
            ProviderError::Transient(_) => GapReason::Transient,
            ProviderError::Permission(_) => GapReason::Permission,
            ProviderError::Malformed(_) => GapReason::Malformed,
            ProviderError::NotFound(_) => GapReason::NotFound,
        }
    }
}

/// 引擎错误
#[derive(Debug, Error)]
pub enum VigilError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Failed to read snapshot {path}: {reason}")]
    Snapshot { path: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] vigil_metrics::MetricsError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, VigilError>;
