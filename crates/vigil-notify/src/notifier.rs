use crate::message::AlertMessage;
use async_trait::async_trait;

/// 通知错误
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Endpoint returned status {status}")]
    Status { status: u16 },

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("Invalid address: {0}")]
    Address(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl NotifyError {
    /// 是否值得重试：网络错误、5xx 和 429
    pub fn is_retryable(&self) -> bool {
        match self {
            NotifyError::Http(_) | NotifyError::Smtp(_) => true,
            NotifyError::Status { status } => *status >= 500 || *status == 429,
            NotifyError::Address(_) | NotifyError::Config(_) => false,
        }
    }
}

/// 通知渠道接口
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &AlertMessage) -> Result<(), NotifyError>;

    /// 渠道类型，例如 `slack`
    fn kind(&self) -> &str;
}
