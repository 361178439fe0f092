use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// 长时操作状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationState {
    Requested,
    InProgress,
    Complete,
    Failed,
    /// 尝试次数用尽或运行截止时间已到，远端操作可能仍在进行
    Timeout,
    /// 运行被取消，停止轮询但未调用远端取消接口
    Abandoned,
}

impl OperationState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Complete
                | OperationState::Failed
                | OperationState::Timeout
                | OperationState::Abandoned
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Requested => "REQUESTED",
            OperationState::InProgress => "IN_PROGRESS",
            OperationState::Complete => "COMPLETE",
            OperationState::Failed => "FAILED",
            OperationState::Timeout => "TIMEOUT",
            OperationState::Abandoned => "ABANDONED",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 操作完成后的结果，例如漂移检测的总体状态和逐项差异
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperationResult {
    pub status: String,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl OperationResult {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// provider 返回的操作状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationStatus {
    InProgress,
    Succeeded { result: OperationResult },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("operation {resource_id}/{kind} already terminal ({state})")]
    AlreadyTerminal {
        resource_id: String,
        kind: String,
        state: OperationState,
    },

    #[error("invalid transition {from} -> {to}")]
    InvalidTransition {
        from: OperationState,
        to: OperationState,
    },
}

/// 长时操作
///
/// 生命周期内由轮询器独占；终态只能记录一次。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncOperation {
    /// provider 返回的操作 ID，提交前为空
    pub id: Option<String>,
    pub resource_id: String,
    pub kind: String,
    pub state: OperationState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub poll_interval_seconds: u64,
    pub result: Option<OperationResult>,
    pub reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl AsyncOperation {
    pub fn new(
        resource_id: impl Into<String>,
        kind: impl Into<String>,
        max_attempts: u32,
        poll_interval_seconds: u64,
    ) -> Self {
        Self {
            id: None,
            resource_id: resource_id.into(),
            kind: kind.into(),
            state: OperationState::Requested,
            attempts: 0,
            max_attempts,
            poll_interval_seconds,
            result: None,
            reason: None,
            requested_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// 提交成功，进入轮询
    pub fn mark_in_progress(&mut self, operation_id: impl Into<String>) -> Result<(), OperationError> {
        if self.state != OperationState::Requested {
            return Err(OperationError::InvalidTransition {
                from: self.state,
                to: OperationState::InProgress,
            });
        }
        self.id = Some(operation_id.into());
        self.state = OperationState::InProgress;
        Ok(())
    }

    /// 记录一次状态查询
    pub fn record_attempt(&mut self) -> Result<u32, OperationError> {
        if self.state != OperationState::InProgress {
            return Err(OperationError::InvalidTransition {
                from: self.state,
                to: OperationState::InProgress,
            });
        }
        self.attempts += 1;
        Ok(self.attempts)
    }

    pub fn mark_complete(&mut self, result: OperationResult) -> Result<(), OperationError> {
        self.finish(OperationState::Complete)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), OperationError> {
        self.finish(OperationState::Failed)?;
        self.reason = Some(reason.into());
        Ok(())
    }

    pub fn mark_timeout(&mut self, reason: impl Into<String>) -> Result<(), OperationError> {
        self.finish(OperationState::Timeout)?;
        self.reason = Some(reason.into());
        Ok(())
    }

    pub fn mark_abandoned(&mut self) -> Result<(), OperationError> {
        self.finish(OperationState::Abandoned)?;
        self.reason = Some("run cancelled; remote operation may still be running".to_string());
        Ok(())
    }

    fn finish(&mut self, to: OperationState) -> Result<(), OperationError> {
        if self.is_terminal() {
            return Err(OperationError::AlreadyTerminal {
                resource_id: self.resource_id.clone(),
                kind: self.kind.clone(),
                state: self.state,
            });
        }
        self.state = to;
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_lifecycle() {
        let mut op = AsyncOperation::new("stack-a", "drift-detection", 3, 5);
        assert_eq!(op.state, OperationState::Requested);

        op.mark_in_progress("det-1").unwrap();
        assert_eq!(op.record_attempt().unwrap(), 1);
        assert!(!op.attempts_exhausted());

        op.mark_complete(OperationResult::new("DRIFTED").with_detail("Bucket", "MODIFIED"))
            .unwrap();
        assert!(op.is_terminal());
        assert!(op.finished_at.is_some());
    }

    #[test]
    fn test_single_terminal_state() {
        let mut op = AsyncOperation::new("stack-a", "drift-detection", 3, 5);
        op.mark_in_progress("det-1").unwrap();
        op.mark_timeout("attempts exhausted").unwrap();

        let err = op.mark_failed("late failure").unwrap_err();
        assert!(matches!(err, OperationError::AlreadyTerminal { .. }));
        assert_eq!(op.state, OperationState::Timeout);
        assert_eq!(op.reason.as_deref(), Some("attempts exhausted"));
        assert!(op.record_attempt().is_err());
    }

    #[test]
    fn test_cannot_poll_before_submit() {
        let mut op = AsyncOperation::new("stack-a", "drift-detection", 3, 5);
        assert!(op.record_attempt().is_err());
        op.mark_failed("submit rejected").unwrap();
        assert_eq!(op.state, OperationState::Failed);
    }

    #[test]
    fn test_provider_status_serde() {
        let status: OperationStatus = serde_json::from_str(
            r#"{"status":"succeeded","result":{"status":"IN_SYNC"}}"#,
        )
        .unwrap();
        assert_eq!(
            status,
            OperationStatus::Succeeded {
                result: OperationResult::new("IN_SYNC")
            }
        );
    }
}
