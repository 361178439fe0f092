use crate::provider::ProviderClient;
use crate::signal::RunSignal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vigil_types::{AsyncOperation, OperationError, OperationStatus, ResourceRef};

/// 轮询参数
#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub max_attempts: u32,
    pub poll_interval: Duration,
    /// 运行截止时间，超过后不再开始新一轮轮询
    pub deadline: Option<Instant>,
}

impl PollerSettings {
    pub fn new(max_attempts: u32, poll_interval: Duration) -> Self {
        Self {
            max_attempts,
            poll_interval,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// 最长轮询时间
    pub fn max_wait(&self) -> Duration {
        self.poll_interval.saturating_mul(self.max_attempts)
    }

    /// 下一轮轮询结束前是否会越过截止时间
    pub fn deadline_reached(&self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) => now
                .checked_add(self.poll_interval)
                .map_or(true, |next| next > deadline),
            None => false,
        }
    }
}

/// 长时操作轮询器
///
/// 提交操作后按固定间隔查询状态，直到进入唯一的终态：
/// COMPLETE、FAILED、TIMEOUT 或 ABANDONED。
pub struct AsyncOperationPoller {
    provider: Arc<dyn ProviderClient>,
    settings: PollerSettings,
}

impl AsyncOperationPoller {
    pub fn new(provider: Arc<dyn ProviderClient>, settings: PollerSettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &PollerSettings {
        &self.settings
    }

    /// 运行一个操作直到终态
    pub async fn run(&self, resource: &ResourceRef, kind: &str, signal: &RunSignal) -> AsyncOperation {
        let mut op = AsyncOperation::new(
            &resource.id,
            kind,
            self.settings.max_attempts,
            self.settings.poll_interval.as_secs(),
        );

        if signal.is_cancelled() {
            settle(&mut op, |op| op.mark_abandoned());
            return op;
        }
        // 截止时间前来不及轮询时不提交远端操作
        if self.settings.deadline_reached(Instant::now()) {
            info!(resource_id = %resource.id, kind, "Run deadline reached, operation not submitted");
            settle(&mut op, |op| op.mark_timeout("run deadline reached before the operation was submitted"));
            return op;
        }

        let operation_id = match self.provider.submit_operation(resource, kind).await {
            Ok(id) => id,
            Err(e) => {
                warn!(resource_id = %resource.id, kind, "Failed to submit operation: {}", e);
                settle(&mut op, |op| op.mark_failed(format!("submit failed: {}", e)));
                return op;
            }
        };

        if let Err(e) = op.mark_in_progress(&operation_id) {
            warn!(resource_id = %resource.id, kind, "Unexpected operation state: {}", e);
            return op;
        }
        info!(resource_id = %resource.id, kind, operation_id = %operation_id, "Operation submitted");

        self.poll(&mut op, &operation_id, signal).await;

        info!(
            resource_id = %resource.id,
            kind,
            state = %op.state,
            attempts = op.attempts,
            "Operation finished"
        );
        op
    }

    async fn poll(&self, op: &mut AsyncOperation, operation_id: &str, signal: &RunSignal) {
        loop {
            if op.attempts_exhausted() {
                let reason = format!(
                    "still running after {} attempts; check again later",
                    op.attempts
                );
                settle(op, |op| op.mark_timeout(reason));
                return;
            }

            if self.settings.deadline_reached(Instant::now()) {
                settle(op, |op| op.mark_timeout("run deadline reached before the operation finished"));
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                _ = signal.cancelled() => {
                    settle(op, |op| op.mark_abandoned());
                    return;
                }
            }

            let attempt = match op.record_attempt() {
                Ok(attempt) => attempt,
                Err(e) => {
                    warn!(resource_id = %op.resource_id, "Stopped polling: {}", e);
                    return;
                }
            };

            match self.provider.operation_status(operation_id).await {
                Ok(OperationStatus::InProgress) => {
                    debug!(
                        resource_id = %op.resource_id,
                        kind = %op.kind,
                        attempt,
                        max_attempts = op.max_attempts,
                        "Operation still in progress"
                    );
                }
                Ok(OperationStatus::Succeeded { result }) => {
                    settle(op, |op| op.mark_complete(result));
                    return;
                }
                Ok(OperationStatus::Failed { reason }) => {
                    settle(op, |op| op.mark_failed(reason));
                    return;
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        resource_id = %op.resource_id,
                        attempt,
                        "Status query failed, will retry: {}",
                        e
                    );
                }
                Err(e) => {
                    settle(op, |op| op.mark_failed(format!("status query failed: {}", e)));
                    return;
                }
            }
        }
    }
}

fn settle<F>(op: &mut AsyncOperation, transition: F)
where
    F: FnOnce(&mut AsyncOperation) -> Result<(), OperationError>,
{
    if let Err(e) = transition(&mut *op) {
        warn!(resource_id = %op.resource_id, kind = %op.kind, "Ignored state transition: {}", e);
    }
}
