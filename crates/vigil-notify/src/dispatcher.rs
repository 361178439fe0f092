use crate::config::{AlertsConfig, ChannelConfig, ChannelTransport};
use crate::dedup::{finding_set_hash, AlertDeduplicator, AlertDispatchRecord, DispatchOutcome};
use crate::message::AlertMessage;
use crate::notifier::{NotifyError, Notifier};
use crate::providers::{EmailNotifier, SlackNotifier, WebhookNotifier};
use crate::retry::{retry_with_backoff, RetryPolicy};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use vigil_types::{Report, Severity};

/// 已注册的告警渠道
pub struct RegisteredChannel {
    pub name: String,
    pub min_severity: Severity,
    pub notifier: Box<dyn Notifier>,
}

impl RegisteredChannel {
    pub fn new(name: impl Into<String>, min_severity: Severity, notifier: Box<dyn Notifier>) -> Self {
        Self {
            name: name.into(),
            min_severity,
            notifier,
        }
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        let notifier: Box<dyn Notifier> = match &config.transport {
            ChannelTransport::Slack(cfg) => Box::new(SlackNotifier::new(cfg.clone())),
            ChannelTransport::Webhook(cfg) => Box::new(WebhookNotifier::new(cfg.clone())),
            ChannelTransport::Email(cfg) => Box::new(EmailNotifier::new(cfg.clone())),
        };
        Self::new(config.name.clone(), config.min_severity, notifier)
    }
}

/// 告警分发器
///
/// 报告构建完成后调用一次。各渠道互相独立，单个渠道失败只记录日志，
/// 不影响其他渠道，也不改变报告和退出码。
pub struct AlertDispatcher {
    channels: Vec<RegisteredChannel>,
    dedup: Option<Mutex<AlertDeduplicator>>,
    retry: RetryPolicy,
    max_findings: usize,
}

impl AlertDispatcher {
    pub fn new(retry: RetryPolicy, max_findings: usize) -> Self {
        Self {
            channels: Vec::new(),
            dedup: None,
            retry,
            max_findings,
        }
    }

    pub fn from_config(config: &AlertsConfig) -> Self {
        let mut dispatcher = Self::new(config.retry.to_policy(), config.max_findings_per_alert);
        if config.dedup.enabled {
            dispatcher = dispatcher.with_dedup(AlertDeduplicator::load(
                &config.dedup.state_path,
                config.dedup.cooldown_minutes,
            ));
        }
        for channel in &config.channels {
            dispatcher.register(RegisteredChannel::from_config(channel));
        }
        dispatcher
    }

    pub fn with_dedup(mut self, dedup: AlertDeduplicator) -> Self {
        self.dedup = Some(Mutex::new(dedup));
        self
    }

    /// 注册渠道
    pub fn register(&mut self, channel: RegisteredChannel) {
        info!(
            "Registered alert channel: {} ({}, min {})",
            channel.name,
            channel.notifier.kind(),
            channel.min_severity
        );
        self.channels.push(channel);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub async fn dispatch(&self, report: &Report) -> Vec<AlertDispatchRecord> {
        self.dispatch_at(report, Utc::now()).await
    }

    /// 向所有渠道发送报告摘要，返回每个渠道的结果
    ///
    /// 没有发现项时不发送，返回空列表。
    pub async fn dispatch_at(&self, report: &Report, now: DateTime<Utc>) -> Vec<AlertDispatchRecord> {
        let Some(message) = AlertMessage::from_report(report, self.max_findings) else {
            info!("No findings, skipping alert dispatch");
            return Vec::new();
        };

        let mut records = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            let hash = finding_set_hash(&channel.name, report);
            let outcome = self.dispatch_one(channel, &message, &hash, now).await;
            records.push(AlertDispatchRecord {
                channel: channel.name.clone(),
                finding_set_hash: hash,
                sent_at: now,
                outcome,
            });
        }

        if let Some(dedup) = &self.dedup {
            let pending = {
                let mut dedup = dedup.lock().await;
                for record in records.iter().filter(|r| r.outcome == DispatchOutcome::Sent) {
                    dedup.record(record.clone());
                }
                dedup.pending_write()
            };
            let saved = match pending {
                Ok(Some(write)) => write.apply().await,
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = saved {
                warn!("Failed to persist alert state: {}", e);
            }
        }

        records
    }

    async fn dispatch_one(
        &self,
        channel: &RegisteredChannel,
        message: &AlertMessage,
        hash: &str,
        now: DateTime<Utc>,
    ) -> DispatchOutcome {
        if message.severity < channel.min_severity {
            info!(
                channel = %channel.name,
                "Report severity {} below channel threshold {}",
                message.severity,
                channel.min_severity
            );
            return DispatchOutcome::BelowSeverity;
        }

        if let Some(dedup) = &self.dedup {
            if dedup.lock().await.is_duplicate(&channel.name, hash, now) {
                return DispatchOutcome::Suppressed;
            }
        }

        let result = retry_with_backoff(
            &self.retry,
            || channel.notifier.send(message),
            NotifyError::is_retryable,
        )
        .await;

        match result {
            Ok(()) => {
                info!("Alert sent via {}: {}", channel.name, message.title);
                DispatchOutcome::Sent
            }
            Err(e) => {
                error!("Alert dispatch via {} failed: {}", channel.name, e);
                DispatchOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use vigil_types::{Finding, Resource, ResourceSection, StatisticKind, Comparator, ThresholdRule, TimeWindow};

    struct CountingNotifier {
        calls: Arc<AtomicU32>,
        fail_with: Option<u16>,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn send(&self, _message: &AlertMessage) -> Result<(), NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                Some(status) => Err(NotifyError::Status { status }),
                None => Ok(()),
            }
        }

        fn kind(&self) -> &str {
            "counting"
        }
    }

    fn counting(fail_with: Option<u16>) -> (Box<dyn Notifier>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Box::new(CountingNotifier {
                calls: calls.clone(),
                fail_with,
            }),
            calls,
        )
    }

    fn report(severity: Option<Severity>) -> Report {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let rule = ThresholdRule::metric(
            "high-cpu",
            "highCpuCount",
            "CPUUtilization",
            StatisticKind::Avg,
            Comparator::Gt,
            80.0,
            severity.unwrap_or(Severity::Warning),
        );
        let findings: Vec<Finding> = severity
            .map(|_| vec![Finding::from_threshold("i-1", &rule, 93.0, now)])
            .unwrap_or_default();

        Report {
            generated_at: now,
            window: TimeWindow::lookback(now, 24, 300),
            regions: vec!["us-east-1".to_string()],
            thresholds_used: vec![rule],
            resources: vec![ResourceSection {
                resource: Resource::new("i-1", "instance", "us-east-1").reference(),
                effective_severity: severity,
                findings,
                data_gaps: vec![],
            }],
            operations: vec![],
            scope_gaps: vec![],
            counts_by_severity: BTreeMap::new(),
            counts_by_category: BTreeMap::new(),
            recommendations: vec![],
            tagging: None,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            initial_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(1),
            multiplier: 1.0,
        }
    }

    #[tokio::test]
    async fn test_no_findings_no_dispatch() {
        let (notifier, calls) = counting(None);
        let mut dispatcher = AlertDispatcher::new(fast_retry(), 20);
        dispatcher.register(RegisteredChannel::new("ops", Severity::Info, notifier));

        let records = dispatcher.dispatch(&report(None)).await;
        assert!(records.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_severity_gate() {
        let (critical_only, critical_calls) = counting(None);
        let (all, all_calls) = counting(None);
        let mut dispatcher = AlertDispatcher::new(fast_retry(), 20);
        dispatcher.register(RegisteredChannel::new("pager", Severity::Critical, critical_only));
        dispatcher.register(RegisteredChannel::new("ops", Severity::Warning, all));

        let records = dispatcher.dispatch(&report(Some(Severity::Warning))).await;
        assert_eq!(records[0].outcome, DispatchOutcome::BelowSeverity);
        assert_eq!(records[1].outcome, DispatchOutcome::Sent);
        assert_eq!(critical_calls.load(Ordering::SeqCst), 0);
        assert_eq!(all_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_channel_is_isolated() {
        let (broken, broken_calls) = counting(Some(503));
        let (healthy, healthy_calls) = counting(None);
        let mut dispatcher = AlertDispatcher::new(fast_retry(), 20);
        dispatcher.register(RegisteredChannel::new("broken", Severity::Info, broken));
        dispatcher.register(RegisteredChannel::new("healthy", Severity::Info, healthy));

        let records = dispatcher.dispatch(&report(Some(Severity::Critical))).await;
        assert!(matches!(records[0].outcome, DispatchOutcome::Failed { .. }));
        assert_eq!(records[1].outcome, DispatchOutcome::Sent);
        // 503 可重试，共尝试两次
        assert_eq!(broken_calls.load(Ordering::SeqCst), 2);
        assert_eq!(healthy_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let (rejecting, calls) = counting(Some(400));
        let mut dispatcher = AlertDispatcher::new(fast_retry(), 20);
        dispatcher.register(RegisteredChannel::new("hook", Severity::Info, rejecting));

        dispatcher.dispatch(&report(Some(Severity::Warning))).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_suppressed_within_cooldown() {
        let (notifier, calls) = counting(None);
        let mut dispatcher =
            AlertDispatcher::new(fast_retry(), 20).with_dedup(AlertDeduplicator::in_memory(60));
        dispatcher.register(RegisteredChannel::new("ops", Severity::Info, notifier));

        let report = report(Some(Severity::Critical));
        let now = report.generated_at;
        let first = dispatcher.dispatch_at(&report, now).await;
        let second = dispatcher
            .dispatch_at(&report, now + chrono::Duration::minutes(10))
            .await;

        assert_eq!(first[0].outcome, DispatchOutcome::Sent);
        assert_eq!(second[0].outcome, DispatchOutcome::Suppressed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dedup_state_persisted_after_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("alerts.json");
        let (notifier, _) = counting(None);
        let mut dispatcher =
            AlertDispatcher::new(fast_retry(), 20).with_dedup(AlertDeduplicator::load(&path, 60));
        dispatcher.register(RegisteredChannel::new("ops", Severity::Info, notifier));

        let report = report(Some(Severity::Critical));
        let now = report.generated_at;
        let records = dispatcher.dispatch_at(&report, now).await;
        assert_eq!(records[0].outcome, DispatchOutcome::Sent);

        // 写文件在锁外完成
        assert!(dispatcher.dedup.as_ref().unwrap().try_lock().is_ok());

        let reloaded = AlertDeduplicator::load(&path, 60);
        assert!(reloaded.is_duplicate("ops", &records[0].finding_set_hash, now));
    }
}
