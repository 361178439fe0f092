use crate::aggregator::MetricAggregator;
use crate::collector::ResourceInventoryCollector;
use crate::evaluator::{Assessment, ThresholdEvaluator};
use crate::poller::{AsyncOperationPoller, PollerSettings};
use crate::provider::ProviderClient;
use crate::report::{ReportBuilder, ReportHeader};
use crate::signal::RunSignal;
use crate::tagger::ResourceTagger;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use vigil_config::{AuditConfig, OperationCheck};
use vigil_metrics::RunMetrics;
use vigil_types::{
    DataGap, GapReason, Reduction, Report, ResourceRef, RuleTarget, StatisticKind, TimeWindow,
};

/// 审计引擎
///
/// 先按目标和区域顺序发现资源，再由有界 worker 池逐个审计：
/// describe、拉取指标、评估规则、运行长时操作检查。
/// 单个资源的失败只会变成数据缺失，不会中断整次运行。
pub struct AuditEngine {
    config: AuditConfig,
    provider: Arc<dyn ProviderClient>,
    metrics: Option<Arc<RunMetrics>>,
}

impl AuditEngine {
    pub fn new(config: AuditConfig, provider: Arc<dyn ProviderClient>) -> Self {
        Self {
            config,
            provider,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<RunMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub async fn run(&self, signal: &RunSignal) -> Report {
        self.run_at(Utc::now(), signal).await
    }

    /// 以给定时间为窗口终点运行一次审计
    pub async fn run_at(&self, now: DateTime<Utc>, signal: &RunSignal) -> Report {
        let started = Instant::now();
        let run = &self.config.run;
        // 无法表示的截止时间视为不限时
        let deadline = started.checked_add(Duration::from_secs(run.deadline_seconds));
        if deadline.is_none() {
            warn!(deadline_seconds = run.deadline_seconds, "Run deadline out of range, ignoring it");
        }
        let window = TimeWindow::lookback(now, run.lookback_hours, run.period_seconds);

        info!(
            targets = self.config.targets.len(),
            rules = self.config.rules.len(),
            operations = self.config.operations.len(),
            workers = run.worker_pool_size,
            "Starting audit run"
        );

        let builder = Arc::new(
            ReportBuilder::new(ReportHeader {
                generated_at: now,
                window,
                regions: run.regions.clone(),
                thresholds_used: self.config.rules.clone(),
            })
            .with_operation_checks(&self.config.operations)
            .with_categories(self.config.categories()),
        );

        let collector = Arc::new(ResourceInventoryCollector::new(self.provider.clone()));
        let work = self.discover(&collector, &builder, signal).await;

        let mut poller_settings = PollerSettings::new(
            self.config.poller.max_attempts,
            Duration::from_secs(self.config.poller.poll_interval_seconds),
        );
        if let Some(deadline) = deadline {
            poller_settings = poller_settings.with_deadline(deadline);
        }

        let ctx = Arc::new(WorkerContext {
            collector,
            aggregator: MetricAggregator::new(self.provider.clone()),
            evaluator: ThresholdEvaluator::new(self.config.rules.clone()),
            checks: self.config.operations.clone(),
            poller: AsyncOperationPoller::new(self.provider.clone(), poller_settings),
            builder: builder.clone(),
            metrics: self.metrics.clone(),
            window,
            now,
            deadline,
        });

        // 限制并发
        let semaphore = Arc::new(Semaphore::new(run.worker_pool_size.max(1)));
        let mut tasks = Vec::with_capacity(work.len());

        for resource in work {
            let ctx = ctx.clone();
            let semaphore = semaphore.clone();
            let signal = signal.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        error!(resource_id = %resource.id, "Worker pool closed: {}", e);
                        return;
                    }
                };
                ctx.audit_resource(&resource, &signal).await;
            }));
        }

        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Worker task join error");
            }
        }

        let mut report = builder.build_report().await;
        if self.config.tagging.enabled {
            let tagger = ResourceTagger::new(self.provider.clone(), &self.config.tagging);
            let summary = tagger.apply(&report, signal, deadline).await;
            if let Some(metrics) = &self.metrics {
                for action in &summary.actions {
                    metrics.record_tag(action.outcome.as_str());
                }
            }
            report.tagging = Some(summary);
        }

        let elapsed = started.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.set_run_duration(elapsed.as_secs_f64());
        }

        info!(
            resources = report.resources.len(),
            findings = report.finding_count(),
            data_gaps = report.data_gap_count(),
            duration_ms = elapsed.as_millis() as u64,
            "Audit run completed"
        );
        report
    }

    /// 按配置顺序发现资源并登记，返回待审计的资源
    async fn discover(
        &self,
        collector: &ResourceInventoryCollector,
        builder: &ReportBuilder,
        signal: &RunSignal,
    ) -> Vec<ResourceRef> {
        let mut work = Vec::new();

        for target in &self.config.targets {
            let filter = target.filter();
            for region in target.regions(&self.config.run) {
                let scope = format!("list:{}/{}", target.resource_type, region);

                if signal.is_cancelled() {
                    let gap =
                        DataGap::for_scope(scope, GapReason::Cancelled, "run cancelled before discovery");
                    self.gap(builder, gap).await;
                    continue;
                }

                let inventory = collector.list(&target.resource_type, region, &filter).await;
                if let Some(e) = &inventory.retrieval_error {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_provider_error(e.kind(), "list");
                    }
                    self.gap(builder, DataGap::for_scope(scope, e.gap_reason(), e.to_string()))
                        .await;
                }

                for resource in inventory.refs {
                    if builder.register_resource(resource.clone()).await {
                        work.push(resource);
                    } else {
                        debug!(resource_id = %resource.id, "Resource matched by more than one target");
                    }
                }
            }
        }

        info!(resources = work.len(), "Discovery finished");
        work
    }

    async fn gap(&self, builder: &ReportBuilder, gap: DataGap) {
        if let Some(metrics) = &self.metrics {
            metrics.record_data_gap(gap.reason.as_str());
        }
        builder.record_gap(gap).await;
    }
}

/// worker 共享的只读上下文
struct WorkerContext {
    collector: Arc<ResourceInventoryCollector>,
    aggregator: MetricAggregator,
    evaluator: ThresholdEvaluator,
    checks: Vec<OperationCheck>,
    poller: AsyncOperationPoller,
    builder: Arc<ReportBuilder>,
    metrics: Option<Arc<RunMetrics>>,
    window: TimeWindow,
    now: DateTime<Utc>,
    deadline: Option<Instant>,
}

impl WorkerContext {
    async fn audit_resource(&self, resource: &ResourceRef, signal: &RunSignal) {
        if signal.is_cancelled() {
            self.gap(DataGap::for_resource(
                &resource.id,
                "audit",
                GapReason::Cancelled,
                "run cancelled before the resource was audited",
            ))
            .await;
            return;
        }
        if self.deadline.map_or(false, |d| Instant::now() >= d) {
            self.gap(DataGap::for_resource(
                &resource.id,
                "audit",
                GapReason::DeadlineExceeded,
                "run deadline reached before the resource was audited",
            ))
            .await;
            return;
        }

        debug!(resource_id = %resource.id, resource_type = %resource.resource_type, "Auditing resource");
        if let Some(metrics) = &self.metrics {
            metrics.record_resource_scanned(&resource.resource_type, &resource.region);
        }

        let described = self.collector.describe(resource).await;
        if let Some(e) = &described.retrieval_error {
            self.provider_gap(&resource.id, "describe", "describe", e).await;
        }

        let mut reductions: HashMap<(String, StatisticKind), Reduction> = HashMap::new();
        for (metric, statistic) in self.evaluator.metric_requests(&resource.resource_type) {
            match self
                .aggregator
                .observe(resource, &metric, &self.window, statistic)
                .await
            {
                Ok(reduction) => {
                    reductions.insert((metric, statistic), reduction);
                }
                Err(e) => {
                    let scope = format!("metric:{}", metric);
                    self.provider_gap(&resource.id, &scope, "metric", &e).await;
                }
            }
        }

        for rule in self.evaluator.rules_for(&resource.resource_type) {
            let assessment = match &rule.target {
                RuleTarget::Metric { name, statistic } => {
                    match reductions.get(&(name.clone(), *statistic)) {
                        Some(reduction) => {
                            ThresholdEvaluator::assess_metric(&resource.id, *reduction, rule, self.now)
                        }
                        // 拉取失败已经记为数据缺失
                        None => continue,
                    }
                }
                RuleTarget::Attribute { .. } => match &described.resource {
                    Some(details) => ThresholdEvaluator::assess_attribute(details, rule, self.now),
                    None => continue,
                },
            };

            match assessment {
                Assessment::Violation(finding) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_finding(finding.severity, &finding.category);
                    }
                    self.builder.accumulate(finding).await;
                }
                Assessment::Gap(gap) => self.gap(gap).await,
                Assessment::Clear => {}
            }
        }

        for check in self.checks.iter().filter(|c| c.applies_to(&resource.resource_type)) {
            let op = self.poller.run(resource, &check.kind, signal).await;
            if let Some(metrics) = &self.metrics {
                metrics.record_operation(&op.kind, op.state.as_str(), op.attempts);
            }
            if let Some(finding) = ThresholdEvaluator::evaluate_operation(&op, check, self.now) {
                if let Some(metrics) = &self.metrics {
                    metrics.record_finding(finding.severity, &finding.category);
                }
                self.builder.accumulate(finding).await;
            }
            self.builder.record_operation(op).await;
        }
    }

    async fn provider_gap(
        &self,
        resource_id: &str,
        scope: &str,
        call: &str,
        e: &crate::error::ProviderError,
    ) {
        if let Some(metrics) = &self.metrics {
            metrics.record_provider_error(e.kind(), call);
        }
        if e.is_transient() {
            warn!(resource_id, scope, "Data unavailable after transient error: {}", e);
        }
        self.gap(DataGap::for_resource(resource_id, scope, e.gap_reason(), e.to_string()))
            .await;
    }

    async fn gap(&self, gap: DataGap) {
        if let Some(metrics) = &self.metrics {
            metrics.record_data_gap(gap.reason.as_str());
        }
        self.builder.record_gap(gap).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::provider::MockProviderClient;
    use chrono::TimeZone;
    use vigil_config::TargetConfig;
    use vigil_types::{Comparator, Datapoint, Resource, Severity, ThresholdRule};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn config() -> AuditConfig {
        let mut config = AuditConfig::default();
        config.targets.push(TargetConfig::new("instance"));
        config.rules.push(ThresholdRule::metric(
            "cpu-high",
            "highCpuCount",
            "CPUUtilization",
            StatisticKind::Avg,
            Comparator::Gt,
            80.0,
            Severity::Warning,
        ));
        config
    }

    #[tokio::test]
    async fn test_list_failure_is_scope_gap() {
        let mut provider = MockProviderClient::new();
        provider
            .expect_list()
            .returning(|_, _| Err(ProviderError::Permission("ListInstances".to_string())));
        provider.expect_describe().never();

        let engine = AuditEngine::new(config(), Arc::new(provider));
        let report = engine.run_at(now(), &RunSignal::new()).await;

        assert!(report.resources.is_empty());
        assert_eq!(report.scope_gaps.len(), 1);
        assert_eq!(report.scope_gaps[0].scope, "list:instance/us-east-1");
        assert_eq!(report.scope_gaps[0].reason, GapReason::Permission);
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_metric_error_does_not_stop_other_resources() {
        let mut provider = MockProviderClient::new();
        provider.expect_list().returning(|_, region| {
            Ok(vec![
                ResourceRef::new("i-1", "instance", region),
                ResourceRef::new("i-2", "instance", region),
            ])
        });
        provider
            .expect_describe()
            .returning(|r| Ok(Resource::new(&r.id, &r.resource_type, &r.region)));
        provider
            .expect_get_metric_statistics()
            .returning(|r, _, window, _| {
                if r.id == "i-1" {
                    Err(ProviderError::Transient("throttled".to_string()))
                } else {
                    Ok(vec![Datapoint::new(window.start, 95.0)])
                }
            });

        let metrics = Arc::new(RunMetrics::new().unwrap());
        let engine = AuditEngine::new(config(), Arc::new(provider)).with_metrics(metrics.clone());
        let report = engine.run_at(now(), &RunSignal::new()).await;

        assert_eq!(report.resources.len(), 2);
        assert_eq!(report.resources[0].status_label(), "UNKNOWN");
        assert_eq!(report.resources[0].data_gaps[0].scope, "metric:CPUUtilization");
        assert_eq!(report.resources[1].status_label(), "WARNING");
        assert_eq!(report.category_count("highCpuCount"), 1);

        let exported = metrics.export().unwrap();
        assert!(exported.contains("vigil_data_gaps_total"));
    }

    #[tokio::test]
    async fn test_cancelled_run_records_gaps() {
        let mut provider = MockProviderClient::new();
        provider.expect_list().never();

        let signal = RunSignal::new();
        signal.cancel();
        let engine = AuditEngine::new(config(), Arc::new(provider));
        let report = engine.run_at(now(), &signal).await;

        assert_eq!(report.scope_gaps.len(), 1);
        assert_eq!(report.scope_gaps[0].reason, GapReason::Cancelled);
    }

    #[tokio::test]
    async fn test_percentile_and_average_on_same_metric() {
        let mut config = AuditConfig::default();
        config.targets.push(TargetConfig::new("load-balancer"));
        config.rules = vec![
            ThresholdRule::metric(
                "latency-avg",
                "highLatencyCount",
                "TargetResponseTime",
                StatisticKind::Avg,
                Comparator::Gt,
                1.0,
                Severity::Warning,
            ),
            ThresholdRule::metric(
                "latency-p99",
                "highLatencyCount",
                "TargetResponseTime",
                StatisticKind::Percentile(99.0),
                Comparator::Gt,
                2.5,
                Severity::Critical,
            ),
        ];

        let mut provider = MockProviderClient::new();
        provider
            .expect_list()
            .returning(|_, region| Ok(vec![ResourceRef::new("lb-1", "load-balancer", region)]));
        provider
            .expect_describe()
            .returning(|r| Ok(Resource::new(&r.id, &r.resource_type, &r.region)));
        provider
            .expect_get_metric_statistics()
            .times(2)
            .returning(|_, _, window, statistic| {
                let value = match statistic {
                    StatisticKind::Percentile(_) => 4.0,
                    _ => 0.3,
                };
                Ok(vec![Datapoint::new(window.start, value)])
            });

        let report = AuditEngine::new(config, Arc::new(provider))
            .run_at(now(), &RunSignal::new())
            .await;

        let findings = &report.resources[0].findings;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule_name, "latency-p99");
        assert_eq!(report.category_count("highLatencyCount"), 1);
        assert_eq!(report.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_out_of_range_limits_do_not_panic() {
        let mut config = config();
        config.run.deadline_seconds = u64::MAX;
        config.run.lookback_hours = u64::MAX;

        let mut provider = MockProviderClient::new();
        provider
            .expect_list()
            .returning(|_, region| Ok(vec![ResourceRef::new("i-1", "instance", region)]));
        provider
            .expect_describe()
            .returning(|r| Ok(Resource::new(&r.id, &r.resource_type, &r.region)));
        provider
            .expect_get_metric_statistics()
            .returning(|_, _, _, _| Ok(vec![]));

        let report = AuditEngine::new(config, Arc::new(provider))
            .run_at(now(), &RunSignal::new())
            .await;

        assert_eq!(report.resources.len(), 1);
        assert_eq!(report.window.start, DateTime::<Utc>::MIN_UTC);
        assert!(report.resources[0]
            .data_gaps
            .iter()
            .all(|gap| gap.reason != GapReason::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_tagging_disabled_by_default() {
        let mut provider = MockProviderClient::new();
        provider
            .expect_list()
            .returning(|_, region| Ok(vec![ResourceRef::new("i-1", "instance", region)]));
        provider
            .expect_describe()
            .returning(|r| Ok(Resource::new(&r.id, &r.resource_type, &r.region)));
        provider
            .expect_get_metric_statistics()
            .returning(|_, _, window, _| Ok(vec![Datapoint::new(window.start, 99.0)]));
        provider.expect_tag_resource().never();

        let report = AuditEngine::new(config(), Arc::new(provider))
            .run_at(now(), &RunSignal::new())
            .await;

        assert_eq!(report.exit_code(), 1);
        assert!(report.tagging.is_none());
    }
}
