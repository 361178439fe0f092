use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use vigil_config::OperationCheck;
use vigil_types::{
    max_severity, AsyncOperation, DataGap, Finding, OperationSummary, Report, ResourceRef,
    ResourceSection, Severity, ThresholdRule, TimeWindow,
};

/// 报告头信息，运行开始时确定
#[derive(Debug, Clone)]
pub struct ReportHeader {
    pub generated_at: DateTime<Utc>,
    pub window: TimeWindow,
    pub regions: Vec<String>,
    pub thresholds_used: Vec<ThresholdRule>,
}

#[derive(Debug, Default)]
struct BuilderState {
    /// 按发现顺序
    resources: Vec<ResourceRef>,
    discovery: HashMap<String, usize>,
    findings: HashMap<String, Vec<Finding>>,
    gaps: HashMap<String, Vec<DataGap>>,
    scope_gaps: Vec<DataGap>,
    operations: Vec<AsyncOperation>,
    counts_by_severity: BTreeMap<Severity, usize>,
    counts_by_category: BTreeMap<String, usize>,
}

/// 发现项汇总与报告构建
///
/// 通过 `Arc` 在 worker 之间共享，内部状态由一把异步锁保护。
/// 计数器在这里且只在这里递增。
pub struct ReportBuilder {
    header: ReportHeader,
    /// rule name -> 配置顺序
    rule_order: HashMap<String, usize>,
    /// (rule name, 建议)
    recommendations: Vec<(String, String)>,
    state: Mutex<BuilderState>,
}

impl ReportBuilder {
    pub fn new(header: ReportHeader) -> Self {
        let mut state = BuilderState::default();
        for severity in Severity::ALL {
            state.counts_by_severity.insert(severity, 0);
        }

        let mut builder = Self {
            header,
            rule_order: HashMap::new(),
            recommendations: Vec::new(),
            state: Mutex::new(state),
        };
        let rules = builder.header.thresholds_used.clone();
        builder.add_rule_names(rules.iter().map(|r| (r.name.clone(), r.recommendation.clone())));
        builder
    }

    /// 长时操作检查也参与排序和建议
    pub fn with_operation_checks(mut self, checks: &[OperationCheck]) -> Self {
        self.add_rule_names(
            checks
                .iter()
                .map(|c| (c.kind.clone(), c.recommendation.clone())),
        );
        self
    }

    /// 预置计数器，使所有配置的类别都从 0 开始
    pub fn with_categories(mut self, categories: impl IntoIterator<Item = String>) -> Self {
        {
            let state = self.state.get_mut();
            for category in categories {
                state.counts_by_category.entry(category).or_insert(0);
            }
        }
        self
    }

    fn add_rule_names(&mut self, names: impl Iterator<Item = (String, Option<String>)>) {
        for (name, recommendation) in names {
            let next = self.rule_order.len();
            self.rule_order.entry(name.clone()).or_insert(next);
            if let Some(text) = recommendation {
                self.recommendations.push((name, text));
            }
        }
    }

    /// 登记资源，返回 false 表示已登记过（例如多个目标匹配同一资源）
    pub async fn register_resource(&self, resource: ResourceRef) -> bool {
        let mut state = self.state.lock().await;
        if state.discovery.contains_key(&resource.id) {
            return false;
        }
        let index = state.resources.len();
        state.discovery.insert(resource.id.clone(), index);
        state.resources.push(resource);
        true
    }

    /// 记录发现项，计数器各加一
    pub async fn accumulate(&self, finding: Finding) {
        let mut state = self.state.lock().await;

        *state.counts_by_severity.entry(finding.severity).or_insert(0) += 1;
        *state
            .counts_by_category
            .entry(finding.category.clone())
            .or_insert(0) += 1;

        if !state.discovery.contains_key(&finding.resource_id) {
            warn!(resource_id = %finding.resource_id, "Finding for unregistered resource");
        }
        debug!(
            resource_id = %finding.resource_id,
            rule = %finding.rule_name,
            severity = %finding.severity,
            "Finding recorded"
        );
        state
            .findings
            .entry(finding.resource_id.clone())
            .or_default()
            .push(finding);
    }

    pub async fn record_gap(&self, gap: DataGap) {
        let mut state = self.state.lock().await;
        match gap.resource_id.clone() {
            Some(id) => state.gaps.entry(id).or_default().push(gap),
            None => state.scope_gaps.push(gap),
        }
    }

    pub async fn record_operation(&self, operation: AsyncOperation) {
        self.state.lock().await.operations.push(operation);
    }

    pub async fn severity_count(&self, severity: Severity) -> usize {
        self.state
            .lock()
            .await
            .counts_by_severity
            .get(&severity)
            .copied()
            .unwrap_or(0)
    }

    pub async fn category_count(&self, category: &str) -> usize {
        self.state
            .lock()
            .await
            .counts_by_category
            .get(category)
            .copied()
            .unwrap_or(0)
    }

    fn rule_rank(&self, rule_name: &str) -> usize {
        self.rule_order.get(rule_name).copied().unwrap_or(usize::MAX)
    }

    /// 构建报告
    ///
    /// 资源按发现顺序，发现项按规则配置顺序，与 worker 完成顺序无关。
    pub async fn build_report(&self) -> Report {
        let state = self.state.lock().await;

        let mut resources: Vec<ResourceRef> = state.resources.clone();
        // 未登记资源上的发现项排在最后
        let mut orphans: Vec<&String> = state
            .findings
            .keys()
            .chain(state.gaps.keys())
            .filter(|id| !state.discovery.contains_key(*id))
            .collect();
        orphans.sort();
        orphans.dedup();
        for id in orphans {
            resources.push(ResourceRef::new(id.clone(), "unknown", "unknown"));
        }

        let sections: Vec<ResourceSection> = resources
            .into_iter()
            .map(|resource| {
                let mut findings = state.findings.get(&resource.id).cloned().unwrap_or_default();
                findings.sort_by(|a, b| {
                    self.rule_rank(&a.rule_name)
                        .cmp(&self.rule_rank(&b.rule_name))
                        .then_with(|| a.rule_name.cmp(&b.rule_name))
                        .then_with(|| a.category.cmp(&b.category))
                        .then_with(|| a.message.cmp(&b.message))
                });
                let mut data_gaps = state.gaps.get(&resource.id).cloned().unwrap_or_default();
                data_gaps.sort();

                ResourceSection {
                    effective_severity: max_severity(&findings),
                    resource,
                    findings,
                    data_gaps,
                }
            })
            .collect();

        let mut operations: Vec<&AsyncOperation> = state.operations.iter().collect();
        operations.sort_by(|a, b| {
            let rank = |op: &AsyncOperation| {
                state
                    .discovery
                    .get(&op.resource_id)
                    .copied()
                    .unwrap_or(usize::MAX)
            };
            rank(a)
                .cmp(&rank(b))
                .then_with(|| a.resource_id.cmp(&b.resource_id))
                .then_with(|| a.kind.cmp(&b.kind))
        });

        let mut scope_gaps = state.scope_gaps.clone();
        scope_gaps.sort();

        let triggered: std::collections::HashSet<&str> = sections
            .iter()
            .flat_map(|s| s.findings.iter().map(|f| f.rule_name.as_str()))
            .collect();
        let mut recommendations: Vec<String> = Vec::new();
        for (rule, text) in &self.recommendations {
            if triggered.contains(rule.as_str()) && !recommendations.contains(text) {
                recommendations.push(text.clone());
            }
        }

        Report {
            generated_at: self.header.generated_at,
            window: self.header.window,
            regions: self.header.regions.clone(),
            thresholds_used: self.header.thresholds_used.clone(),
            resources: sections,
            operations: operations.into_iter().map(OperationSummary::from).collect(),
            scope_gaps,
            counts_by_severity: state.counts_by_severity.clone(),
            counts_by_category: state.counts_by_category.clone(),
            recommendations,
            tagging: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;
    use vigil_types::{Comparator, GapReason, StatisticKind};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn rules() -> Vec<ThresholdRule> {
        vec![
            ThresholdRule::metric(
                "cpu-high",
                "highCpuCount",
                "CPUUtilization",
                StatisticKind::Avg,
                Comparator::Gt,
                80.0,
                Severity::Warning,
            )
            .with_recommendation("Right-size busy instances."),
            ThresholdRule::metric(
                "cpu-critical",
                "highCpuCount",
                "CPUUtilization",
                StatisticKind::Max,
                Comparator::Gt,
                95.0,
                Severity::Critical,
            ),
        ]
    }

    fn builder() -> ReportBuilder {
        ReportBuilder::new(ReportHeader {
            generated_at: now(),
            window: TimeWindow::lookback(now(), 24, 300),
            regions: vec!["us-east-1".to_string()],
            thresholds_used: rules(),
        })
        .with_categories(vec!["highCpuCount".to_string(), "lowStorageCount".to_string()])
    }

    #[tokio::test]
    async fn test_counters_seeded_and_incremented_once() {
        let builder = builder();
        let rules = rules();
        builder
            .register_resource(ResourceRef::new("i-1", "instance", "us-east-1"))
            .await;
        builder
            .accumulate(Finding::from_threshold("i-1", &rules[0], 85.0, now()))
            .await;

        let report = builder.build_report().await;
        assert_eq!(report.category_count("highCpuCount"), 1);
        assert_eq!(report.category_count("lowStorageCount"), 0);
        assert!(report.counts_by_category.contains_key("lowStorageCount"));
        assert_eq!(report.severity_count(Severity::Warning), 1);
        assert_eq!(report.severity_count(Severity::Critical), 0);
        assert_eq!(report.recommendations, vec!["Right-size busy instances."]);
    }

    #[tokio::test]
    async fn test_order_independent_of_completion() {
        let rules = rules();
        let build = |reverse: bool| {
            let rules = rules.clone();
            async move {
                let builder = Arc::new(builder());
                for id in ["i-1", "i-2"] {
                    builder
                        .register_resource(ResourceRef::new(id, "instance", "us-east-1"))
                        .await;
                }
                let mut findings = vec![
                    Finding::from_threshold("i-2", &rules[1], 99.0, now()),
                    Finding::from_threshold("i-2", &rules[0], 90.0, now()),
                    Finding::from_threshold("i-1", &rules[0], 85.0, now()),
                ];
                if reverse {
                    findings.reverse();
                }
                for finding in findings {
                    builder.accumulate(finding).await;
                }
                builder.build_report().await
            }
        };

        let a = build(false).await;
        let b = build(true).await;
        assert_eq!(a, b);
        assert_eq!(a.resources[0].resource.id, "i-1");
        assert_eq!(a.resources[1].findings[0].rule_name, "cpu-high");
        assert_eq!(a.resources[1].effective_severity, Some(Severity::Critical));
    }

    #[tokio::test]
    async fn test_duplicate_registration_and_gaps() {
        let builder = builder();
        assert!(
            builder
                .register_resource(ResourceRef::new("i-1", "instance", "us-east-1"))
                .await
        );
        assert!(
            !builder
                .register_resource(ResourceRef::new("i-1", "instance", "us-east-1"))
                .await
        );

        builder
            .record_gap(DataGap::for_resource(
                "i-1",
                "metric:CPUUtilization",
                GapReason::Transient,
                "throttled",
            ))
            .await;
        builder
            .record_gap(DataGap::for_scope("list:queue/us-east-1", GapReason::Permission, "denied"))
            .await;

        let report = builder.build_report().await;
        assert_eq!(report.resources.len(), 1);
        assert_eq!(report.resources[0].status_label(), "UNKNOWN");
        assert_eq!(report.scope_gaps.len(), 1);
        assert_eq!(report.data_gap_count(), 2);
        assert!(report.recommendations.is_empty());
    }
}
