use chrono::{DateTime, Utc};
use vigil_config::{
    OperationCheck, OPERATION_ABANDONED_CATEGORY, OPERATION_FAILED_CATEGORY,
    OPERATION_TIMEOUT_CATEGORY,
};
use vigil_types::{
    max_severity, AsyncOperation, DataGap, Finding, FindingSource, GapReason, MissingData,
    OperationState, Reduction, Resource, RuleTarget, Severity, StatisticKind, ThresholdRule,
};

/// 单条规则对单个观测的评估结果
#[derive(Debug, Clone, PartialEq)]
pub enum Assessment {
    Violation(Finding),
    Clear,
    /// 无法评估，状态未知
    Gap(DataGap),
}

/// 阈值评估器
pub struct ThresholdEvaluator {
    rules: Vec<ThresholdRule>,
}

impl ThresholdEvaluator {
    pub fn new(rules: Vec<ThresholdRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[ThresholdRule] {
        &self.rules
    }

    /// 适用于某资源类型的规则，保持配置顺序
    pub fn rules_for<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a ThresholdRule> + 'a {
        self.rules.iter().filter(move |r| r.applies_to(resource_type))
    }

    /// 某资源类型需要拉取的 (指标, 统计方式)，去重，保持配置顺序
    pub fn metric_requests(&self, resource_type: &str) -> Vec<(String, StatisticKind)> {
        let mut requests: Vec<(String, StatisticKind)> = Vec::new();
        for rule in self.rules_for(resource_type) {
            if let RuleTarget::Metric { name, statistic } = &rule.target {
                if !requests.iter().any(|(n, s)| n == name && s == statistic) {
                    requests.push((name.clone(), *statistic));
                }
            }
        }
        requests
    }

    /// 比较观测值与规则阈值，成立时返回发现项
    pub fn evaluate(
        resource_id: &str,
        observed: f64,
        rule: &ThresholdRule,
        now: DateTime<Utc>,
    ) -> Option<Finding> {
        if !observed.is_finite() {
            return None;
        }
        rule.comparator
            .holds(observed, rule.limit)
            .then(|| Finding::from_threshold(resource_id, rule, observed, now))
    }

    /// 评估指标归约结果，按规则的 `missing_data` 处理无数据
    pub fn assess_metric(
        resource_id: &str,
        reduction: Reduction,
        rule: &ThresholdRule,
        now: DateTime<Utc>,
    ) -> Assessment {
        let observed = match (reduction, rule.missing_data) {
            (Reduction::Value(v), _) => v,
            (Reduction::NoData, MissingData::Zero) => 0.0,
            (Reduction::NoData, MissingData::Skip) => {
                return Assessment::Gap(DataGap::for_resource(
                    resource_id,
                    format!("metric:{}", rule.target.name()),
                    GapReason::NoData,
                    format!("no datapoints in window for rule {}", rule.name),
                ));
            }
        };

        match Self::evaluate(resource_id, observed, rule, now) {
            Some(finding) => Assessment::Violation(finding),
            None => Assessment::Clear,
        }
    }

    /// 评估资源属性，值严格解析，不能解析或不存在时记为数据缺失
    pub fn assess_attribute(resource: &Resource, rule: &ThresholdRule, now: DateTime<Utc>) -> Assessment {
        let name = rule.target.name();
        let raw = resource.attribute(name);

        match parse_attribute(raw) {
            Ok(observed) => match Self::evaluate(&resource.id, observed, rule, now) {
                Some(finding) => Assessment::Violation(finding),
                None => Assessment::Clear,
            },
            Err(GapReason::Absent) if rule.missing_data == MissingData::Zero => {
                match Self::evaluate(&resource.id, 0.0, rule, now) {
                    Some(finding) => Assessment::Violation(finding),
                    None => Assessment::Clear,
                }
            }
            Err(reason) => Assessment::Gap(DataGap::for_resource(
                &resource.id,
                format!("attribute:{}", name),
                reason,
                match raw {
                    Some(value) => format!("cannot compare '{}' numerically", value),
                    None => "attribute not present".to_string(),
                },
            )),
        }
    }

    /// 长时操作结果对应的发现项
    ///
    /// 完成且结果状态需要告警、失败、超时、放弃分别计入不同的计数器。
    pub fn evaluate_operation(
        op: &AsyncOperation,
        check: &OperationCheck,
        now: DateTime<Utc>,
    ) -> Option<Finding> {
        let (category, severity, message) = match op.state {
            OperationState::Complete => {
                let result = op.result.as_ref()?;
                if !check.is_alerting_status(&result.status) {
                    return None;
                }
                let mut message = format!("{} completed with status {}", op.kind, result.status);
                if !result.details.is_empty() {
                    let details: Vec<String> = result
                        .details
                        .iter()
                        .map(|(k, v)| format!("{}={}", k, v))
                        .collect();
                    message.push_str(&format!(" ({})", details.join(", ")));
                }
                (check.category.as_str(), check.severity, message)
            }
            OperationState::Failed => (
                OPERATION_FAILED_CATEGORY,
                check.failure_severity,
                format!("{} failed: {}", op.kind, reason_of(op)),
            ),
            OperationState::Timeout => (
                OPERATION_TIMEOUT_CATEGORY,
                check.failure_severity,
                format!(
                    "{} timed out after {}/{} attempts: {}",
                    op.kind,
                    op.attempts,
                    op.max_attempts,
                    reason_of(op)
                ),
            ),
            OperationState::Abandoned => (
                OPERATION_ABANDONED_CATEGORY,
                Severity::Info,
                format!("{} abandoned: {}", op.kind, reason_of(op)),
            ),
            OperationState::Requested | OperationState::InProgress => return None,
        };

        Some(Finding {
            resource_id: op.resource_id.clone(),
            rule_name: op.kind.clone(),
            category: category.to_string(),
            source: FindingSource::Operation {
                kind: op.kind.clone(),
                state: op.state,
            },
            severity,
            message,
            timestamp: now,
        })
    }

    /// 资源的有效级别：所有发现项中最高的
    pub fn effective_severity(findings: &[Finding]) -> Option<Severity> {
        max_severity(findings)
    }
}

fn reason_of(op: &AsyncOperation) -> &str {
    op.reason.as_deref().unwrap_or("no reason given")
}

/// 严格解析属性值：`true`/`false` 为 1/0，其余必须是有限浮点数
pub fn parse_attribute(raw: Option<&str>) -> Result<f64, GapReason> {
    let raw = raw.ok_or(GapReason::Absent)?.trim();

    if raw.eq_ignore_ascii_case("true") {
        return Ok(1.0);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Ok(0.0);
    }

    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(GapReason::Unparsable),
    }
}
