use crate::finding::Severity;
use crate::metric::StatisticKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparator {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
}

impl Comparator {
    pub fn holds(&self, observed: f64, limit: f64) -> bool {
        match self {
            Comparator::Gt => observed > limit,
            Comparator::Ge => observed >= limit,
            Comparator::Lt => observed < limit,
            Comparator::Le => observed <= limit,
            // 相对误差，按两者中较大的量级缩放
            Comparator::Eq => {
                (observed - limit).abs() <= f64::EPSILON * observed.abs().max(limit.abs())
            }
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Eq => "==",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// 规则的观测对象：指标统计值或资源属性
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RuleTarget {
    Metric {
        name: String,
        #[serde(default)]
        statistic: StatisticKind,
    },
    Attribute {
        name: String,
    },
}

impl RuleTarget {
    pub fn name(&self) -> &str {
        match self {
            RuleTarget::Metric { name, .. } | RuleTarget::Attribute { name } => name,
        }
    }
}

impl fmt::Display for RuleTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleTarget::Metric { name, statistic } => write!(f, "{}({})", statistic, name),
            RuleTarget::Attribute { name } => write!(f, "attribute:{}", name),
        }
    }
}

/// 没有数据点时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingData {
    /// 不评估，记为数据缺失
    #[default]
    Skip,
    /// 视为 0 参与比较
    Zero,
}

/// 阈值规则，从配置加载后整个运行期间不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub name: String,

    /// 报告中的计数器名称，例如 `highCpuCount`
    pub category: String,

    /// 适用的资源类型，为空时适用于所有资源
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,

    pub target: RuleTarget,
    pub comparator: Comparator,
    pub limit: f64,
    pub severity: Severity,

    #[serde(default)]
    pub missing_data: MissingData,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl ThresholdRule {
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        target: RuleTarget,
        comparator: Comparator,
        limit: f64,
        severity: Severity,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            resource_type: None,
            target,
            comparator,
            limit,
            severity,
            missing_data: MissingData::Skip,
            recommendation: None,
        }
    }

    /// 指标规则的便捷构造
    pub fn metric(
        name: impl Into<String>,
        category: impl Into<String>,
        metric: impl Into<String>,
        statistic: StatisticKind,
        comparator: Comparator,
        limit: f64,
        severity: Severity,
    ) -> Self {
        Self::new(
            name,
            category,
            RuleTarget::Metric {
                name: metric.into(),
                statistic,
            },
            comparator,
            limit,
            severity,
        )
    }

    pub fn for_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn with_missing_data(mut self, missing_data: MissingData) -> Self {
        self.missing_data = missing_data;
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }

    pub fn applies_to(&self, resource_type: &str) -> bool {
        self.resource_type
            .as_deref()
            .map(|t| t == resource_type)
            .unwrap_or(true)
    }

    /// 报告头部使用的单行描述
    pub fn describe(&self) -> String {
        format!(
            "{} [{}]: {} {} {} -> {}",
            self.name, self.category, self.target, self.comparator, self.limit, self.severity
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparators() {
        assert!(Comparator::Gt.holds(85.0, 80.0));
        assert!(!Comparator::Gt.holds(80.0, 80.0));
        assert!(Comparator::Ge.holds(80.0, 80.0));
        assert!(Comparator::Lt.holds(1.0, 2.0));
        assert!(Comparator::Le.holds(2.0, 2.0));
        assert!(Comparator::Eq.holds(0.0, 0.0));
        assert!(!Comparator::Eq.holds(0.1, 0.0));
    }

    #[test]
    fn test_eq_scales_with_magnitude() {
        assert!(Comparator::Eq.holds(1e9, 1e9));
        // 1e9 附近一个 ulp 的差异仍视为相等
        assert!(Comparator::Eq.holds(1e9 + 1e-7, 1e9));
        assert!(!Comparator::Eq.holds(1e9 + 1.0, 1e9));
        assert!(Comparator::Eq.holds(0.1 + 0.2, 0.3));
        assert!(!Comparator::Eq.holds(1e-20, 0.0));
        assert!(Comparator::Eq.holds(1.0, 1.0));
    }

    #[test]
    fn test_rule_scope() {
        let rule = ThresholdRule::metric(
            "high-cpu",
            "highCpuCount",
            "CPUUtilization",
            StatisticKind::Avg,
            Comparator::Gt,
            80.0,
            Severity::Warning,
        )
        .for_resource_type("rds:db");

        assert!(rule.applies_to("rds:db"));
        assert!(!rule.applies_to("ecs:service"));
        assert_eq!(
            rule.describe(),
            "high-cpu [highCpuCount]: avg(CPUUtilization) > 80 -> WARNING"
        );
    }

    #[test]
    fn test_rule_deserialize() {
        let json = r#"{
            "name": "rotation-disabled",
            "category": "rotationDisabledCount",
            "target": { "kind": "attribute", "name": "KeyRotationEnabled" },
            "comparator": "eq",
            "limit": 0,
            "severity": "critical"
        }"#;

        let rule: ThresholdRule = serde_json::from_str(json).unwrap();
        assert_eq!(
            rule.target,
            RuleTarget::Attribute {
                name: "KeyRotationEnabled".to_string()
            }
        );
        assert_eq!(rule.missing_data, MissingData::Skip);
        assert_eq!(rule.severity, Severity::Critical);
    }
}
