use crate::operation::OperationState;
use crate::rule::{Comparator, ThresholdRule};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 严重级别，`Info < Warning < Critical`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Critical, Severity::Warning, Severity::Info];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }

    /// 进程退出码：0 健康，1 警告，2 严重
    pub fn exit_code(&self) -> i32 {
        match self {
            Severity::Info => 0,
            Severity::Warning => 1,
            Severity::Critical => 2,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// 发现项的来源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FindingSource {
    Threshold {
        target: String,
        comparator: Comparator,
        limit: f64,
        observed: f64,
    },
    Operation {
        kind: String,
        state: OperationState,
    },
}

/// 一次阈值违规，创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub resource_id: String,
    pub rule_name: String,
    pub category: String,
    pub source: FindingSource,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Finding {
    pub fn from_threshold(
        resource_id: impl Into<String>,
        rule: &ThresholdRule,
        observed: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let message = format!(
            "{} = {:.2} {} {}",
            rule.target, observed, rule.comparator, rule.limit
        );
        Self {
            resource_id: resource_id.into(),
            rule_name: rule.name.clone(),
            category: rule.category.clone(),
            source: FindingSource::Threshold {
                target: rule.target.to_string(),
                comparator: rule.comparator,
                limit: rule.limit,
                observed,
            },
            severity: rule.severity,
            message,
            timestamp,
        }
    }

    /// 观测值（仅阈值类发现项有）
    pub fn observed(&self) -> Option<f64> {
        match &self.source {
            FindingSource::Threshold { observed, .. } => Some(*observed),
            FindingSource::Operation { .. } => None,
        }
    }

    /// 去重用的身份标识：不含观测值与时间戳
    pub fn identity(&self) -> String {
        format!("{}|{}|{}", self.resource_id, self.rule_name, self.severity)
    }
}

/// 多个发现项的最高严重级别
pub fn max_severity<'a>(findings: impl IntoIterator<Item = &'a Finding>) -> Option<Severity> {
    findings.into_iter().map(|f| f.severity).max()
}
