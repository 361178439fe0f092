use crate::finding::{max_severity, Finding, Severity};
use crate::metric::TimeWindow;
use crate::operation::{AsyncOperation, OperationState};
use crate::resource::ResourceRef;
use crate::rule::ThresholdRule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 无法评估的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapReason {
    /// 限流、网络抖动等
    Transient,
    Permission,
    Malformed,
    NotFound,
    /// 窗口内没有数据点
    NoData,
    /// 属性值无法解析为数值
    Unparsable,
    /// 属性不存在
    Absent,
    DeadlineExceeded,
    Cancelled,
}

impl GapReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GapReason::Transient => "transient",
            GapReason::Permission => "permission",
            GapReason::Malformed => "malformed",
            GapReason::NotFound => "not_found",
            GapReason::NoData => "no_data",
            GapReason::Unparsable => "unparsable",
            GapReason::Absent => "absent",
            GapReason::DeadlineExceeded => "deadline_exceeded",
            GapReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for GapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 数据缺失记录：该项状态未知，不代表健康
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataGap {
    /// 为空表示非资源级别（例如某个区域的 list 调用失败）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// 出问题的调用或观测对象，例如 `describe`、`metric:CPUUtilization`
    pub scope: String,
    pub reason: GapReason,
    pub detail: String,
}

impl DataGap {
    pub fn for_resource(
        resource_id: impl Into<String>,
        scope: impl Into<String>,
        reason: GapReason,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            resource_id: Some(resource_id.into()),
            scope: scope.into(),
            reason,
            detail: detail.into(),
        }
    }

    pub fn for_scope(scope: impl Into<String>, reason: GapReason, detail: impl Into<String>) -> Self {
        Self {
            resource_id: None,
            scope: scope.into(),
            reason,
            detail: detail.into(),
        }
    }
}

/// 报告中的长时操作摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub resource_id: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    pub state: OperationState,
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_status: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<&AsyncOperation> for OperationSummary {
    fn from(op: &AsyncOperation) -> Self {
        Self {
            resource_id: op.resource_id.clone(),
            kind: op.kind.clone(),
            operation_id: op.id.clone(),
            state: op.state,
            attempts: op.attempts,
            max_attempts: op.max_attempts,
            result_status: op.result.as_ref().map(|r| r.status.clone()),
            details: op
                .result
                .as_ref()
                .map(|r| r.details.clone())
                .unwrap_or_default(),
            reason: op.reason.clone(),
        }
    }
}

/// 单个资源的报告段落
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSection {
    pub resource: ResourceRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_severity: Option<Severity>,
    pub findings: Vec<Finding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_gaps: Vec<DataGap>,
}

impl ResourceSection {
    pub fn status_label(&self) -> &'static str {
        match self.effective_severity {
            Some(severity) => severity.as_str(),
            None if !self.data_gaps.is_empty() => "UNKNOWN",
            None => "OK",
        }
    }
}

/// 单个资源的打标结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TagOutcome {
    Applied,
    Failed { error: String },
    /// 已达到 `max_apply` 上限，未调用 provider
    LimitReached,
    /// 运行取消或超过截止时间，未调用 provider
    NotAttempted { reason: GapReason },
}

impl TagOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagOutcome::Applied => "applied",
            TagOutcome::Failed { .. } => "failed",
            TagOutcome::LimitReached => "limit_reached",
            TagOutcome::NotAttempted { .. } => "not_attempted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagAction {
    pub resource_id: String,
    #[serde(flatten)]
    pub outcome: TagOutcome,
}

/// 打标阶段的汇总，按资源发现顺序
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggingSummary {
    pub key: String,
    pub value: String,
    pub max_apply: usize,
    pub actions: Vec<TagAction>,
}

impl TaggingSummary {
    pub fn new(key: impl Into<String>, value: impl Into<String>, max_apply: usize) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            max_apply,
            actions: Vec::new(),
        }
    }

    pub fn applied_count(&self) -> usize {
        self.count(|o| matches!(o, TagOutcome::Applied))
    }

    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, TagOutcome::Failed { .. }))
    }

    /// 因上限、取消或超时而未打标的资源数
    pub fn skipped_count(&self) -> usize {
        self.count(|o| matches!(o, TagOutcome::LimitReached | TagOutcome::NotAttempted { .. }))
    }

    fn count(&self, pred: impl Fn(&TagOutcome) -> bool) -> usize {
        self.actions.iter().filter(|a| pred(&a.outcome)).count()
    }
}

/// 单次运行的审计报告，构建后只读
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub window: TimeWindow,
    pub regions: Vec<String>,
    pub thresholds_used: Vec<ThresholdRule>,
    /// 按发现顺序排列
    pub resources: Vec<ResourceSection>,
    pub operations: Vec<OperationSummary>,
    /// 非资源级别的数据缺失
    pub scope_gaps: Vec<DataGap>,
    pub counts_by_severity: BTreeMap<Severity, usize>,
    pub counts_by_category: BTreeMap<String, usize>,
    pub recommendations: Vec<String>,
    /// 仅在启用打标时存在
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagging: Option<TaggingSummary>,
}

impl Report {
    pub fn findings(&self) -> impl Iterator<Item = &Finding> + '_ {
        self.resources.iter().flat_map(|s| s.findings.iter())
    }

    pub fn finding_count(&self) -> usize {
        self.resources.iter().map(|s| s.findings.len()).sum()
    }

    pub fn has_findings(&self) -> bool {
        self.finding_count() > 0
    }

    pub fn max_severity(&self) -> Option<Severity> {
        max_severity(self.findings())
    }

    pub fn data_gap_count(&self) -> usize {
        self.scope_gaps.len() + self.resources.iter().map(|s| s.data_gaps.len()).sum::<usize>()
    }

    pub fn resources_with_findings(&self) -> usize {
        self.resources
            .iter()
            .filter(|s| !s.findings.is_empty())
            .count()
    }

    pub fn severity_count(&self, severity: Severity) -> usize {
        self.counts_by_severity.get(&severity).copied().unwrap_or(0)
    }

    pub fn category_count(&self, category: &str) -> usize {
        self.counts_by_category.get(category).copied().unwrap_or(0)
    }

    /// 0 健康，1 警告，2 严重；仅有 INFO 视为健康
    pub fn exit_code(&self) -> i32 {
        self.max_severity().map(|s| s.exit_code()).unwrap_or(0)
    }
}
