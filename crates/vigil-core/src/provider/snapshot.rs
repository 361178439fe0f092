use super::ProviderClient;
use crate::error::{ProviderError, VigilError};
use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;
use vigil_types::{
    Datapoint, OperationResult, OperationStatus, Resource, ResourceRef, StatisticKind, TimeWindow,
};

/// 快照中的资源
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotResource {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl SnapshotResource {
    pub fn new(
        id: impl Into<String>,
        resource_type: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            region: region.into(),
            name: None,
            tags: BTreeMap::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    fn reference(&self) -> ResourceRef {
        ResourceRef {
            id: self.id.clone(),
            resource_type: self.resource_type.clone(),
            region: self.region.clone(),
            name: self.name.clone(),
            tags: self.tags.clone(),
        }
    }
}

/// 快照中的指标数据
///
/// `values` 没有时间戳，按窗口起点和周期依次补齐。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetric {
    pub resource_id: String,
    pub metric: String,
    /// 为空时匹配任意统计方式
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statistic: Option<StatisticKind>,
    #[serde(default)]
    pub datapoints: Vec<Datapoint>,
    #[serde(default)]
    pub values: Vec<f64>,
}

/// 操作的最终结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScriptedOutcome {
    Succeeded { result: OperationResult },
    Failed { reason: String },
}

impl Default for ScriptedOutcome {
    fn default() -> Self {
        ScriptedOutcome::Succeeded {
            result: OperationResult::new("IN_SYNC"),
        }
    }
}

/// 预设的长时操作行为
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedOperation {
    pub resource_id: String,
    pub kind: String,
    /// 返回终态之前的进行中次数；`null` 表示永远不结束
    #[serde(default = "immediately")]
    pub polls_before_terminal: Option<u32>,
    #[serde(default)]
    pub outcome: ScriptedOutcome,
}

fn immediately() -> Option<u32> {
    Some(0)
}

impl ScriptedOperation {
    pub fn new(resource_id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            kind: kind.into(),
            polls_before_terminal: immediately(),
            outcome: ScriptedOutcome::default(),
        }
    }

    pub fn after_polls(mut self, polls: u32) -> Self {
        self.polls_before_terminal = Some(polls);
        self
    }

    pub fn never_terminal(mut self) -> Self {
        self.polls_before_terminal = None;
        self
    }

    pub fn with_outcome(mut self, outcome: ScriptedOutcome) -> Self {
        self.outcome = outcome;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCall {
    List,
    Describe,
    Metric,
    Submit,
    Status,
    Tag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    Permission,
    Malformed,
    NotFound,
}

/// 注入的调用失败
///
/// `target` 的写法：list 为 `type` 或 `type/region`；metric 为资源 ID 或 `id/metric`；
/// 其余调用为资源 ID。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectedFailure {
    pub call: ProviderCall,
    pub target: String,
    pub error: FailureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// 失败次数上限，为空表示一直失败
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub times: Option<u32>,
}

impl InjectedFailure {
    pub fn new(call: ProviderCall, target: impl Into<String>, error: FailureKind) -> Self {
        Self {
            call,
            target: target.into(),
            error,
            message: None,
            times: None,
        }
    }

    pub fn times(mut self, times: u32) -> Self {
        self.times = Some(times);
        self
    }

    fn to_error(&self) -> ProviderError {
        let message = self
            .message
            .clone()
            .unwrap_or_else(|| format!("injected {:?} failure for {}", self.call, self.target));
        match self.error {
            FailureKind::Transient => ProviderError::Transient(message),
            FailureKind::Permission => ProviderError::Permission(message),
            FailureKind::Malformed => ProviderError::Malformed(message),
            FailureKind::NotFound => ProviderError::NotFound(message),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    resources: Vec<SnapshotResource>,
    #[serde(default)]
    metrics: Vec<SnapshotMetric>,
    #[serde(default)]
    operations: Vec<ScriptedOperation>,
    #[serde(default)]
    failures: Vec<InjectedFailure>,
}

#[derive(Debug, Default)]
struct SnapshotState {
    /// 每个注入失败已触发的次数
    failure_hits: HashMap<usize, u32>,
    /// operation id -> (预设行为, 已查询次数)
    submitted: HashMap<String, (ScriptedOperation, u32)>,
    /// 运行中写入的标签，resource id -> tags
    applied_tags: BTreeMap<String, BTreeMap<String, String>>,
}

/// 从 JSON 快照文件读取资源清单的 provider，用于离线运行和测试
#[derive(Debug, Default)]
pub struct SnapshotProvider {
    snapshot: Snapshot,
    state: Mutex<SnapshotState>,
}

impl SnapshotProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let snapshot: Snapshot = serde_json::from_str(json)?;
        Ok(Self {
            snapshot,
            state: Mutex::default(),
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, VigilError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| VigilError::Snapshot {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let provider = Self::from_json(&content).map_err(|e| VigilError::Snapshot {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        debug!(
            path = %path.display(),
            resources = provider.snapshot.resources.len(),
            metrics = provider.snapshot.metrics.len(),
            operations = provider.snapshot.operations.len(),
            "Loaded snapshot"
        );
        Ok(provider)
    }

    pub fn with_resource(mut self, resource: SnapshotResource) -> Self {
        self.snapshot.resources.push(resource);
        self
    }

    pub fn with_metric_values(
        mut self,
        resource_id: impl Into<String>,
        metric: impl Into<String>,
        values: Vec<f64>,
    ) -> Self {
        self.snapshot.metrics.push(SnapshotMetric {
            resource_id: resource_id.into(),
            metric: metric.into(),
            statistic: None,
            datapoints: Vec::new(),
            values,
        });
        self
    }

    pub fn with_operation(mut self, operation: ScriptedOperation) -> Self {
        self.snapshot.operations.push(operation);
        self
    }

    pub fn with_failure(mut self, failure: InjectedFailure) -> Self {
        self.snapshot.failures.push(failure);
        self
    }

    /// 本次运行通过 `tag_resource` 写入的标签
    pub fn applied_tags(&self, resource_id: &str) -> BTreeMap<String, String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.applied_tags.get(resource_id).cloned().unwrap_or_default()
    }

    /// 检查是否命中注入的失败，命中则计数
    fn injected(&self, call: ProviderCall, keys: &[String]) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        for (index, failure) in self.snapshot.failures.iter().enumerate() {
            if failure.call != call || !keys.iter().any(|k| *k == failure.target) {
                continue;
            }
            let hits = state.failure_hits.entry(index).or_insert(0);
            if failure.times.map(|limit| *hits < limit).unwrap_or(true) {
                *hits += 1;
                return Err(failure.to_error());
            }
        }
        Ok(())
    }

    fn find_resource(&self, id: &str) -> Option<&SnapshotResource> {
        self.snapshot.resources.iter().find(|r| r.id == id)
    }
}

fn operation_id(kind: &str, resource_id: &str) -> String {
    format!("{}/{}", kind, resource_id)
}

#[async_trait]
impl ProviderClient for SnapshotProvider {
    async fn list(&self, resource_type: &str, region: &str) -> Result<Vec<ResourceRef>, ProviderError> {
        self.injected(
            ProviderCall::List,
            &[
                resource_type.to_string(),
                format!("{}/{}", resource_type, region),
            ],
        )?;

        Ok(self
            .snapshot
            .resources
            .iter()
            .filter(|r| r.resource_type == resource_type && r.region == region)
            .map(SnapshotResource::reference)
            .collect())
    }

    async fn describe(&self, resource: &ResourceRef) -> Result<Resource, ProviderError> {
        self.injected(ProviderCall::Describe, &[resource.id.clone()])?;

        let found = self
            .find_resource(&resource.id)
            .ok_or_else(|| ProviderError::NotFound(resource.id.clone()))?;

        let mut described = Resource::new(&found.id, &found.resource_type, &found.region);
        described.attributes = found.attributes.clone();
        Ok(described)
    }

    async fn get_metric_statistics(
        &self,
        resource: &ResourceRef,
        metric: &str,
        window: &TimeWindow,
        statistic: StatisticKind,
    ) -> Result<Vec<Datapoint>, ProviderError> {
        self.injected(
            ProviderCall::Metric,
            &[resource.id.clone(), format!("{}/{}", resource.id, metric)],
        )?;

        let entry = self.snapshot.metrics.iter().find(|m| {
            m.resource_id == resource.id
                && m.metric == metric
                && m.statistic.map(|s| s == statistic).unwrap_or(true)
        });

        let Some(entry) = entry else {
            return Ok(Vec::new());
        };

        let period = Duration::seconds(window.period_seconds as i64);
        let mut datapoints = entry.datapoints.clone();
        datapoints.extend(
            entry
                .values
                .iter()
                .enumerate()
                .map(|(i, value)| Datapoint::new(window.start + period * i as i32, *value)),
        );
        Ok(datapoints)
    }

    async fn submit_operation(&self, resource: &ResourceRef, kind: &str) -> Result<String, ProviderError> {
        self.injected(ProviderCall::Submit, &[resource.id.clone()])?;

        let scripted = self
            .snapshot
            .operations
            .iter()
            .find(|op| op.resource_id == resource.id && op.kind == kind)
            .cloned()
            .unwrap_or_else(|| ScriptedOperation::new(&resource.id, kind));

        let id = operation_id(kind, &resource.id);
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.submitted.insert(id.clone(), (scripted, 0));
        Ok(id)
    }

    async fn operation_status(&self, operation_id: &str) -> Result<OperationStatus, ProviderError> {
        let resource_id = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state
                .submitted
                .get(operation_id)
                .map(|(op, _)| op.resource_id.clone())
                .ok_or_else(|| ProviderError::NotFound(format!("operation {}", operation_id)))?
        };
        self.injected(ProviderCall::Status, &[resource_id])?;

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (scripted, polls) = state
            .submitted
            .get_mut(operation_id)
            .ok_or_else(|| ProviderError::NotFound(format!("operation {}", operation_id)))?;
        *polls += 1;

        let terminal = scripted
            .polls_before_terminal
            .map(|n| *polls > n)
            .unwrap_or(false);
        if !terminal {
            return Ok(OperationStatus::InProgress);
        }

        Ok(match &scripted.outcome {
            ScriptedOutcome::Succeeded { result } => OperationStatus::Succeeded {
                result: result.clone(),
            },
            ScriptedOutcome::Failed { reason } => OperationStatus::Failed {
                reason: reason.clone(),
            },
        })
    }

    async fn tag_resource(&self, resource: &ResourceRef, key: &str, value: &str) -> Result<(), ProviderError> {
        self.injected(ProviderCall::Tag, &[resource.id.clone()])?;

        if self.find_resource(&resource.id).is_none() {
            return Err(ProviderError::NotFound(resource.id.clone()));
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .applied_tags
            .entry(resource.id.clone())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}
