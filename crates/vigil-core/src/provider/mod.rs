mod snapshot;

pub use snapshot::{
    FailureKind, InjectedFailure, ProviderCall, ScriptedOperation, ScriptedOutcome, SnapshotMetric,
    SnapshotProvider, SnapshotResource,
};

use crate::error::ProviderError;
use async_trait::async_trait;
use vigil_types::{Datapoint, OperationStatus, Resource, ResourceRef, StatisticKind, TimeWindow};

/// 云 provider 接口
///
/// 所有调用都可能失败，错误按 `ProviderError` 分类。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// 列出某区域内某类型的资源
    async fn list(&self, resource_type: &str, region: &str) -> Result<Vec<ResourceRef>, ProviderError>;

    /// 获取资源详情
    async fn describe(&self, resource: &ResourceRef) -> Result<Resource, ProviderError>;

    /// 获取窗口内的指标数据点，每个周期一个
    async fn get_metric_statistics(
        &self,
        resource: &ResourceRef,
        metric: &str,
        window: &TimeWindow,
        statistic: StatisticKind,
    ) -> Result<Vec<Datapoint>, ProviderError>;

    /// 提交长时操作，返回操作 ID
    async fn submit_operation(&self, resource: &ResourceRef, kind: &str) -> Result<String, ProviderError>;

    /// 查询操作状态
    async fn operation_status(&self, operation_id: &str) -> Result<OperationStatus, ProviderError>;

    /// 给资源加上一个标签，已存在时覆盖其值
    async fn tag_resource(&self, resource: &ResourceRef, key: &str, value: &str) -> Result<(), ProviderError>;
}
