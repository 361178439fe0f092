use crate::error::ProviderError;
use crate::provider::ProviderClient;
use std::sync::Arc;
use tracing::debug;
use vigil_types::{MetricSeries, Reduction, ResourceRef, StatisticKind, TimeWindow};

/// 指标聚合器：拉取时间窗口内的数据点并归约为单个统计值
pub struct MetricAggregator {
    provider: Arc<dyn ProviderClient>,
}

impl MetricAggregator {
    pub fn new(provider: Arc<dyn ProviderClient>) -> Self {
        Self { provider }
    }

    /// 拉取指标序列，数据点按时间排序
    pub async fn fetch_series(
        &self,
        resource: &ResourceRef,
        metric: &str,
        window: &TimeWindow,
        statistic: StatisticKind,
    ) -> Result<MetricSeries, ProviderError> {
        let datapoints = self
            .provider
            .get_metric_statistics(resource, metric, window, statistic)
            .await?;

        let series = MetricSeries::new(&resource.id, metric, *window, statistic, datapoints);
        debug!(
            resource_id = %resource.id,
            metric,
            statistic = %statistic,
            datapoints = series.datapoints.len(),
            "Fetched metric series"
        );
        Ok(series)
    }

    pub fn reduce(series: &MetricSeries, kind: StatisticKind) -> Reduction {
        vigil_metrics::reduce(series, kind)
    }

    /// 拉取并按同一统计方式归约
    pub async fn observe(
        &self,
        resource: &ResourceRef,
        metric: &str,
        window: &TimeWindow,
        statistic: StatisticKind,
    ) -> Result<Reduction, ProviderError> {
        let series = self.fetch_series(resource, metric, window, statistic).await?;
        Ok(Self::reduce(&series, statistic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProviderClient;
    use chrono::{Duration, TimeZone, Utc};
    use vigil_types::Datapoint;

    fn window() -> TimeWindow {
        TimeWindow::lookback(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(), 1, 300)
    }

    #[tokio::test]
    async fn test_series_sorted_and_reduced() {
        let window = window();
        let start = window.start;
        let mut provider = MockProviderClient::new();
        provider
            .expect_get_metric_statistics()
            .returning(move |_, _, _, _| {
                Ok(vec![
                    Datapoint::new(start + Duration::minutes(10), 5.0),
                    Datapoint::new(start, 2.0),
                    Datapoint::new(start + Duration::minutes(5), 3.0),
                ])
            });

        let aggregator = MetricAggregator::new(Arc::new(provider));
        let target = ResourceRef::new("i-1", "instance", "us-east-1");

        let series = aggregator
            .fetch_series(&target, "RequestCount", &window, StatisticKind::Sum)
            .await
            .unwrap();
        assert_eq!(series.values().collect::<Vec<_>>(), vec![2.0, 3.0, 5.0]);
        assert_eq!(
            MetricAggregator::reduce(&series, StatisticKind::Sum),
            Reduction::Value(10.0)
        );
    }

    #[tokio::test]
    async fn test_empty_series_is_no_data() {
        let mut provider = MockProviderClient::new();
        provider
            .expect_get_metric_statistics()
            .returning(|_, _, _, _| Ok(Vec::new()));

        let aggregator = MetricAggregator::new(Arc::new(provider));
        let reduction = aggregator
            .observe(
                &ResourceRef::new("i-1", "instance", "us-east-1"),
                "CPUUtilization",
                &window(),
                StatisticKind::Avg,
            )
            .await
            .unwrap();
        assert!(reduction.is_no_data());
    }

    #[tokio::test]
    async fn test_provider_error_propagates() {
        let mut provider = MockProviderClient::new();
        provider
            .expect_get_metric_statistics()
            .returning(|_, _, _, _| Err(ProviderError::Transient("throttled".to_string())));

        let aggregator = MetricAggregator::new(Arc::new(provider));
        let result = aggregator
            .observe(
                &ResourceRef::new("i-1", "instance", "us-east-1"),
                "CPUUtilization",
                &window(),
                StatisticKind::Avg,
            )
            .await;
        assert_eq!(result, Err(ProviderError::Transient("throttled".to_string())));
    }
}
