use vigil_types::{MetricSeries, Reduction, StatisticKind};

/// 将序列归约为单个统计值
///
/// 空序列对所有统计方式都返回 `Reduction::NoData`，由规则的 `missing_data`
/// 决定是否按 0 处理。非有限值（NaN、inf）视为缺失的数据点。
///
/// `Percentile(p)` 对 provider 返回的逐周期百分位值取算术平均。这是近似值，
/// 不是对原始样本重新计算的百分位数；现有部署的阈值是按这个近似值标定的，
/// 不要改成精确计算。
pub fn reduce(series: &MetricSeries, kind: StatisticKind) -> Reduction {
    reduce_values(series.values(), kind)
}

pub fn reduce_values(values: impl IntoIterator<Item = f64>, kind: StatisticKind) -> Reduction {
    let values: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return Reduction::NoData;
    }

    let value = match kind {
        StatisticKind::Sum => values.iter().sum(),
        StatisticKind::Avg | StatisticKind::Percentile(_) => mean(&values),
        StatisticKind::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        StatisticKind::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
    };

    Reduction::Value(value)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use vigil_types::{Datapoint, TimeWindow};

    fn series(values: &[f64], statistic: StatisticKind) -> MetricSeries {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let window = TimeWindow::lookback(t0 + Duration::hours(1), 1, 300);
        let points = values
            .iter()
            .enumerate()
            .map(|(i, v)| Datapoint::new(t0 + Duration::minutes(5 * i as i64), *v))
            .collect();
        MetricSeries::new("lb-1", "TargetResponseTime", window, statistic, points)
    }

    #[test]
    fn test_sum() {
        let s = series(&[2.0, 3.0, 5.0], StatisticKind::Sum);
        assert_eq!(reduce(&s, StatisticKind::Sum), Reduction::Value(10.0));
    }

    #[test]
    fn test_avg_max_min() {
        let s = series(&[2.0, 4.0, 9.0], StatisticKind::Avg);
        assert_eq!(reduce(&s, StatisticKind::Avg), Reduction::Value(5.0));
        assert_eq!(reduce(&s, StatisticKind::Max), Reduction::Value(9.0));
        assert_eq!(reduce(&s, StatisticKind::Min), Reduction::Value(2.0));
    }

    #[test]
    fn test_empty_series_is_no_data() {
        let s = series(&[], StatisticKind::Avg);
        for kind in [
            StatisticKind::Sum,
            StatisticKind::Avg,
            StatisticKind::Max,
            StatisticKind::Min,
            StatisticKind::Percentile(99.0),
        ] {
            assert_eq!(reduce(&s, kind), Reduction::NoData);
        }
    }

    #[test]
    fn test_percentile_averages_period_values() {
        // 每个周期的 p99 分别为 100、200、600，近似结果为平均值 300
        let s = series(&[100.0, 200.0, 600.0], StatisticKind::Percentile(99.0));
        assert_eq!(
            reduce(&s, StatisticKind::Percentile(99.0)),
            Reduction::Value(300.0)
        );
    }

    #[test]
    fn test_non_finite_values_ignored() {
        assert_eq!(
            reduce_values([f64::NAN, 4.0, f64::INFINITY], StatisticKind::Max),
            Reduction::Value(4.0)
        );
        assert_eq!(
            reduce_values([f64::NAN], StatisticKind::Sum),
            Reduction::NoData
        );
    }
}
