use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// 指标查询时间窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// 聚合周期（秒）
    pub period_seconds: u64,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, period_seconds: u64) -> Self {
        Self {
            start,
            end,
            period_seconds,
        }
    }

    /// 以 `end` 为终点回溯 `lookback_hours` 小时
    ///
    /// 超出 chrono 可表示范围时起点取最早可表示时间。
    pub fn lookback(end: DateTime<Utc>, lookback_hours: u64, period_seconds: u64) -> Self {
        let start = i64::try_from(lookback_hours)
            .ok()
            .and_then(Duration::try_hours)
            .and_then(|span| end.checked_sub_signed(span))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        Self::new(start, end, period_seconds)
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} .. {} (period {}s)",
            self.start.to_rfc3339(),
            self.end.to_rfc3339(),
            self.period_seconds
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Datapoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// 统计方式
///
/// 配置和序列化中使用字符串形式：`sum`、`avg`、`max`、`min`、`p95`、`p99.9`。
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StatisticKind {
    Sum,
    #[default]
    Avg,
    Max,
    Min,
    /// 百分位数，取值范围 (0, 100]
    Percentile(f64),
}

impl StatisticKind {
    /// 向 provider 请求时使用的统计名
    pub fn provider_name(&self) -> String {
        match self {
            StatisticKind::Sum => "Sum".to_string(),
            StatisticKind::Avg => "Average".to_string(),
            StatisticKind::Max => "Maximum".to_string(),
            StatisticKind::Min => "Minimum".to_string(),
            StatisticKind::Percentile(p) => format!("p{}", p),
        }
    }
}

// 百分位数按位比较，解析时已排除 NaN
impl PartialEq for StatisticKind {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (StatisticKind::Percentile(a), StatisticKind::Percentile(b)) => a.to_bits() == b.to_bits(),
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}

impl Eq for StatisticKind {}

impl Hash for StatisticKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        if let StatisticKind::Percentile(p) = self {
            p.to_bits().hash(state);
        }
    }
}

impl fmt::Display for StatisticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatisticKind::Sum => f.write_str("sum"),
            StatisticKind::Avg => f.write_str("avg"),
            StatisticKind::Max => f.write_str("max"),
            StatisticKind::Min => f.write_str("min"),
            StatisticKind::Percentile(p) => write!(f, "p{}", p),
        }
    }
}

impl FromStr for StatisticKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sum" => Ok(StatisticKind::Sum),
            "avg" | "average" => Ok(StatisticKind::Avg),
            "max" | "maximum" => Ok(StatisticKind::Max),
            "min" | "minimum" => Ok(StatisticKind::Min),
            other => {
                let raw = other
                    .strip_prefix('p')
                    .ok_or_else(|| format!("unknown statistic: {}", s))?;
                let p: f64 = raw
                    .parse()
                    .map_err(|_| format!("invalid percentile: {}", s))?;
                if !(p > 0.0 && p <= 100.0) {
                    return Err(format!("percentile out of range (0, 100]: {}", s));
                }
                Ok(StatisticKind::Percentile(p))
            }
        }
    }
}

impl TryFrom<String> for StatisticKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StatisticKind> for String {
    fn from(kind: StatisticKind) -> Self {
        kind.to_string()
    }
}

/// 单个 (资源, 指标, 统计方式) 的时间序列
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub resource_id: String,
    pub metric_name: String,
    pub window: TimeWindow,
    /// 按时间升序
    pub datapoints: Vec<Datapoint>,
    pub statistic: StatisticKind,
}

impl MetricSeries {
    pub fn new(
        resource_id: impl Into<String>,
        metric_name: impl Into<String>,
        window: TimeWindow,
        statistic: StatisticKind,
        mut datapoints: Vec<Datapoint>,
    ) -> Self {
        datapoints.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Self {
            resource_id: resource_id.into(),
            metric_name: metric_name.into(),
            window,
            datapoints,
            statistic,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.datapoints.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.datapoints.iter().map(|d| d.value)
    }
}

/// 序列归约结果
///
/// `NoData` 与 `Value(0.0)` 必须区分："没有流量" 不等于 "零错误"。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Reduction {
    Value(f64),
    NoData,
}

impl Reduction {
    pub fn value(&self) -> Option<f64> {
        match self {
            Reduction::Value(v) => Some(*v),
            Reduction::NoData => None,
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, Reduction::NoData)
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reduction::Value(v) => write!(f, "{:.2}", v),
            Reduction::NoData => f.write_str("no data"),
        }
    }
}
