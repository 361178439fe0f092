use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::path::Path;
use tracing::debug;
use vigil_types::Severity;

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 单次审计运行的自身指标
///
/// 进程退出前可导出为 Prometheus 文本格式，供 node-exporter textfile collector 采集。
pub struct RunMetrics {
    resources_scanned_total: CounterVec,
    findings_total: CounterVec,
    provider_errors_total: CounterVec,
    data_gaps_total: CounterVec,
    operations_total: CounterVec,
    poll_attempts: HistogramVec,
    dispatch_total: CounterVec,
    tag_actions_total: CounterVec,
    run_duration_seconds: Gauge,

    registry: Registry,
}

impl RunMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let resources_scanned_total = CounterVec::new(
            Opts::new("vigil_resources_scanned_total", "Resources evaluated in this run"),
            &["resource_type", "region"],
        )?;
        registry.register(Box::new(resources_scanned_total.clone()))?;

        let findings_total = CounterVec::new(
            Opts::new("vigil_findings_total", "Findings produced in this run"),
            &["severity", "category"],
        )?;
        registry.register(Box::new(findings_total.clone()))?;

        let provider_errors_total = CounterVec::new(
            Opts::new("vigil_provider_errors_total", "Provider API call failures"),
            &["kind", "call"],
        )?;
        registry.register(Box::new(provider_errors_total.clone()))?;

        let data_gaps_total = CounterVec::new(
            Opts::new("vigil_data_gaps_total", "Observations that could not be evaluated"),
            &["reason"],
        )?;
        registry.register(Box::new(data_gaps_total.clone()))?;

        let operations_total = CounterVec::new(
            Opts::new("vigil_operations_total", "Long-running operations by terminal state"),
            &["kind", "state"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let poll_attempts = HistogramVec::new(
            HistogramOpts::new("vigil_poll_attempts", "Status polls per long-running operation")
                .buckets(vec![1.0, 2.0, 5.0, 10.0, 20.0, 50.0]),
            &["kind"],
        )?;
        registry.register(Box::new(poll_attempts.clone()))?;

        let dispatch_total = CounterVec::new(
            Opts::new("vigil_alert_dispatch_total", "Alert dispatch attempts by outcome"),
            &["channel", "outcome"],
        )?;
        registry.register(Box::new(dispatch_total.clone()))?;

        let tag_actions_total = CounterVec::new(
            Opts::new("vigil_tag_actions_total", "Resource tagging attempts by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(tag_actions_total.clone()))?;

        let run_duration_seconds =
            Gauge::new("vigil_run_duration_seconds", "Wall-clock duration of the audit run")?;
        registry.register(Box::new(run_duration_seconds.clone()))?;

        Ok(Self {
            resources_scanned_total,
            findings_total,
            provider_errors_total,
            data_gaps_total,
            operations_total,
            poll_attempts,
            dispatch_total,
            tag_actions_total,
            run_duration_seconds,
            registry,
        })
    }

    pub fn record_resource_scanned(&self, resource_type: &str, region: &str) {
        self.resources_scanned_total
            .with_label_values(&[resource_type, region])
            .inc();
    }

    pub fn record_finding(&self, severity: Severity, category: &str) {
        self.findings_total
            .with_label_values(&[severity.as_str(), category])
            .inc();
    }

    pub fn record_provider_error(&self, kind: &str, call: &str) {
        self.provider_errors_total
            .with_label_values(&[kind, call])
            .inc();
    }

    pub fn record_data_gap(&self, reason: &str) {
        self.data_gaps_total.with_label_values(&[reason]).inc();
    }

    pub fn record_operation(&self, kind: &str, state: &str, attempts: u32) {
        self.operations_total.with_label_values(&[kind, state]).inc();
        self.poll_attempts
            .with_label_values(&[kind])
            .observe(attempts as f64);
    }

    pub fn record_dispatch(&self, channel: &str, outcome: &str) {
        self.dispatch_total
            .with_label_values(&[channel, outcome])
            .inc();
    }

    pub fn record_tag(&self, outcome: &str) {
        self.tag_actions_total.with_label_values(&[outcome]).inc();
    }

    pub fn set_run_duration(&self, seconds: f64) {
        self.run_duration_seconds.set(seconds);
    }

    pub fn export(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// 写入 textfile，先写临时文件再改名，避免采集到半个文件
    pub fn write_textfile(&self, path: &Path) -> Result<(), MetricsError> {
        let body = self.export()?;
        let tmp = path.with_extension("prom.tmp");
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "Run metrics written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_metrics_export() {
        let metrics = RunMetrics::new().unwrap();

        metrics.record_resource_scanned("rds:db", "us-east-1");
        metrics.record_finding(Severity::Warning, "highCpuCount");
        metrics.record_provider_error("transient", "describe");
        metrics.record_operation("drift-detection", "TIMEOUT", 10);
        metrics.record_dispatch("slack", "sent");
        metrics.record_tag("applied");

        let exported = metrics.export().unwrap();
        assert!(exported.contains("vigil_resources_scanned_total"));
        assert!(exported.contains("category=\"highCpuCount\""));
        assert!(exported.contains("vigil_poll_attempts_bucket"));
        assert!(exported.contains("outcome=\"sent\""));
        assert!(exported.contains("vigil_tag_actions_total{outcome=\"applied\"} 1"));
    }

    #[test]
    fn test_write_textfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigil.prom");

        let metrics = RunMetrics::new().unwrap();
        metrics.set_run_duration(1.5);
        metrics.write_textfile(&path).unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("vigil_run_duration_seconds 1.5"));
    }
}
