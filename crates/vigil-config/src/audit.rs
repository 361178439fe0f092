use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use vigil_logging::LoggingConfig;
use vigil_notify::{AlertsConfig, ChannelTransport};
use vigil_types::{ResourceFilter, RuleTarget, Severity, StatisticKind, ThresholdRule};

/// 长时操作失败的计数器名称
pub const OPERATION_FAILED_CATEGORY: &str = "operationFailedCount";
/// 长时操作超时的计数器名称
pub const OPERATION_TIMEOUT_CATEGORY: &str = "operationTimeoutCount";
/// 运行取消导致放弃轮询的计数器名称
pub const OPERATION_ABANDONED_CATEGORY: &str = "operationAbandonedCount";

/// 回看窗口上限：指标最长保留 15 个月
pub const MAX_LOOKBACK_HOURS: u64 = 455 * 24;
/// 单次运行截止时间上限（一天）
pub const MAX_DEADLINE_SECONDS: u64 = 24 * 60 * 60;

/// 审计配置
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default)]
    pub run: RunConfig,

    #[serde(default)]
    pub targets: Vec<TargetConfig>,

    #[serde(default)]
    pub rules: Vec<ThresholdRule>,

    #[serde(default)]
    pub operations: Vec<OperationCheck>,

    #[serde(default)]
    pub poller: PollerConfig,

    #[serde(default)]
    pub alerts: AlertsConfig,

    #[serde(default)]
    pub report: ReportConfig,

    #[serde(default)]
    pub tagging: TaggingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 运行参数（`[run]`）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_regions")]
    pub regions: Vec<String>,

    /// 指标回看窗口（小时）
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u64,

    /// 指标统计周期（秒）
    #[serde(default = "default_period_seconds")]
    pub period_seconds: u64,

    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// 整次运行的截止时间（秒）
    #[serde(default = "default_deadline_seconds")]
    pub deadline_seconds: u64,
}

fn default_regions() -> Vec<String> {
    vec!["us-east-1".to_string()]
}

fn default_lookback_hours() -> u64 {
    24
}

fn default_period_seconds() -> u64 {
    300
}

fn default_worker_pool_size() -> usize {
    8
}

fn default_deadline_seconds() -> u64 {
    900
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            regions: default_regions(),
            lookback_hours: default_lookback_hours(),
            period_seconds: default_period_seconds(),
            worker_pool_size: default_worker_pool_size(),
            deadline_seconds: default_deadline_seconds(),
        }
    }
}

/// 对有发现项的资源打标（`[tagging]`），默认关闭
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggingConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_tag_key")]
    pub key: String,

    #[serde(default = "default_tag_value")]
    pub value: String,

    /// 单次运行最多成功打标的资源数
    #[serde(default = "default_max_apply")]
    pub max_apply: usize,

    /// 资源的有效严重级别达到该级别才会打标
    #[serde(default = "default_tag_min_severity")]
    pub min_severity: Severity,
}

fn default_tag_key() -> String {
    "Audit:Review".to_string()
}

fn default_tag_value() -> String {
    "vigil-flagged".to_string()
}

fn default_max_apply() -> usize {
    100
}

fn default_tag_min_severity() -> Severity {
    Severity::Warning
}

impl Default for TaggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key: default_tag_key(),
            value: default_tag_value(),
            max_apply: default_max_apply(),
            min_severity: default_tag_min_severity(),
        }
    }
}

/// 扫描目标（`[[targets]]`）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub resource_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_contains: Option<String>,

    /// `Key=Value` 形式
    #[serde(default)]
    pub required_tags: Vec<String>,

    /// 覆盖 `[run].regions`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regions: Option<Vec<String>>,
}

impl TargetConfig {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            name_contains: None,
            required_tags: Vec::new(),
            regions: None,
        }
    }

    pub fn filter(&self) -> ResourceFilter {
        ResourceFilter {
            name_contains: self.name_contains.clone(),
            ..ResourceFilter::default()
        }
        .with_tag_specs(self.required_tags.iter().map(String::as_str))
    }

    pub fn regions<'a>(&'a self, run: &'a RunConfig) -> &'a [String] {
        self.regions.as_deref().unwrap_or(&run.regions)
    }
}

/// 长时操作检查（`[[operations]]`），例如漂移检测
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationCheck {
    pub kind: String,

    /// 为空时对所有资源执行
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,

    /// 完成后结果状态在此列表中则产生发现项
    #[serde(default = "default_alert_statuses")]
    pub alert_statuses: Vec<String>,

    #[serde(default = "default_operation_category")]
    pub category: String,

    #[serde(default = "default_operation_severity")]
    pub severity: Severity,

    /// 操作失败或超时时的级别
    #[serde(default = "default_operation_severity")]
    pub failure_severity: Severity,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

fn default_alert_statuses() -> Vec<String> {
    vec!["DRIFTED".to_string()]
}

fn default_operation_category() -> String {
    "driftDetectedCount".to_string()
}

fn default_operation_severity() -> Severity {
    Severity::Warning
}

impl OperationCheck {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            resource_type: None,
            alert_statuses: default_alert_statuses(),
            category: default_operation_category(),
            severity: default_operation_severity(),
            failure_severity: default_operation_severity(),
            recommendation: None,
        }
    }

    pub fn for_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn applies_to(&self, resource_type: &str) -> bool {
        self.resource_type
            .as_deref()
            .map(|t| t == resource_type)
            .unwrap_or(true)
    }

    pub fn is_alerting_status(&self, status: &str) -> bool {
        self.alert_statuses
            .iter()
            .any(|s| s.eq_ignore_ascii_case(status))
    }
}

/// 轮询参数（`[poller]`）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
}

fn default_max_attempts() -> u32 {
    20
}

fn default_poll_interval_seconds() -> u64 {
    5
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            poll_interval_seconds: default_poll_interval_seconds(),
        }
    }
}

/// 报告输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub format: ReportFormat,
}

impl AuditConfig {
    /// 所有计数器名称，按首次出现的顺序，去重
    ///
    /// 报告中这些计数器都从 0 开始，没有发现项时也会输出。
    pub fn categories(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut categories = Vec::new();

        let rule_categories = self.rules.iter().map(|r| r.category.as_str());
        let operation_categories = self.operations.iter().map(|o| o.category.as_str());
        let failure_categories = if self.operations.is_empty() {
            Vec::new()
        } else {
            vec![
                OPERATION_FAILED_CATEGORY,
                OPERATION_TIMEOUT_CATEGORY,
                OPERATION_ABANDONED_CATEGORY,
            ]
        };

        for category in rule_categories
            .chain(operation_categories)
            .chain(failure_categories)
        {
            if seen.insert(category) {
                categories.push(category.to_string());
            }
        }
        categories
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.run.worker_pool_size == 0 {
            return Err(ConfigError::invalid(
                "run.worker_pool_size",
                "must be greater than 0",
            ));
        }
        if self.run.regions.is_empty() {
            return Err(ConfigError::invalid("run.regions", "at least one region is required"));
        }
        if self.run.period_seconds == 0 {
            return Err(ConfigError::invalid("run.period_seconds", "must be greater than 0"));
        }
        if self.run.lookback_hours == 0 || self.run.lookback_hours > MAX_LOOKBACK_HOURS {
            return Err(ConfigError::invalid(
                "run.lookback_hours",
                format!("must be between 1 and {}", MAX_LOOKBACK_HOURS),
            ));
        }
        if self.run.deadline_seconds == 0 || self.run.deadline_seconds > MAX_DEADLINE_SECONDS {
            return Err(ConfigError::invalid(
                "run.deadline_seconds",
                format!("must be between 1 and {}", MAX_DEADLINE_SECONDS),
            ));
        }
        if self.poller.max_attempts == 0 {
            return Err(ConfigError::invalid("poller.max_attempts", "must be greater than 0"));
        }
        if self.poller.poll_interval_seconds == 0 {
            return Err(ConfigError::invalid(
                "poller.poll_interval_seconds",
                "must be greater than 0",
            ));
        }

        for (i, target) in self.targets.iter().enumerate() {
            if target.resource_type.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("targets[{}].resource_type", i),
                    "must not be empty",
                ));
            }
            if let Some(tag) = target.required_tags.iter().find(|t| !t.contains('=')) {
                return Err(ConfigError::invalid(
                    format!("targets[{}].required_tags", i),
                    format!("'{}' is not in Key=Value form", tag),
                ));
            }
        }

        let mut names = HashSet::new();
        for (i, rule) in self.rules.iter().enumerate() {
            let field = format!("rules[{}]", i);
            if rule.name.trim().is_empty() {
                return Err(ConfigError::invalid(field, "rule name must not be empty"));
            }
            if !names.insert(rule.name.as_str()) {
                return Err(ConfigError::invalid(
                    field,
                    format!("duplicate rule name '{}'", rule.name),
                ));
            }
            if rule.category.trim().is_empty() {
                return Err(ConfigError::invalid(field, "category must not be empty"));
            }
            if !rule.limit.is_finite() {
                return Err(ConfigError::invalid(field, "limit must be a finite number"));
            }
            if let RuleTarget::Metric {
                statistic: StatisticKind::Percentile(p),
                ..
            } = rule.target
            {
                if !(p > 0.0 && p <= 100.0) {
                    return Err(ConfigError::invalid(
                        field,
                        format!("percentile {} outside (0, 100]", p),
                    ));
                }
            }
        }

        for (i, check) in self.operations.iter().enumerate() {
            if check.kind.trim().is_empty() {
                return Err(ConfigError::invalid(
                    format!("operations[{}].kind", i),
                    "must not be empty",
                ));
            }
        }

        if self.tagging.enabled {
            if self.tagging.key.trim().is_empty() {
                return Err(ConfigError::invalid("tagging.key", "must not be empty"));
            }
            if self.tagging.max_apply == 0 {
                return Err(ConfigError::invalid("tagging.max_apply", "must be greater than 0"));
            }
        }

        for (i, channel) in self.alerts.channels.iter().enumerate() {
            let field = format!("alerts.channels[{}]", i);
            if channel.name.trim().is_empty() {
                return Err(ConfigError::invalid(field, "channel name must not be empty"));
            }
            let endpoint_missing = match &channel.transport {
                ChannelTransport::Slack(cfg) => cfg.webhook_url.trim().is_empty(),
                ChannelTransport::Webhook(cfg) => cfg.url.trim().is_empty(),
                ChannelTransport::Email(cfg) => cfg.smtp_host.trim().is_empty() || cfg.to.is_empty(),
            };
            if endpoint_missing {
                return Err(ConfigError::invalid(
                    field,
                    format!("{} channel '{}' has no endpoint", channel.transport.kind(), channel.name),
                ));
            }
        }

        Ok(())
    }

    /// 生效配置的 TOML 形式
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_types::Comparator;

    fn cpu_rule(name: &str) -> ThresholdRule {
        ThresholdRule::metric(
            name,
            "highCpuCount",
            "CPUUtilization",
            StatisticKind::Avg,
            Comparator::Gt,
            80.0,
            Severity::Warning,
        )
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = AuditConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.run.worker_pool_size, 8);
        assert_eq!(config.poller.max_attempts, 20);
    }

    #[test]
    fn test_zero_pool_rejected() {
        let mut config = AuditConfig::default();
        config.run.worker_pool_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "run.worker_pool_size"
        ));
    }

    fn invalid_field(config: &AuditConfig) -> Option<String> {
        match config.validate() {
            Err(ConfigError::Invalid { field, .. }) => Some(field),
            _ => None,
        }
    }

    #[test]
    fn test_zero_deadline_rejected() {
        let mut config = AuditConfig::default();
        config.run.deadline_seconds = 0;
        assert_eq!(invalid_field(&config).as_deref(), Some("run.deadline_seconds"));
    }

    #[test]
    fn test_unbounded_deadline_rejected() {
        let mut config = AuditConfig::default();
        config.run.deadline_seconds = u64::MAX;
        assert_eq!(invalid_field(&config).as_deref(), Some("run.deadline_seconds"));

        config.run.deadline_seconds = MAX_DEADLINE_SECONDS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_oversized_lookback_rejected() {
        let mut config = AuditConfig::default();
        config.run.lookback_hours = u64::MAX;
        assert_eq!(invalid_field(&config).as_deref(), Some("run.lookback_hours"));

        config.run.lookback_hours = MAX_LOOKBACK_HOURS + 1;
        assert_eq!(invalid_field(&config).as_deref(), Some("run.lookback_hours"));

        config.run.lookback_hours = MAX_LOOKBACK_HOURS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_tagging_checked_only_when_enabled() {
        let mut config = AuditConfig::default();
        config.tagging.max_apply = 0;
        assert!(config.validate().is_ok());

        config.tagging.enabled = true;
        assert_eq!(invalid_field(&config).as_deref(), Some("tagging.max_apply"));

        config.tagging.max_apply = 5;
        config.tagging.key = " ".to_string();
        assert_eq!(invalid_field(&config).as_deref(), Some("tagging.key"));
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let config = AuditConfig {
            rules: vec![cpu_rule("high-cpu"), cpu_rule("high-cpu")],
            ..AuditConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_finite_limit_rejected() {
        let mut rule = cpu_rule("high-cpu");
        rule.limit = f64::NAN;
        let config = AuditConfig {
            rules: vec![rule],
            ..AuditConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_tag_spec_rejected() {
        let mut target = TargetConfig::new("db-instance");
        target.required_tags = vec!["Environment".to_string()];
        let config = AuditConfig {
            targets: vec![target],
            ..AuditConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_categories_seeded_once() {
        let mut memory = cpu_rule("high-mem");
        memory.category = "highMemoryCount".to_string();
        let config = AuditConfig {
            rules: vec![cpu_rule("cpu-warn"), memory, cpu_rule("cpu-crit")],
            operations: vec![OperationCheck::new("drift")],
            ..AuditConfig::default()
        };

        assert_eq!(
            config.categories(),
            vec![
                "highCpuCount",
                "highMemoryCount",
                "driftDetectedCount",
                OPERATION_FAILED_CATEGORY,
                OPERATION_TIMEOUT_CATEGORY,
                OPERATION_ABANDONED_CATEGORY,
            ]
        );
    }

    #[test]
    fn test_target_filter_and_regions() {
        let run = RunConfig::default();
        let mut target = TargetConfig::new("instance");
        target.required_tags = vec!["Env=prod".to_string()];
        assert_eq!(target.regions(&run), &["us-east-1".to_string()]);
        assert_eq!(
            target.filter().required_tags.get("Env").map(String::as_str),
            Some("prod")
        );

        target.regions = Some(vec!["eu-west-1".to_string()]);
        assert_eq!(target.regions(&run), &["eu-west-1".to_string()]);
    }

    #[test]
    fn test_alert_status_case_insensitive() {
        let check = OperationCheck::new("drift").for_resource_type("stack");
        assert!(check.is_alerting_status("drifted"));
        assert!(!check.is_alerting_status("IN_SYNC"));
        assert!(check.applies_to("stack"));
        assert!(!check.applies_to("queue"));
    }
}
