use crate::providers::{EmailConfig, SlackConfig, WebhookConfig};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use vigil_types::Severity;

/// 告警配置（`[alerts]`）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// 单条告警最多列出的发现项
    #[serde(default = "default_max_findings")]
    pub max_findings_per_alert: usize,
}

fn default_max_findings() -> usize {
    20
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            dedup: DedupConfig::default(),
            retry: RetryConfig::default(),
            max_findings_per_alert: default_max_findings(),
        }
    }
}

/// 单个告警渠道
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,

    /// 低于该级别的报告不发送到此渠道
    #[serde(default = "default_min_severity")]
    pub min_severity: Severity,

    #[serde(flatten)]
    pub transport: ChannelTransport,
}

fn default_min_severity() -> Severity {
    Severity::Warning
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelTransport {
    Slack(SlackConfig),
    Webhook(WebhookConfig),
    Email(EmailConfig),
}

impl ChannelTransport {
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelTransport::Slack(_) => "slack",
            ChannelTransport::Webhook(_) => "webhook",
            ChannelTransport::Email(_) => "email",
        }
    }
}

/// 告警去重
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// 同一发现项集合在该时间内不重复发送
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u64,
}

fn default_true() -> bool {
    true
}

fn default_state_path() -> PathBuf {
    PathBuf::from("./.vigil/alert-state.json")
}

fn default_cooldown_minutes() -> u64 {
    60
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            state_path: default_state_path(),
            cooldown_minutes: default_cooldown_minutes(),
        }
    }
}

/// 发送失败重试
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    5000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
            multiplier: self.multiplier,
        }
    }
}
