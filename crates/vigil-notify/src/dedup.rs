use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use vigil_types::Report;

/// 单次渠道发送的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Sent,
    /// 冷却期内已发送过相同的发现项集合
    Suppressed,
    /// 报告最高级别低于渠道门槛
    BelowSeverity,
    Failed { error: String },
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Sent => "sent",
            DispatchOutcome::Suppressed => "suppressed",
            DispatchOutcome::BelowSeverity => "below_severity",
            DispatchOutcome::Failed { .. } => "failed",
        }
    }
}

/// 发送记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertDispatchRecord {
    pub channel: String,
    pub finding_set_hash: String,
    pub sent_at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: DispatchOutcome,
}

/// 发现项集合的摘要：渠道名 + 排序后的发现项标识
///
/// 观测值和时间戳不参与计算，数值小幅波动不会重复告警。
pub fn finding_set_hash(channel: &str, report: &Report) -> String {
    let mut identities: Vec<String> = report.findings().map(|f| f.identity()).collect();
    identities.sort();
    identities.dedup();

    let mut hasher = Sha256::new();
    hasher.update(channel.as_bytes());
    for identity in &identities {
        hasher.update(b"\n");
        hasher.update(identity.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DedupState {
    /// channel -> 最后一次成功发送
    #[serde(default)]
    last_sent: BTreeMap<String, AlertDispatchRecord>,
}

/// 告警去重器，状态保存在 JSON 文件中，跨运行生效
pub struct AlertDeduplicator {
    path: Option<PathBuf>,
    cooldown: Duration,
    state: DedupState,
}

impl AlertDeduplicator {
    /// 只在内存中去重
    pub fn in_memory(cooldown_minutes: u64) -> Self {
        Self {
            path: None,
            cooldown: Duration::minutes(cooldown_minutes as i64),
            state: DedupState::default(),
        }
    }

    /// 从状态文件加载；文件不存在或损坏时从空状态开始
    pub fn load(path: impl AsRef<Path>, cooldown_minutes: u64) -> Self {
        let path = path.as_ref().to_path_buf();
        let state = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(state) => state,
                Err(e) => {
                    warn!(path = %path.display(), "Ignoring corrupt alert state: {}", e);
                    DedupState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => DedupState::default(),
            Err(e) => {
                warn!(path = %path.display(), "Cannot read alert state: {}", e);
                DedupState::default()
            }
        };

        Self {
            path: Some(path),
            cooldown: Duration::minutes(cooldown_minutes as i64),
            state,
        }
    }

    /// 冷却期内是否已向该渠道发送过同一集合
    pub fn is_duplicate(&self, channel: &str, hash: &str, now: DateTime<Utc>) -> bool {
        match self.state.last_sent.get(channel) {
            Some(record) if record.finding_set_hash == hash => {
                let elapsed = now - record.sent_at;
                if elapsed < self.cooldown {
                    debug!(
                        channel,
                        "Alert suppressed (same findings sent {} minutes ago)",
                        elapsed.num_minutes()
                    );
                    return true;
                }
                false
            }
            _ => false,
        }
    }

    /// 记录一次成功发送
    pub fn record(&mut self, record: AlertDispatchRecord) {
        self.state.last_sent.insert(record.channel.clone(), record);
    }

    /// 待写入的状态快照；只在内存中去重时为 `None`
    ///
    /// 序列化在调用方持锁时完成，写文件放到锁外。
    pub fn pending_write(&self) -> std::io::Result<Option<PendingWrite>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        let json = serde_json::to_string_pretty(&self.state)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Some(PendingWrite {
            path: path.clone(),
            json,
        }))
    }

    /// 写回状态文件
    pub async fn save(&self) -> std::io::Result<()> {
        match self.pending_write()? {
            Some(write) => write.apply().await,
            None => Ok(()),
        }
    }
}

/// 序列化好的去重状态
#[derive(Debug)]
pub struct PendingWrite {
    path: PathBuf,
    json: String,
}

impl PendingWrite {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn apply(self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, self.json).await?;
        debug!(path = %self.path.display(), "Alert state saved");
        Ok(())
    }
}
