use crate::provider::ProviderClient;
use crate::signal::RunSignal;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};
use vigil_config::TaggingConfig;
use vigil_types::{GapReason, Report, Severity, TagAction, TagOutcome, TaggingSummary};

/// 对有发现项的资源打标
///
/// 按报告中的资源顺序逐个调用 provider，成功次数达到 `max_apply` 后
/// 其余资源只记录为 `LimitReached`。打标失败不占用名额，也不影响退出码。
pub struct ResourceTagger {
    provider: Arc<dyn ProviderClient>,
    key: String,
    value: String,
    max_apply: usize,
    min_severity: Severity,
}

impl ResourceTagger {
    pub fn new(provider: Arc<dyn ProviderClient>, config: &TaggingConfig) -> Self {
        Self {
            provider,
            key: config.key.clone(),
            value: config.value.clone(),
            max_apply: config.max_apply,
            min_severity: config.min_severity,
        }
    }

    pub async fn apply(&self, report: &Report, signal: &RunSignal, deadline: Option<Instant>) -> TaggingSummary {
        let mut summary = TaggingSummary::new(&self.key, &self.value, self.max_apply);
        let mut applied = 0;

        let flagged = report.resources.iter().filter(|s| {
            s.effective_severity
                .map(|severity| severity >= self.min_severity)
                .unwrap_or(false)
        });

        for section in flagged {
            let resource = &section.resource;
            let outcome = if signal.is_cancelled() {
                TagOutcome::NotAttempted {
                    reason: GapReason::Cancelled,
                }
            } else if deadline.map_or(false, |d| Instant::now() >= d) {
                TagOutcome::NotAttempted {
                    reason: GapReason::DeadlineExceeded,
                }
            } else if applied >= self.max_apply {
                TagOutcome::LimitReached
            } else {
                match self.provider.tag_resource(resource, &self.key, &self.value).await {
                    Ok(()) => {
                        applied += 1;
                        TagOutcome::Applied
                    }
                    Err(e) => {
                        warn!(resource_id = %resource.id, key = %self.key, "Failed to tag resource: {}", e);
                        TagOutcome::Failed {
                            error: e.to_string(),
                        }
                    }
                }
            };

            summary.actions.push(TagAction {
                resource_id: resource.id.clone(),
                outcome,
            });
        }

        info!(
            key = %self.key,
            applied = summary.applied_count(),
            failed = summary.failed_count(),
            skipped = summary.skipped_count(),
            "Tagging finished"
        );
        summary
    }
}
