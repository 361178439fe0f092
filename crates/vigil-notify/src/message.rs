use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vigil_types::{Report, Severity};

/// 告警消息：报告摘要，按渠道限制长度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub title: String,
    pub body: String,
    pub severity: Severity,
    pub finding_count: usize,
    pub resource_count: usize,
    pub timestamp: DateTime<Utc>,
}

impl AlertMessage {
    /// 由报告生成告警摘要，最多列出 `max_findings` 条发现项
    ///
    /// 报告没有发现项时返回 `None`。
    pub fn from_report(report: &Report, max_findings: usize) -> Option<Self> {
        let severity = report.max_severity()?;
        let finding_count = report.finding_count();
        let affected = report.resources_with_findings();

        let title = format!(
            "[{}] Vigil audit: {} finding(s) on {} resource(s)",
            severity, finding_count, affected
        );

        let mut body = String::new();
        body.push_str(&format!("Window: {}\n", report.window));
        body.push_str(&format!(
            "Critical: {}  Warning: {}  Info: {}\n",
            report.severity_count(Severity::Critical),
            report.severity_count(Severity::Warning),
            report.severity_count(Severity::Info)
        ));

        let flagged: Vec<String> = report
            .counts_by_category
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(category, count)| format!("{}={}", category, count))
            .collect();
        if !flagged.is_empty() {
            body.push_str(&format!("Categories: {}\n", flagged.join(", ")));
        }

        body.push('\n');
        for finding in report.findings().take(max_findings) {
            body.push_str(&format!(
                "- {} {} {}: {}\n",
                finding.severity, finding.resource_id, finding.rule_name, finding.message
            ));
        }
        if finding_count > max_findings {
            body.push_str(&format!("...and {} more\n", finding_count - max_findings));
        }

        let gaps = report.data_gap_count();
        if gaps > 0 {
            body.push_str(&format!(
                "\n{} observation(s) could not be evaluated (see report)\n",
                gaps
            ));
        }

        Some(Self {
            title,
            body,
            severity,
            finding_count,
            resource_count: report.resources.len(),
            timestamp: report.generated_at,
        })
    }

    /// Slack attachment 颜色
    pub fn slack_color(&self) -> &'static str {
        match self.severity {
            Severity::Info => "good",
            Severity::Warning => "warning",
            Severity::Critical => "danger",
        }
    }

    pub fn hex_color(&self) -> &'static str {
        match self.severity {
            Severity::Info => "#2eb886",
            Severity::Warning => "#daa038",
            Severity::Critical => "#d00000",
        }
    }

    /// 截断正文，保证不超过 `max_bytes` 字节且不切断 UTF-8 字符
    pub fn body_truncated(&self, max_bytes: usize) -> String {
        const MARKER: &str = "\n...(truncated)";
        if self.body.len() <= max_bytes {
            return self.body.clone();
        }

        let mut cut = max_bytes.saturating_sub(MARKER.len());
        while cut > 0 && !self.body.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}{}", &self.body[..cut], MARKER)
    }
}
