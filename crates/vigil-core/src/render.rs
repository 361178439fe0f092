use std::fmt;
use vigil_config::ReportFormat;
use vigil_types::{Report, Severity, TagOutcome};

const RULE: &str = "==============================================================";

/// 按配置格式渲染报告
pub fn render(report: &Report, format: ReportFormat) -> Result<String, serde_json::Error> {
    match format {
        ReportFormat::Text => Ok(TextReport(report).to_string()),
        ReportFormat::Json => render_json(report),
    }
}

pub fn render_json(report: &Report) -> Result<String, serde_json::Error> {
    let mut json = serde_json::to_string_pretty(report)?;
    json.push('\n');
    Ok(json)
}

/// 总体状态；仅有 INFO 视为健康，只有数据缺失时为 INCOMPLETE
pub fn overall_status(report: &Report) -> &'static str {
    match report.max_severity() {
        Some(Severity::Critical) => "CRITICAL",
        Some(Severity::Warning) => "WARNING",
        _ if report.data_gap_count() > 0 => "INCOMPLETE",
        _ => "HEALTHY",
    }
}

/// 纯文本报告
///
/// 段落顺序固定：头部、资源、长时操作、打标、汇总、建议。
pub struct TextReport<'a>(pub &'a Report);

impl fmt::Display for TextReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;
        self.header(f, report)?;
        self.resources(f, report)?;
        self.operations(f, report)?;
        self.tagging(f, report)?;
        self.summary(f, report)?;
        self.recommendations(f, report)
    }
}

impl TextReport<'_> {
    fn header(&self, f: &mut fmt::Formatter<'_>, report: &Report) -> fmt::Result {
        writeln!(f, "{}", RULE)?;
        writeln!(f, "Vigil audit report")?;
        writeln!(f, "Generated: {}", report.generated_at.to_rfc3339())?;
        writeln!(f, "Window:    {}", report.window)?;
        writeln!(f, "Regions:   {}", report.regions.join(", "))?;
        writeln!(f, "Thresholds:")?;
        if report.thresholds_used.is_empty() {
            writeln!(f, "  (none configured)")?;
        }
        for rule in &report.thresholds_used {
            writeln!(f, "  - {}", rule.describe())?;
        }
        writeln!(f, "{}", RULE)?;
        writeln!(f)
    }

    fn resources(&self, f: &mut fmt::Formatter<'_>, report: &Report) -> fmt::Result {
        writeln!(f, "Resources")?;
        writeln!(f, "---------")?;

        if report.resources.is_empty() {
            writeln!(f, "No resources found.")?;
        }

        for section in &report.resources {
            let resource = &section.resource;
            write!(
                f,
                "[{}] {} ({}, {})",
                section.status_label(),
                resource.id,
                resource.resource_type,
                resource.region
            )?;
            if let Some(name) = &resource.name {
                write!(f, " {}", name)?;
            }
            writeln!(f)?;

            for finding in &section.findings {
                writeln!(
                    f,
                    "    {:<8} {}: {}",
                    finding.severity, finding.rule_name, finding.message
                )?;
            }
            for gap in &section.data_gaps {
                writeln!(f, "    UNKNOWN  {} ({}): {}", gap.scope, gap.reason, gap.detail)?;
            }
        }

        if !report.scope_gaps.is_empty() {
            writeln!(f)?;
            writeln!(f, "Data unavailable:")?;
            for gap in &report.scope_gaps {
                writeln!(f, "  {} ({}): {}", gap.scope, gap.reason, gap.detail)?;
            }
        }
        writeln!(f)
    }

    fn operations(&self, f: &mut fmt::Formatter<'_>, report: &Report) -> fmt::Result {
        if report.operations.is_empty() {
            return Ok(());
        }

        writeln!(f, "Operations")?;
        writeln!(f, "----------")?;
        for op in &report.operations {
            write!(
                f,
                "{} {}: {} after {}/{} attempts",
                op.resource_id, op.kind, op.state, op.attempts, op.max_attempts
            )?;
            if let Some(status) = &op.result_status {
                write!(f, " (status {})", status)?;
            }
            if let Some(reason) = &op.reason {
                write!(f, " - {}", reason)?;
            }
            writeln!(f)?;
            for (item, diff) in &op.details {
                writeln!(f, "    {}: {}", item, diff)?;
            }
        }
        writeln!(f)
    }

    fn tagging(&self, f: &mut fmt::Formatter<'_>, report: &Report) -> fmt::Result {
        let Some(tagging) = &report.tagging else {
            return Ok(());
        };

        writeln!(f, "Tagging")?;
        writeln!(f, "-------")?;
        writeln!(
            f,
            "Tag {}={} (at most {} resources)",
            tagging.key, tagging.value, tagging.max_apply
        )?;
        if tagging.actions.is_empty() {
            writeln!(f, "No resources to tag.")?;
        }
        for action in &tagging.actions {
            match &action.outcome {
                TagOutcome::Applied => writeln!(f, "  {:<24} tagged", action.resource_id)?,
                TagOutcome::Failed { error } => {
                    writeln!(f, "  {:<24} failed: {}", action.resource_id, error)?
                }
                TagOutcome::LimitReached => {
                    writeln!(f, "  {:<24} skipped: limit reached", action.resource_id)?
                }
                TagOutcome::NotAttempted { reason } => {
                    writeln!(f, "  {:<24} skipped: {}", action.resource_id, reason)?
                }
            }
        }
        writeln!(f)
    }

    fn summary(&self, f: &mut fmt::Formatter<'_>, report: &Report) -> fmt::Result {
        writeln!(f, "Summary")?;
        writeln!(f, "-------")?;
        writeln!(f, "{:<26}{}", "Resources scanned:", report.resources.len())?;
        writeln!(
            f,
            "{:<26}{}",
            "Resources with findings:",
            report.resources_with_findings()
        )?;
        writeln!(
            f,
            "{:<26}{}",
            "Critical findings:",
            report.severity_count(Severity::Critical)
        )?;
        writeln!(
            f,
            "{:<26}{}",
            "Warning findings:",
            report.severity_count(Severity::Warning)
        )?;
        writeln!(f, "{:<26}{}", "Info findings:", report.severity_count(Severity::Info))?;
        for (category, count) in &report.counts_by_category {
            writeln!(f, "{:<26}{}", format!("{}:", category), count)?;
        }
        writeln!(f, "{:<26}{}", "Data gaps:", report.data_gap_count())?;
        if let Some(tagging) = &report.tagging {
            writeln!(f, "{:<26}{}", "Resources tagged:", tagging.applied_count())?;
            writeln!(f, "{:<26}{}", "Tag failures:", tagging.failed_count())?;
        }
        writeln!(f, "{:<26}{}", "Overall status:", overall_status(report))?;
        writeln!(f)
    }

    fn recommendations(&self, f: &mut fmt::Formatter<'_>, report: &Report) -> fmt::Result {
        writeln!(f, "Recommendations")?;
        writeln!(f, "---------------")?;
        if report.recommendations.is_empty() {
            return writeln!(f, "None.");
        }
        for text in &report.recommendations {
            writeln!(f, "- {}", text)?;
        }
        Ok(())
    }
}
