use crate::Args;
use anyhow::{anyhow, Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use vigil_config::{AuditConfig, ConfigLoader, ReportFormat};
use vigil_core::{render, AuditEngine, RunSignal, SnapshotProvider};
use vigil_logging::{init_logging, LoggingError};
use vigil_metrics::RunMetrics;
use vigil_notify::{AlertDispatcher, DispatchOutcome};
use vigil_types::Report;

/// 单次审计：加载配置、运行引擎、输出报告、发送告警
///
/// 返回的退出码由报告的最高严重级别决定；启动阶段的错误以 `Err` 返回。
pub async fn run(args: Args) -> Result<u8> {
    let config = effective_config(&args)?;
    match init_logging(&config.logging) {
        Ok(()) => {}
        // subscriber 已经安装过
        Err(LoggingError::InitError(_)) => {}
        Err(e) => return Err(e).context("failed to initialise logging"),
    }

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(0);
    }

    if !args.config.exists() {
        warn!(
            "Config file {} not found, using defaults and environment",
            args.config.display()
        );
    }

    let snapshot = args
        .snapshot
        .as_deref()
        .ok_or_else(|| anyhow!("no provider snapshot given, pass --snapshot <file>"))?;
    let provider = SnapshotProvider::from_file(snapshot)?;
    let metrics = Arc::new(RunMetrics::new()?);

    let signal = RunSignal::new();
    let listener = signal.listen_for_os_signals();

    let engine = AuditEngine::new(config.clone(), Arc::new(provider)).with_metrics(metrics.clone());
    let report = engine.run(&signal).await;
    listener.abort();

    let rendered = render(&report, config.report.format)?;
    write_report(&rendered, args.output.as_deref())?;

    if args.dry_run {
        info!("Dry run, alerts not sent and no resources tagged");
    } else {
        dispatch_alerts(&config, &report, &metrics).await;
    }

    if let Some(path) = &args.metrics_file {
        if let Err(e) = metrics.write_textfile(path) {
            warn!("Failed to write metrics to {}: {}", path.display(), e);
        }
    }

    let code = report.exit_code();
    info!(exit_code = code, "Audit finished");
    Ok(code as u8)
}

/// 配置文件 + 环境变量 + 命令行覆盖
///
/// `--dry-run` 优先于 `--apply-tag`，演练时不写任何标签。
fn effective_config(args: &Args) -> Result<AuditConfig> {
    let mut config = ConfigLoader::new(&args.config).load()?;

    if args.apply_tag {
        config.tagging.enabled = true;
    }
    if let Some(key) = &args.tag_key {
        config.tagging.key = key.clone();
    }
    if let Some(value) = &args.tag_value {
        config.tagging.value = value.clone();
    }
    if let Some(max_apply) = args.max_apply {
        config.tagging.max_apply = max_apply;
    }
    if args.dry_run && config.tagging.enabled {
        config.tagging.enabled = false;
    }

    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = args.format.as_deref() {
        config.report.format = match format {
            "json" => ReportFormat::Json,
            _ => ReportFormat::Text,
        };
    }

    config.validate().context("invalid command line overrides")?;
    Ok(config)
}

fn write_report(rendered: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("failed to write report to {}", path.display()))?;
            info!("Report written to {}", path.display());
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

/// 告警失败只记录日志，不影响退出码
async fn dispatch_alerts(config: &AuditConfig, report: &Report, metrics: &RunMetrics) {
    let dispatcher = AlertDispatcher::from_config(&config.alerts);
    if dispatcher.channel_count() == 0 {
        info!("No alert channels configured");
        return;
    }

    for record in dispatcher.dispatch(report).await {
        metrics.record_dispatch(&record.channel, record.outcome.as_str());
        if let DispatchOutcome::Failed { error } = &record.outcome {
            warn!(channel = %record.channel, "Alert not delivered: {}", error);
        }
    }
}
