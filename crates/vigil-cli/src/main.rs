mod app;

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

/// 启动阶段失败（配置、快照、日志）时的退出码
const EXIT_FATAL: u8 = 3;

#[derive(Parser, Debug)]
#[command(author, version, about = "Vigil cloud resource health audit")]
pub struct Args {
    /// Config file path
    #[arg(short, long, default_value = "vigil.toml")]
    config: PathBuf,

    /// Provider snapshot (JSON) to audit
    #[arg(short, long)]
    snapshot: Option<PathBuf>,

    /// Report format, overrides `[report].format`
    #[arg(short, long, value_parser = ["text", "json"])]
    format: Option<String>,

    /// Write the report to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Build the report but do not send alerts or tag resources
    #[arg(long)]
    dry_run: bool,

    /// Tag resources with findings, enables `[tagging]`
    #[arg(long)]
    apply_tag: bool,

    /// Tag key, overrides `[tagging].key`
    #[arg(long)]
    tag_key: Option<String>,

    /// Tag value, overrides `[tagging].value`
    #[arg(long)]
    tag_value: Option<String>,

    /// Maximum number of resources to tag, overrides `[tagging].max_apply`
    #[arg(long, alias = "max-tag")]
    max_apply: Option<usize>,

    /// Write run metrics in Prometheus text format
    #[arg(long)]
    metrics_file: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Log filter, overrides `[logging].level`
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match app::run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("Audit aborted: {:#}", e);
            eprintln!("vigil: {:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}
