use clap::{Args, CommandFactory, FromArgMatches, Parser, Subcommand};
use std::path::PathBuf;

use app::audit::{AuditMode, AuditStatus};
use utils::app_config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(name = "permsweep", version)]
#[command(about = "Audit and strip filesystem permissions held by revoked identities", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Set the logging level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<String>,

    /// Configuration file layered over the built-in defaults
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Inputs shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Directory to audit
    #[arg(short, long, value_name = "DIR")]
    pub directory: PathBuf,

    /// File listing one revoked user or group per line
    #[arg(short, long, value_name = "FILE")]
    pub users: PathBuf,

    /// File with gitignore-style exclusion patterns
    #[arg(short, long, value_name = "FILE")]
    pub exclude: Option<PathBuf>,

    /// Follow symlinked directories that stay inside the audited directory
    #[arg(long)]
    pub follow_symlinks: bool,

    /// Entries inspected in parallel (overrides audit.concurrency)
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Print the report as JSON instead of the summary block
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Report permissions held by revoked identities
    Audit {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Remove permissions held by revoked identities
    Remediate {
        #[command(flatten)]
        target: TargetArgs,

        /// Show what would be removed without changing anything
        #[arg(long)]
        dry_run: bool,
    },
}

pub async fn cli_match() -> utils::error::Result<AuditStatus> {
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    // 配置层：默认值 < 配置文件 < 环境变量 < 命令行
    AppConfig::merge_config(cli.config.as_deref())?;
    AppConfig::merge_args(&matches)?;

    // 日志依赖合并后的配置
    let _guard = utils::logger::setup_logging()?;

    let result = match cli.command {
        Commands::Audit { target } => commands::audit_cmd(target, AuditMode::Audit).await,
        Commands::Remediate { target, dry_run } => {
            let mode = if dry_run {
                AuditMode::DryRun
            } else {
                AuditMode::Remediate
            };
            commands::audit_cmd(target, mode).await
        }
    };

    // 启动阶段失败（输入文件、根目录、回退账户）映射为 aborted
    let status = result.unwrap_or_else(|e| {
        log::error!("{:?}", e);
        AuditStatus::Aborted
    });
    Ok(status)
}
