use clap::{Parser, Subcommand};
use mediasync::commands;
use mediasync::logging::{get_log_dir, LogConfig, SizeRotatingWriter};
use mediasync::{AppState, MediaType, RunDisposition, RunReport};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

#[derive(Debug, Parser)]
#[command(name = "mediasync", version, about = "增量媒体备份")]
struct Cli {
    /// 配置目录（默认 $MEDIASYNC_HOME 或系统配置目录下的 mediasync）
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 执行备份
    Run {
        /// 按类别运行
        #[arg(long, conflicts_with_all = ["all", "folders"])]
        category: Option<String>,
        /// 运行所有已配置源文件夹的类别
        #[arg(long)]
        all: bool,
        /// 逗号分隔的源文件夹（临时运行）
        #[arg(long, requires = "destinations")]
        folders: Option<String>,
        /// 逗号分隔的目标（本地目录或 cloud）
        #[arg(long)]
        destinations: Option<String>,
        /// 临时运行的媒体类型
        #[arg(long, default_value = "custom")]
        media_type: MediaType,
        /// 临时运行上传云端时使用的类别名
        #[arg(long)]
        category_name: Option<String>,
        /// 周期运行间隔（分钟），仅用于 --category
        #[arg(long, requires = "category")]
        every: Option<u32>,
    },
    /// 查看最近一次运行状态
    Status,
    /// 管理类别
    Category {
        #[command(subcommand)]
        action: CategoryAction,
    },
    /// 管理台账
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },
    /// 把已备份的文件恢复到本地目录
    Restore {
        category: String,
        dest_dir: PathBuf,
        /// 只恢复指定哈希
        #[arg(long, value_delimiter = ',')]
        hashes: Vec<String>,
    },
    /// 查看或修改配置
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
enum CategoryAction {
    List,
    Add { name: String },
    Remove { id: String },
    /// 设置源文件夹
    Folders { id: String, folders: Vec<String> },
    /// 设置备份目标
    Destinations { id: String, destinations: Vec<String> },
}

#[derive(Debug, Subcommand)]
enum LedgerAction {
    Stats,
    List { category: String },
    /// 移除条目，下一次运行会重新传输
    Purge { hashes: Vec<String> },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    Cloud {
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        user_id: Option<String>,
    },
    Log {
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long)]
        max_size_mb: Option<u32>,
        #[arg(long)]
        level: Option<String>,
    },
    Scheduler {
        #[arg(long)]
        min_interval_minutes: u32,
    },
}

/// 初始化日志系统；返回的 guard 需要保持到进程退出
fn init_logging(config_dir: &std::path::Path) -> Option<WorkerGuard> {
    let config = LogConfig::load(config_dir);

    // 创建日志级别过滤器
    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(config.tracing_level().into());
    for directive in ["hyper=warn", "reqwest=warn", "sqlx=warn"] {
        if let Ok(d) = directive.parse() {
            env_filter = env_filter.add_directive(d);
        }
    }

    if !config.enabled {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr);
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init();
        return None;
    }

    match SizeRotatingWriter::new(&get_log_dir(config_dir), config.max_size_mb) {
        Ok(file_writer) => {
            let (writer, guard) = tracing_appender::non_blocking(file_writer);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);

            let console_layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr);

            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(console_layer)
                .try_init();
            Some(guard)
        }
        Err(e) => {
            // 文件日志创建失败，回退到控制台
            let console_layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
            tracing::warn!("无法创建日志文件: {}", e);
            None
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("序列化输出失败: {}", e),
    }
}

/// 最后一次运行的建议决定退出码：成功 0，可重试 75，取消 130，其他失败 1
fn exit_code_for(reports: &[&RunReport]) -> ExitCode {
    let worst = reports
        .iter()
        .map(|r| r.disposition)
        .find(|d| *d != RunDisposition::Success)
        .unwrap_or(RunDisposition::Success);
    match worst {
        RunDisposition::Success => ExitCode::SUCCESS,
        RunDisposition::Retry => ExitCode::from(75),
        RunDisposition::Cancelled => ExitCode::from(130),
        RunDisposition::Failure => ExitCode::FAILURE,
    }
}

async fn execute(state: &AppState, command: Command) -> Result<ExitCode, String> {
    match command {
        Command::Run {
            category,
            all,
            folders,
            destinations,
            media_type,
            category_name,
            every,
        } => {
            // Ctrl-C 取消当前运行并停止周期调度
            let cancel = state.engine.cancel_handle();
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("收到中断信号，正在取消...");
                    cancel.cancel();
                    let _ = shutdown_tx.send(true);
                }
            });

            if let (Some(id), Some(minutes)) = (category.as_deref(), every) {
                let reports = commands::run::run_every(state, id, minutes, shutdown_rx).await?;
                print_json(&reports);
                return Ok(exit_code_for(&reports.iter().collect::<Vec<_>>()));
            }
            if let Some(id) = category {
                let report = commands::run::run_category(state, &id).await?;
                print_json(&report);
                return Ok(exit_code_for(&[&report]));
            }
            if all {
                let reports = commands::run::run_all(state).await?;
                print_json(&reports);
                return Ok(exit_code_for(&reports.iter().map(|(_, r)| r).collect::<Vec<_>>()));
            }
            match (folders, destinations) {
                (Some(folders), Some(destinations)) => {
                    let report = commands::run::run_adhoc(
                        state,
                        &folders,
                        &destinations,
                        media_type,
                        category_name,
                    )
                    .await?;
                    print_json(&report);
                    Ok(exit_code_for(&[&report]))
                }
                _ => Err("请指定 --category、--all 或 --folders/--destinations".to_string()),
            }
        }
        Command::Status => {
            match commands::run::last_status(state).await? {
                Some(summary) => print_json(&summary),
                None => println!("尚未运行"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Category { action } => {
            match action {
                CategoryAction::List => {
                    print_json(&commands::category::list_categories(state).await?)
                }
                CategoryAction::Add { name } => {
                    print_json(&commands::category::add_category(state, &name).await?)
                }
                CategoryAction::Remove { id } => {
                    commands::category::remove_category(state, &id).await?;
                    println!("已删除类别: {}", id);
                }
                CategoryAction::Folders { id, folders } => {
                    print_json(&commands::category::set_folders(state, &id, folders).await?)
                }
                CategoryAction::Destinations { id, destinations } => print_json(
                    &commands::category::set_destinations(state, &id, destinations).await?,
                ),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Ledger { action } => {
            match action {
                LedgerAction::Stats => print_json(&commands::ledger::ledger_stats(state).await?),
                LedgerAction::List { category } => {
                    print_json(&commands::ledger::list_entries(state, &category).await?)
                }
                LedgerAction::Purge { hashes } => {
                    let removed = commands::ledger::purge_entries(state, &hashes).await?;
                    println!("已移除 {} 个条目", removed);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Restore {
            category,
            dest_dir,
            hashes,
        } => {
            let summary =
                commands::restore::restore_category(state, &category, &dest_dir, &hashes).await?;
            print_json(&summary);
            Ok(if summary.fail_count == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Config { action } => {
            match action {
                ConfigAction::Cloud { base_url, user_id } => {
                    if base_url.is_none() && user_id.is_none() {
                        print_json(&commands::settings::get_cloud_config(state));
                    } else {
                        print_json(&commands::settings::set_cloud_config(
                            state, base_url, user_id,
                        )?);
                    }
                }
                ConfigAction::Log {
                    enabled,
                    max_size_mb,
                    level,
                } => {
                    if enabled.is_none() && max_size_mb.is_none() && level.is_none() {
                        print_json(&commands::settings::get_log_config(state));
                    } else {
                        print_json(&commands::settings::set_log_config(
                            state,
                            enabled,
                            max_size_mb,
                            level,
                        )?);
                    }
                }
                ConfigAction::Scheduler {
                    min_interval_minutes,
                } => print_json(&commands::settings::set_scheduler_config(
                    state,
                    min_interval_minutes,
                )?),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(mediasync::default_config_dir);

    // 初始化日志系统
    let _log_guard = init_logging(&config_dir);

    let state = match AppState::open(&config_dir).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("初始化失败: {:#}", e);
            eprintln!("初始化失败: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let code = match execute(&state, cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    };

    state.cleanup().await;
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        LogConfig::default().save(dir.path()).unwrap();

        let guard = init_logging(dir.path());
        assert!(guard.is_some());
        tracing::info!("日志初始化完成");
        drop(guard);

        let content = std::fs::read_to_string(dir.path().join(mediasync::logging::LOG_FILE)).unwrap();
        assert!(content.contains("日志初始化完成"));
    }

    #[test]
    fn test_exit_codes() {
        let report = |disposition| RunReport {
            summary: mediasync::RunSummary {
                timestamp: 0,
                success: disposition == RunDisposition::Success,
                success_count: 0,
                skip_count: 0,
                fail_count: 0,
                error_message: None,
            },
            disposition,
        };
        let ok = report(RunDisposition::Success);
        let retry = report(RunDisposition::Retry);
        let cancelled = report(RunDisposition::Cancelled);

        let code = |reports: &[&RunReport]| format!("{:?}", exit_code_for(reports));
        assert_eq!(code(&[&ok]), format!("{:?}", ExitCode::SUCCESS));
        assert_eq!(code(&[&ok, &retry]), format!("{:?}", ExitCode::from(75)));
        assert_eq!(code(&[&cancelled]), format!("{:?}", ExitCode::from(130)));
    }
}
