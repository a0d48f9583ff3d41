//! # Oxilog CLI
//!
//! 双通道（血氧仪 + 气体分析仪）会话录制命令行工具。
//!
//! ```bash
//! # 保存默认串口
//! oxilog-cli config set main.port /dev/ttyUSB0
//! oxilog-cli config set sub.port /dev/ttyUSB1
//!
//! # 录制，Ctrl+C 结束；录制期间在标准输入键入的每一行作为下一条记录的注释
//! oxilog-cli record --subject P001 --comment "baseline"
//!
//! # 查看会话统计
//! oxilog-cli summary Subject_P001_240309_1405.csv
//! ```

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{ConfigCommand, RecordCommand, SummaryCommand};

/// Oxilog CLI - 血氧与呼气气体会话录制工具
#[derive(Parser, Debug)]
#[command(name = "oxilog-cli")]
#[command(about = "Record synchronized SpO2 and O2/CO2 sessions from two serial sensors", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件路径（默认：<config_dir>/oxilog/config.toml）
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 提高日志级别（-v debug，-vv trace）
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 录制一个会话
    Record {
        #[command(flatten)]
        args: RecordCommand,
    },

    /// 列出可用串口
    Ports,

    /// 配置管理
    #[command(subcommand)]
    Config(ConfigCommand),

    /// 统计已录制的会话文件
    Summary {
        #[command(flatten)]
        args: SummaryCommand,
    },
}

/// 未设置 `RUST_LOG` 时的默认过滤
const DEFAULT_DIRECTIVE: &str = "oxilog=info";

/// 日志过滤：`RUST_LOG` 优先于默认值，`-v` 再覆盖 oxilog 的级别
fn build_filter(verbose: u8, rust_log: Option<&str>) -> Result<EnvFilter> {
    let filter = match rust_log.map(str::trim).filter(|s| !s.is_empty()) {
        Some(directives) => {
            EnvFilter::try_new(directives)
                .with_context(|| format!("invalid RUST_LOG {:?}", directives))?
        },
        None => EnvFilter::new(DEFAULT_DIRECTIVE),
    };
    // target 按前缀匹配，`oxilog` 覆盖全部 oxilog_* crate
    let filter = match verbose {
        0 => filter,
        1 => filter.add_directive("oxilog=debug".parse()?),
        _ => filter.add_directive("oxilog=trace".parse()?),
    };
    Ok(filter)
}

fn init_tracing(verbose: u8) -> Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(verbose, rust_log.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    match cli.command {
        Commands::Record { args } => args.execute(cli.config.as_deref()),
        Commands::Ports => commands::ports::execute(),
        Commands::Config(cmd) => cmd.execute(cli.config.as_deref()),
        Commands::Summary { args } => args.execute(),
    }
}
