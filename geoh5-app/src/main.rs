use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use geoh5_config::{AppConfig, ConfigError};
use geoh5_core::drillhole::MergeOptions;
use geoh5_engine::command::{CommandBus, CommandContext, CommandRequest};
use geoh5_engine::session::{Session, SessionOptions};
use geoh5_io::StoreOptions;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "geoh5", version, about = "地学工作区实体图工具")]
struct Cli {
    /// 配置文件路径，缺省时按 GEOH5_CONFIG 或 ./config/default.toml 查找
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 生成示例工作区并保存
    Demo {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// 打开工作区并打印实体树
    Inspect { path: PathBuf },
    /// 对工作区执行一条命令后保存
    Exec {
        path: PathBuf,
        command: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_configuration(cli.config.clone());
    init_logging(&config);
    let options = session_options(&config);

    match cli.command {
        Command::Demo { output } => {
            let Some(path) = output.or_else(|| config.storage.workspace_path.clone()) else {
                bail!("demo 需要 --output 或配置项 storage.workspace_path");
            };
            let mut session = Session::open(&path, options)
                .with_context(|| format!("无法打开工作区 {}", path.display()))?;
            session.populate_demo().context("生成示例实体失败")?;
            session
                .finalize()
                .with_context(|| format!("无法写入工作区 {}", path.display()))?;
            info!(path = %path.display(), "示例工作区已生成");
            print!("{}", session.summary());
        }
        Command::Inspect { path } => {
            if !path.exists() {
                bail!("工作区文件不存在: {}", path.display());
            }
            let session = Session::open(&path, options)
                .with_context(|| format!("无法打开工作区 {}", path.display()))?;
            print!("{}", session.summary());
        }
        Command::Exec {
            path,
            command,
            args,
        } => {
            if !path.exists() {
                bail!("工作区文件不存在: {}", path.display());
            }
            let mut session = Session::open(&path, options)
                .with_context(|| format!("无法打开工作区 {}", path.display()))?;
            let bus = CommandBus::new();
            let request = CommandRequest::new(command, args);
            let response = {
                let mut context = CommandContext {
                    session: &mut session,
                };
                bus.dispatch(&request, &mut context)
            };
            let message = response.message.unwrap_or_default();
            if !response.success {
                bail!("命令 `{}` 执行失败: {message}", request.name);
            }
            if session.workspace().is_modified() {
                session
                    .finalize()
                    .with_context(|| format!("无法写入工作区 {}", path.display()))?;
            }
            println!("{message}");
        }
    }
    Ok(())
}

fn session_options(config: &AppConfig) -> SessionOptions {
    SessionOptions {
        merge: MergeOptions {
            collocation_distance: config.merge.collocation_distance,
            interval_tolerance: config.merge.interval_tolerance,
        },
        store: StoreOptions {
            verify_checksum: config.storage.verify_checksum,
        },
    }
}

fn load_configuration(override_path: Option<PathBuf>) -> AppConfig {
    match override_path {
        Some(path) => AppConfig::from_file(&path).unwrap_or_else(|err| {
            eprintln!("加载指定配置 {} 失败，使用默认配置: {err}", path.display());
            AppConfig::default()
        }),
        None => match AppConfig::discover() {
            Ok(cfg) => cfg,
            Err(err) => {
                match &err {
                    ConfigError::Io { path, .. } | ConfigError::Parse { path, .. } => {
                        eprintln!("加载配置 {} 失败，使用内建默认值: {err}", path.display());
                    }
                    ConfigError::Context { .. } => {
                        eprintln!("加载默认配置失败，使用内建默认值: {err}");
                    }
                }
                AppConfig::default()
            }
        },
    }
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if subscriber.try_init().is_err() {
        // 已初始化，忽略
    }
}
