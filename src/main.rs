use chrono::Local;
use log::{error, info};
use rustscreen::commands::{self, AppCommand, AppContext};
use rustscreen::config::AppConfig;
use std::process::ExitCode;

fn init_logging() -> std::io::Result<()> {
    let ts = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let log_dir = std::path::PathBuf::from("logs");
    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::File::create(log_dir.join(format!("app-{}.log", ts)))?;
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .filter_level(log::LevelFilter::Warn)
        .filter_module("rustscreen", log::LevelFilter::Info)
        .filter_module("sqlx", log::LevelFilter::Error)
        .filter_module("sea_orm", log::LevelFilter::Error)
        .init();
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    if let Err(e) = init_logging() {
        eprintln!("⚠ 无法初始化日志文件: {}", e);
    }

    let line = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let cmd: AppCommand = match line.parse() {
        Ok(cmd) => cmd,
        Err(()) => AppCommand::Help,
    };
    if cmd == AppCommand::Help {
        println!("{}", commands::USAGE);
        return ExitCode::SUCCESS;
    }

    let config = match AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("✗ 配置错误: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("数据库: {}, 结果目录: {}", config.database_url, config.results_dir.display());

    let ctx = match AppContext::connect(config).await {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("✗ 无法连接数据库: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match commands::dispatch(&ctx, cmd).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("✗ 命令执行失败: {:#}", e);
            eprintln!("✗ {:#}", e);
            ExitCode::FAILURE
        }
    }
}
