pub mod app_command;
pub mod backtest;
pub mod links;
pub mod plan;

pub use app_command::{AppCommand, USAGE};

use crate::config::AppConfig;
use crate::storage::{establish_connection, ResultStore, SqlResultStore};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

/// 命令执行所需的共享依赖
pub struct AppContext {
    pub config: AppConfig,
    pub db: Arc<DatabaseConnection>,
    pub store: Arc<dyn ResultStore>,
}

impl AppContext {
    pub async fn connect(config: AppConfig) -> anyhow::Result<Self> {
        let db = Arc::new(establish_connection(&config.database_url).await?);
        let store: Arc<dyn ResultStore> = Arc::new(SqlResultStore::new(db.clone()));
        Ok(Self { config, db, store })
    }
}

pub async fn dispatch(ctx: &AppContext, cmd: AppCommand) -> anyhow::Result<()> {
    match cmd {
        AppCommand::Plan {
            start,
            end,
            filters_path,
        } => plan::run(ctx, start, end, &filters_path).await,
        AppCommand::Backtest { requests_path } => backtest::run(ctx, &requests_path).await,
        AppCommand::Link {
            session_id,
            symbol,
            data_date,
            backtest_id,
        } => links::link(ctx, &session_id, &symbol, data_date, &backtest_id).await,
        AppCommand::Links {
            session_id,
            data_date,
            qualified,
        } => links::list(ctx, &session_id, data_date, &qualified).await,
        AppCommand::Stats => links::stats(ctx).await,
        AppCommand::Help => {
            println!("{}", USAGE);
            Ok(())
        }
        AppCommand::Unknown(msg) => {
            anyhow::bail!("{}\n{}", msg, USAGE)
        }
    }
}
