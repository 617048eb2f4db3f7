use crate::storage::entity::{backtest_artifact, screen_link, screen_session};
use log::info;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Schema};
use std::time::Duration;

pub async fn establish_connection(db_url: &str) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(db_url.to_owned());
    opt.max_connections(10)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let db = Database::connect(opt).await?;

    // 启用 WAL 模式，允许读写并发
    let backend = db.get_database_backend();
    if backend == sea_orm::DatabaseBackend::Sqlite {
        db.execute(sea_orm::Statement::from_string(
            backend,
            "PRAGMA journal_mode=WAL;".to_string(),
        ))
        .await?;
    }

    // 创建表（如果不存在）
    let schema = Schema::new(backend);

    let stmt = backend.build(
        schema
            .create_table_from_entity(backtest_artifact::Entity)
            .if_not_exists(),
    );
    db.execute(stmt).await?;

    let stmt = backend.build(
        schema
            .create_table_from_entity(screen_link::Entity)
            .if_not_exists(),
    );
    db.execute(stmt).await?;

    let stmt = backend.build(
        schema
            .create_table_from_entity(screen_session::Entity)
            .if_not_exists(),
    );
    db.execute(stmt).await?;

    ensure_unique_indexes(&db).await?;

    info!("数据库连接已建立，表结构与唯一索引已就绪: {}", db_url);

    Ok(db)
}

/// 唯一索引是幂等写入（ON CONFLICT DO NOTHING）的前提
async fn ensure_unique_indexes(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    for sql in [
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_screen_links_unique ON screen_links(session_id, symbol, data_date);",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_screen_sessions_unique ON screen_sessions(session_id, data_date, parameter_combination_id);",
    ] {
        db.execute(sea_orm::Statement::from_string(backend, sql.to_string()))
            .await?;
    }
    Ok(())
}
