use crate::backtest::fingerprint::Fingerprint;
use crate::backtest::model::{ArtifactStatus, BacktestArtifact, ParamValue};
use crate::linkage::{Link, ScreenSession};
use crate::storage::entity::{backtest_artifact, screen_link};
use crate::storage::repository::{ArtifactRepository, LinkRepository, SessionRepository};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{DatabaseConnection, Set};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const DATE_FMT: &str = "%Y-%m-%d";

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// 持久化协作方：产物与关联记录的归属者
///
/// 唯一性由存储层保证：每个指纹一个产物；每个 (session, symbol, date) 一条关联。
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn find_artifact(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<BacktestArtifact>, StoreError>;

    /// 写入产物；若该指纹已存在产物，返回已存在的那一份
    async fn save_artifact(
        &self,
        artifact: &BacktestArtifact,
    ) -> Result<BacktestArtifact, StoreError>;

    /// 幂等写入关联，返回 true 表示新建
    async fn insert_link(&self, link: &Link) -> Result<bool, StoreError>;

    async fn find_link(
        &self,
        session_id: &str,
        symbol: &str,
        data_date: NaiveDate,
    ) -> Result<Option<Link>, StoreError>;

    async fn linked_symbols(
        &self,
        session_id: &str,
        data_date: NaiveDate,
    ) -> Result<BTreeSet<String>, StoreError>;

    /// 记录一次会话运行，返回 true 表示首次记录
    async fn record_session(&self, session: &ScreenSession) -> Result<bool, StoreError>;
}

/// 基于 sea-orm/SQLite 的实现
#[derive(Clone)]
pub struct SqlResultStore {
    db: Arc<DatabaseConnection>,
}

impl SqlResultStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(raw, DATE_FMT)
        .map_err(|e| StoreError::Corrupt(format!("bad date {:?}: {}", raw, e)))
}

fn from_timestamp(secs: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| StoreError::Corrupt(format!("bad timestamp {}", secs)))
}

fn artifact_from_model(m: backtest_artifact::Model) -> Result<BacktestArtifact, StoreError> {
    let fingerprint = Fingerprint::from_hex(&m.fingerprint)
        .ok_or_else(|| StoreError::Corrupt(format!("bad fingerprint {:?}", m.fingerprint)))?;
    let parameters: BTreeMap<String, ParamValue> = serde_json::from_str(&m.parameters_json)
        .map_err(|e| StoreError::Corrupt(format!("parameters_json: {}", e)))?;
    let statistics = serde_json::from_str(&m.statistics_json)
        .map_err(|e| StoreError::Corrupt(format!("statistics_json: {}", e)))?;
    let trades = serde_json::from_str(&m.trades_json)
        .map_err(|e| StoreError::Corrupt(format!("trades_json: {}", e)))?;

    Ok(BacktestArtifact {
        backtest_id: m.backtest_id,
        fingerprint,
        symbol: m.symbol,
        strategy_name: m.strategy_name,
        start_date: parse_date(&m.start_date)?,
        end_date: parse_date(&m.end_date)?,
        resolution: m.resolution,
        parameters,
        statistics,
        trades,
        result_path: m.result_path,
        created_at: from_timestamp(m.created_at)?,
        status: ArtifactStatus::Completed,
    })
}

fn artifact_to_active(a: &BacktestArtifact) -> Result<backtest_artifact::ActiveModel, StoreError> {
    let encode = |v: serde_json::Result<String>| v.map_err(|e| StoreError::Corrupt(e.to_string()));
    Ok(backtest_artifact::ActiveModel {
        fingerprint: Set(a.fingerprint.as_str().to_string()),
        backtest_id: Set(a.backtest_id.clone()),
        symbol: Set(a.symbol.clone()),
        strategy_name: Set(a.strategy_name.clone()),
        start_date: Set(a.start_date.format(DATE_FMT).to_string()),
        end_date: Set(a.end_date.format(DATE_FMT).to_string()),
        resolution: Set(a.resolution.clone()),
        parameters_json: Set(encode(serde_json::to_string(&a.parameters))?),
        statistics_json: Set(encode(serde_json::to_string(&a.statistics))?),
        trades_json: Set(encode(serde_json::to_string(&a.trades))?),
        trade_count: Set(a.trades.len() as i32),
        result_path: Set(a.result_path.clone()),
        status: Set(a.status.as_str().to_string()),
        created_at: Set(a.created_at.timestamp()),
    })
}

fn link_from_model(m: screen_link::Model) -> Result<Link, StoreError> {
    Ok(Link {
        session_id: m.session_id,
        symbol: m.symbol,
        data_date: parse_date(&m.data_date)?,
        backtest_id: m.backtest_id,
        parameter_combination_id: m.parameter_combination_id,
        created_at: from_timestamp(m.created_at)?,
    })
}

#[async_trait]
impl ResultStore for SqlResultStore {
    async fn find_artifact(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<BacktestArtifact>, StoreError> {
        ArtifactRepository::find_by_fingerprint(&self.db, fingerprint.as_str())
            .await?
            .map(artifact_from_model)
            .transpose()
    }

    async fn save_artifact(
        &self,
        artifact: &BacktestArtifact,
    ) -> Result<BacktestArtifact, StoreError> {
        let inserted =
            ArtifactRepository::insert_or_ignore(&self.db, artifact_to_active(artifact)?).await?;
        if inserted {
            return Ok(artifact.clone());
        }
        // 指纹已有产物：以先写入者为准
        self.find_artifact(&artifact.fingerprint)
            .await?
            .ok_or_else(|| {
                StoreError::Corrupt(format!(
                    "artifact {} conflicted but cannot be read back",
                    artifact.fingerprint
                ))
            })
    }

    async fn insert_link(&self, link: &Link) -> Result<bool, StoreError> {
        let model = screen_link::ActiveModel {
            session_id: Set(link.session_id.clone()),
            symbol: Set(link.symbol.clone()),
            data_date: Set(link.data_date.format(DATE_FMT).to_string()),
            backtest_id: Set(link.backtest_id.clone()),
            parameter_combination_id: Set(link.parameter_combination_id.clone()),
            created_at: Set(link.created_at.timestamp()),
            ..Default::default()
        };
        Ok(LinkRepository::insert_or_ignore(&self.db, model).await?)
    }

    async fn find_link(
        &self,
        session_id: &str,
        symbol: &str,
        data_date: NaiveDate,
    ) -> Result<Option<Link>, StoreError> {
        let date = data_date.format(DATE_FMT).to_string();
        LinkRepository::find(&self.db, session_id, symbol, &date)
            .await?
            .map(link_from_model)
            .transpose()
    }

    async fn linked_symbols(
        &self,
        session_id: &str,
        data_date: NaiveDate,
    ) -> Result<BTreeSet<String>, StoreError> {
        let date = data_date.format(DATE_FMT).to_string();
        let rows = LinkRepository::list_for_session(&self.db, session_id, &date).await?;
        Ok(rows.into_iter().map(|m| m.symbol).collect())
    }

    async fn record_session(&self, session: &ScreenSession) -> Result<bool, StoreError> {
        let date = session.data_date.format(DATE_FMT).to_string();
        Ok(SessionRepository::record_run(
            &self.db,
            &session.session_id,
            &date,
            &session.parameter_combination_id,
        )
        .await?)
    }
}
