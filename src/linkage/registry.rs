use crate::linkage::{Link, LinkOutcome};
use crate::storage::{ResultStore, StoreError};
use chrono::{NaiveDate, Utc};
use log::{debug, warn};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum LinkError {
    #[error("invalid link: {0}")]
    Invalid(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// 筛选会话与回测结果的关联登记
///
/// 唯一键 (session_id, symbol, data_date)，先写入者生效。
#[derive(Clone)]
pub struct LinkageRegistry {
    store: Arc<dyn ResultStore>,
}

impl LinkageRegistry {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self { store }
    }

    pub async fn link(
        &self,
        session_id: &str,
        symbol: &str,
        data_date: NaiveDate,
        backtest_id: &str,
    ) -> Result<LinkOutcome, LinkError> {
        self.write(session_id, symbol, data_date, backtest_id, None)
            .await
    }

    /// 同 `link`，额外记录创建该关联的参数组合
    pub async fn link_with_combination(
        &self,
        session_id: &str,
        symbol: &str,
        data_date: NaiveDate,
        backtest_id: &str,
        parameter_combination_id: &str,
    ) -> Result<LinkOutcome, LinkError> {
        self.write(
            session_id,
            symbol,
            data_date,
            backtest_id,
            Some(parameter_combination_id.to_string()),
        )
        .await
    }

    async fn write(
        &self,
        session_id: &str,
        symbol: &str,
        data_date: NaiveDate,
        backtest_id: &str,
        parameter_combination_id: Option<String>,
    ) -> Result<LinkOutcome, LinkError> {
        let session_id = session_id.trim();
        let symbol = symbol.trim().to_ascii_uppercase();
        let backtest_id = backtest_id.trim();
        if session_id.is_empty() {
            return Err(LinkError::Invalid("session_id 为空".into()));
        }
        if symbol.is_empty() {
            return Err(LinkError::Invalid("symbol 为空".into()));
        }
        if backtest_id.is_empty() {
            return Err(LinkError::Invalid("backtest_id 为空".into()));
        }

        let link = Link {
            session_id: session_id.to_string(),
            symbol: symbol.clone(),
            data_date,
            backtest_id: backtest_id.to_string(),
            parameter_combination_id,
            created_at: Utc::now(),
        };

        if self.store.insert_link(&link).await? {
            debug!("关联已建立: {} {} {} -> {}", session_id, symbol, data_date, backtest_id);
            return Ok(LinkOutcome::Created);
        }

        let existing = self
            .store
            .find_link(session_id, &symbol, data_date)
            .await?
            .ok_or_else(|| {
                LinkError::Store(StoreError::Corrupt(format!(
                    "link ({}, {}, {}) conflicted but cannot be read back",
                    session_id, symbol, data_date
                )))
            })?;

        if existing.backtest_id != backtest_id {
            warn!(
                "⚠ 关联数据不一致: ({}, {}, {}) 已指向 {}，忽略 {}",
                session_id, symbol, data_date, existing.backtest_id, backtest_id
            );
        }
        Ok(LinkOutcome::AlreadyExists {
            existing_backtest_id: existing.backtest_id,
        })
    }

    pub async fn symbols_linked(
        &self,
        session_id: &str,
        data_date: NaiveDate,
    ) -> Result<BTreeSet<String>, LinkError> {
        Ok(self.store.linked_symbols(session_id.trim(), data_date).await?)
    }

    /// 合格但未关联的标的；仅用于诊断，不做强制
    pub async fn missing_links(
        &self,
        session_id: &str,
        data_date: NaiveDate,
        qualified: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, LinkError> {
        let linked = self.symbols_linked(session_id, data_date).await?;
        let missing: BTreeSet<String> = qualified
            .iter()
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !linked.contains(s))
            .collect();
        if !missing.is_empty() {
            warn!(
                "⚠ 会话 {} ({}) 有 {} 个合格标的缺少关联: {:?}",
                session_id,
                data_date,
                missing.len(),
                missing
            );
        }
        Ok(missing)
    }
}
