use crate::backtest::model::{BacktestRequest, BatchOptions, ParamValue};
use crate::backtest::scheduler::{BatchReport, ParallelBacktestScheduler};
use crate::linkage::{LinkOutcome, LinkageRegistry, ScreenSession};
use crate::screen::ports::{FilterEvaluator, MarketDataProvider};
use crate::storage::ResultStore;
use crate::window::{DateWindowExtender, ExtensionPlan, FilterConfig};
use anyhow::{bail, Context};
use chrono::NaiveDate;
use futures::future::join_all;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// 合格标的统一使用的回测模板
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyTemplate {
    pub strategy_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default = "default_resolution")]
    pub resolution: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,
}

fn default_resolution() -> String {
    "daily".to_string()
}

impl StrategyTemplate {
    pub fn new(strategy_name: impl Into<String>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            strategy_name: strategy_name.into(),
            start_date,
            end_date,
            resolution: default_resolution(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn request_for(&self, symbol: &str) -> BacktestRequest {
        BacktestRequest {
            symbol: symbol.to_string(),
            strategy_name: self.strategy_name.clone(),
            start_date: self.start_date,
            end_date: self.end_date,
            resolution: self.resolution.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScreenRequest {
    pub session_id: String,
    pub parameter_combination_id: String,
    /// 关联记录使用的数据日期
    pub data_date: NaiveDate,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub symbols: Vec<String>,
    pub filters: Vec<FilterConfig>,
    pub strategy: StrategyTemplate,
    pub options: BatchOptions,
}

#[derive(Debug)]
pub struct ScreenReport {
    pub session: ScreenSession,
    /// 该 (session, date, 参数组合) 是否首次运行
    pub first_run: bool,
    pub plan: ExtensionPlan,
    /// 已裁回原始区间的命中日期
    pub hits: BTreeMap<String, Vec<NaiveDate>>,
    pub qualified: BTreeSet<String>,
    pub batch: BatchReport,
    pub links: BTreeMap<String, LinkOutcome>,
    /// 关联写入失败的标的及错误信息
    pub link_errors: BTreeMap<String, String>,
    pub missing_links: BTreeSet<String>,
}

/// 筛选 -> 回测 -> 关联 的完整流程
pub struct ScreenService {
    extender: Arc<DateWindowExtender>,
    data: Arc<dyn MarketDataProvider>,
    evaluator: Arc<dyn FilterEvaluator>,
    scheduler: Arc<ParallelBacktestScheduler>,
    registry: LinkageRegistry,
    store: Arc<dyn ResultStore>,
}

impl ScreenService {
    pub fn new(
        extender: Arc<DateWindowExtender>,
        data: Arc<dyn MarketDataProvider>,
        evaluator: Arc<dyn FilterEvaluator>,
        scheduler: Arc<ParallelBacktestScheduler>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            extender,
            data,
            evaluator,
            scheduler,
            registry: LinkageRegistry::new(store.clone()),
            store,
        }
    }

    pub fn registry(&self) -> &LinkageRegistry {
        &self.registry
    }

    pub async fn run_screen(&self, req: ScreenRequest) -> anyhow::Result<ScreenReport> {
        if req.start_date > req.end_date {
            bail!("筛选区间颠倒: {} > {}", req.start_date, req.end_date);
        }
        if req.session_id.trim().is_empty() {
            bail!("session_id 为空");
        }

        // 过滤器配置非法时不得登记会话
        let plan = self
            .extender
            .plan_for_filters(&req.filters, req.start_date, req.end_date)?;

        let session = ScreenSession::new(
            req.session_id.trim(),
            req.data_date,
            req.parameter_combination_id.clone(),
        );
        let first_run = self
            .store
            .record_session(&session)
            .await
            .context("记录筛选会话失败")?;
        if !first_run {
            info!(
                "会话 {} ({}) 参数组合 {} 已运行过，结果将复用",
                session.session_id, session.data_date, session.parameter_combination_id
            );
        }

        info!(
            "▶ 筛选 {} 个标的: [{}, {}] 取数自 {} (lookback={}, buffer={})",
            req.symbols.len(),
            plan.original_start,
            plan.original_end,
            plan.extended_start,
            plan.max_lookback_days,
            plan.buffer_days
        );

        let series = self
            .data
            .fetch(&req.symbols, plan.extended_start, plan.extended_end)
            .await
            .context("获取行情数据失败")?;
        let raw_hits = self
            .evaluator
            .evaluate(&req.filters, &series, &plan)
            .await
            .context("过滤器求值失败")?;

        let mut hits = BTreeMap::new();
        for (symbol, dates) in raw_hits {
            let trimmed = plan.trim(dates);
            if !trimmed.is_empty() {
                hits.insert(symbol.trim().to_ascii_uppercase(), trimmed);
            }
        }
        let qualified: BTreeSet<String> = hits.keys().cloned().collect();
        info!("✓ 筛选完成: {} 个标的合格", qualified.len());

        let requests: Vec<BacktestRequest> = qualified
            .iter()
            .map(|s| req.strategy.request_for(s))
            .collect();
        let batch = self.scheduler.run_batch(requests, &req.options).await?;

        let pending = batch.successes().map(|(task, artifact)| {
            let registry = &self.registry;
            let session = &session;
            async move {
                let outcome = registry
                    .link_with_combination(
                        &session.session_id,
                        &task.symbol,
                        session.data_date,
                        &artifact.backtest_id,
                        &session.parameter_combination_id,
                    )
                    .await;
                (task.symbol.clone(), outcome)
            }
        });
        let mut links = BTreeMap::new();
        let mut link_errors = BTreeMap::new();
        for (symbol, outcome) in join_all(pending).await {
            match outcome {
                Ok(o) => {
                    links.insert(symbol, o);
                }
                Err(e) => {
                    warn!("⚠ {} 关联写入失败: {}", symbol, e);
                    link_errors.insert(symbol, e.to_string());
                }
            }
        }

        let missing_links = self
            .registry
            .missing_links(&session.session_id, session.data_date, &qualified)
            .await?;

        Ok(ScreenReport {
            session,
            first_run,
            plan,
            hits,
            qualified,
            batch,
            links,
            link_errors,
            missing_links,
        })
    }
}
