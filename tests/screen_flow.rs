mod common;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{d, open_store, ScriptedEngine};
use rustscreen::backtest::{
    BacktestArtifact, BatchOptions, Fingerprint, ParallelBacktestScheduler,
};
use rustscreen::linkage::{Link, LinkOutcome, ScreenSession};
use rustscreen::screen::{
    Bar, BarSeries, FilterEvaluator, MarketDataProvider, ScreenRequest, ScreenService,
    StrategyTemplate,
};
use rustscreen::storage::{ResultStore, StoreError};
use rustscreen::window::{
    DateWindowExtender, ExtensionPlan, FilterConfig, FilterKind, TradingCalendar,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 每个标的在窗口内每个交易日一根 K 线
#[derive(Default)]
struct FlatMarket {
    requested: Mutex<Vec<(NaiveDate, NaiveDate)>>,
}

#[async_trait]
impl MarketDataProvider for FlatMarket {
    async fn fetch(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<BarSeries> {
        self.requested.lock().unwrap().push((start, end));
        let days = TradingCalendar::weekends_only().trading_days(start, end);
        Ok(symbols
            .iter()
            .map(|s| {
                let bars = days
                    .iter()
                    .map(|&date| Bar {
                        date,
                        open: 10.0,
                        high: 11.0,
                        low: 9.5,
                        close: 10.5,
                        volume: 2_000_000.0,
                    })
                    .collect();
                (s.clone(), bars)
            })
            .collect())
    }
}

/// `pick` 过滤器的 symbols 参数列出的标的在每根 K 线上都命中
struct PickList;

#[async_trait]
impl FilterEvaluator for PickList {
    async fn evaluate(
        &self,
        filters: &[FilterConfig],
        series: &BarSeries,
        _plan: &ExtensionPlan,
    ) -> anyhow::Result<BTreeMap<String, Vec<NaiveDate>>> {
        let picks: Vec<String> = filters
            .iter()
            .filter_map(|f| f.params.get("symbols"))
            .filter_map(|v| v.as_array())
            .flatten()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        Ok(series
            .iter()
            .filter(|(s, _)| picks.contains(*s))
            .map(|(s, bars)| (s.clone(), bars.iter().map(|b| b.date).collect()))
            .collect())
    }
}

/// 对指定标的的关联写入返回错误，其余委托给真实存储
struct FailingLinks {
    inner: Arc<dyn ResultStore>,
    failing: &'static str,
}

#[async_trait]
impl ResultStore for FailingLinks {
    async fn find_artifact(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<BacktestArtifact>, StoreError> {
        self.inner.find_artifact(fingerprint).await
    }

    async fn save_artifact(
        &self,
        artifact: &BacktestArtifact,
    ) -> Result<BacktestArtifact, StoreError> {
        self.inner.save_artifact(artifact).await
    }

    async fn insert_link(&self, link: &Link) -> Result<bool, StoreError> {
        if link.symbol == self.failing {
            return Err(StoreError::Corrupt("disk full".into()));
        }
        self.inner.insert_link(link).await
    }

    async fn find_link(
        &self,
        session_id: &str,
        symbol: &str,
        data_date: NaiveDate,
    ) -> Result<Option<Link>, StoreError> {
        self.inner.find_link(session_id, symbol, data_date).await
    }

    async fn linked_symbols(
        &self,
        session_id: &str,
        data_date: NaiveDate,
    ) -> Result<BTreeSet<String>, StoreError> {
        self.inner.linked_symbols(session_id, data_date).await
    }

    async fn record_session(&self, session: &ScreenSession) -> Result<bool, StoreError> {
        self.inner.record_session(session).await
    }
}

fn service_over(dir: &tempfile::TempDir, store: Arc<dyn ResultStore>) -> ScreenService {
    let scheduler = Arc::new(ParallelBacktestScheduler::new(
        Arc::new(ScriptedEngine::new()),
        store.clone(),
        dir.path().join("work"),
        dir.path().join("results"),
    ));
    ScreenService::new(
        Arc::new(DateWindowExtender::default()),
        Arc::new(FlatMarket::default()),
        Arc::new(PickList),
        scheduler,
        store,
    )
}

fn screen(combo: &str, picks: &[&str], fast: i64) -> ScreenRequest {
    let day = d(2025, 8, 1);
    ScreenRequest {
        session_id: "S1".into(),
        parameter_combination_id: combo.into(),
        data_date: day,
        start_date: d(2025, 7, 28),
        end_date: day,
        symbols: vec!["X".into(), "Y".into(), "Z".into()],
        filters: vec![
            FilterConfig::new("pick", FilterKind::Custom)
                .with_param("lookback_days", 20)
                .with_param("symbols", serde_json::json!(picks)),
        ],
        strategy: StrategyTemplate::new("sma_cross", d(2025, 1, 2), day).with_param("fast", fast),
        options: BatchOptions {
            retry_backoff: Duration::ZERO,
            ..BatchOptions::default()
        },
    }
}

#[tokio::test]
async fn overlapping_parameter_sets_link_each_symbol_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let engine = Arc::new(ScriptedEngine::new());
    let scheduler = Arc::new(ParallelBacktestScheduler::new(
        engine.clone(),
        store.clone(),
        dir.path().join("work"),
        dir.path().join("results"),
    ));
    let market = Arc::new(FlatMarket::default());
    let service = ScreenService::new(
        Arc::new(DateWindowExtender::default()),
        market.clone(),
        Arc::new(PickList),
        scheduler,
        store,
    );

    let first = service.run_screen(screen("fast", &["X", "Y"], 5)).await.unwrap();
    assert!(first.first_run);
    assert_eq!(first.qualified.len(), 2);
    assert!(first.links.values().all(|o| o.is_created()));
    assert!(first.missing_links.is_empty());

    // 命中只保留原始区间内的日期
    let x_hits = &first.hits["X"];
    assert_eq!(x_hits.first(), Some(&d(2025, 7, 28)));
    assert_eq!(x_hits.len(), 5);
    let (fetched_from, fetched_to) = market.requested.lock().unwrap()[0];
    assert!(fetched_from < d(2025, 7, 28));
    assert_eq!(fetched_to, d(2025, 8, 1));
    assert_eq!(first.plan.extended_start, fetched_from);

    let x_backtest = first.batch.by_symbol()["X"]
        .outcome
        .artifact()
        .unwrap()
        .backtest_id
        .clone();

    let second = service.run_screen(screen("slow", &["X", "Z"], 8)).await.unwrap();
    assert!(second.first_run);
    assert_eq!(engine.calls(), 4);
    assert_eq!(
        second.links["X"],
        LinkOutcome::AlreadyExists {
            existing_backtest_id: x_backtest.clone()
        }
    );
    assert!(second.links["Z"].is_created());

    let linked = service.registry().symbols_linked("S1", d(2025, 8, 1)).await.unwrap();
    assert_eq!(linked.len(), 3);

    // 同一参数组合重跑：会话不重复记录，回测全部命中
    let rerun = service.run_screen(screen("fast", &["X", "Y"], 5)).await.unwrap();
    assert!(!rerun.first_run);
    assert_eq!(rerun.batch.stats.cache_hits, 2);
    assert_eq!(engine.calls(), 4);
}

#[tokio::test]
async fn inverted_screen_range_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let scheduler = Arc::new(ParallelBacktestScheduler::new(
        Arc::new(ScriptedEngine::new()),
        store.clone(),
        dir.path().join("work"),
        dir.path().join("results"),
    ));
    let service = ScreenService::new(
        Arc::new(DateWindowExtender::default()),
        Arc::new(FlatMarket::default()),
        Arc::new(PickList),
        scheduler,
        store,
    );
    let mut req = screen("fast", &["X"], 5);
    req.start_date = d(2025, 8, 5);
    assert!(service.run_screen(req).await.is_err());
}

#[tokio::test]
async fn invalid_filters_do_not_consume_the_first_run() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let service = service_over(&dir, store);

    let mut bad = screen("fast", &["X"], 5);
    bad.filters.push(FilterConfig::new("sma", FilterKind::MovingAverage));
    let err = service.run_screen(bad).await.unwrap_err();
    assert!(format!("{:#}", err).contains("period"));

    let report = service.run_screen(screen("fast", &["X"], 5)).await.unwrap();
    assert!(report.first_run);
}

#[tokio::test]
async fn link_failures_are_reported_per_symbol() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let flaky: Arc<dyn ResultStore> = Arc::new(FailingLinks {
        inner: store,
        failing: "Y",
    });
    let service = service_over(&dir, flaky);

    let report = service.run_screen(screen("fast", &["X", "Y"], 5)).await.unwrap();
    assert_eq!(report.batch.stats.succeeded, 2);
    assert!(report.links["X"].is_created());
    assert!(!report.links.contains_key("Y"));
    assert_eq!(report.link_errors.len(), 1);
    assert!(report.link_errors["Y"].contains("disk full"));
    assert_eq!(report.missing_links, BTreeSet::from(["Y".to_string()]));
}
