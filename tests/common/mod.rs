#![allow(dead_code)]

use async_trait::async_trait;
use chrono::NaiveDate;
use rustscreen::backtest::{
    BacktestRequest, EngineFailure, EngineOutput, IsolatedContext, StrategyEngine,
};
use rustscreen::storage::{establish_connection, SqlResultStore};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

pub async fn open_store(dir: &TempDir) -> Arc<SqlResultStore> {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("screen.db").display());
    let db = establish_connection(&url).await.unwrap();
    Arc::new(SqlResultStore::new(Arc::new(db)))
}

/// 单次尝试的脚本动作
#[derive(Debug, Clone)]
pub enum Step {
    Succeed,
    /// 先睡眠再成功
    Slow(Duration),
    Fail(&'static str),
    /// 永不返回，只能被超时取消
    Hang,
}

/// 按标的预设行为的引擎替身；未配置的标的直接成功
#[derive(Default)]
pub struct ScriptedEngine {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    default_step: Mutex<Option<Step>>,
    pub calls: AtomicUsize,
    running: AtomicUsize,
    pub peak: AtomicUsize,
    pub contexts: Mutex<Vec<(String, String)>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, symbol: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(symbol.to_string(), steps.into());
        self
    }

    pub fn default_step(self, step: Step) -> Self {
        *self.default_step.lock().unwrap() = Some(step);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn contexts_for(&self, symbol: &str) -> Vec<String> {
        self.contexts
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == symbol)
            .map(|(_, c)| c.clone())
            .collect()
    }

    fn next_step(&self, symbol: &str) -> Step {
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(symbol)
            .and_then(|q| q.pop_front());
        scripted
            .or_else(|| self.default_step.lock().unwrap().clone())
            .unwrap_or(Step::Succeed)
    }
}

struct Running<'a>(&'a AtomicUsize);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StrategyEngine for ScriptedEngine {
    async fn execute(
        &self,
        ctx: &IsolatedContext,
        request: &BacktestRequest,
    ) -> Result<EngineOutput, EngineFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts
            .lock()
            .unwrap()
            .push((request.symbol.clone(), ctx.id().to_string()));
        assert!(ctx.request_path().exists(), "request snapshot missing");

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _running = Running(&self.running);

        match self.next_step(&request.symbol) {
            Step::Succeed => {}
            Step::Slow(delay) => tokio::time::sleep(delay).await,
            Step::Fail(msg) => {
                return Err(EngineFailure::Exited {
                    status: "exit status: 1".into(),
                    stderr: msg.to_string(),
                })
            }
            Step::Hang => std::future::pending::<()>().await,
        }
        Ok(EngineOutput {
            statistics: serde_json::json!({
                "symbol": request.symbol,
                "total_return": 0.12,
            }),
            trades: vec![serde_json::json!({"side": "buy", "qty": 100})],
        })
    }
}
