use crate::window::{Dated, ExtensionPlan, FilterConfig};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 日线 K 线
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Dated for Bar {
    fn date(&self) -> NaiveDate {
        self.date
    }
}

pub type BarSeries = BTreeMap<String, Vec<Bar>>;

/// 行情数据来源
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch(
        &self,
        symbols: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<BarSeries>;
}

/// 过滤器求值：返回每个标的命中的日期
///
/// 输入序列覆盖扩展后的窗口，命中日期可能落在原始区间之外，由调用方裁剪。
#[async_trait]
pub trait FilterEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        filters: &[FilterConfig],
        series: &BarSeries,
        plan: &ExtensionPlan,
    ) -> anyhow::Result<BTreeMap<String, Vec<NaiveDate>>>;
}
