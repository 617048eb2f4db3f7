use super::analyzer::{FilterConfig, FilterRequirement, FilterRequirementAnalyzer};
use super::calendar::TradingCalendar;
use super::WindowError;
use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

pub const DEFAULT_BUFFER_DAYS: u32 = 5;

/// 可按日期裁剪的结果行
pub trait Dated {
    fn date(&self) -> NaiveDate;
}

impl Dated for NaiveDate {
    fn date(&self) -> NaiveDate {
        *self
    }
}

impl<T> Dated for (NaiveDate, T) {
    fn date(&self) -> NaiveDate {
        self.0
    }
}

/// 扩展后的取数窗口
///
/// 扩展只向过去拉长，`extended_end` 恒等于 `original_end`。
/// 对调用方输出前必须经过 [`ExtensionPlan::trim`] 裁回原始区间。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionPlan {
    pub original_start: NaiveDate,
    pub original_end: NaiveDate,
    pub extended_start: NaiveDate,
    pub extended_end: NaiveDate,
    pub buffer_days: u32,
    pub max_lookback_days: u32,
}

impl ExtensionPlan {
    /// 扩展的日历天数（original_start - extended_start）
    pub fn extension_days(&self) -> i64 {
        (self.original_start - self.extended_start).num_days()
    }

    pub fn trading_days_back(&self) -> u32 {
        self.max_lookback_days + self.buffer_days
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.original_start && date <= self.original_end
    }

    pub fn trim<T: Dated>(&self, rows: Vec<T>) -> Vec<T> {
        rows.into_iter().filter(|r| self.contains(r.date())).collect()
    }
}

type PlanKey = (u32, NaiveDate, NaiveDate);

/// 缓存计划数上限，满后整体清空
const MEMO_CAPACITY: usize = 1024;

pub struct DateWindowExtender {
    calendar: TradingCalendar,
    buffer_days: u32,
    memo: Mutex<HashMap<PlanKey, ExtensionPlan>>,
}

impl DateWindowExtender {
    pub fn new(calendar: TradingCalendar, buffer_days: u32) -> Self {
        Self {
            calendar,
            buffer_days,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    pub fn buffer_days(&self) -> u32 {
        self.buffer_days
    }

    /// 合并各过滤器需求，计算扩展起点
    ///
    /// 1. 取 max(lookback_days)（无需求时为 0）
    /// 2. 从 original_start 按交易日回退该天数
    /// 3. 再回退 buffer_days 个交易日，吸收日历未建模的节假日
    pub fn extend(
        &self,
        requirements: &[FilterRequirement],
        original_start: NaiveDate,
        original_end: NaiveDate,
    ) -> Result<ExtensionPlan, WindowError> {
        if original_start > original_end {
            return Err(WindowError::InvertedRange {
                start: original_start,
                end: original_end,
            });
        }

        let max_lookback = requirements
            .iter()
            .map(|r| r.lookback_days)
            .max()
            .unwrap_or(0);
        let key = (max_lookback, original_start, original_end);

        if let Some(plan) = self.memo.lock().unwrap_or_else(|e| e.into_inner()).get(&key) {
            return Ok(plan.clone());
        }

        let lookback_start = self.calendar.shift_back(original_start, max_lookback)?;
        let extended_start = self.calendar.shift_back(lookback_start, self.buffer_days)?;

        let plan = ExtensionPlan {
            original_start,
            original_end,
            extended_start,
            extended_end: original_end,
            buffer_days: self.buffer_days,
            max_lookback_days: max_lookback,
        };
        debug!(
            "窗口扩展: [{}, {}] -> [{}, {}] (lookback={}, buffer={})",
            original_start, original_end, extended_start, original_end, max_lookback, self.buffer_days
        );

        let mut memo = self.memo.lock().unwrap_or_else(|e| e.into_inner());
        if memo.len() >= MEMO_CAPACITY {
            debug!("窗口计划缓存已满 ({} 条)，清空", memo.len());
            memo.clear();
        }
        memo.insert(key, plan.clone());
        Ok(plan)
    }

    pub fn plan_for_filters(
        &self,
        filters: &[FilterConfig],
        original_start: NaiveDate,
        original_end: NaiveDate,
    ) -> Result<ExtensionPlan, WindowError> {
        let requirements = FilterRequirementAnalyzer::analyze(filters)?;
        self.extend(&requirements, original_start, original_end)
    }
}

impl Default for DateWindowExtender {
    fn default() -> Self {
        Self::new(TradingCalendar::weekends_only(), DEFAULT_BUFFER_DAYS)
    }
}
