//! 筛选日期窗口推导：交易日历、过滤器回看需求分析与窗口扩展。

pub mod analyzer;
pub mod calendar;
pub mod extender;

use chrono::NaiveDate;

pub use analyzer::{FilterConfig, FilterKind, FilterRequirement, FilterRequirementAnalyzer};
pub use calendar::TradingCalendar;
pub use extender::{Dated, DateWindowExtender, ExtensionPlan, DEFAULT_BUFFER_DAYS};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum WindowError {
    #[error("invalid filter `{filter}`: {reason}")]
    InvalidFilter { filter: String, reason: String },
    #[error("inverted date range: start {start} is after end {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },
    #[error("date arithmetic out of range near {0}")]
    OutOfRange(NaiveDate),
}

impl WindowError {
    pub(crate) fn invalid_filter(filter: &str, reason: impl Into<String>) -> Self {
        Self::InvalidFilter {
            filter: filter.to_string(),
            reason: reason.into(),
        }
    }
}
