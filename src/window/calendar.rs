use super::WindowError;
use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::BTreeSet;

/// 交易日历
///
/// 默认只排除周末；可以额外配置节假日集合。
/// 未建模的节假日由窗口扩展时的缓冲天数吸收。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TradingCalendar {
    holidays: BTreeSet<NaiveDate>,
}

impl TradingCalendar {
    pub fn weekends_only() -> Self {
        Self::default()
    }

    pub fn with_holidays<I>(holidays: I) -> Self
    where
        I: IntoIterator<Item = NaiveDate>,
    {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    /// 严格早于 `date` 的最近一个交易日
    pub fn previous_trading_day(&self, date: NaiveDate) -> Result<NaiveDate, WindowError> {
        let mut cur = date;
        loop {
            cur = cur.pred_opt().ok_or(WindowError::OutOfRange(date))?;
            if self.is_trading_day(cur) {
                return Ok(cur);
            }
        }
    }

    /// 严格晚于 `date` 的最近一个交易日
    pub fn next_trading_day(&self, date: NaiveDate) -> Result<NaiveDate, WindowError> {
        let mut cur = date;
        loop {
            cur = cur.succ_opt().ok_or(WindowError::OutOfRange(date))?;
            if self.is_trading_day(cur) {
                return Ok(cur);
            }
        }
    }

    /// 从 `date` 向前回退 `n` 个交易日（n=0 原样返回）
    pub fn shift_back(&self, date: NaiveDate, n: u32) -> Result<NaiveDate, WindowError> {
        let mut cur = date;
        for _ in 0..n {
            cur = self.previous_trading_day(cur)?;
        }
        Ok(cur)
    }

    pub fn shift_forward(&self, date: NaiveDate, n: u32) -> Result<NaiveDate, WindowError> {
        let mut cur = date;
        for _ in 0..n {
            cur = self.next_trading_day(cur)?;
        }
        Ok(cur)
    }

    /// `[start, end]` 闭区间内的交易日数量
    pub fn trading_days_between(&self, start: NaiveDate, end: NaiveDate) -> u32 {
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| self.is_trading_day(*d))
            .count() as u32
    }

    pub fn trading_days(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| self.is_trading_day(*d))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn weekends_are_not_trading_days() {
        let cal = TradingCalendar::weekends_only();
        assert!(cal.is_trading_day(d(2025, 8, 1)));
        assert!(!cal.is_trading_day(d(2025, 8, 2)));
        assert!(!cal.is_trading_day(d(2025, 8, 3)));
        assert!(cal.is_trading_day(d(2025, 8, 4)));
    }

    #[test]
    fn previous_trading_day_skips_weekend() {
        let cal = TradingCalendar::weekends_only();
        assert_eq!(cal.previous_trading_day(d(2025, 8, 4)).unwrap(), d(2025, 8, 1));
        assert_eq!(cal.next_trading_day(d(2025, 8, 1)).unwrap(), d(2025, 8, 4));
    }

    #[test]
    fn configured_holiday_is_skipped() {
        let cal = TradingCalendar::with_holidays([d(2025, 7, 4)]);
        assert!(!cal.is_trading_day(d(2025, 7, 4)));
        assert_eq!(cal.previous_trading_day(d(2025, 7, 7)).unwrap(), d(2025, 7, 3));
    }

    #[test]
    fn shift_back_zero_is_identity() {
        let cal = TradingCalendar::weekends_only();
        assert_eq!(cal.shift_back(d(2025, 8, 2), 0).unwrap(), d(2025, 8, 2));
    }

    #[test]
    fn shift_back_whole_weeks_lands_on_same_weekday() {
        let cal = TradingCalendar::weekends_only();
        assert_eq!(cal.shift_back(d(2025, 8, 1), 5).unwrap(), d(2025, 7, 25));
        assert_eq!(cal.shift_back(d(2025, 8, 1), 55).unwrap(), d(2025, 5, 16));
        assert_eq!(cal.shift_forward(d(2025, 7, 25), 5).unwrap(), d(2025, 8, 1));
    }

    #[test]
    fn counts_trading_days_inclusive() {
        let cal = TradingCalendar::weekends_only();
        assert_eq!(cal.trading_days_between(d(2025, 7, 28), d(2025, 8, 3)), 5);
        assert_eq!(cal.trading_days_between(d(2025, 8, 2), d(2025, 8, 3)), 0);
        assert_eq!(cal.trading_days(d(2025, 8, 1), d(2025, 8, 4)).len(), 2);
    }

    #[test]
    fn shift_back_past_min_date_is_an_error() {
        let cal = TradingCalendar::weekends_only();
        assert!(matches!(
            cal.shift_back(NaiveDate::MIN, 1),
            Err(WindowError::OutOfRange(_))
        ));
    }
}
