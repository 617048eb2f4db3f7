use crate::backtest::model::BatchOptions;
use crate::window::{TradingCalendar, DEFAULT_BUFFER_DAYS};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://screen.db?mode=rwc";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: cannot parse {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub results_dir: PathBuf,
    pub work_root: PathBuf,
    /// 为空时回测命令不可用
    pub engine_command: Option<String>,
    pub batch: BatchOptions,
    pub buffer_days: u32,
    pub holidays: BTreeSet<NaiveDate>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            results_dir: PathBuf::from("results"),
            work_root: std::env::temp_dir().join("rustscreen"),
            engine_command: None,
            batch: BatchOptions::default(),
            buffer_days: DEFAULT_BUFFER_DAYS,
            holidays: BTreeSet::new(),
        }
    }
}

impl AppConfig {
    /// 先加载 `.env`（若存在），再读取进程环境变量
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = AppConfig::default();

        if let Some(v) = get("DATABASE_URL") {
            cfg.database_url = v;
        }
        if let Some(v) = get("SCREEN_RESULTS_DIR") {
            cfg.results_dir = PathBuf::from(v);
        }
        if let Some(v) = get("SCREEN_WORK_ROOT") {
            cfg.work_root = PathBuf::from(v);
        }
        cfg.engine_command = get("SCREEN_ENGINE_CMD");

        if let Some(v) = get("SCREEN_MAX_PARALLEL") {
            cfg.batch.max_parallel = parse("SCREEN_MAX_PARALLEL", &v)?;
            if cfg.batch.max_parallel == 0 {
                return Err(invalid("SCREEN_MAX_PARALLEL", &v, "must be positive"));
            }
        }
        if let Some(v) = get("SCREEN_TASK_TIMEOUT_SECS") {
            let secs: u64 = parse("SCREEN_TASK_TIMEOUT_SECS", &v)?;
            if secs == 0 {
                return Err(invalid("SCREEN_TASK_TIMEOUT_SECS", &v, "must be positive"));
            }
            cfg.batch.timeout_per_task = Duration::from_secs(secs);
        }
        if let Some(v) = get("SCREEN_RETRY_ATTEMPTS") {
            cfg.batch.retry_attempts = parse("SCREEN_RETRY_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("SCREEN_CONTINUE_ON_ERROR") {
            cfg.batch.continue_on_error = parse_bool("SCREEN_CONTINUE_ON_ERROR", &v)?;
        }
        if let Some(v) = get("SCREEN_RETRY_BACKOFF_MS") {
            cfg.batch.retry_backoff =
                Duration::from_millis(parse("SCREEN_RETRY_BACKOFF_MS", &v)?);
        }
        if let Some(v) = get("SCREEN_BUFFER_DAYS") {
            cfg.buffer_days = parse("SCREEN_BUFFER_DAYS", &v)?;
        }
        if let Some(v) = get("SCREEN_HOLIDAYS") {
            cfg.holidays = parse_holidays(&v)?;
        }
        Ok(cfg)
    }

    pub fn calendar(&self) -> TradingCalendar {
        TradingCalendar::with_holidays(self.holidays.iter().copied())
    }
}

fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| invalid(key, value, e.to_string()))
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, value, "expected true/false")),
    }
}

fn parse_holidays(value: &str) -> Result<BTreeSet<NaiveDate>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|e| invalid("SCREEN_HOLIDAYS", s, e.to_string()))
        })
        .collect()
}
