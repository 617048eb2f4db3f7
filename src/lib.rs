pub mod backtest;
pub mod commands;
pub mod config;
pub mod linkage;
pub mod screen;
pub mod storage;
pub mod window;

pub use backtest::{
    BacktestRequest, BatchOptions, BatchReport, Fingerprint, ParallelBacktestScheduler,
    StrategyEngine,
};
pub use config::AppConfig;
pub use linkage::LinkageRegistry;
pub use screen::ScreenService;
pub use storage::{ResultStore, SqlResultStore};
pub use window::{DateWindowExtender, FilterRequirementAnalyzer, TradingCalendar};
