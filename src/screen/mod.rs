pub mod ports;
pub mod service;

pub use ports::{Bar, BarSeries, FilterEvaluator, MarketDataProvider};
pub use service::{ScreenReport, ScreenRequest, ScreenService, StrategyTemplate};
