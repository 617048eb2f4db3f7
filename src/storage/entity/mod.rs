pub mod backtest_artifact;
pub mod screen_link;
pub mod screen_session;

pub use backtest_artifact::Entity as BacktestArtifact;
pub use screen_link::Entity as ScreenLink;
pub use screen_session::Entity as ScreenSession;
