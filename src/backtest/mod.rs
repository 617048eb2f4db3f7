pub mod cache;
pub mod context;
pub mod fingerprint;
pub mod model;
pub mod scheduler;
pub mod worker;

pub use cache::{Acquire, BacktestFingerprintCache, ClaimGuard, Resolution, Waiter};
pub use context::IsolatedContext;
pub use fingerprint::Fingerprint;
pub use model::{
    ArtifactRef, BacktestArtifact, BacktestError, BacktestErrorType, BacktestRequest,
    BatchOptions, BatchStats, ParamValue,
};
pub use scheduler::{BatchReport, ParallelBacktestScheduler, TaskOutcome, TaskReport};
pub use worker::{EngineFailure, EngineOutput, StrategyEngine, SubprocessEngine};
