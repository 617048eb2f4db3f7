pub mod registry;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub use registry::{LinkError, LinkageRegistry};

/// 一次筛选会话；同一 session_id 可在同一日期下复用于多个参数组合
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScreenSession {
    pub session_id: String,
    pub data_date: NaiveDate,
    pub parameter_combination_id: String,
}

impl ScreenSession {
    pub fn new(
        session_id: impl Into<String>,
        data_date: NaiveDate,
        parameter_combination_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            data_date,
            parameter_combination_id: parameter_combination_id.into(),
        }
    }
}

/// (session_id, symbol, data_date) -> backtest_id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub session_id: String,
    pub symbol: String,
    pub data_date: NaiveDate,
    pub backtest_id: String,
    pub parameter_combination_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkOutcome {
    Created,
    AlreadyExists { existing_backtest_id: String },
}

impl LinkOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, LinkOutcome::Created)
    }
}
