use crate::backtest::fingerprint::Fingerprint;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BacktestErrorType {
    Validation, // 请求/参数不合法（不可重试）
    Execution,  // 引擎进程失败（换新上下文重试）
    Timeout,    // 超时被取消（按执行失败重试，结果中单独区分）
    Infra,      // 上下文分配/结果写入/存储失败（不重试，立即上报）
    Cancelled,  // 批次因其他任务失败被整体取消
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BacktestError {
    pub error_type: BacktestErrorType,
    pub message: String,
    pub retryable: bool,
}

impl BacktestError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self {
            error_type: BacktestErrorType::Validation,
            message: msg.into(),
            retryable: false,
        }
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self {
            error_type: BacktestErrorType::Execution,
            message: msg.into(),
            retryable: true,
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        Self {
            error_type: BacktestErrorType::Timeout,
            message: format!("backtest exceeded {:.1}s", limit.as_secs_f64()),
            retryable: true,
        }
    }

    pub fn infra(msg: impl Into<String>) -> Self {
        Self {
            error_type: BacktestErrorType::Infra,
            message: msg.into(),
            retryable: false,
        }
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self {
            error_type: BacktestErrorType::Cancelled,
            message: msg.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for BacktestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.error_type, self.message)
    }
}

impl std::error::Error for BacktestError {}

/// 策略参数值
///
/// 指纹计算时 `5` 与 `5.0` 视为同一个值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

fn default_resolution() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRequest {
    pub symbol: String,
    pub strategy_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default = "default_resolution")]
    pub resolution: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,
}

fn symbol_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/\-]{0,23}$").expect("valid symbol regex"))
}

impl BacktestRequest {
    pub fn new(
        symbol: impl Into<String>,
        strategy_name: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            strategy_name: strategy_name.into(),
            start_date,
            end_date,
            resolution: default_resolution(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = resolution.into();
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn normalized_symbol(&self) -> String {
        self.symbol.trim().to_ascii_uppercase()
    }

    pub fn validate(&self) -> Result<(), BacktestError> {
        if !symbol_pattern().is_match(self.symbol.trim()) {
            return Err(BacktestError::validation(format!(
                "非法标的代码: {:?}",
                self.symbol
            )));
        }
        if self.strategy_name.trim().is_empty() {
            return Err(BacktestError::validation(format!(
                "{} 缺少策略名称",
                self.symbol
            )));
        }
        if self.start_date > self.end_date {
            return Err(BacktestError::validation(format!(
                "{} 回测区间颠倒: {} > {}",
                self.symbol, self.start_date, self.end_date
            )));
        }
        if self.parameters.keys().any(|k| k.trim().is_empty()) {
            return Err(BacktestError::validation(format!(
                "{} 存在空的参数名",
                self.symbol
            )));
        }
        // 指纹按去空白后的键名计算，去空白后重名会丢失参数
        let mut seen = BTreeSet::new();
        if let Some(dup) = self.parameters.keys().find(|k| !seen.insert(k.trim())) {
            return Err(BacktestError::validation(format!(
                "{} 参数名去空白后重复: {:?}",
                self.symbol, dup
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactStatus {
    Completed,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactStatus::Completed => "COMPLETED",
        }
    }
}

/// 回测产物：每个指纹只创建一次，创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestArtifact {
    pub backtest_id: String,
    pub fingerprint: Fingerprint,
    pub symbol: String,
    pub strategy_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub resolution: String,
    pub parameters: BTreeMap<String, ParamValue>,
    pub statistics: Value,
    pub trades: Vec<Value>,
    pub result_path: String,
    pub created_at: DateTime<Utc>,
    pub status: ArtifactStatus,
}

pub type ArtifactRef = Arc<BacktestArtifact>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed | TaskState::TimedOut)
    }
}

/// 调度器内部任务，生命周期内归调度器独占
#[derive(Debug, Clone)]
pub struct BacktestTask {
    pub fingerprint: Fingerprint,
    pub request: BacktestRequest,
    pub state: TaskState,
    pub attempt_count: u32,
    pub context_ids: Vec<String>,
}

impl BacktestTask {
    pub fn new(fingerprint: Fingerprint, request: BacktestRequest) -> Self {
        Self {
            fingerprint,
            request,
            state: TaskState::Queued,
            attempt_count: 0,
            context_ids: Vec::new(),
        }
    }

    /// Queued -> Running，返回本次尝试序号（从 1 开始）
    pub fn begin_attempt(&mut self) -> u32 {
        debug_assert_eq!(self.state, TaskState::Queued);
        self.state = TaskState::Running;
        self.attempt_count += 1;
        self.attempt_count
    }

    pub fn record_context(&mut self, context_id: &str) {
        self.context_ids.push(context_id.to_string());
    }

    pub fn finish(&mut self, state: TaskState) {
        self.state = state;
    }

    /// Failed/TimedOut -> Queued（仍有剩余次数时）
    pub fn requeue(&mut self, max_attempts: u32) -> bool {
        if matches!(self.state, TaskState::Failed | TaskState::TimedOut)
            && self.attempt_count < max_attempts
        {
            self.state = TaskState::Queued;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    pub max_parallel: usize,
    pub timeout_per_task: Duration,
    pub retry_attempts: u32,
    pub continue_on_error: bool,
    /// 重试退避基数；为 0 时立即重试
    pub retry_backoff: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            timeout_per_task: Duration::from_secs(600),
            retry_attempts: 1,
            continue_on_error: true,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl BatchOptions {
    pub fn max_attempts(&self) -> u32 {
        self.retry_attempts.saturating_add(1)
    }

    pub fn validate(&self) -> Result<(), BacktestError> {
        if self.max_parallel == 0 {
            return Err(BacktestError::validation("max_parallel 必须为正数"));
        }
        if self.timeout_per_task.is_zero() {
            return Err(BacktestError::validation("timeout_per_task 必须大于 0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub total: usize,
    pub executions: usize,
    pub cache_hits: usize,
    pub shared: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    pub peak_running: usize,
}
