use crate::backtest::context::IsolatedContext;
use crate::backtest::model::BacktestRequest;
use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::process::Stdio;
use tokio::process::Command;

/// 引擎输出：统计指标 + 成交明细
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOutput {
    #[serde(default)]
    pub statistics: Value,
    #[serde(default)]
    pub trades: Vec<Value>,
}

#[derive(thiserror::Error, Debug)]
pub enum EngineFailure {
    #[error("engine exited with {status}: {stderr}")]
    Exited { status: String, stderr: String },
    #[error("failed to launch engine: {0}")]
    Launch(#[source] std::io::Error),
    #[error("unreadable engine output: {0}")]
    Output(String),
}

/// 策略执行器：只能读写给定的上下文
#[async_trait]
pub trait StrategyEngine: Send + Sync {
    async fn execute(
        &self,
        ctx: &IsolatedContext,
        request: &BacktestRequest,
    ) -> Result<EngineOutput, EngineFailure>;
}

/// 在上下文目录中运行外部命令
///
/// 命令读取 `request.json`，写出 `result.json`；future 被丢弃时子进程随之被杀。
#[derive(Debug, Clone)]
pub struct SubprocessEngine {
    program: String,
    args: Vec<String>,
}

impl SubprocessEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// 按空白切分，如 "python3 engine.py --fast"
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

#[async_trait]
impl StrategyEngine for SubprocessEngine {
    async fn execute(
        &self,
        ctx: &IsolatedContext,
        request: &BacktestRequest,
    ) -> Result<EngineOutput, EngineFailure> {
        info!(
            "▶ [{}] 启动引擎: {} {} ({})",
            ctx.id(),
            request.symbol,
            request.strategy_name,
            self.program
        );

        let output = Command::new(&self.program)
            .args(&self.args)
            .current_dir(ctx.path())
            .env("SCREEN_CONTEXT_DIR", ctx.path())
            .env("SCREEN_REQUEST_PATH", ctx.request_path())
            .env("SCREEN_RESULT_PATH", ctx.result_path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(EngineFailure::Launch)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineFailure::Exited {
                status: output.status.to_string(),
                stderr: stderr.trim().chars().take(2000).collect(),
            });
        }
        debug!(
            "[{}] 引擎 stdout: {}",
            ctx.id(),
            String::from_utf8_lossy(&output.stdout).trim()
        );

        let raw = tokio::fs::read(ctx.result_path())
            .await
            .map_err(|e| EngineFailure::Output(format!("{}: {}", ctx.result_path().display(), e)))?;
        serde_json::from_slice(&raw).map_err(|e| EngineFailure::Output(e.to_string()))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::backtest::fingerprint::Fingerprint;
    use chrono::NaiveDate;

    fn ctx(root: &std::path::Path) -> (IsolatedContext, BacktestRequest) {
        let d = |m, day| NaiveDate::from_ymd_opt(2024, m, day).unwrap();
        let req = BacktestRequest::new("TLT", "carry", d(4, 1), d(4, 30));
        let ctx = IsolatedContext::allocate(root, &Fingerprint::of(&req), 1, &req).unwrap();
        (ctx, req)
    }

    #[tokio::test]
    async fn reads_result_file_written_by_command() {
        let root = tempfile::tempdir().unwrap();
        let (ctx, req) = ctx(root.path());
        let engine = SubprocessEngine::new(
            "sh",
            vec![
                "-c".into(),
                r#"test -f request.json && printf '{"statistics":{"pnl":3.5},"trades":[{"qty":1}]}' > result.json"#.into(),
            ],
        );
        let out = engine.execute(&ctx, &req).await.unwrap();
        assert_eq!(out.statistics["pnl"], 3.5);
        assert_eq!(out.trades.len(), 1);
    }

    #[tokio::test]
    async fn non_zero_exit_is_failure() {
        let root = tempfile::tempdir().unwrap();
        let (ctx, req) = ctx(root.path());
        let engine = SubprocessEngine::from_command_line("sh -c exit_7_please").unwrap();
        let err = engine.execute(&ctx, &req).await.unwrap_err();
        assert!(matches!(err, EngineFailure::Exited { .. }));
    }

    #[tokio::test]
    async fn missing_result_is_output_failure() {
        let root = tempfile::tempdir().unwrap();
        let (ctx, req) = ctx(root.path());
        let engine = SubprocessEngine::new("true", vec![]);
        let err = engine.execute(&ctx, &req).await.unwrap_err();
        assert!(matches!(err, EngineFailure::Output(_)));
    }
}
