use crate::backtest::{BacktestRequest, ParallelBacktestScheduler, SubprocessEngine};
use crate::commands::AppContext;
use anyhow::{anyhow, Context};
use log::info;
use std::sync::Arc;

pub async fn run(ctx: &AppContext, requests_path: &str) -> anyhow::Result<()> {
    let command = ctx
        .config
        .engine_command
        .as_deref()
        .ok_or_else(|| anyhow!("未配置 SCREEN_ENGINE_CMD，无法执行回测"))?;
    let engine = SubprocessEngine::from_command_line(command)
        .ok_or_else(|| anyhow!("SCREEN_ENGINE_CMD 为空"))?;

    let raw = tokio::fs::read_to_string(requests_path)
        .await
        .with_context(|| format!("读取回测请求失败: {}", requests_path))?;
    let requests: Vec<BacktestRequest> = serde_json::from_str(&raw)
        .with_context(|| format!("解析回测请求失败: {}", requests_path))?;
    info!("正在提交 {} 个回测请求: {}", requests.len(), requests_path);

    let scheduler = ParallelBacktestScheduler::new(
        Arc::new(engine),
        ctx.store.clone(),
        &ctx.config.work_root,
        &ctx.config.results_dir,
    );
    let report = scheduler.run_batch(requests, &ctx.config.batch).await?;

    for t in &report.tasks {
        match (t.outcome.artifact(), t.outcome.error()) {
            (Some(a), _) => println!("✓ {:<10} {} ({})", t.symbol, a.backtest_id, t.fingerprint.short()),
            (_, Some(e)) => println!("✗ {:<10} {}", t.symbol, e),
            _ => {}
        }
    }
    println!("{}", serde_json::to_string_pretty(&report.stats)?);

    if let Some(err) = &report.aborted_by {
        return Err(anyhow!("批次已中止: {}", err));
    }
    Ok(())
}
