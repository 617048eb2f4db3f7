use crate::commands::AppContext;
use crate::window::{DateWindowExtender, FilterConfig, FilterRequirementAnalyzer};
use anyhow::Context;
use chrono::NaiveDate;
use log::info;

pub async fn run(
    ctx: &AppContext,
    start: NaiveDate,
    end: NaiveDate,
    filters_path: &str,
) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(filters_path)
        .await
        .with_context(|| format!("读取过滤器配置失败: {}", filters_path))?;
    let filters: Vec<FilterConfig> =
        serde_json::from_str(&raw).with_context(|| format!("解析过滤器配置失败: {}", filters_path))?;

    let requirements = FilterRequirementAnalyzer::analyze(&filters)?;
    let extender = DateWindowExtender::new(ctx.config.calendar(), ctx.config.buffer_days);
    let plan = extender.extend(&requirements, start, end)?;

    info!(
        "✓ 取数窗口: [{}, {}] -> [{}, {}]",
        start, end, plan.extended_start, plan.extended_end
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "requirements": requirements,
            "plan": plan,
            "extension_days": plan.extension_days(),
        }))?
    );
    Ok(())
}
