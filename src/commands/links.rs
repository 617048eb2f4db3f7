use crate::commands::AppContext;
use crate::linkage::{LinkOutcome, LinkageRegistry};
use crate::storage::repository::{
    ArtifactRepository, LinkRepository, SessionRepository,
};
use chrono::NaiveDate;
use log::warn;
use std::collections::BTreeSet;

pub async fn link(
    ctx: &AppContext,
    session_id: &str,
    symbol: &str,
    data_date: NaiveDate,
    backtest_id: &str,
) -> anyhow::Result<()> {
    if ArtifactRepository::find_by_backtest_id(&ctx.db, backtest_id)
        .await?
        .is_none()
    {
        warn!("⚠ 回测 {} 不在本地产物表中，仍然登记关联", backtest_id);
    }

    let registry = LinkageRegistry::new(ctx.store.clone());
    match registry.link(session_id, symbol, data_date, backtest_id).await? {
        LinkOutcome::Created => println!("✓ 关联已建立"),
        LinkOutcome::AlreadyExists {
            existing_backtest_id,
        } => println!("关联已存在 -> {}", existing_backtest_id),
    }
    Ok(())
}

pub async fn list(
    ctx: &AppContext,
    session_id: &str,
    data_date: NaiveDate,
    qualified: &BTreeSet<String>,
) -> anyhow::Result<()> {
    let date = data_date.format("%Y-%m-%d").to_string();
    let combos = SessionRepository::list_combinations(&ctx.db, session_id, &date).await?;
    println!("会话 {} @ {}: {} 个参数组合 {:?}", session_id, date, combos.len(), combos);

    for row in LinkRepository::list_for_session(&ctx.db, session_id, &date).await? {
        println!(
            "  {:<10} -> {} [{}]",
            row.symbol,
            row.backtest_id,
            row.parameter_combination_id.as_deref().unwrap_or("-")
        );
    }

    if !qualified.is_empty() {
        let registry = LinkageRegistry::new(ctx.store.clone());
        let missing = registry
            .missing_links(session_id, data_date, qualified)
            .await?;
        if missing.is_empty() {
            println!("✓ 所有合格标的均已关联");
        } else {
            println!("⚠ 缺少关联: {:?}", missing);
        }
    }
    Ok(())
}

pub async fn stats(ctx: &AppContext) -> anyhow::Result<()> {
    println!("回测产物: {}", ArtifactRepository::count(&ctx.db).await?);
    println!("关联记录: {}", LinkRepository::count(&ctx.db).await?);
    println!("会话运行: {}", SessionRepository::count(&ctx.db).await?);

    let recent = ArtifactRepository::list_recent(&ctx.db, 10).await?;
    if !recent.is_empty() {
        println!("最近的回测:");
    }
    for a in recent {
        println!(
            "  {} {:<10} {} [{} ~ {}] trades={}",
            a.backtest_id, a.symbol, a.strategy_name, a.start_date, a.end_date, a.trade_count
        );
    }
    Ok(())
}
