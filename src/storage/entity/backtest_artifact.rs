use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "backtest_artifacts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub fingerprint: String,
    #[sea_orm(unique)]
    pub backtest_id: String,
    pub symbol: String,
    pub strategy_name: String,
    pub start_date: String, // YYYY-MM-DD
    pub end_date: String,
    pub resolution: String,
    pub parameters_json: String,
    pub statistics_json: String,
    pub trades_json: String,
    pub trade_count: i32,
    pub result_path: String,
    pub status: String, // COMPLETED
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
