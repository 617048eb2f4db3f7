use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

// 唯一键 (session_id, symbol, data_date) 由 connection.rs 中的唯一索引保证
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "screen_links")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub session_id: String,
    pub symbol: String,
    pub data_date: String, // YYYY-MM-DD
    pub backtest_id: String,
    pub parameter_combination_id: Option<String>, // 首个写入者的参数组合
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
