use crate::storage::entity::backtest_artifact::{
    self, ActiveModel as ArtifactActiveModel, Entity as BacktestArtifact,
};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect,
};

pub struct ArtifactRepository;

impl ArtifactRepository {
    pub async fn find_by_fingerprint(
        db: &DatabaseConnection,
        fingerprint: &str,
    ) -> Result<Option<backtest_artifact::Model>, sea_orm::DbErr> {
        BacktestArtifact::find_by_id(fingerprint.to_string())
            .one(db)
            .await
    }

    pub async fn find_by_backtest_id(
        db: &DatabaseConnection,
        backtest_id: &str,
    ) -> Result<Option<backtest_artifact::Model>, sea_orm::DbErr> {
        BacktestArtifact::find()
            .filter(backtest_artifact::Column::BacktestId.eq(backtest_id.to_string()))
            .one(db)
            .await
    }

    /// INSERT ... ON CONFLICT(fingerprint) DO NOTHING
    ///
    /// 返回 true 表示本次写入成功；false 表示该指纹已有产物（以已存在的为准）。
    pub async fn insert_or_ignore(
        db: &DatabaseConnection,
        model: ArtifactActiveModel,
    ) -> Result<bool, sea_orm::DbErr> {
        let rows = BacktestArtifact::insert(model)
            .on_conflict(
                OnConflict::column(backtest_artifact::Column::Fingerprint)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await?;
        Ok(rows > 0)
    }

    pub async fn list_recent(
        db: &DatabaseConnection,
        limit: u64,
    ) -> Result<Vec<backtest_artifact::Model>, sea_orm::DbErr> {
        BacktestArtifact::find()
            .order_by_desc(backtest_artifact::Column::CreatedAt)
            .limit(limit)
            .all(db)
            .await
    }

    pub async fn count(db: &DatabaseConnection) -> Result<u64, sea_orm::DbErr> {
        BacktestArtifact::find().count(db).await
    }
}
