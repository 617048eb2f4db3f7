use crate::storage::entity::screen_link::{self, ActiveModel as LinkActiveModel, Entity as ScreenLink};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};

pub struct LinkRepository;

impl LinkRepository {
    /// 幂等写入：唯一键 (session_id, symbol, data_date) 冲突时什么都不做
    ///
    /// 单次往返的条件写入，不做先读后写。返回 true 表示新建。
    pub async fn insert_or_ignore(
        db: &DatabaseConnection,
        model: LinkActiveModel,
    ) -> Result<bool, sea_orm::DbErr> {
        let rows = ScreenLink::insert(model)
            .on_conflict(
                OnConflict::columns([
                    screen_link::Column::SessionId,
                    screen_link::Column::Symbol,
                    screen_link::Column::DataDate,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(db)
            .await?;
        Ok(rows > 0)
    }

    pub async fn find(
        db: &DatabaseConnection,
        session_id: &str,
        symbol: &str,
        data_date: &str,
    ) -> Result<Option<screen_link::Model>, sea_orm::DbErr> {
        ScreenLink::find()
            .filter(screen_link::Column::SessionId.eq(session_id.to_string()))
            .filter(screen_link::Column::Symbol.eq(symbol.to_string()))
            .filter(screen_link::Column::DataDate.eq(data_date.to_string()))
            .one(db)
            .await
    }

    pub async fn list_for_session(
        db: &DatabaseConnection,
        session_id: &str,
        data_date: &str,
    ) -> Result<Vec<screen_link::Model>, sea_orm::DbErr> {
        ScreenLink::find()
            .filter(screen_link::Column::SessionId.eq(session_id.to_string()))
            .filter(screen_link::Column::DataDate.eq(data_date.to_string()))
            .order_by_asc(screen_link::Column::Symbol)
            .all(db)
            .await
    }

    pub async fn count(db: &DatabaseConnection) -> Result<u64, sea_orm::DbErr> {
        ScreenLink::find().count(db).await
    }
}
