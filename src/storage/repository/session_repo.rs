use crate::storage::entity::screen_session::{
    self, ActiveModel as SessionActiveModel, Entity as ScreenSession,
};
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};

pub struct SessionRepository;

impl SessionRepository {
    /// 记录一次 (session, date, 参数组合) 的筛选运行，重复记录被忽略
    pub async fn record_run(
        db: &DatabaseConnection,
        session_id: &str,
        data_date: &str,
        parameter_combination_id: &str,
    ) -> Result<bool, sea_orm::DbErr> {
        let model = SessionActiveModel {
            session_id: Set(session_id.to_string()),
            data_date: Set(data_date.to_string()),
            parameter_combination_id: Set(parameter_combination_id.to_string()),
            created_at: Set(Utc::now().timestamp()),
            ..Default::default()
        };
        let rows = ScreenSession::insert(model)
            .on_conflict(
                OnConflict::columns([
                    screen_session::Column::SessionId,
                    screen_session::Column::DataDate,
                    screen_session::Column::ParameterCombinationId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(db)
            .await?;
        Ok(rows > 0)
    }

    pub async fn list_combinations(
        db: &DatabaseConnection,
        session_id: &str,
        data_date: &str,
    ) -> Result<Vec<String>, sea_orm::DbErr> {
        let rows = ScreenSession::find()
            .filter(screen_session::Column::SessionId.eq(session_id.to_string()))
            .filter(screen_session::Column::DataDate.eq(data_date.to_string()))
            .order_by_asc(screen_session::Column::Id)
            .all(db)
            .await?;
        Ok(rows.into_iter().map(|m| m.parameter_combination_id).collect())
    }

    pub async fn count(db: &DatabaseConnection) -> Result<u64, sea_orm::DbErr> {
        ScreenSession::find().count(db).await
    }
}
