use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;
use sea_orm::{DatabaseConnection, IntoActiveModel, QueryOrder};

/// A measurement project: the root of the ownership hierarchy. Deleting a
/// project cascades to its sessions, points and waveform samples.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "projects")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::sweep_session::Entity")]
    Sessions,
}

impl Related<super::sweep_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sessions.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn create(
        db: &DatabaseConnection,
        name: &str,
        description: Option<&str>,
    ) -> Result<Self, DbErr> {
        let now = Utc::now();
        ActiveModel {
            name: Set(name.to_string()),
            description: Set(description.map(|d| d.to_string())),
            created_at: Set(now),
            modified_at: Set(now),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn get_by_id(db: &DatabaseConnection, id: i64) -> Result<Option<Self>, DbErr> {
        Entity::find_by_id(id).one(db).await
    }

    pub async fn find_by_name(db: &DatabaseConnection, name: &str) -> Result<Option<Self>, DbErr> {
        Entity::find().filter(Column::Name.eq(name)).one(db).await
    }

    /// All projects, newest first.
    pub async fn list_all(db: &DatabaseConnection) -> Result<Vec<Self>, DbErr> {
        Entity::find()
            .order_by_desc(Column::CreatedAt)
            .all(db)
            .await
    }

    /// Updates name/description and touches `modified_at`.
    pub async fn update_details(
        self,
        db: &DatabaseConnection,
        name: &str,
        description: Option<&str>,
    ) -> Result<Self, DbErr> {
        let mut active = self.into_active_model();
        active.name = Set(name.to_string());
        active.description = Set(description.map(|d| d.to_string()));
        active.modified_at = Set(Utc::now());
        active.update(db).await
    }

    /// Cascades to sessions, points and waveform samples via foreign keys.
    pub async fn delete_by_id(db: &DatabaseConnection, id: i64) -> Result<(), DbErr> {
        Entity::delete_by_id(id).exec(db).await?;
        Ok(())
    }
}
