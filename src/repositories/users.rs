use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::user::{ActiveModel, Column, Entity, Model};
use crate::errors::ServiceError;

use super::{normalize_phone, BaseRepository, Repository, User, UserDirectory};

#[derive(Debug, Clone)]
pub struct SeaOrmUserDirectory {
    base: BaseRepository,
}

impl SeaOrmUserDirectory {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }
}

impl From<Model> for User {
    fn from(model: Model) -> Self {
        User {
            id: model.id,
            name: model.name,
            email: model.email,
            phone: model.phone,
        }
    }
}

#[async_trait]
impl UserDirectory for SeaOrmUserDirectory {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, ServiceError> {
        let Some(key) = normalize_phone(phone) else {
            return Ok(None);
        };
        // Oldest account wins when several share a number.
        Ok(Entity::find()
            .filter(Column::PhoneKey.eq(key))
            .order_by_asc(Column::CreatedAt)
            .one(self.base.get_db())
            .await?
            .map(User::from))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, ServiceError> {
        Ok(Entity::find_by_id(id)
            .one(self.base.get_db())
            .await?
            .map(User::from))
    }

    async fn upsert_user(&self, user: &User) -> Result<(), ServiceError> {
        let model = ActiveModel {
            id: Set(user.id),
            name: Set(user.name.clone()),
            email: Set(user.email.clone()),
            phone: Set(user.phone.clone()),
            phone_key: Set(user.phone.as_deref().and_then(normalize_phone)),
            created_at: Set(Utc::now()),
        };
        Entity::insert(model)
            .on_conflict(
                OnConflict::column(Column::Id)
                    .update_columns([Column::Name, Column::Email, Column::Phone, Column::PhoneKey])
                    .to_owned(),
            )
            .exec_without_returning(self.base.get_db())
            .await?;
        Ok(())
    }
}
