use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::entities::product::{ActiveModel, Column, Entity, Model};
use crate::errors::ServiceError;

use super::{BaseRepository, CatalogStore, Product, Repository};

#[derive(Debug, Clone)]
pub struct SeaOrmCatalogStore {
    base: BaseRepository,
}

impl SeaOrmCatalogStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }
}

impl From<Model> for Product {
    fn from(model: Model) -> Self {
        Product {
            id: model.id,
            name: model.name,
            price: model.price,
            stock: i64::from(model.stock),
            is_cancellable: model.is_cancellable,
            image_url: model.image_url,
        }
    }
}

fn quantity_i32(quantity: u32) -> Result<i32, ServiceError> {
    i32::try_from(quantity)
        .map_err(|_| ServiceError::ValidationError(format!("quantity {quantity} out of range")))
}

#[async_trait]
impl CatalogStore for SeaOrmCatalogStore {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, ServiceError> {
        Ok(Entity::find_by_id(id)
            .one(self.base.get_db())
            .await?
            .map(Product::from))
    }

    async fn get_products(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Product>, ServiceError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let models = Entity::find()
            .filter(Column::Id.is_in(ids.iter().copied()))
            .all(self.base.get_db())
            .await?;
        Ok(models
            .into_iter()
            .map(|model| (model.id, Product::from(model)))
            .collect())
    }

    async fn reserve_stock(&self, id: Uuid, quantity: u32) -> Result<bool, ServiceError> {
        let quantity = quantity_i32(quantity)?;
        let result = Entity::update_many()
            .col_expr(Column::Stock, Expr::col(Column::Stock).sub(quantity))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id))
            .filter(Column::Stock.gte(quantity))
            .exec(self.base.get_db())
            .await?;
        debug!(product_id = %id, quantity, reserved = result.rows_affected == 1, "stock reservation");
        Ok(result.rows_affected == 1)
    }

    async fn restore_stock(&self, id: Uuid, quantity: u32) -> Result<(), ServiceError> {
        let quantity = quantity_i32(quantity)?;
        let result = Entity::update_many()
            .col_expr(Column::Stock, Expr::col(Column::Stock).add(quantity))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id))
            .exec(self.base.get_db())
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Product {id} not found")));
        }
        Ok(())
    }

    async fn upsert_product(&self, product: &Product) -> Result<(), ServiceError> {
        let stock = i32::try_from(product.stock)
            .map_err(|_| ServiceError::ValidationError("stock out of range".to_string()))?;
        let model = ActiveModel {
            id: Set(product.id),
            name: Set(product.name.clone()),
            price: Set(product.price),
            stock: Set(stock),
            is_cancellable: Set(product.is_cancellable),
            image_url: Set(product.image_url.clone()),
            updated_at: Set(Utc::now()),
        };
        Entity::insert(model)
            .on_conflict(
                OnConflict::column(Column::Id)
                    .update_columns([
                        Column::Name,
                        Column::Price,
                        Column::Stock,
                        Column::IsCancellable,
                        Column::ImageUrl,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(self.base.get_db())
            .await?;
        Ok(())
    }
}
