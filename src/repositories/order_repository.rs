use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::entities::order::{ActiveModel as OrderActiveModel, Column, Entity, Model as OrderModel};
use crate::errors::ServiceError;
use crate::models::order::Order;

use super::{BaseRepository, OrderPage, OrderQuery, OrderRepository, Repository};

/// Orders stored as JSON documents with a revision column for
/// compare-and-swap saves.
#[derive(Debug, Clone)]
pub struct SeaOrmOrderRepository {
    base: BaseRepository,
}

impl SeaOrmOrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    fn to_domain(model: OrderModel) -> Result<Order, ServiceError> {
        let mut order: Order = serde_json::from_value(model.document)?;
        order.revision = model.revision;
        Ok(order)
    }
}

#[async_trait]
impl OrderRepository for SeaOrmOrderRepository {
    async fn insert(&self, order: &Order) -> Result<Order, ServiceError> {
        let model = OrderActiveModel {
            id: Set(order.id),
            owner_id: Set(order.owner_id),
            status: Set(order.status.to_string()),
            grand_total: Set(order.pricing.grand_total),
            is_paid: Set(order.is_paid),
            revision: Set(order.revision),
            document: Set(serde_json::to_value(order)?),
            created_at: Set(order.created_at),
            updated_at: Set(order.updated_at),
        };
        Entity::insert(model)
            .exec_without_returning(self.base.get_db())
            .await?;
        debug!(order_id = %order.id, "order inserted");
        Ok(order.clone())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Order>, ServiceError> {
        Entity::find_by_id(id)
            .one(self.base.get_db())
            .await?
            .map(Self::to_domain)
            .transpose()
    }

    async fn save(&self, order: &Order) -> Result<Order, ServiceError> {
        let mut next = order.clone();
        next.revision = order.revision + 1;
        let document = serde_json::to_value(&next)?;

        let result = Entity::update_many()
            .col_expr(Column::OwnerId, Expr::value(next.owner_id))
            .col_expr(Column::Status, Expr::value(next.status.to_string()))
            .col_expr(Column::GrandTotal, Expr::value(next.pricing.grand_total))
            .col_expr(Column::IsPaid, Expr::value(next.is_paid))
            .col_expr(Column::Revision, Expr::value(next.revision))
            .col_expr(Column::Document, Expr::value(document))
            .col_expr(Column::UpdatedAt, Expr::value(next.updated_at))
            .filter(Column::Id.eq(order.id))
            .filter(Column::Revision.eq(order.revision))
            .exec(self.base.get_db())
            .await?;

        if result.rows_affected == 0 {
            warn!(order_id = %order.id, revision = order.revision, "stale order save rejected");
            return Err(ServiceError::ConcurrentModification(order.id));
        }
        Ok(next)
    }

    async fn list(&self, query: &OrderQuery) -> Result<OrderPage, ServiceError> {
        let mut select = Entity::find();
        if let Some(owner_id) = query.owner_id {
            select = select.filter(Column::OwnerId.eq(owner_id));
        }
        if let Some(status) = query.status {
            select = select.filter(Column::Status.eq(status.to_string()));
        }

        let paginator = select
            .order_by_desc(Column::CreatedAt)
            .paginate(self.base.get_db(), query.limit.max(1));
        let total = paginator.num_items().await?;
        let models = paginator.fetch_page(query.page.saturating_sub(1)).await?;

        let orders = models
            .into_iter()
            .map(Self::to_domain)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(OrderPage { orders, total })
    }

    async fn all(&self) -> Result<Vec<Order>, ServiceError> {
        Entity::find()
            .order_by_desc(Column::CreatedAt)
            .all(self.base.get_db())
            .await?
            .into_iter()
            .map(Self::to_domain)
            .collect()
    }
}
