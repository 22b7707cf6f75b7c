use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row per order. The aggregate itself lives in `document`; the other
/// columns are projections kept for filtering and sorting.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub owner_id: Option<Uuid>,

    pub status: String,
    pub grand_total: Decimal,
    pub is_paid: bool,

    /// Compare-and-swap token, bumped on every save
    pub revision: i64,

    #[sea_orm(column_type = "Json")]
    pub document: Json,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
