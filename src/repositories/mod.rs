//! Storage seams used by the order workflow.
//!
//! Each store is a trait so the workflow can run against sea-orm in
//! production and against the DashMap-backed stores in [`memory`] in tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::order::{Order, OrderStatus};

pub mod catalog;
pub mod memory;
pub mod order_repository;
pub mod users;

pub use catalog::SeaOrmCatalogStore;
pub use order_repository::SeaOrmOrderRepository;
pub use users::SeaOrmUserDirectory;

/// Repository trait for common database operations
pub trait Repository {
    fn get_db(&self) -> &DatabaseConnection;
}

#[derive(Debug, Clone)]
pub struct BaseRepository {
    db: Arc<DatabaseConnection>,
}

impl BaseRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl Repository for BaseRepository {
    fn get_db(&self) -> &DatabaseConnection {
        &self.db
    }
}

/// Catalog view of a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub stock: i64,
    pub is_cancellable: bool,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Reduces a phone number to a comparable key: its last ten digits, so
/// country codes and punctuation do not defeat the match.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    let start = digits.len().saturating_sub(10);
    Some(digits[start..].to_string())
}

#[derive(Debug, Clone, Default)]
pub struct OrderQuery {
    /// Restrict to one owner; `None` lists every order
    pub owner_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    /// 1-based
    pub page: u64,
    pub limit: u64,
}

#[derive(Debug, Clone)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub total: u64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert(&self, order: &Order) -> Result<Order, ServiceError>;

    async fn find(&self, id: Uuid) -> Result<Option<Order>, ServiceError>;

    /// Persists `order` if the stored revision still equals `order.revision`,
    /// returning the order with its bumped revision. A lost race yields
    /// [`ServiceError::ConcurrentModification`].
    async fn save(&self, order: &Order) -> Result<Order, ServiceError>;

    /// Newest first.
    async fn list(&self, query: &OrderQuery) -> Result<OrderPage, ServiceError>;

    async fn all(&self) -> Result<Vec<Order>, ServiceError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, ServiceError>;

    async fn get_products(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Product>, ServiceError>;

    /// Guarded decrement: takes `quantity` units only if at least that many
    /// are on hand. Returns whether the guard held.
    async fn reserve_stock(&self, id: Uuid, quantity: u32) -> Result<bool, ServiceError>;

    async fn restore_stock(&self, id: Uuid, quantity: u32) -> Result<(), ServiceError>;

    async fn upsert_product(&self, product: &Product) -> Result<(), ServiceError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, ServiceError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, ServiceError>;

    async fn upsert_user(&self, user: &User) -> Result<(), ServiceError>;
}
