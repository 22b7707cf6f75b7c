//! In-process stores backed by [`DashMap`]. Used by the test-suite and when
//! the service runs without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::order::Order;

use super::{
    normalize_phone, CatalogStore, OrderPage, OrderQuery, OrderRepository, Product, User,
    UserDirectory,
};

#[derive(Debug, Default)]
pub struct InMemoryOrderRepository {
    orders: DashMap<Uuid, Order>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, order: &Order) -> Result<Order, ServiceError> {
        if self.orders.contains_key(&order.id) {
            return Err(ServiceError::ValidationError(format!(
                "Order {} already exists",
                order.id
            )));
        }
        self.orders.insert(order.id, order.clone());
        Ok(order.clone())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Order>, ServiceError> {
        Ok(self.orders.get(&id).map(|entry| entry.clone()))
    }

    async fn save(&self, order: &Order) -> Result<Order, ServiceError> {
        let mut stored = self
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order.id)))?;
        if stored.revision != order.revision {
            return Err(ServiceError::ConcurrentModification(order.id));
        }
        let mut next = order.clone();
        next.revision += 1;
        *stored = next.clone();
        Ok(next)
    }

    async fn list(&self, query: &OrderQuery) -> Result<OrderPage, ServiceError> {
        let mut matching: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| query.owner_id.map_or(true, |owner| entry.owner_id == Some(owner)))
            .filter(|entry| query.status.map_or(true, |status| entry.status == status))
            .map(|entry| entry.clone())
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let limit = query.limit.max(1) as usize;
        let skip = query.page.saturating_sub(1) as usize * limit;
        let orders = matching.into_iter().skip(skip).take(limit).collect();
        Ok(OrderPage { orders, total })
    }

    async fn all(&self) -> Result<Vec<Order>, ServiceError> {
        Ok(self.orders.iter().map(|entry| entry.clone()).collect())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: DashMap<Uuid, Product>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let catalog = Self::default();
        for product in products {
            catalog.products.insert(product.id, product);
        }
        catalog
    }

    pub fn stock_of(&self, id: Uuid) -> Option<i64> {
        self.products.get(&id).map(|product| product.stock)
    }

    pub fn set_cancellable(&self, id: Uuid, cancellable: bool) {
        if let Some(mut product) = self.products.get_mut(&id) {
            product.is_cancellable = cancellable;
        }
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, ServiceError> {
        Ok(self.products.get(&id).map(|entry| entry.clone()))
    }

    async fn get_products(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Product>, ServiceError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.products.get(id).map(|entry| (*id, entry.clone())))
            .collect())
    }

    async fn reserve_stock(&self, id: Uuid, quantity: u32) -> Result<bool, ServiceError> {
        // get_mut holds the shard lock, so check-and-decrement is atomic.
        let Some(mut product) = self.products.get_mut(&id) else {
            return Ok(false);
        };
        let quantity = i64::from(quantity);
        if product.stock < quantity {
            return Ok(false);
        }
        product.stock -= quantity;
        Ok(true)
    }

    async fn restore_stock(&self, id: Uuid, quantity: u32) -> Result<(), ServiceError> {
        let mut product = self
            .products
            .get_mut(&id)
            .ok_or_else(|| ServiceError::NotFound(format!("Product {id} not found")))?;
        product.stock += i64::from(quantity);
        Ok(())
    }

    async fn upsert_product(&self, product: &Product) -> Result<(), ServiceError> {
        self.products.insert(product.id, product.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: DashMap<Uuid, User>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let directory = Self::default();
        for user in users {
            directory.users.insert(user.id, user);
        }
        directory
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>, ServiceError> {
        let Some(key) = normalize_phone(phone) else {
            return Ok(None);
        };
        Ok(self
            .users
            .iter()
            .find(|entry| entry.phone.as_deref().and_then(normalize_phone) == Some(key.clone()))
            .map(|entry| entry.clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, ServiceError> {
        Ok(self.users.get(&id).map(|entry| entry.clone()))
    }

    async fn upsert_user(&self, user: &User) -> Result<(), ServiceError> {
        self.users.insert(user.id, user.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::{NewOrderItem, PaymentMethod, Pricing};
    use assert_matches::assert_matches;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn order() -> Order {
        Order::place(
            vec![NewOrderItem {
                product_id: Uuid::new_v4(),
                name: "Kettle".into(),
                quantity: 1,
                unit_price: dec!(20),
                image: None,
            }],
            None,
            None,
            PaymentMethod::CashOnDelivery,
            Pricing {
                items_subtotal: dec!(20),
                tax: dec!(0),
                shipping: dec!(0),
                grand_total: dec!(20),
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn stale_save_is_rejected() {
        let repo = InMemoryOrderRepository::new();
        let placed = repo.insert(&order()).await.unwrap();

        let first = repo.save(&placed).await.unwrap();
        assert_eq!(first.revision, placed.revision + 1);

        let err = repo.save(&placed).await.unwrap_err();
        assert_matches!(err, ServiceError::ConcurrentModification(id) if id == placed.id);
    }

    #[tokio::test]
    async fn reservation_never_drives_stock_negative() {
        let id = Uuid::new_v4();
        let catalog = InMemoryCatalog::with_products([Product {
            id,
            name: "Lamp".into(),
            price: dec!(10),
            stock: 2,
            is_cancellable: true,
            image_url: None,
        }]);
        assert!(catalog.reserve_stock(id, 2).await.unwrap());
        assert!(!catalog.reserve_stock(id, 1).await.unwrap());
        assert_eq!(catalog.stock_of(id), Some(0));
    }
}
