use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::Actor;
use crate::config::AdminRestockPolicy;
use crate::errors::{OrderError, ServiceError};
use crate::events::RefreshTopic;
use crate::models::order::{
    to_minor_units, validate_lines, NewOrderItem, Order, OrderStatus, PaymentMethod, PaymentProofInput, Pricing,
    ShippingAddress,
};
use crate::models::view::OrderView;
use crate::notifications::NotificationSink;
use crate::payments::{
    recover_address, GatewayPayment, PaymentGateway, PaymentIntent, SignatureVerifier,
};
use crate::repositories::{CatalogStore, OrderPage, OrderQuery, OrderRepository, UserDirectory};

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;

/// Checkout submission.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub items: Vec<NewOrderItem>,
    #[serde(default)]
    pub shipping_address: Option<ShippingAddress>,
    pub payment_method: PaymentMethod,
    pub pricing: Pricing,
    /// Present when the client already collected a gateway payment
    #[serde(default)]
    pub payment_proof: Option<PaymentProofInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreatePaymentIntentRequest {
    /// Major currency units
    pub amount: Decimal,
    #[validate(length(max = 40))]
    #[serde(default)]
    pub receipt: Option<String>,
}

/// Held while one order is being mutated. Dropping it releases the order
/// and prunes the lock entry once nobody else holds or waits on it.
pub(super) struct OrderLock<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    locks: &'a DashMap<Uuid, Arc<Mutex<()>>>,
    order_id: Uuid,
}

impl Drop for OrderLock<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // The map's own reference is the only one left when the entry is idle.
        self.locks
            .remove_if(&self.order_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Everything the workflow talks to.
pub struct WorkflowDeps {
    pub orders: Arc<dyn OrderRepository>,
    pub catalog: Arc<dyn CatalogStore>,
    pub users: Arc<dyn UserDirectory>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub verifier: SignatureVerifier,
    pub notifier: Arc<dyn NotificationSink>,
    pub restock_policy: AdminRestockPolicy,
}

/// The order lifecycle: checkout, payment confirmation, administrative
/// status changes and customer cancellations.
///
/// Every mutation of an existing order runs under a per-order lock and is
/// saved with a revision check, so concurrent requests cannot lose updates.
pub struct OrderWorkflow {
    pub(super) orders: Arc<dyn OrderRepository>,
    pub(super) catalog: Arc<dyn CatalogStore>,
    pub(super) users: Arc<dyn UserDirectory>,
    pub(super) gateway: Arc<dyn PaymentGateway>,
    pub(super) verifier: SignatureVerifier,
    pub(super) notifier: Arc<dyn NotificationSink>,
    pub(super) restock_policy: AdminRestockPolicy,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl OrderWorkflow {
    pub fn new(deps: WorkflowDeps) -> Self {
        Self {
            orders: deps.orders,
            catalog: deps.catalog,
            users: deps.users,
            gateway: deps.gateway,
            verifier: deps.verifier,
            notifier: deps.notifier,
            restock_policy: deps.restock_policy,
            locks: DashMap::new(),
        }
    }

    /// Serializes load/mutate/save on one order within this process.
    pub(super) async fn lock_order(&self, order_id: Uuid) -> OrderLock<'_> {
        let lock = self
            .locks
            .entry(order_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        OrderLock {
            guard: Some(lock.lock_owned().await),
            locks: &self.locks,
            order_id,
        }
    }

    pub(super) async fn load(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        self.orders
            .find(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))
    }

    pub(super) fn authorize(actor: Actor, order: &Order) -> Result<(), ServiceError> {
        match actor {
            Actor::Guest => Err(ServiceError::Unauthorized(
                "Authentication required".to_string(),
            )),
            _ if actor.can_access(order.owner_id) => Ok(()),
            _ => Err(ServiceError::Forbidden(
                "Not authorized to access this order".to_string(),
            )),
        }
    }

    /// Customer-initiated changes: only the owner, admins included.
    pub(super) fn authorize_owner(actor: Actor, order: &Order) -> Result<(), ServiceError> {
        match actor.user_id() {
            None => Err(ServiceError::Unauthorized(
                "Authentication required".to_string(),
            )),
            Some(id) if order.owner_id == Some(id) => Ok(()),
            Some(_) => Err(ServiceError::Forbidden(
                "Only the order owner can cancel it".to_string(),
            )),
        }
    }

    /// Fire-and-forget refresh signal.
    pub(super) fn publish(&self, topics: &[RefreshTopic]) {
        if let Err(e) = self.notifier.publish(topics) {
            metrics::counter!("notifications_failed_total", 1, "kind" => "refresh");
            warn!(error = %e, "failed to publish refresh signal");
        }
    }

    /// Best-effort owner lookup by phone. Directory failures are logged, not
    /// surfaced.
    async fn resolve_owner_by_phone(&self, phone: &str) -> Option<Uuid> {
        match self.users.find_by_phone(phone).await {
            Ok(user) => user.map(|u| u.id),
            Err(e) => {
                warn!(error = %e, "owner lookup by phone failed");
                None
            }
        }
    }

    async fn fetch_gateway_payment(&self, payment_id: &str) -> Option<GatewayPayment> {
        match self.gateway.fetch_payment(payment_id).await {
            Ok(payment) => Some(payment),
            Err(e) => {
                warn!(payment_id, error = %e, "could not fetch payment from gateway");
                None
            }
        }
    }

    /// Tries every address source on the gateway's payment, then its order.
    async fn recover_shipping_address(
        &self,
        proof: &PaymentProofInput,
        payment: Option<&GatewayPayment>,
    ) -> Option<ShippingAddress> {
        if let Some((source, address)) = recover_address(payment, None) {
            info!(?source, "shipping address recovered from gateway payment");
            return Some(address);
        }
        let gateway_order_id = payment
            .and_then(|p| p.order_id.clone())
            .unwrap_or_else(|| proof.gateway_order_id.clone());
        let gateway_order = match self.gateway.fetch_order(&gateway_order_id).await {
            Ok(order) => Some(order),
            Err(e) => {
                warn!(%gateway_order_id, error = %e, "could not fetch order from gateway");
                None
            }
        };
        recover_address(payment, gateway_order.as_ref()).map(|(source, address)| {
            info!(?source, "shipping address recovered from gateway order");
            address
        })
    }

    /// Fills in a missing address and owner from the gateway, as far as it
    /// can. A missing address after all sources fail is an error.
    async fn complete_from_gateway(
        &self,
        proof: &PaymentProofInput,
        address: &mut Option<ShippingAddress>,
        owner_id: &mut Option<Uuid>,
    ) -> Result<(), ServiceError> {
        if address.is_some() && owner_id.is_some() {
            return Ok(());
        }
        let payment = self.fetch_gateway_payment(&proof.gateway_payment_id).await;

        if address.is_none() {
            *address = self
                .recover_shipping_address(proof, payment.as_ref())
                .await;
            if address.is_none() {
                return Err(OrderError::MissingShippingAddress.into());
            }
        }

        if owner_id.is_none() {
            let phones = [
                address.as_ref().map(|a| a.phone.clone()),
                payment.as_ref().and_then(|p| p.contact.clone()),
            ];
            for phone in phones.into_iter().flatten() {
                if let Some(found) = self.resolve_owner_by_phone(&phone).await {
                    *owner_id = Some(found);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Checks every line against the live catalog. Lines for the same
    /// product are summed before comparing with stock.
    async fn check_stock(&self, items: &[NewOrderItem]) -> Result<(), ServiceError> {
        let mut demand: HashMap<Uuid, u32> = HashMap::new();
        for item in items {
            let entry = demand.entry(item.product_id).or_insert(0);
            *entry = entry.saturating_add(item.quantity);
        }
        let ids: Vec<Uuid> = demand.keys().copied().collect();
        let products = self.catalog.get_products(&ids).await?;

        for item in items {
            let product = products
                .get(&item.product_id)
                .ok_or(OrderError::ProductNotFound(item.product_id))?;
            let requested = demand[&item.product_id];
            if product.stock < i64::from(requested) {
                return Err(OrderError::InsufficientStock {
                    product_id: product.id,
                    name: product.name.clone(),
                    requested,
                    available: product.stock,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Places an order.
    ///
    /// Validation and the stock check happen before anything is written.
    /// Stock is taken after the order is persisted; a reservation that loses
    /// a race is logged and counted, never rolled back into a failure.
    #[instrument(skip(self, request), fields(items = request.items.len(), ?actor))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
        actor: Actor,
    ) -> Result<Order, ServiceError> {
        validate_lines(&request.items)?;
        request.pricing.validate()?;

        self.check_stock(&request.items).await?;

        let mut address = request.shipping_address.filter(ShippingAddress::is_complete);
        let mut owner_id = actor.user_id();
        if owner_id.is_none() {
            if let Some(address) = &address {
                owner_id = self.resolve_owner_by_phone(&address.phone).await;
            }
        }

        let proof = match (request.payment_method, request.payment_proof) {
            (PaymentMethod::Gateway, Some(proof)) => {
                if !self.verifier.verify(
                    &proof.gateway_order_id,
                    &proof.gateway_payment_id,
                    &proof.signature,
                ) {
                    warn!(gateway_order_id = %proof.gateway_order_id, "payment signature mismatch");
                    return Err(OrderError::InvalidPaymentSignature.into());
                }
                self.complete_from_gateway(&proof, &mut address, &mut owner_id)
                    .await?;
                Some(proof)
            }
            _ => {
                if address.is_none() {
                    return Err(OrderError::MissingShippingAddress.into());
                }
                None
            }
        };

        let now = Utc::now();
        let mut order = Order::place(
            request.items,
            owner_id,
            address,
            request.payment_method,
            request.pricing,
            now,
        )?;
        if let Some(proof) = proof {
            order.confirm_payment(proof, now);
        }

        let order = self.orders.insert(&order).await?;
        metrics::counter!("orders_created_total", 1, "status" => order.status.to_string());
        info!(order_id = %order.id, status = %order.status, "order placed");

        for item in &order.items {
            match self.catalog.reserve_stock(item.product_id, item.quantity).await {
                Ok(true) => {}
                Ok(false) => {
                    metrics::counter!("stock_shortfall_total", 1);
                    warn!(
                        order_id = %order.id,
                        product_id = %item.product_id,
                        quantity = item.quantity,
                        "stock ran out between check and reservation"
                    );
                }
                Err(e) => {
                    error!(order_id = %order.id, product_id = %item.product_id, error = %e, "stock reservation failed");
                }
            }
        }

        self.send_confirmation(&order).await;
        self.publish(&[RefreshTopic::Orders, RefreshTopic::Products]);

        Ok(order)
    }

    async fn send_confirmation(&self, order: &Order) {
        let Some(owner_id) = order.owner_id else {
            return;
        };
        let user = match self.users.find_by_id(owner_id).await {
            Ok(Some(user)) if user.email.is_some() => user,
            Ok(_) => return,
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "could not load order owner for confirmation");
                return;
            }
        };
        if let Err(e) = self.notifier.send_order_confirmation(order, &user) {
            metrics::counter!("notifications_failed_total", 1, "kind" => "email");
            warn!(order_id = %order.id, error = %e, "order confirmation not queued");
        }
    }

    /// Confirms a gateway payment for an order placed without proof.
    #[instrument(skip(self, proof), fields(order_id = %order_id, ?actor))]
    pub async fn confirm_payment(
        &self,
        order_id: Uuid,
        proof: PaymentProofInput,
        actor: Actor,
    ) -> Result<Order, ServiceError> {
        let _guard = self.lock_order(order_id).await;
        let mut order = self.load(order_id).await?;

        // Ownerless guest orders are confirmed on the strength of the signature.
        if order.owner_id.is_some() {
            Self::authorize(actor, &order)?;
        }
        if order.payment_method != PaymentMethod::Gateway {
            return Err(OrderError::PaymentMethodMismatch.into());
        }
        if order.is_paid {
            return Err(OrderError::PaymentAlreadyConfirmed.into());
        }
        if order.status != OrderStatus::Pending {
            return Err(OrderError::InvalidStage(order.status).into());
        }
        if !self.verifier.verify(
            &proof.gateway_order_id,
            &proof.gateway_payment_id,
            &proof.signature,
        ) {
            warn!("payment signature mismatch");
            return Err(OrderError::InvalidPaymentSignature.into());
        }

        let mut address = order.shipping_address.take();
        let mut owner_id = order.owner_id;
        self.complete_from_gateway(&proof, &mut address, &mut owner_id)
            .await?;
        order.shipping_address = address;
        order.owner_id = owner_id;

        order.confirm_payment(proof, Utc::now());
        let order = self.orders.save(&order).await?;

        metrics::counter!("payments_confirmed_total", 1);
        info!(order_id = %order.id, "payment confirmed");
        self.publish(&[RefreshTopic::Orders, RefreshTopic::Order(order.id)]);
        Ok(order)
    }

    /// Opens a gateway order the client pays against.
    #[instrument(skip(self, request))]
    pub async fn create_payment_intent(
        &self,
        request: CreatePaymentIntentRequest,
    ) -> Result<PaymentIntent, ServiceError> {
        request.validate()?;
        if request.amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "amount must be greater than zero".to_string(),
            ));
        }
        let receipt = request.receipt.unwrap_or_else(|| {
            let id = Uuid::new_v4().simple().to_string();
            format!("rcpt_{}", &id[..16])
        });
        let amount = to_minor_units(request.amount)?;
        self.gateway
            .create_intent(amount, &receipt)
            .await
            .map_err(|e| ServiceError::ExternalServiceError(e.to_string()))
    }

    /// Order plus live cancellability.
    #[instrument(skip(self), fields(order_id = %order_id, ?actor))]
    pub async fn get_order(&self, order_id: Uuid, actor: Actor) -> Result<OrderView, ServiceError> {
        let order = self.load(order_id).await?;
        Self::authorize(actor, &order)?;
        let ids: Vec<Uuid> = order.items.iter().map(|item| item.product_id).collect();
        let products = self.catalog.get_products(&ids).await?;
        Ok(OrderView::build(order, &products))
    }

    /// Admins see every order, customers their own. Newest first.
    #[instrument(skip(self), fields(?actor))]
    pub async fn list_orders(
        &self,
        actor: Actor,
        page: u64,
        limit: u64,
        status: Option<OrderStatus>,
    ) -> Result<OrderPage, ServiceError> {
        let owner_id = match actor {
            Actor::Guest => {
                return Err(ServiceError::Unauthorized(
                    "Authentication required".to_string(),
                ))
            }
            Actor::Customer(id) => Some(id),
            Actor::Admin(_) => None,
        };
        let query = OrderQuery {
            owner_id,
            status,
            page: page.max(1),
            limit: limit.clamp(1, MAX_PAGE_SIZE),
        };
        self.orders.list(&query).await
    }
}
