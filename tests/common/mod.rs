#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use rust_decimal::Decimal;
use serde_json::Value;
use storefront_api::{
    auth::{Actor, AuthConfig, AuthService, Role},
    build_router,
    config::{AdminRestockPolicy, AppConfig},
    events::{RefreshSignal, RefreshTopic},
    models::{NewOrderItem, Order, PaymentMethod, PaymentProofInput, Pricing, ShippingAddress},
    notifications::{NotificationError, NotificationSink},
    payments::{
        GatewayError, GatewayOrder, GatewayPayment, PaymentGateway, PaymentIntent, Refund,
        SignatureVerifier,
    },
    repositories::{
        memory::{InMemoryCatalog, InMemoryOrderRepository, InMemoryUserDirectory},
        Product, User,
    },
    services::{CreateOrderRequest, OrderWorkflow, WorkflowDeps},
    AppState,
};
use tokio::sync::broadcast;
use tower::ServiceExt;
use uuid::Uuid;

pub const GATEWAY_SECRET: &str = "test_gateway_key_secret";
pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// A refund the gateway was asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct RefundCall {
    pub payment_id: String,
    pub amount: i64,
    pub notes: HashMap<String, String>,
}

/// Scriptable gateway that records every refund request.
#[derive(Default)]
pub struct RecordingGateway {
    pub refunds: Mutex<Vec<RefundCall>>,
    pub fail_refunds: AtomicBool,
    pub payment: Mutex<Option<GatewayPayment>>,
    pub order: Mutex<Option<GatewayOrder>>,
}

impl RecordingGateway {
    pub fn fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::SeqCst);
    }

    pub fn set_payment(&self, payment: GatewayPayment) {
        *self.payment.lock().unwrap() = Some(payment);
    }

    pub fn set_order(&self, order: GatewayOrder) {
        *self.order.lock().unwrap() = Some(order);
    }

    pub fn refund_calls(&self) -> Vec<RefundCall> {
        self.refunds.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn create_intent(&self, amount: i64, receipt: &str) -> Result<PaymentIntent, GatewayError> {
        Ok(PaymentIntent {
            id: format!("order_{}", Uuid::new_v4().simple()),
            amount,
            currency: "INR".to_string(),
            receipt: Some(receipt.to_string()),
            status: Some("created".to_string()),
        })
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, GatewayError> {
        self.payment
            .lock()
            .unwrap()
            .clone()
            .filter(|payment| payment.id == payment_id)
            .ok_or(GatewayError::Api {
                status: 404,
                description: "The id provided does not exist".to_string(),
            })
    }

    async fn fetch_order(&self, gateway_order_id: &str) -> Result<GatewayOrder, GatewayError> {
        self.order
            .lock()
            .unwrap()
            .clone()
            .filter(|order| order.id == gateway_order_id)
            .ok_or(GatewayError::Api {
                status: 404,
                description: "The id provided does not exist".to_string(),
            })
    }

    async fn refund(
        &self,
        payment_id: &str,
        amount: i64,
        notes: &HashMap<String, String>,
    ) -> Result<Refund, GatewayError> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(GatewayError::Api {
                status: 400,
                description: "The amount is greater than the refundable amount".to_string(),
            });
        }
        self.refunds.lock().unwrap().push(RefundCall {
            payment_id: payment_id.to_string(),
            amount,
            notes: notes.clone(),
        });
        Ok(Refund {
            id: format!("rfnd_{}", Uuid::new_v4().simple()),
            payment_id: Some(payment_id.to_string()),
            amount,
            status: Some("processed".to_string()),
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub confirmations: Mutex<Vec<(Uuid, Uuid)>>,
    pub topics: Mutex<Vec<RefreshTopic>>,
}

impl RecordingNotifier {
    pub fn confirmation_count(&self) -> usize {
        self.confirmations.lock().unwrap().len()
    }

    pub fn published(&self) -> Vec<RefreshTopic> {
        self.topics.lock().unwrap().clone()
    }
}

impl NotificationSink for RecordingNotifier {
    fn send_order_confirmation(&self, order: &Order, user: &User) -> Result<(), NotificationError> {
        self.confirmations.lock().unwrap().push((order.id, user.id));
        Ok(())
    }

    fn publish(&self, topics: &[RefreshTopic]) -> Result<(), NotificationError> {
        self.topics.lock().unwrap().extend_from_slice(topics);
        Ok(())
    }
}

pub fn product(name: &str, price: Decimal, stock: i64) -> Product {
    Product {
        id: Uuid::new_v4(),
        name: name.to_string(),
        price,
        stock,
        is_cancellable: true,
        image_url: None,
    }
}

pub fn user(name: &str, phone: &str) -> User {
    User {
        id: Uuid::new_v4(),
        name: name.to_string(),
        email: Some(format!("{}@example.com", name.to_lowercase())),
        phone: Some(phone.to_string()),
    }
}

pub fn address(phone: &str) -> ShippingAddress {
    ShippingAddress {
        full_name: "Asha Rao".to_string(),
        street: "12 MG Road".to_string(),
        city: "Pune".to_string(),
        state: "MH".to_string(),
        postal_code: "411001".to_string(),
        country: "India".to_string(),
        phone: phone.to_string(),
    }
}

pub fn line(product: &Product, quantity: u32) -> NewOrderItem {
    NewOrderItem {
        product_id: product.id,
        name: product.name.clone(),
        quantity,
        unit_price: product.price,
        image: product.image_url.clone(),
    }
}

/// Pricing whose subtotal matches the lines, with no tax or shipping.
pub fn pricing_for(items: &[NewOrderItem]) -> Pricing {
    let subtotal: Decimal = items
        .iter()
        .map(|item| item.unit_price * Decimal::from(item.quantity))
        .sum();
    Pricing {
        items_subtotal: subtotal,
        tax: Decimal::ZERO,
        shipping: Decimal::ZERO,
        grand_total: subtotal,
    }
}

pub fn cod_request(items: Vec<NewOrderItem>, phone: &str) -> CreateOrderRequest {
    CreateOrderRequest {
        pricing: pricing_for(&items),
        items,
        shipping_address: Some(address(phone)),
        payment_method: PaymentMethod::CashOnDelivery,
        payment_proof: None,
    }
}

pub struct TestAppBuilder {
    products: Vec<Product>,
    users: Vec<User>,
    restock_policy: AdminRestockPolicy,
}

impl TestAppBuilder {
    pub fn product(mut self, product: Product) -> Self {
        self.products.push(product);
        self
    }

    pub fn user(mut self, user: User) -> Self {
        self.users.push(user);
        self
    }

    pub fn restock_policy(mut self, policy: AdminRestockPolicy) -> Self {
        self.restock_policy = policy;
        self
    }

    pub fn build(self) -> TestApp {
        let orders = Arc::new(InMemoryOrderRepository::new());
        let catalog = Arc::new(InMemoryCatalog::with_products(self.products));
        let users = Arc::new(InMemoryUserDirectory::with_users(self.users));
        let gateway = Arc::new(RecordingGateway::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let verifier = SignatureVerifier::new(GATEWAY_SECRET);

        let workflow = Arc::new(OrderWorkflow::new(WorkflowDeps {
            orders: orders.clone(),
            catalog: catalog.clone(),
            users: users.clone(),
            gateway: gateway.clone(),
            verifier: verifier.clone(),
            notifier: notifier.clone(),
            restock_policy: self.restock_policy,
        }));

        let mut config = AppConfig::new(
            "sqlite::memory:".to_string(),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        config.admin_cancel_restock = self.restock_policy;

        let auth = Arc::new(AuthService::new(AuthConfig::new(JWT_SECRET)));
        let (refresh, _) = broadcast::channel(16);
        let state = AppState {
            config: Arc::new(config),
            auth: auth.clone(),
            workflow: workflow.clone(),
            refresh: refresh.clone(),
            db: None,
        };

        TestApp {
            router: build_router(state),
            workflow,
            orders,
            catalog,
            users,
            gateway,
            notifier,
            verifier,
            auth,
            refresh,
        }
    }
}

/// Workflow wired to in-memory stores, plus the HTTP router over it.
pub struct TestApp {
    router: Router,
    pub workflow: Arc<OrderWorkflow>,
    pub orders: Arc<InMemoryOrderRepository>,
    pub catalog: Arc<InMemoryCatalog>,
    pub users: Arc<InMemoryUserDirectory>,
    pub gateway: Arc<RecordingGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub verifier: SignatureVerifier,
    pub auth: Arc<AuthService>,
    pub refresh: broadcast::Sender<RefreshSignal>,
}

impl TestApp {
    pub fn builder() -> TestAppBuilder {
        TestAppBuilder {
            products: Vec::new(),
            users: Vec::new(),
            restock_policy: AdminRestockPolicy::default(),
        }
    }

    /// Proof the gateway would hand the client after a successful payment.
    pub fn signed_proof(&self, gateway_order_id: &str, gateway_payment_id: &str) -> PaymentProofInput {
        PaymentProofInput {
            gateway_order_id: gateway_order_id.to_string(),
            gateway_payment_id: gateway_payment_id.to_string(),
            signature: self
                .verifier
                .sign(gateway_order_id, gateway_payment_id)
                .expect("verifier has a secret"),
        }
    }

    /// Places a gateway order that is already paid, hence `processing`.
    pub async fn place_paid(&self, items: Vec<NewOrderItem>, owner: Uuid) -> Order {
        let reference = Uuid::new_v4().simple().to_string();
        let proof = self.signed_proof(&format!("order_{reference}"), &format!("pay_{reference}"));
        let request = CreateOrderRequest {
            pricing: pricing_for(&items),
            items,
            shipping_address: Some(address("9876543210")),
            payment_method: PaymentMethod::Gateway,
            payment_proof: Some(proof),
        };
        self.workflow
            .create_order(request, Actor::Customer(owner))
            .await
            .expect("paid order placed")
    }

    /// Places an unpaid cash-on-delivery order, hence `pending`.
    pub async fn place_unpaid(&self, items: Vec<NewOrderItem>, owner: Uuid) -> Order {
        self.workflow
            .create_order(cod_request(items, "9876543210"), Actor::Customer(owner))
            .await
            .expect("unpaid order placed")
    }

    pub fn stock_of(&self, product: &Product) -> i64 {
        self.catalog.stock_of(product.id).expect("product exists")
    }

    pub fn token(&self, user_id: Uuid, role: Role) -> String {
        self.auth
            .generate_token(user_id, role)
            .expect("token signs")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request builds");

        let response = self.send(request).await;
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body bytes");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json response")
        };
        (status, json)
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }
}
