//! Checkout: stock checks, payment signature verification, address and
//! owner recovery from the gateway, and deferred payment confirmation.

mod common;

use assert_matches::assert_matches;
use common::{address, cod_request, line, pricing_for, product, user, TestApp};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use storefront_api::{
    auth::Actor,
    errors::{OrderError, ServiceError},
    models::{order::LABEL_PLACED, OrderStatus, PaymentMethod},
    payments::GatewayPayment,
    services::CreateOrderRequest,
};
use uuid::Uuid;

#[tokio::test]
async fn scenario_a_stock_is_taken_and_order_is_pending() {
    let mug = product("Mug", dec!(250.00), 10);
    let tee = product("Tee", dec!(499.00), 5);
    let app = TestApp::builder().product(mug.clone()).product(tee.clone()).build();

    let request = cod_request(vec![line(&mug, 3), line(&tee, 1)], "9876543210");
    let order = app
        .workflow
        .create_order(request, Actor::Guest)
        .await
        .expect("order placed");

    assert_eq!(order.status, OrderStatus::Pending);
    assert!(!order.is_paid);
    assert_eq!(app.stock_of(&mug), 7);
    assert_eq!(app.stock_of(&tee), 4);
    assert_eq!(order.timeline.len(), 1);
    assert_eq!(order.timeline[0].status, LABEL_PLACED);
    assert_eq!(app.orders.len(), 1);
}

#[tokio::test]
async fn scenario_b_tampered_signature_persists_nothing() {
    let mug = product("Mug", dec!(250.00), 10);
    let app = TestApp::builder().product(mug.clone()).build();

    let mut proof = app.signed_proof("order_abc", "pay_abc");
    proof.signature = app
        .verifier
        .sign("order_abc", "pay_other")
        .expect("verifier has a secret");

    let items = vec![line(&mug, 2)];
    let request = CreateOrderRequest {
        pricing: pricing_for(&items),
        items,
        shipping_address: Some(address("9876543210")),
        payment_method: PaymentMethod::Gateway,
        payment_proof: Some(proof),
    };

    let err = app
        .workflow
        .create_order(request, Actor::Guest)
        .await
        .expect_err("signature must be rejected");

    assert_matches!(err.order_error(), Some(OrderError::InvalidPaymentSignature));
    assert!(app.orders.is_empty());
    assert_eq!(app.stock_of(&mug), 10);
}

#[tokio::test]
async fn signed_gateway_checkout_is_paid_and_processing() {
    let mug = product("Mug", dec!(250.00), 10);
    let app = TestApp::builder().product(mug.clone()).build();
    let customer = Uuid::new_v4();

    let items = vec![line(&mug, 1)];
    let request = CreateOrderRequest {
        pricing: pricing_for(&items),
        items,
        shipping_address: Some(address("9876543210")),
        payment_method: PaymentMethod::Gateway,
        payment_proof: Some(app.signed_proof("order_1", "pay_1")),
    };
    let order = app
        .workflow
        .create_order(request, Actor::Customer(customer))
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Processing);
    assert!(order.is_paid);
    assert!(order.paid_at.is_some());
    assert_eq!(order.owner_id, Some(customer));
    assert_eq!(order.gateway_payment_id(), Some("pay_1"));
    assert_eq!(order.timeline.len(), 2);
    assert_eq!(app.stock_of(&mug), 9);
}

#[tokio::test]
async fn address_and_owner_are_recovered_from_the_gateway_payment() {
    let mug = product("Mug", dec!(100.00), 4);
    let buyer = user("Asha", "+91 98765-43210");
    let app = TestApp::builder()
        .product(mug.clone())
        .user(buyer.clone())
        .build();

    app.gateway.set_payment(GatewayPayment {
        id: "pay_9".to_string(),
        order_id: Some("order_9".to_string()),
        status: "captured".to_string(),
        amount: 10_000,
        contact: Some("919876543210".to_string()),
        email: None,
        notes: json!({
            "name": "Asha Rao",
            "address": "12 MG Road",
            "city": "Pune",
            "state": "MH",
            "pincode": "411001"
        }),
    });

    let items = vec![line(&mug, 1)];
    let request = CreateOrderRequest {
        pricing: pricing_for(&items),
        items,
        shipping_address: None,
        payment_method: PaymentMethod::Gateway,
        payment_proof: Some(app.signed_proof("order_9", "pay_9")),
    };
    let order = app
        .workflow
        .create_order(request, Actor::Guest)
        .await
        .unwrap();

    let shipping = order.shipping_address.as_ref().expect("address recovered");
    assert_eq!(shipping.city, "Pune");
    assert_eq!(shipping.country, "India");
    assert_eq!(shipping.phone, "919876543210");
    assert_eq!(order.owner_id, Some(buyer.id));
    assert_eq!(app.notifier.confirmation_count(), 1);
}

#[tokio::test]
async fn gateway_checkout_without_any_address_is_rejected() {
    let mug = product("Mug", dec!(100.00), 4);
    let app = TestApp::builder().product(mug.clone()).build();

    let items = vec![line(&mug, 1)];
    let request = CreateOrderRequest {
        pricing: pricing_for(&items),
        items,
        shipping_address: None,
        payment_method: PaymentMethod::Gateway,
        payment_proof: Some(app.signed_proof("order_x", "pay_x")),
    };
    let err = app
        .workflow
        .create_order(request, Actor::Guest)
        .await
        .unwrap_err();

    assert_matches!(err.order_error(), Some(OrderError::MissingShippingAddress));
    assert!(app.orders.is_empty());
    assert_eq!(app.stock_of(&mug), 4);
}

#[tokio::test]
async fn guest_checkout_is_attached_to_the_account_with_that_phone() {
    let mug = product("Mug", dec!(100.00), 4);
    let buyer = user("Ravi", "09876543210");
    let app = TestApp::builder()
        .product(mug.clone())
        .user(buyer.clone())
        .build();

    let order = app
        .workflow
        .create_order(cod_request(vec![line(&mug, 1)], "+91 98765 43210"), Actor::Guest)
        .await
        .unwrap();

    assert_eq!(order.owner_id, Some(buyer.id));
    assert_eq!(app.notifier.confirmation_count(), 1);
}

#[tokio::test]
async fn insufficient_stock_changes_nothing() {
    let mug = product("Mug", dec!(250.00), 10);
    let tee = product("Tee", dec!(499.00), 1);
    let app = TestApp::builder().product(mug.clone()).product(tee.clone()).build();

    let err = app
        .workflow
        .create_order(
            cod_request(vec![line(&mug, 3), line(&tee, 2)], "9876543210"),
            Actor::Guest,
        )
        .await
        .unwrap_err();

    assert_matches!(
        err.order_error(),
        Some(OrderError::InsufficientStock { requested: 2, available: 1, .. })
    );
    assert!(app.orders.is_empty());
    assert_eq!(app.stock_of(&mug), 10);
    assert_eq!(app.stock_of(&tee), 1);
}

#[tokio::test]
async fn repeated_lines_for_one_product_are_checked_together() {
    let mug = product("Mug", dec!(10.00), 3);
    let app = TestApp::builder().product(mug.clone()).build();

    let err = app
        .workflow
        .create_order(
            cod_request(vec![line(&mug, 2), line(&mug, 2)], "9876543210"),
            Actor::Guest,
        )
        .await
        .unwrap_err();

    assert_matches!(
        err.order_error(),
        Some(OrderError::InsufficientStock { requested: 4, .. })
    );
    assert_eq!(app.stock_of(&mug), 3);
}

#[tokio::test]
async fn malformed_checkouts_are_rejected_before_any_write() {
    let mug = product("Mug", dec!(10.00), 3);
    let app = TestApp::builder().product(mug.clone()).build();

    let empty = cod_request(vec![], "9876543210");
    let err = app.workflow.create_order(empty, Actor::Guest).await.unwrap_err();
    assert_matches!(err.order_error(), Some(OrderError::EmptyOrder));

    let zero = cod_request(vec![line(&mug, 0)], "9876543210");
    let err = app.workflow.create_order(zero, Actor::Guest).await.unwrap_err();
    assert_matches!(err.order_error(), Some(OrderError::InvalidQuantity(id)) if *id == mug.id);

    let ghost = product("Ghost", dec!(1.00), 1);
    let unknown = cod_request(vec![line(&ghost, 1)], "9876543210");
    let err = app.workflow.create_order(unknown, Actor::Guest).await.unwrap_err();
    assert_matches!(err.order_error(), Some(OrderError::ProductNotFound(id)) if *id == ghost.id);

    let mut mispriced = cod_request(vec![line(&mug, 1)], "9876543210");
    mispriced.pricing.grand_total = dec!(99.00);
    let err = app.workflow.create_order(mispriced, Actor::Guest).await.unwrap_err();
    assert_matches!(err.order_error(), Some(OrderError::InvalidPricing(_)));

    let mut no_address = cod_request(vec![line(&mug, 1)], "9876543210");
    no_address.shipping_address = None;
    let err = app.workflow.create_order(no_address, Actor::Guest).await.unwrap_err();
    assert_matches!(err.order_error(), Some(OrderError::MissingShippingAddress));

    assert!(app.orders.is_empty());
    assert_eq!(app.stock_of(&mug), 3);
}

#[tokio::test]
async fn negative_or_oversized_prices_are_rejected() {
    let mug = product("Mug", dec!(10.00), 3);
    let tee = product("Tee", dec!(20.00), 3);
    let app = TestApp::builder().product(mug.clone()).product(tee.clone()).build();

    let mut credit = line(&mug, 1);
    credit.unit_price = dec!(-10.00);
    let offsetting = cod_request(vec![credit, line(&tee, 1)], "9876543210");
    assert_eq!(offsetting.pricing.grand_total, dec!(10.00));
    let err = app.workflow.create_order(offsetting, Actor::Guest).await.unwrap_err();
    assert_matches!(err.order_error(), Some(OrderError::InvalidPricing(_)));

    let mut gold = line(&mug, 1);
    gold.unit_price = Decimal::from_i128_with_scale(10_i128.pow(27), 0);
    let oversized = cod_request(vec![gold], "9876543210");
    let err = app.workflow.create_order(oversized, Actor::Guest).await.unwrap_err();
    assert_matches!(err.order_error(), Some(OrderError::InvalidPricing(_)));

    let mut free = line(&mug, 1);
    free.unit_price = dec!(0);
    let order = app
        .workflow
        .create_order(cod_request(vec![free, line(&tee, 1)], "9876543210"), Actor::Guest)
        .await
        .unwrap();
    assert_eq!(order.pricing.grand_total, dec!(20.00));

    assert_eq!(app.orders.len(), 1);
    assert_eq!(app.stock_of(&tee), 2);
}

#[tokio::test]
async fn payment_can_be_confirmed_after_checkout() {
    let mug = product("Mug", dec!(100.00), 4);
    let app = TestApp::builder().product(mug.clone()).build();
    let customer = Uuid::new_v4();

    let items = vec![line(&mug, 1)];
    let request = CreateOrderRequest {
        pricing: pricing_for(&items),
        items,
        shipping_address: Some(address("9876543210")),
        payment_method: PaymentMethod::Gateway,
        payment_proof: None,
    };
    let order = app
        .workflow
        .create_order(request, Actor::Customer(customer))
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);

    let stranger = app
        .workflow
        .confirm_payment(
            order.id,
            app.signed_proof("order_5", "pay_5"),
            Actor::Customer(Uuid::new_v4()),
        )
        .await
        .unwrap_err();
    assert_matches!(stranger, ServiceError::Forbidden(_));

    let mut forged = app.signed_proof("order_5", "pay_5");
    forged.gateway_payment_id = "pay_6".to_string();
    let err = app
        .workflow
        .confirm_payment(order.id, forged, Actor::Customer(customer))
        .await
        .unwrap_err();
    assert_matches!(err.order_error(), Some(OrderError::InvalidPaymentSignature));

    let paid = app
        .workflow
        .confirm_payment(
            order.id,
            app.signed_proof("order_5", "pay_5"),
            Actor::Customer(customer),
        )
        .await
        .unwrap();
    assert!(paid.is_paid);
    assert_eq!(paid.status, OrderStatus::Processing);
    assert_eq!(paid.timeline.last().unwrap().status, "Processing");

    let again = app
        .workflow
        .confirm_payment(
            order.id,
            app.signed_proof("order_5", "pay_5"),
            Actor::Customer(customer),
        )
        .await
        .unwrap_err();
    assert_matches!(again.order_error(), Some(OrderError::PaymentAlreadyConfirmed));
}

#[tokio::test]
async fn cash_on_delivery_orders_cannot_take_gateway_payment() {
    let mug = product("Mug", dec!(100.00), 4);
    let app = TestApp::builder().product(mug.clone()).build();
    let order = app
        .workflow
        .create_order(cod_request(vec![line(&mug, 1)], "9876543210"), Actor::Guest)
        .await
        .unwrap();

    let err = app
        .workflow
        .confirm_payment(order.id, app.signed_proof("order_1", "pay_1"), Actor::Guest)
        .await
        .unwrap_err();
    assert_matches!(err.order_error(), Some(OrderError::PaymentMethodMismatch));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn stock_drops_by_exactly_the_ordered_quantity(
        stock_a in 1i64..50,
        stock_b in 1i64..50,
        want_a in 1u32..60,
        want_b in 1u32..60,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let a = product("A", dec!(5.00), stock_a);
            let b = product("B", dec!(7.50), stock_b);
            let app = TestApp::builder().product(a.clone()).product(b.clone()).build();

            let result = app
                .workflow
                .create_order(
                    cod_request(vec![line(&a, want_a), line(&b, want_b)], "9876543210"),
                    Actor::Guest,
                )
                .await;

            let fits = i64::from(want_a) <= stock_a && i64::from(want_b) <= stock_b;
            if fits {
                let order = result.unwrap();
                prop_assert_eq!(order.status, OrderStatus::Pending);
                prop_assert_eq!(app.stock_of(&a), stock_a - i64::from(want_a));
                prop_assert_eq!(app.stock_of(&b), stock_b - i64::from(want_b));
            } else {
                prop_assert!(result.is_err());
                prop_assert!(app.orders.is_empty());
                prop_assert_eq!(app.stock_of(&a), stock_a);
                prop_assert_eq!(app.stock_of(&b), stock_b);
            }
            Ok(())
        })?;
    }
}
