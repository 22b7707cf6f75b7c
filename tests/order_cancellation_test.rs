//! Customer cancellations: single items with fail-closed refunds, bulk
//! cancellation with a best-effort combined refund, and the read view's
//! cancellability flags.

mod common;

use assert_matches::assert_matches;
use common::{line, product, TestApp};
use rust_decimal_macros::dec;
use storefront_api::{
    auth::Actor,
    errors::{OrderError, ServiceError},
    models::{
        order::{LABEL_ITEM_CANCELLED, LABEL_REFUND_FAILED, LABEL_REFUND_INITIATED},
        OrderStatus,
    },
    services::UpdateStatusRequest,
};
use uuid::Uuid;

#[tokio::test]
async fn scenario_d_single_item_is_refunded_and_order_stays_processing() {
    let mug = product("Mug", dec!(249.50), 10);
    let tee = product("Tee", dec!(499.00), 5);
    let app = TestApp::builder().product(mug.clone()).product(tee.clone()).build();
    let owner = Uuid::new_v4();

    let order = app
        .place_paid(vec![line(&mug, 2), line(&tee, 1)], owner)
        .await;
    let mug_line = order.items[0].clone();
    let before = order.timeline.len();

    let updated = app
        .workflow
        .cancel_item(order.id, mug_line.id, Actor::Customer(owner))
        .await
        .unwrap();

    let refunds = app.gateway.refund_calls();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount, 49_900);
    assert_eq!(
        Some(refunds[0].payment_id.as_str()),
        order.gateway_payment_id()
    );

    assert!(updated.item(mug_line.id).unwrap().is_cancelled);
    assert!(!updated.items[1].is_cancelled);
    assert_eq!(updated.status, OrderStatus::Processing);
    assert_eq!(app.stock_of(&mug), 10);
    assert_eq!(app.stock_of(&tee), 4);

    let added: Vec<_> = updated.timeline[before..]
        .iter()
        .map(|entry| entry.status.as_str())
        .collect();
    assert_eq!(added, vec![LABEL_REFUND_INITIATED, LABEL_ITEM_CANCELLED]);
    let last_prior = order.timeline.last().unwrap().timestamp;
    assert!(updated.timeline.last().unwrap().timestamp >= last_prior);
}

#[tokio::test]
async fn scenario_e_bulk_refund_failure_still_cancels_and_restocks() {
    let mug = product("Mug", dec!(100.00), 10);
    let tee = product("Tee", dec!(50.00), 10);
    let app = TestApp::builder().product(mug.clone()).product(tee.clone()).build();
    let owner = Uuid::new_v4();

    let order = app
        .place_paid(vec![line(&mug, 1), line(&tee, 2)], owner)
        .await;
    app.gateway.fail_refunds(true);

    let outcome = app
        .workflow
        .cancel_all(order.id, Actor::Customer(owner))
        .await
        .expect("bulk cancellation reports success");

    assert_eq!(outcome.cancelled_items, 2);
    assert_eq!(outcome.refund_amount, 20_000);
    assert!(outcome.refund_id.is_none());
    assert!(outcome.refund_error.is_some());
    assert!(outcome.order.items.iter().all(|item| item.is_cancelled));
    assert_eq!(outcome.order.status, OrderStatus::Cancelled);
    assert!(outcome
        .order
        .timeline
        .iter()
        .any(|entry| entry.status == LABEL_REFUND_FAILED));
    assert_eq!(app.stock_of(&mug), 10);
    assert_eq!(app.stock_of(&tee), 10);
}

#[tokio::test]
async fn bulk_cancellation_issues_one_summed_refund() {
    let mug = product("Mug", dec!(100.00), 10);
    let tee = product("Tee", dec!(50.00), 10);
    let hat = product("Hat", dec!(30.00), 10);
    let app = TestApp::builder()
        .product(mug.clone())
        .product(tee.clone())
        .product(hat.clone())
        .build();
    app.catalog.set_cancellable(hat.id, false);
    let owner = Uuid::new_v4();

    let order = app
        .place_paid(vec![line(&mug, 1), line(&tee, 2), line(&hat, 1)], owner)
        .await;

    let outcome = app
        .workflow
        .cancel_all(order.id, Actor::Customer(owner))
        .await
        .unwrap();

    let refunds = app.gateway.refund_calls();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount, 20_000);
    assert_eq!(outcome.cancelled_items, 2);
    assert!(outcome.refund_id.is_some());
    assert_eq!(outcome.order.status, OrderStatus::Processing);
    assert!(!outcome.order.items[2].is_cancelled);
    assert_eq!(app.stock_of(&hat), 9);
}

#[tokio::test]
async fn single_item_refund_failure_changes_nothing() {
    let mug = product("Mug", dec!(100.00), 10);
    let app = TestApp::builder().product(mug.clone()).build();
    let owner = Uuid::new_v4();

    let order = app.place_paid(vec![line(&mug, 2)], owner).await;
    app.gateway.fail_refunds(true);

    let err = app
        .workflow
        .cancel_item(order.id, order.items[0].id, Actor::Customer(owner))
        .await
        .unwrap_err();

    assert_matches!(err.order_error(), Some(OrderError::RefundFailed(_)));
    let stored = app
        .workflow
        .get_order(order.id, Actor::Customer(owner))
        .await
        .unwrap();
    assert!(!stored.items[0].item.is_cancelled);
    assert_eq!(stored.order.timeline.len(), order.timeline.len());
    assert_eq!(app.stock_of(&mug), 8);
}

#[tokio::test]
async fn cancelling_twice_is_rejected_without_side_effects() {
    let mug = product("Mug", dec!(10.00), 10);
    let tee = product("Tee", dec!(10.00), 10);
    let app = TestApp::builder().product(mug.clone()).product(tee.clone()).build();
    let owner = Uuid::new_v4();

    let order = app
        .place_unpaid(vec![line(&mug, 2), line(&tee, 1)], owner)
        .await;
    let item_id = order.items[0].id;
    let first = app
        .workflow
        .cancel_item(order.id, item_id, Actor::Customer(owner))
        .await
        .unwrap();
    let stock = app.stock_of(&mug);

    let err = app
        .workflow
        .cancel_item(order.id, item_id, Actor::Customer(owner))
        .await
        .unwrap_err();

    assert_matches!(err.order_error(), Some(OrderError::AlreadyCancelled(id)) if *id == item_id);
    assert_eq!(app.stock_of(&mug), stock);
    let stored = app
        .workflow
        .get_order(order.id, Actor::Customer(owner))
        .await
        .unwrap();
    assert_eq!(stored.order.timeline, first.timeline);
    assert!(app.gateway.refund_calls().is_empty());
}

#[tokio::test]
async fn order_is_cancelled_exactly_when_the_last_item_goes() {
    let products: Vec<_> = (0..3)
        .map(|i| product(&format!("P{i}"), dec!(10.00), 5))
        .collect();
    let mut builder = TestApp::builder();
    for p in &products {
        builder = builder.product(p.clone());
    }
    let app = builder.build();
    let owner = Uuid::new_v4();

    let order = app
        .place_paid(products.iter().map(|p| line(p, 1)).collect(), owner)
        .await;

    for (index, item) in order.items.iter().enumerate() {
        let updated = app
            .workflow
            .cancel_item(order.id, item.id, Actor::Customer(owner))
            .await
            .unwrap();
        if index + 1 < order.items.len() {
            assert_eq!(updated.status, OrderStatus::Processing);
            assert!(updated.cancelled_at.is_none());
        } else {
            assert_eq!(updated.status, OrderStatus::Cancelled);
            assert!(updated.cancelled_at.is_some());
        }
    }
    assert_eq!(app.gateway.refund_calls().len(), 3);
}

#[tokio::test]
async fn nothing_to_cancel_is_an_error_and_mutates_nothing() {
    let mug = product("Mug", dec!(10.00), 10);
    let app = TestApp::builder().product(mug.clone()).build();
    app.catalog.set_cancellable(mug.id, false);
    let owner = Uuid::new_v4();

    let order = app.place_paid(vec![line(&mug, 1)], owner).await;
    let err = app
        .workflow
        .cancel_all(order.id, Actor::Customer(owner))
        .await
        .unwrap_err();
    assert_matches!(err.order_error(), Some(OrderError::NoCancellableItems));

    let err = app
        .workflow
        .cancel_item(order.id, order.items[0].id, Actor::Customer(owner))
        .await
        .unwrap_err();
    assert_matches!(err.order_error(), Some(OrderError::NotCancellable(_)));

    assert_eq!(app.stock_of(&mug), 9);
    assert!(app.gateway.refund_calls().is_empty());
}

#[tokio::test]
async fn shipped_orders_cannot_be_cancelled_by_customers() {
    let mug = product("Mug", dec!(10.00), 10);
    let app = TestApp::builder().product(mug.clone()).build();
    let owner = Uuid::new_v4();
    let order = app.place_paid(vec![line(&mug, 1)], owner).await;

    app.workflow
        .update_status(
            order.id,
            UpdateStatusRequest {
                status: OrderStatus::Shipped,
                tracking_number: None,
                current_location: None,
            },
            Actor::Admin(Uuid::new_v4()),
        )
        .await
        .unwrap();

    let err = app
        .workflow
        .cancel_item(order.id, order.items[0].id, Actor::Customer(owner))
        .await
        .unwrap_err();
    assert_matches!(err.order_error(), Some(OrderError::InvalidStage(OrderStatus::Shipped)));

    let view = app
        .workflow
        .get_order(order.id, Actor::Customer(owner))
        .await
        .unwrap();
    assert!(!view.is_cancellable);
    assert!(view.items.iter().all(|item| !item.is_cancellable));
}

#[tokio::test]
async fn only_the_owner_may_cancel() {
    let mug = product("Mug", dec!(10.00), 10);
    let app = TestApp::builder().product(mug.clone()).build();
    let owner = Uuid::new_v4();
    let order = app.place_paid(vec![line(&mug, 2)], owner).await;

    let err = app
        .workflow
        .cancel_all(order.id, Actor::Customer(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));

    let err = app
        .workflow
        .cancel_all(order.id, Actor::Guest)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Unauthorized(_));

    let err = app
        .workflow
        .cancel_all(order.id, Actor::Admin(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));

    let err = app
        .workflow
        .cancel_item(order.id, order.items[0].id, Actor::Admin(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));
    assert!(app.gateway.refund_calls().is_empty());
    assert_eq!(app.stock_of(&mug), 8);

    let outcome = app
        .workflow
        .cancel_all(order.id, Actor::Customer(owner))
        .await
        .unwrap();
    assert_eq!(outcome.cancelled_items, 1);
}

#[tokio::test]
async fn view_reflects_live_catalog_cancellability() {
    let mug = product("Mug", dec!(10.00), 10);
    let tee = product("Tee", dec!(10.00), 10);
    let app = TestApp::builder().product(mug.clone()).product(tee.clone()).build();
    let owner = Uuid::new_v4();
    let order = app
        .place_unpaid(vec![line(&mug, 1), line(&tee, 1)], owner)
        .await;

    app.catalog.set_cancellable(tee.id, false);
    let view = app
        .workflow
        .get_order(order.id, Actor::Customer(owner))
        .await
        .unwrap();
    assert!(view.is_cancellable);
    assert!(view.items[0].is_cancellable);
    assert!(!view.items[1].is_cancellable);

    app.workflow
        .cancel_item(order.id, order.items[0].id, Actor::Customer(owner))
        .await
        .unwrap();
    let view = app
        .workflow
        .get_order(order.id, Actor::Customer(owner))
        .await
        .unwrap();
    assert!(!view.is_cancellable);
}
