// tests/webhook_reconciliation_tests.rs
mod common;

use common::*;
use orderflow::model::{Actor, FulfillmentStatus, OrderEventType, OrderStatus, PaymentStatus, ReservationStatus};
use orderflow::{OrderflowError, ReconcileOutcome};
use rust_decimal::Decimal;
use serde_json::json;
use serial_test::serial;
use std::sync::Arc;
use uuid::Uuid;

async fn count_events(h: &Harness, order_id: Uuid, event_type: OrderEventType) -> usize {
  h.orchestrator
    .get_events(order_id, &Actor::System, false)
    .await
    .unwrap()
    .iter()
    .filter(|e| e.event_type == event_type)
    .count()
}

#[tokio::test]
#[serial]
async fn test_session_completed_confirms_order_and_commits_stock() {
  let h = Harness::new();
  let mug = h.product("mug", 1250, 10).await;
  let order = h.place_order(Uuid::new_v4(), &[(&mug, 2)], "card").await.unwrap().order;

  let session = h
    .orchestrator
    .create_checkout_session(order.id, order.user_id)
    .await
    .unwrap();
  assert!(session.url.is_some());
  let pending = h.store.payments(order.id).await;
  assert_eq!(pending.len(), 1);
  assert_eq!(pending[0].status, PaymentStatus::Pending);
  assert_eq!(pending[0].external_id.as_deref(), Some(session.id.as_str()));

  let payload = session_completed(&session.id, session.transaction_id.as_deref().unwrap());
  assert_eq!(h.deliver(&payload).await.unwrap(), ReconcileOutcome::Applied);

  let order = h.store.order(order.id).await.unwrap();
  assert_eq!(order.status, OrderStatus::Confirmed);
  assert_eq!(order.payment_status, PaymentStatus::Paid);
  assert!(order.stock_committed);
  assert!(!order.has_active_reservation);
  assert_eq!(h.on_hand(&mug).await, 8);
  assert_eq!(h.available(&mug).await, 8);
  assert!(h
    .store
    .reservations(order.id)
    .await
    .iter()
    .all(|r| r.status == ReservationStatus::Confirmed));

  let payment = &h.store.payments(order.id).await[0];
  assert_eq!(payment.status, PaymentStatus::Paid);
  assert!(payment.processed_at.is_some());
}

#[tokio::test]
#[serial]
async fn test_replayed_webhook_is_a_no_op() {
  let h = Harness::new();
  let mug = h.product("mug", 1250, 10).await;
  let order = h.place_order(Uuid::new_v4(), &[(&mug, 2)], "card").await.unwrap().order;
  let session = h.pay(&order).await;
  let after_first = h.store.order(order.id).await.unwrap();

  let payload = session_completed(&session.id, session.transaction_id.as_deref().unwrap());
  for _ in 0..3 {
    assert_eq!(h.deliver(&payload).await.unwrap(), ReconcileOutcome::AlreadyProcessed);
  }
  // The same capture announced through the payment intent is also a replay.
  let intent = json!({
    "type": "payment_intent.succeeded",
    "data": { "object": { "id": session.transaction_id } }
  })
  .to_string();
  assert_eq!(h.deliver(intent.as_bytes()).await.unwrap(), ReconcileOutcome::AlreadyProcessed);

  let after_replays = h.store.order(order.id).await.unwrap();
  assert_eq!(after_replays.version, after_first.version);
  assert_eq!(h.on_hand(&mug).await, 8);
  assert_eq!(count_events(&h, order.id, OrderEventType::PaymentReceived).await, 1);
  assert_eq!(count_events(&h, order.id, OrderEventType::InventoryConfirmed).await, 1);
}

#[tokio::test]
#[serial]
async fn test_bad_signatures_are_rejected_without_side_effects() {
  let h = Harness::new();
  let mug = h.product("mug", 1250, 10).await;
  let order = h.place_order(Uuid::new_v4(), &[(&mug, 2)], "card").await.unwrap().order;
  let session = h
    .orchestrator
    .create_checkout_session(order.id, order.user_id)
    .await
    .unwrap();
  let payload = session_completed(&session.id, session.transaction_id.as_deref().unwrap());

  let missing = h.reconciler.handle_webhook(PROVIDER, &payload, None).await.unwrap_err();
  assert!(matches!(missing, OrderflowError::InvalidSignature(_)));

  let forged = h
    .reconciler
    .handle_webhook(PROVIDER, &payload, Some("t=1700000000,v1=deadbeef"))
    .await
    .unwrap_err();
  assert!(matches!(forged, OrderflowError::InvalidSignature(_)));

  // Signed for a different body.
  let signature = h.gateway.sign(b"{\"type\":\"other\"}");
  let tampered = h
    .reconciler
    .handle_webhook(PROVIDER, &payload, Some(&signature))
    .await
    .unwrap_err();
  assert_eq!(tampered.code(), "invalid_signature");
  assert!(!tampered.is_retryable());

  let order = h.store.order(order.id).await.unwrap();
  assert_eq!(order.status, OrderStatus::Pending);
  assert_eq!(order.version, 1);
  assert_eq!(h.store.payments(order.id).await[0].status, PaymentStatus::Pending);
  assert_eq!(h.available(&mug).await, 8);
}

#[tokio::test]
#[serial]
async fn test_unknown_provider_and_unknown_event_type() {
  let h = Harness::new();
  let payload = json!({ "type": "customer.created", "data": { "object": {} } }).to_string();
  let signature = h.gateway.sign(payload.as_bytes());

  let err = h
    .reconciler
    .handle_webhook("paypal", payload.as_bytes(), Some(&signature))
    .await
    .unwrap_err();
  assert_eq!(err.code(), "validation_error");

  assert_eq!(h.deliver(payload.as_bytes()).await.unwrap(), ReconcileOutcome::Ignored);
}

#[tokio::test]
#[serial]
async fn test_webhook_for_unknown_payment_asks_for_retry() {
  let h = Harness::new();
  let err = h.deliver(&session_completed("cs_nobody", "pi_nobody")).await.unwrap_err();
  assert!(matches!(err, OrderflowError::PaymentNotFound(_)));
  assert!(err.is_retryable());
}

#[tokio::test]
#[serial]
async fn test_failed_payment_releases_stock_and_allows_retry() {
  let h = Harness::new();
  let mug = h.product("mug", 1250, 10).await;
  let order = h.place_order(Uuid::new_v4(), &[(&mug, 3)], "card").await.unwrap().order;
  let session = h
    .orchestrator
    .create_checkout_session(order.id, order.user_id)
    .await
    .unwrap();
  let intent = session.transaction_id.clone().unwrap();

  let outcome = h.deliver(&intent_failed(&intent, "card_declined")).await.unwrap();
  assert_eq!(outcome, ReconcileOutcome::Applied);
  assert_eq!(
    h.deliver(&intent_failed(&intent, "card_declined")).await.unwrap(),
    ReconcileOutcome::AlreadyProcessed
  );

  let failed = h.store.order(order.id).await.unwrap();
  assert_eq!(failed.status, OrderStatus::Pending);
  assert_eq!(failed.payment_status, PaymentStatus::Failed);
  assert!(!failed.has_active_reservation);
  assert_eq!(h.available(&mug).await, 10);
  let payment = &h.store.payments(order.id).await[0];
  assert_eq!(payment.status, PaymentStatus::Failed);
  assert_eq!(payment.failure_reason.as_deref(), Some("card_declined"));

  // Second attempt: a fresh session, and the stock is taken again on capture.
  let retry = h.pay(&failed).await;
  assert_ne!(retry.id, session.id);
  let paid = h.store.order(order.id).await.unwrap();
  assert_eq!(paid.status, OrderStatus::Confirmed);
  assert_eq!(paid.payment_status, PaymentStatus::Paid);
  assert!(paid.stock_committed);
  assert_eq!(h.on_hand(&mug).await, 7);
  assert_eq!(h.available(&mug).await, 7);
}

#[tokio::test]
#[serial]
async fn test_checkout_session_is_reused_while_pending() {
  let h = Harness::new();
  let mug = h.product("mug", 1250, 10).await;
  let order = h.place_order(Uuid::new_v4(), &[(&mug, 1)], "card").await.unwrap().order;

  let first = h.orchestrator.create_checkout_session(order.id, order.user_id).await.unwrap();
  let second = h.orchestrator.create_checkout_session(order.id, order.user_id).await.unwrap();
  assert_eq!(first.id, second.id);
  assert_eq!(h.gateway.created_sessions.load(std::sync::atomic::Ordering::SeqCst), 1);
  assert_eq!(h.store.payments(order.id).await.len(), 1);

  let found = h.orchestrator.get_by_session_id(&first.id, &Actor::Customer(order.user_id)).await.unwrap();
  assert_eq!(found.order.id, order.id);

  h.deliver(&session_completed(&first.id, first.transaction_id.as_deref().unwrap())).await.unwrap();
  let err = h.orchestrator.create_checkout_session(order.id, order.user_id).await.unwrap_err();
  assert_eq!(err.code(), "invalid_state_transition");
}

#[tokio::test]
#[serial]
async fn test_checkout_is_refused_for_cash_on_delivery() {
  let h = Harness::new();
  let mug = h.product("mug", 1250, 10).await;
  let order = h.place_order(Uuid::new_v4(), &[(&mug, 1)], "cash_on_delivery").await.unwrap().order;
  let err = h.orchestrator.create_checkout_session(order.id, order.user_id).await.unwrap_err();
  assert_eq!(err.code(), "validation_error");
  assert_eq!(h.gateway.created_sessions.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
#[serial]
async fn test_fallback_confirmation_converges_with_webhook() {
  let h = Harness::new();
  let mug = h.product("mug", 1250, 10).await;
  let order = h.place_order(Uuid::new_v4(), &[(&mug, 2)], "card").await.unwrap().order;
  let session = h.orchestrator.create_checkout_session(order.id, order.user_id).await.unwrap();

  // The customer is back before the gateway captured anything.
  let early = h.reconciler.confirm_payment_success(order.id, order.user_id, &session.id).await.unwrap();
  assert_eq!(early, ReconcileOutcome::AwaitingPayment);
  assert_eq!(h.store.order(order.id).await.unwrap().status, OrderStatus::Pending);

  h.gateway.capture(&session.id);
  let confirmed = h.reconciler.confirm_payment_success(order.id, order.user_id, &session.id).await.unwrap();
  assert_eq!(confirmed, ReconcileOutcome::Applied);

  let late_webhook = h
    .deliver(&session_completed(&session.id, session.transaction_id.as_deref().unwrap()))
    .await
    .unwrap();
  assert_eq!(late_webhook, ReconcileOutcome::AlreadyProcessed);
  let again = h.reconciler.confirm_payment_success(order.id, order.user_id, &session.id).await.unwrap();
  assert_eq!(again, ReconcileOutcome::AlreadyProcessed);

  assert_eq!(h.on_hand(&mug).await, 8);
  assert_eq!(count_events(&h, order.id, OrderEventType::PaymentReceived).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_racing_webhook_and_confirmation_apply_once() {
  let h = Arc::new(Harness::new());
  let mug = h.product("mug", 1250, 10).await;
  let order = h.place_order(Uuid::new_v4(), &[(&mug, 2)], "card").await.unwrap().order;
  let session = h.orchestrator.create_checkout_session(order.id, order.user_id).await.unwrap();
  h.gateway.capture(&session.id);

  let webhook = {
    let h = h.clone();
    let payload = session_completed(&session.id, session.transaction_id.as_deref().unwrap());
    tokio::spawn(async move { h.deliver(&payload).await })
  };
  let fallback = {
    let h = h.clone();
    let session_id = session.id.clone();
    let (order_id, user_id) = (order.id, order.user_id);
    tokio::spawn(async move { h.reconciler.confirm_payment_success(order_id, user_id, &session_id).await })
  };

  let mut outcomes = vec![webhook.await.unwrap().unwrap(), fallback.await.unwrap().unwrap()];
  outcomes.sort_by_key(|o| *o as u8);
  assert_eq!(outcomes, vec![ReconcileOutcome::Applied, ReconcileOutcome::AlreadyProcessed]);
  assert_eq!(h.on_hand(&mug).await, 8);
  assert_eq!(count_events(&h, order.id, OrderEventType::PaymentReceived).await, 1);
}

#[tokio::test]
#[serial]
async fn test_confirmation_checks_ownership() {
  let h = Harness::new();
  let mug = h.product("mug", 1250, 10).await;
  let order = h.place_order(Uuid::new_v4(), &[(&mug, 1)], "card").await.unwrap().order;
  let other = h.place_order(Uuid::new_v4(), &[(&mug, 1)], "card").await.unwrap().order;
  let session = h.orchestrator.create_checkout_session(order.id, order.user_id).await.unwrap();
  h.gateway.capture(&session.id);

  let wrong_user = h
    .reconciler
    .confirm_payment_success(order.id, Uuid::new_v4(), &session.id)
    .await
    .unwrap_err();
  assert!(matches!(wrong_user, OrderflowError::PaymentMismatch(_)));

  let wrong_order = h
    .reconciler
    .confirm_payment_success(other.id, order.user_id, &session.id)
    .await
    .unwrap_err();
  assert_eq!(wrong_order.code(), "payment_mismatch");

  let unknown = h
    .reconciler
    .confirm_payment_success(order.id, order.user_id, "cs_unknown")
    .await
    .unwrap_err();
  assert_eq!(unknown.code(), "payment_not_found");
  assert_eq!(h.store.order(order.id).await.unwrap().status, OrderStatus::Pending);
}

#[tokio::test]
#[serial]
async fn test_payment_for_cancelled_order_flags_refund() {
  let h = Harness::new();
  let mug = h.product("mug", 1250, 10).await;
  let order = h.place_order(Uuid::new_v4(), &[(&mug, 2)], "card").await.unwrap().order;
  let session = h.orchestrator.create_checkout_session(order.id, order.user_id).await.unwrap();
  h.orchestrator.cancel_order(order.id, &Actor::System, None).await.unwrap();

  let outcome = h
    .deliver(&session_completed(&session.id, session.transaction_id.as_deref().unwrap()))
    .await
    .unwrap();
  assert_eq!(outcome, ReconcileOutcome::Applied);

  let order = h.store.order(order.id).await.unwrap();
  assert_eq!(order.status, OrderStatus::Cancelled);
  assert_eq!(order.payment_status, PaymentStatus::Paid);
  assert!(!order.stock_committed);
  assert_eq!(h.on_hand(&mug).await, 10);
  assert_eq!(count_events(&h, order.id, OrderEventType::RefundRequired).await, 1);
}

#[tokio::test]
#[serial]
async fn test_refunds_are_cumulative_and_idempotent() {
  let h = Harness::new();
  let mug = h.product("mug", 1000, 10).await;
  let order = h.place_order(Uuid::new_v4(), &[(&mug, 2)], "card").await.unwrap().order;
  let session = h.pay(&order).await;
  let intent = session.transaction_id.clone().unwrap();
  let total = h.store.order(order.id).await.unwrap().totals.total;
  // 2 x 10.00 + 2.00 tax + 5.00 shipping.
  assert_eq!(total, Decimal::new(2700, 2));

  assert_eq!(h.deliver(&charge_refunded(&intent, 1000)).await.unwrap(), ReconcileOutcome::Applied);
  let partial = h.store.order(order.id).await.unwrap();
  assert_eq!(partial.payment_status, PaymentStatus::PartiallyRefunded);
  assert_eq!(partial.status, OrderStatus::Confirmed);
  assert_eq!(
    h.deliver(&charge_refunded(&intent, 1000)).await.unwrap(),
    ReconcileOutcome::AlreadyProcessed
  );

  let too_much = h.deliver(&charge_refunded(&intent, 5000)).await.unwrap_err();
  assert_eq!(too_much.code(), "validation_error");

  assert_eq!(h.deliver(&charge_refunded(&intent, 2700)).await.unwrap(), ReconcileOutcome::Applied);
  let refunded = h.store.order(order.id).await.unwrap();
  assert_eq!(refunded.status, OrderStatus::Refunded);
  assert_eq!(refunded.payment_status, PaymentStatus::Refunded);
  // Nothing shipped, so the deducted stock goes back on the shelf.
  assert_eq!(h.on_hand(&mug).await, 10);

  let payment = &h.store.payments(order.id).await[0];
  assert_eq!(payment.refund_amount, total);
  // An older refund notice arriving late changes nothing.
  assert_eq!(
    h.deliver(&charge_refunded(&intent, 1000)).await.unwrap(),
    ReconcileOutcome::AlreadyProcessed
  );
}

#[tokio::test]
#[serial]
async fn test_refund_of_packed_order_puts_stock_back() {
  let h = Harness::new();
  let mug = h.product("mug", 1000, 10).await;
  let admin = Actor::Admin(Uuid::new_v4());
  let order = h.place_order(Uuid::new_v4(), &[(&mug, 2)], "card").await.unwrap().order;
  let session = h.pay(&order).await;
  h.orchestrator.update_status(order.id, OrderStatus::Processing, &admin).await.unwrap();
  let packed = h.orchestrator.update_status(order.id, OrderStatus::ReadyToShip, &admin).await.unwrap();
  assert_eq!(packed.fulfillment_status, FulfillmentStatus::Packed);
  assert_eq!(h.on_hand(&mug).await, 8);

  let intent = session.transaction_id.clone().unwrap();
  assert_eq!(h.deliver(&charge_refunded(&intent, 2700)).await.unwrap(), ReconcileOutcome::Applied);
  let refunded = h.store.order(order.id).await.unwrap();
  assert_eq!(refunded.status, OrderStatus::Refunded);
  assert_eq!(h.on_hand(&mug).await, 10);
}

#[tokio::test]
#[serial]
async fn test_refund_for_unsettled_payment_is_ignored() {
  let h = Harness::new();
  let mug = h.product("mug", 1000, 10).await;
  let order = h.place_order(Uuid::new_v4(), &[(&mug, 1)], "card").await.unwrap().order;
  let session = h.orchestrator.create_checkout_session(order.id, order.user_id).await.unwrap();

  let outcome = h
    .deliver(&charge_refunded(session.transaction_id.as_deref().unwrap(), 500))
    .await
    .unwrap();
  assert_eq!(outcome, ReconcileOutcome::Ignored);
  assert_eq!(h.store.payments(order.id).await[0].status, PaymentStatus::Pending);
}
