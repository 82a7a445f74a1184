// tests/reservation_sweeper_tests.rs
mod common;

use chrono::Duration;
use common::*;
use orderflow::model::{Actor, OrderEventType, OrderStatus, PaymentStatus, ReservationStatus};
use orderflow::{Notification, OrderflowConfig, ReconcileOutcome};
use serial_test::serial;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

fn expiring_immediately() -> OrderflowConfig {
  OrderflowConfig {
    reservation_ttl: Duration::zero(),
    sweep_interval: std::time::Duration::from_millis(20),
    ..OrderflowConfig::default()
  }
}

#[tokio::test]
#[serial]
async fn test_sweep_expires_stale_holds_exactly_once() {
  let h = Harness::with_config(expiring_immediately());
  let mug = h.product("mug", 1250, 10).await;
  let lamp = h.product("lamp", 4000, 3).await;
  let order = h.place_order(Uuid::new_v4(), &[(&mug, 2), (&lamp, 1)], "card").await.unwrap().order;
  assert_eq!(h.available(&mug).await, 8);

  let sweeper = h.engine.sweeper();
  assert_eq!(sweeper.sweep_once().await.unwrap(), 2);
  assert_eq!(sweeper.sweep_once().await.unwrap(), 0);

  assert_eq!(h.available(&mug).await, 10);
  assert_eq!(h.available(&lamp).await, 3);
  assert!(h
    .store
    .reservations(order.id)
    .await
    .iter()
    .all(|r| r.status == ReservationStatus::Expired && r.terminated_at.is_some()));

  let order = h.store.order(order.id).await.unwrap();
  assert!(!order.has_active_reservation);
  assert_eq!(order.status, OrderStatus::Pending);

  let events = h.orchestrator.get_events(order.id, &Actor::System, false).await.unwrap();
  let expired: Vec<_> = events
    .iter()
    .filter(|e| e.event_type == OrderEventType::ReservationExpired)
    .collect();
  assert_eq!(expired.len(), 1);
  assert!(!expired[0].is_public);
  assert_eq!(expired[0].payload["items"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
#[serial]
async fn test_live_holds_are_left_alone() {
  let h = Harness::new();
  let mug = h.product("mug", 1250, 10).await;
  let order = h.place_order(Uuid::new_v4(), &[(&mug, 2)], "card").await.unwrap().order;

  assert_eq!(h.engine.sweeper().sweep_once().await.unwrap(), 0);
  assert_eq!(h.available(&mug).await, 8);
  assert!(h.store.order(order.id).await.unwrap().has_active_reservation);
}

#[tokio::test]
#[serial]
async fn test_late_payment_reacquires_stock() {
  let h = Harness::with_config(expiring_immediately());
  let mug = h.product("mug", 1250, 10).await;
  let order = h.place_order(Uuid::new_v4(), &[(&mug, 4)], "card").await.unwrap().order;
  h.engine.sweeper().sweep_once().await.unwrap();
  assert_eq!(h.available(&mug).await, 10);

  h.pay(&order).await;

  let paid = h.store.order(order.id).await.unwrap();
  assert_eq!(paid.status, OrderStatus::Confirmed);
  assert!(paid.stock_committed);
  assert_eq!(h.on_hand(&mug).await, 6);
  assert_eq!(h.available(&mug).await, 6);
  let events = h.orchestrator.get_events(order.id, &Actor::System, false).await.unwrap();
  assert!(!events.iter().any(|e| e.event_type == OrderEventType::InventoryShortfall));
}

#[tokio::test]
#[serial]
async fn test_late_payment_without_stock_records_shortfall() {
  let h = Harness::with_config(expiring_immediately());
  let lamp = h.product("lamp", 4000, 2).await;
  let late = h.place_order(Uuid::new_v4(), &[(&lamp, 2)], "card").await.unwrap().order;
  h.engine.sweeper().sweep_once().await.unwrap();

  // Someone else buys the units the expired hold gave back.
  let rival = h.place_order(Uuid::new_v4(), &[(&lamp, 2)], "card").await.unwrap().order;
  h.pay(&rival).await;
  assert_eq!(h.on_hand(&lamp).await, 0);

  assert_eq!(h.deliver(&late_payment_for(&h, &late).await).await.unwrap(), ReconcileOutcome::Applied);

  // The money is accepted; the missing units are flagged for a human, never oversold.
  let paid = h.store.order(late.id).await.unwrap();
  assert_eq!(paid.status, OrderStatus::Confirmed);
  assert_eq!(h.on_hand(&lamp).await, 0);
  assert_eq!(h.available(&lamp).await, 0);
  let events = h.orchestrator.get_events(late.id, &Actor::System, false).await.unwrap();
  let shortfall = events
    .iter()
    .find(|e| e.event_type == OrderEventType::InventoryShortfall)
    .expect("shortfall recorded");
  assert_eq!(shortfall.payload["items"][0]["requested"], 2);
  assert_eq!(shortfall.payload["items"][0]["available"], 0);
}

async fn late_payment_for(h: &Harness, order: &orderflow::model::Order) -> Vec<u8> {
  let session = h
    .orchestrator
    .create_checkout_session(order.id, order.user_id)
    .await
    .unwrap();
  session_completed(&session.id, session.transaction_id.as_deref().unwrap())
}

#[tokio::test]
#[serial]
async fn test_unpaid_orders_are_cancelled_after_the_payment_deadline() {
  let h = Harness::with_config(OrderflowConfig {
    payment_timeout: Duration::zero(),
    ..OrderflowConfig::default()
  });
  let mug = h.product("mug", 1250, 10).await;
  let online = h.place_order(Uuid::new_v4(), &[(&mug, 2)], "card").await.unwrap().order;
  let cod = h.place_order(Uuid::new_v4(), &[(&mug, 1)], "cash_on_delivery").await.unwrap().order;
  assert!(cod.payment_due_at.is_none());
  assert_eq!(h.available(&mug).await, 7);
  h.drain_notifications();

  let sweeper = h.engine.sweeper();
  assert_eq!(sweeper.cancel_overdue().await.unwrap(), 1);
  assert_eq!(sweeper.cancel_overdue().await.unwrap(), 0);

  let cancelled = h.store.order(online.id).await.unwrap();
  assert_eq!(cancelled.status, OrderStatus::Cancelled);
  assert!(!cancelled.has_active_reservation);
  assert!(cancelled.cancellation_reason.is_some());
  assert_eq!(h.store.order(cod.id).await.unwrap().status, OrderStatus::Pending);
  assert_eq!(h.available(&mug).await, 9);
  assert!(h
    .store
    .reservations(online.id)
    .await
    .iter()
    .all(|r| r.status == ReservationStatus::Expired));

  let events = h.orchestrator.get_events(online.id, &Actor::System, false).await.unwrap();
  assert!(events.iter().any(|e| e.event_type == OrderEventType::Cancelled));
  assert!(events.iter().any(|e| e.event_type == OrderEventType::InventoryReleased));
  assert!(matches!(
    h.drain_notifications().as_slice(),
    [Notification::OrderCancelled { order_id, .. }] if *order_id == online.id
  ));
}

#[tokio::test]
#[serial]
async fn test_payment_after_the_deadline_is_flagged_for_refund() {
  let h = Harness::with_config(OrderflowConfig {
    payment_timeout: Duration::zero(),
    ..OrderflowConfig::default()
  });
  let mug = h.product("mug", 1250, 10).await;
  let order = h.place_order(Uuid::new_v4(), &[(&mug, 2)], "card").await.unwrap().order;
  let payload = late_payment_for(&h, &order).await;
  assert_eq!(h.engine.sweeper().cancel_overdue().await.unwrap(), 1);

  assert_eq!(h.deliver(&payload).await.unwrap(), ReconcileOutcome::Applied);
  let order = h.store.order(order.id).await.unwrap();
  assert_eq!(order.status, OrderStatus::Cancelled);
  assert_eq!(order.payment_status, PaymentStatus::Paid);
  assert_eq!(h.on_hand(&mug).await, 10);
  let events = h.orchestrator.get_events(order.id, &Actor::System, false).await.unwrap();
  assert!(events.iter().any(|e| e.event_type == OrderEventType::RefundRequired));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn test_spawned_sweeper_runs_until_shutdown() {
  let h = Harness::with_config(expiring_immediately());
  let mug = h.product("mug", 1250, 10).await;
  h.place_order(Uuid::new_v4(), &[(&mug, 5)], "card").await.unwrap();

  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let handle = h.engine.sweeper().spawn(shutdown_rx);

  let mut released = false;
  for _ in 0..50 {
    if h.available(&mug).await == 10 {
      released = true;
      break;
    }
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
  }
  assert!(released, "sweeper never released the hold");

  shutdown_tx.send(true).unwrap();
  tokio::time::timeout(std::time::Duration::from_secs(2), handle)
    .await
    .expect("sweeper stops on shutdown")
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[serial]
async fn test_expiry_racing_cancellation_moves_stock_once() {
  let h = Arc::new(Harness::with_config(expiring_immediately()));
  let mug = h.product("mug", 1250, 10).await;
  let order = h.place_order(Uuid::new_v4(), &[(&mug, 3)], "card").await.unwrap().order;

  let sweep = {
    let h = h.clone();
    tokio::spawn(async move { h.engine.sweeper().sweep_once().await })
  };
  let cancel = {
    let h = h.clone();
    let order_id = order.id;
    tokio::spawn(async move { h.orchestrator.cancel_order(order_id, &Actor::System, None).await })
  };
  sweep.await.unwrap().unwrap();
  cancel.await.unwrap().unwrap();

  assert_eq!(h.available(&mug).await, 10);
  assert_eq!(h.on_hand(&mug).await, 10);
  let terminal: Vec<_> = h.store.reservations(order.id).await.iter().map(|r| r.status).collect();
  assert_eq!(terminal.len(), 1);
  assert!(matches!(terminal[0], ReservationStatus::Expired | ReservationStatus::Released));
}
