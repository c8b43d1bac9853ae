//! Integration tests for the checkout redirect monitor
//!
//! Tests cover:
//! - Loop termination for short and long navigation cycles
//! - Load timeout reported within the window
//! - Cancellation leaving the server-side intent untouched
//! - Monitor outcomes fed back into reconciliation

mod common;

use std::time::Duration;

use common::Harness;
use credit_wallet::domain::IntentStatus;
use credit_wallet::monitor::{
    observe_checkout, ErrorReason, MonitorConfig, NavigationSignal, Outcome, RedirectMonitor,
};
use credit_wallet::services::ApplyOutcome;
use rust_decimal_macros::dec;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

const CHECKOUT: &str = "https://checkout.mock.local/pay";

#[tokio::test(start_paused = true)]
async fn test_short_redirect_cycle_is_detected() {
    let (tx, rx) = mpsc::channel(64);
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let monitor = RedirectMonitor::new("pi_1", MonitorConfig::default());
    let observer = tokio::spawn(observe_checkout(monitor, rx, cancel_rx));

    let mut sent = 0;
    for url in [
        format!("{}/step-a", CHECKOUT),
        format!("{}/step-b", CHECKOUT),
    ]
    .iter()
    .cycle()
    .take(20)
    {
        if tx.send(NavigationSignal::Started(url.clone())).await.is_err() {
            break;
        }
        if tx.send(NavigationSignal::Loaded(url.clone())).await.is_err() {
            break;
        }
        sent += 1;
    }
    drop(tx);

    let outcome = observer.await.unwrap();
    assert_eq!(outcome, Some(Outcome::Error(ErrorReason::RedirectLoop)));
    assert!(sent <= 20);
}

#[test]
fn test_identical_navigation_beyond_budget_is_a_loop() {
    let config = MonitorConfig::default();
    let budget = config.revisit_budget;
    let mut monitor = RedirectMonitor::new("pi_1", config);
    let url = format!("{}/3ds", CHECKOUT);
    let now = Instant::now();

    for _ in 0..=budget {
        assert_eq!(monitor.on_navigation(&url, now), None);
        monitor.on_load_finished(&url);
    }
    assert_eq!(
        monitor.on_navigation(&url, now),
        Some(Outcome::Error(ErrorReason::RedirectLoop))
    );
    // Nothing is reported after the first outcome.
    assert_eq!(monitor.on_navigation(&url, now), None);
}

#[test]
fn test_long_redirect_cycle_terminates() {
    // Cycle longer than the history window: only the navigation ceiling stops it.
    let config = MonitorConfig::default();
    let ceiling = config.max_navigations;
    let mut monitor = RedirectMonitor::new("pi_1", config);
    let now = Instant::now();

    let mut steps = 0;
    let outcome = loop {
        let url = format!("{}/hop-{}", CHECKOUT, steps % 15);
        steps += 1;
        if let Some(outcome) = monitor.on_navigation(&url, now) {
            break outcome;
        }
        monitor.on_load_finished(&url);
        assert!(steps <= ceiling + 1, "monitor did not terminate");
    };

    assert_eq!(outcome, Outcome::Error(ErrorReason::RedirectLoop));
    assert_eq!(steps, ceiling + 1);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_load_times_out_within_window() {
    let config = MonitorConfig::default();
    let window = config.load_timeout;
    let (tx, rx) = mpsc::channel(8);
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let observer = tokio::spawn(observe_checkout(
        RedirectMonitor::new("pi_1", config),
        rx,
        cancel_rx,
    ));

    let started = Instant::now();
    tx.send(NavigationSignal::Started(format!("{}/card", CHECKOUT)))
        .await
        .unwrap();

    let outcome = observer.await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(outcome, Some(Outcome::Error(ErrorReason::Timeout)));
    assert!(elapsed >= window, "timed out early: {:?}", elapsed);
    assert!(elapsed <= window + Duration::from_millis(100), "timed out late: {:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_each_load_restarts_the_timer() {
    let config = MonitorConfig::default();
    let (tx, rx) = mpsc::channel(8);
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let observer = tokio::spawn(observe_checkout(
        RedirectMonitor::new("pi_1", config),
        rx,
        cancel_rx,
    ));

    let card = format!("{}/card", CHECKOUT);
    tx.send(NavigationSignal::Started(card.clone())).await.unwrap();
    tokio::time::sleep(Duration::from_secs(20)).await;
    tx.send(NavigationSignal::Loaded(card)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(20)).await;

    tx.send(NavigationSignal::Started("app://payment/success?intentId=pi_1".to_string()))
        .await
        .unwrap();

    assert_eq!(observer.await.unwrap(), Some(Outcome::Success));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_observation_without_touching_intent() {
    let h = Harness::new();
    let intent = h
        .tracker
        .create_intent("player-1", dec!(100), "k1")
        .await
        .unwrap();

    let (tx, rx) = mpsc::channel(8);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let observer = tokio::spawn(observe_checkout(
        RedirectMonitor::new(&intent.intent_id, MonitorConfig::default()),
        rx,
        cancel_rx,
    ));

    tx.send(NavigationSignal::Started(format!("{}/card", CHECKOUT)))
        .await
        .unwrap();
    cancel_tx.send(true).unwrap();

    assert_eq!(observer.await.unwrap(), None);
    let stored = h.tracker.get_intent(&intent.intent_id).await.unwrap();
    assert_eq!(stored.status, IntentStatus::Created);
    assert!(stored.provisional.is_none());
}

#[tokio::test]
async fn test_monitor_outcomes_feed_reconciliation() {
    let h = Harness::new();
    let intent = h
        .tracker
        .create_intent("player-1", dec!(150), "k1")
        .await
        .unwrap();
    let id = intent.intent_id.clone();
    let mut monitor = RedirectMonitor::new(&id, MonitorConfig::default());

    // Success redirect alone credits nothing: the gateway still says CREATED.
    let redirect = format!("app://payment/success?intentId={}", id);
    let outcome = monitor.on_navigation(&redirect, Instant::now()).unwrap();
    assert_eq!(outcome, Outcome::Success);
    let result = h.engine.report_client_outcome(&id, &outcome).await.unwrap();
    assert!(matches!(result.outcome, ApplyOutcome::Ignored { .. }));
    assert_eq!(h.balance("player-1").await, dec!(0));

    // Once the gateway agrees, the same report credits.
    h.gateway.set_status(&id, IntentStatus::Succeeded);
    let result = h.engine.report_client_outcome(&id, &outcome).await.unwrap();
    assert!(matches!(result.outcome, ApplyOutcome::Credited { .. }));
    assert_eq!(h.balance("player-1").await, dec!(150.00));
}
