//! Integration tests for the heartbeat.
//!
//! Timer-driven tests use `start_paused = true` so the clock advances
//! only when every task is idle, which makes tick counts deterministic.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mudgate_heartbeat::{Heartbeat, HeartbeatConfig, UpdateError, Updatable};

// =========================================================================
// Test participants
// =========================================================================

#[derive(Default)]
struct Counter {
    hits: AtomicUsize,
}

impl Counter {
    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Updatable for Counter {
    fn label(&self) -> String {
        "counter".into()
    }

    async fn update(&self) -> Result<(), UpdateError> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl Updatable for Failing {
    fn label(&self) -> String {
        "failing".into()
    }

    async fn update(&self) -> Result<(), UpdateError> {
        Err("socket exploded".into())
    }
}

struct Panicking;

#[async_trait]
impl Updatable for Panicking {
    fn label(&self) -> String {
        "panicking".into()
    }

    async fn update(&self) -> Result<(), UpdateError> {
        panic!("participant bug");
    }
}

fn no_jitter(ms: u64) -> HeartbeatConfig {
    HeartbeatConfig {
        initial_jitter: Duration::ZERO,
        ..HeartbeatConfig::with_interval_ms(ms)
    }
}

// =========================================================================
// Registration
// =========================================================================

#[test]
fn test_register_is_idempotent() {
    let hb = Heartbeat::new(no_jitter(100));
    let counter = Arc::new(Counter::default());

    assert!(hb.register(counter.clone()));
    assert!(!hb.register(counter.clone()));
    assert_eq!(hb.participant_count(), 1);
    assert!(hb.contains(&counter));
}

#[test]
fn test_unregister_absent_is_noop() {
    let hb = Heartbeat::new(no_jitter(100));
    let counter = Arc::new(Counter::default());

    assert!(!hb.unregister(&counter));
    hb.register(counter.clone());
    assert!(hb.unregister(&counter));
    assert!(!hb.unregister(&counter));
    assert_eq!(hb.participant_count(), 0);
}

#[test]
fn test_config_validation_clamps() {
    let cfg = HeartbeatConfig {
        interval: Duration::ZERO,
        budget_warn_threshold: 3.0,
        initial_jitter: Duration::ZERO,
    }
    .validated();
    assert_eq!(cfg.interval, HeartbeatConfig::MIN_INTERVAL);
    assert_eq!(cfg.budget_warn_threshold, 1.0);
}

// =========================================================================
// Fault isolation
// =========================================================================

#[tokio::test]
async fn test_failing_participant_does_not_block_others() {
    let hb = Heartbeat::new(no_jitter(100));
    let a = Arc::new(Counter::default());
    let b = Arc::new(Counter::default());
    hb.register(a.clone());
    hb.register(Arc::new(Failing));
    hb.register(b.clone());

    let report = hb.tick_now().await;

    assert_eq!(report.tick, 1);
    assert_eq!(report.updated, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(a.hits(), 1);
    assert_eq!(b.hits(), 1);
    assert_eq!(hb.metrics().total_failures, 1);
}

#[tokio::test]
async fn test_panicking_participant_is_contained() {
    let hb = Heartbeat::new(no_jitter(100));
    let counter = Arc::new(Counter::default());
    hb.register(Arc::new(Panicking));
    hb.register(counter.clone());

    let report = hb.tick_now().await;

    assert_eq!(report.failed, 1);
    assert_eq!(counter.hits(), 1);

    // The heartbeat keeps working on the next tick.
    let report = hb.tick_now().await;
    assert_eq!(report.tick, 2);
    assert_eq!(counter.hits(), 2);
}

// =========================================================================
// Timer
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_ticks_at_interval_until_stopped() {
    let hb = Heartbeat::new(no_jitter(100));
    let counter = Arc::new(Counter::default());
    hb.register(counter.clone());

    assert!(hb.start());
    assert!(hb.is_running());

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(counter.hits(), 3);

    hb.stop().await;
    assert!(!hb.is_running());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(counter.hits(), 3, "no ticks after stop");
}

#[tokio::test(start_paused = true)]
async fn test_double_start_is_ignored() {
    let hb = Heartbeat::new(no_jitter(100));
    assert!(hb.start());
    assert!(!hb.start());
    hb.stop().await;

    // Restart after stop works.
    assert!(hb.start());
    hb.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_start_with_interval_overrides_config() {
    let hb = Heartbeat::new(no_jitter(1_000));
    let counter = Arc::new(Counter::default());
    hb.register(counter.clone());

    hb.start_with_interval(Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(55)).await;
    hb.stop().await;

    assert_eq!(counter.hits(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_participants_registered_while_running_are_picked_up() {
    let hb = Heartbeat::new(no_jitter(100));
    hb.start();

    tokio::time::sleep(Duration::from_millis(150)).await;
    let late = Arc::new(Counter::default());
    hb.register(late.clone());

    tokio::time::sleep(Duration::from_millis(100)).await;
    hb.stop().await;

    assert_eq!(late.hits(), 1);
    assert_eq!(hb.tick_count(), 2);
}

#[tokio::test]
async fn test_stop_when_stopped_is_noop() {
    let hb = Heartbeat::default();
    hb.stop().await;
    assert!(!hb.is_running());
}
