//! Integration tests for the real-time tick scheduler.
//!
//! Tokio time is paused, so every timer fires deterministically and the
//! tests run instantly.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use vigil_core::dispatch::ConservationResult;
use vigil_core::operator::RunEndReason;
use vigil_core::presets;
use vigil_core::{Command, CommandOutcome, SimulationEngine, TickScheduler};

fn fire_scheduler() -> TickScheduler {
    let mut config = presets::fire_response();
    config.incident_generators.clear();
    config.alert_rules = vec![vigil_core::config::AlertRuleConfig {
        location: Some(vigil_types::Position::new(80.0, 80.0)),
        ..vigil_core::config::AlertRuleConfig::new(
            "always",
            "temperature",
            vigil_types::Comparator::Gt,
            -100.0,
        )
    }];
    TickScheduler::new(SimulationEngine::new(&config).unwrap())
}

#[tokio::test(start_paused = true)]
async fn stop_flushes_pending_work_and_keeps_pools_balanced() {
    let mut scheduler = fire_scheduler();
    let handle = scheduler.start(100).unwrap();

    let mut updates = handle.subscribe();
    updates.changed().await.unwrap();
    let alert = updates.borrow_and_update().active_alerts().next().unwrap().id;

    for _ in 0..3 {
        let outcome = handle
            .submit(Command::Dispatch {
                pool: "engines".into(),
                alert,
            })
            .await
            .unwrap();
        assert!(matches!(outcome, CommandOutcome::Dispatched { entity: Some(_), .. }));
    }
    updates.changed().await.unwrap();
    assert_eq!(handle.snapshot().pool("engines").unwrap().available, 1);

    let summary = scheduler.stop().await.unwrap().unwrap();
    assert_eq!(summary.end_reason, RunEndReason::Stopped);
    assert_eq!(summary.flush.mobilizations_cancelled, 3);

    let engine = scheduler.engine().unwrap();
    assert_eq!(engine.verify_conservation(), ConservationResult::Balanced);
    let final_snapshot = handle.snapshot();
    let pool = final_snapshot.pool("engines").unwrap();
    assert_eq!(pool.available, pool.total);
    assert!(pool.allocations.is_empty());

    let stopped_at = final_snapshot.tick;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(handle.snapshot().tick, stopped_at);
    assert_eq!(handle.status().await.end_reason, Some(RunEndReason::Stopped));
}

#[tokio::test(start_paused = true)]
async fn subscribers_see_every_tick_in_order() {
    let mut scheduler = fire_scheduler().with_max_ticks(10);
    let handle = scheduler.start(50).unwrap();
    let mut updates = handle.subscribe();
    let mut seen = Vec::new();
    while updates.changed().await.is_ok() {
        let tick = updates.borrow_and_update().tick;
        if seen.last() != Some(&tick) {
            seen.push(tick);
        }
        if tick == 10 {
            break;
        }
    }
    assert!(seen.windows(2).all(|w| w.first() < w.last()));
    assert_eq!(seen.last(), Some(&10));
    let summary = scheduler.wait().await.unwrap().unwrap();
    assert_eq!(summary.end_reason, RunEndReason::MaxTicksReached);
    assert_eq!(summary.last_report.map(|r| r.tick), Some(10));
}

#[tokio::test(start_paused = true)]
async fn interval_change_takes_effect() {
    let mut scheduler = fire_scheduler();
    let handle = scheduler.start(100).unwrap();
    tokio::time::sleep(Duration::from_millis(1_050)).await;
    let fast = handle.snapshot().tick;
    assert_eq!(fast, 10);

    handle.set_tick_interval_ms(500).unwrap();
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    let slow = handle.snapshot().tick - fast;
    assert!(slow <= 3, "ran {slow} ticks at the slow cadence");
    assert_eq!(handle.status().await.tick_interval_ms, 500);
    scheduler.stop().await.unwrap();
}
