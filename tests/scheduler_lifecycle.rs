//! End-to-end scheduler lifecycle tests against the simulated terminal.

use chrono::{Duration as ChronoDuration, Utc};
use clocksmith::config::ServiceConfig;
use clocksmith::device::SimulatedHandle;
use clocksmith::{
    DeviceEndpoint, DeviceManager, Scheduler, SchedulerEvent, SchedulerState, SimulatedDevice,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn endpoint() -> DeviceEndpoint {
    DeviceEndpoint {
        address: "sim".to_string(),
        port: 4370,
        user: "admin".to_string(),
        secret: String::new(),
    }
}

fn build_scheduler(raw: ServiceConfig) -> (Arc<Scheduler>, SimulatedHandle) {
    let cfg = raw.validate().expect("valid config");
    let device = SimulatedDevice::new("sim", 4370, ChronoDuration::seconds(240));
    let handle = device.handle();
    let manager = Arc::new(DeviceManager::new(Box::new(device), cfg.connection));
    let scheduler = Arc::new(Scheduler::new(manager, endpoint(), cfg.window, cfg.scheduler));
    (scheduler, handle)
}

#[tokio::test(start_paused = true)]
async fn start_is_rejected_while_running() {
    let (scheduler, _handle) = build_scheduler(ServiceConfig::default());

    assert!(scheduler.start().await);
    assert_eq!(scheduler.state().await, SchedulerState::Running);

    // A second start must refuse without disturbing the running instance.
    assert!(!scheduler.start().await);
    assert_eq!(scheduler.state().await, SchedulerState::Running);

    assert!(scheduler.stop().await);
    assert_eq!(scheduler.state().await, SchedulerState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn counters_survive_a_stop_start_cycle() {
    let (scheduler, _handle) = build_scheduler(ServiceConfig::default());

    assert!(scheduler.start().await);
    // Let the coordination loop run a few cycles.
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(scheduler.stop().await);
    let after_stop = scheduler.status().await;
    assert!(after_stop.metrics.total_cycles >= 1);

    // Stopping again is a no-op, not an error.
    assert!(scheduler.stop().await);

    // Restarting keeps the lifetime counters.
    assert!(scheduler.start().await);
    let after_restart = scheduler.status().await;
    assert!(after_restart.metrics.total_cycles >= after_stop.metrics.total_cycles);
    assert_eq!(after_restart.restart_count, 0);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn force_sync_writes_the_requested_target() {
    let (scheduler, handle) = build_scheduler(ServiceConfig::default());
    assert!(scheduler.start().await);

    let target = Utc::now() - ChronoDuration::seconds(90);
    assert!(scheduler.force_sync(Some(target)).await);
    assert!(handle.set_calls().contains(&target));

    scheduler.stop().await;

    // With the device disconnected a forced write must fail, not panic.
    assert!(!scheduler.force_sync(Some(target)).await);
}

#[tokio::test(start_paused = true)]
async fn lifecycle_callbacks_fire() {
    let (scheduler, _handle) = build_scheduler(ServiceConfig::default());

    let starts = Arc::new(AtomicU32::new(0));
    let stops = Arc::new(AtomicU32::new(0));

    let counter = Arc::clone(&starts);
    scheduler.register_callback(SchedulerEvent::Start, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let counter = Arc::clone(&stops);
    scheduler.register_callback(SchedulerEvent::Stop, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    scheduler.start().await;
    scheduler.stop().await;
    scheduler.start().await;
    scheduler.stop().await;

    assert_eq!(starts.load(Ordering::SeqCst), 2);
    assert_eq!(stops.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn restart_respects_the_bounded_budget() {
    let mut raw = ServiceConfig::default();
    raw.scheduler.max_restart_attempts = 1;
    raw.scheduler.restart_delay_secs = 1;
    let (scheduler, _handle) = build_scheduler(raw);

    assert!(scheduler.start().await);

    // First restart fits the budget.
    assert!(scheduler.restart().await);
    assert_eq!(scheduler.state().await, SchedulerState::Running);
    assert_eq!(scheduler.status().await.restart_count, 1);

    // The second exceeds it and must refuse without stopping the scheduler.
    assert!(!scheduler.restart().await);
    assert_eq!(scheduler.state().await, SchedulerState::Running);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn status_snapshot_reflects_device_connection() {
    let (scheduler, _handle) = build_scheduler(ServiceConfig::default());

    let stopped = scheduler.status().await;
    assert!(!stopped.is_running);
    assert!(!stopped.connection.authenticated);

    scheduler.start().await;
    let running = scheduler.status().await;
    assert!(running.is_running);
    assert!(running.connection.authenticated);
    assert!(running.sync.active);

    scheduler.stop().await;
    let after = scheduler.status().await;
    assert!(!after.sync.active);
    assert!(!after.connection.authenticated);
}
