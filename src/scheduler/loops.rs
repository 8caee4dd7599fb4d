//! Background loops driven by the scheduler
//!
//! Four loops share one cancellation token per run:
//!
//! - sync loop: the clock-write decision cycle against the daily window
//! - coordination loop: cycle metrics, component checks, restart trigger
//! - health loop: periodic health reports and callbacks
//! - metrics loop: periodic metrics snapshot logging
//!
//! The sync loop's decision pass takes `now` explicitly and returns the
//! sleep it wants, so window-boundary behavior is testable without waiting
//! for a real morning.

use super::Scheduler;
use crate::device::{Command, CommandOutput};
use crate::schedule::{IntervalPlanner, SyncWindow, TargetGenerator, WindowPhase};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Sleep between passes when the window is active but no write is due.
const IDLE_TICK: Duration = Duration::from_secs(1);

/// Pause between coordination cycles.
const COORDINATION_TICK: Duration = Duration::from_secs(1);

/// Cumulative failed coordination cycles before a restart is requested.
const FAILED_CYCLE_RESTART_THRESHOLD: u64 = 5;

/// Sleep that returns false when interrupted by cancellation.
pub(super) async fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

// ============================================================================
// Sync Loop
// ============================================================================

/// The clock-write cycle: decide, write, pace, sleep.
pub(super) struct SyncLoop {
    scheduler: Arc<Scheduler>,
    window: SyncWindow,
    generator: TargetGenerator,
    planner: IntervalPlanner,
    consecutive_failures: u32,
    max_failures_before_pause: u32,
    failure_pause: Duration,
}

impl SyncLoop {
    pub(super) fn new(scheduler: Arc<Scheduler>) -> Self {
        let window_config = scheduler.window_config.clone();
        Self {
            window: SyncWindow::new(&window_config),
            generator: TargetGenerator::new(&window_config),
            planner: IntervalPlanner::new(&window_config),
            consecutive_failures: 0,
            max_failures_before_pause: window_config.max_failures_before_pause,
            failure_pause: window_config.failure_pause_duration,
            scheduler,
        }
    }

    pub(super) async fn run(mut self, cancel: CancellationToken) {
        info!("Sync loop started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let wait = self.tick(Utc::now()).await;
            if !sleep_cancellable(wait, &cancel).await {
                break;
            }
        }
        info!("Sync loop stopped");
    }

    /// One decision pass. Returns how long to sleep before the next.
    async fn tick(&mut self, now: DateTime<Utc>) -> Duration {
        self.publish_window_state(now).await;

        match self.window.phase(now) {
            WindowPhase::ActiveWindow => self.attempt_sync(now).await,
            WindowPhase::TailWindow => {
                debug!("Inside window past cutoff, waiting for close");
                self.window.until_close(now).max(IDLE_TICK)
            }
            WindowPhase::BeforeWindow | WindowPhase::OutsideWindow => {
                let wait = self.window.until_next_open(now);
                info!(
                    wait_secs = wait.as_secs(),
                    "Outside service window, sleeping until next opening"
                );
                wait
            }
        }
    }

    /// Write a randomized clock value, honoring the throttle and the
    /// consecutive-failure cooldown.
    async fn attempt_sync(&mut self, now: DateTime<Utc>) -> Duration {
        if !self.generator.should_generate(now) {
            debug!("Minimum write interval not yet elapsed");
            return IDLE_TICK;
        }

        if self.consecutive_failures >= self.max_failures_before_pause {
            warn!(
                failures = self.consecutive_failures,
                pause_secs = self.failure_pause.as_secs(),
                "Too many consecutive write failures, cooling down"
            );
            self.consecutive_failures = 0;
            self.scheduler.sync_status.write().await.consecutive_failures = 0;
            return self.failure_pause;
        }

        let target = self.generator.generate(now);
        info!(target = %target, "Writing randomized terminal clock");

        let outcome = self
            .scheduler
            .device
            .execute_command(Command::SetTime(target))
            .await;

        let mut status = self.scheduler.sync_status.write().await;
        status.total_syncs += 1;
        match outcome {
            Ok(CommandOutput::Ack(true)) => {
                self.consecutive_failures = 0;
                status.successful_syncs += 1;
                status.last_sync_at = Some(now);
                status.consecutive_failures = 0;
                info!(target = %target, "Terminal clock written");
            }
            Ok(_) => {
                self.consecutive_failures += 1;
                status.failed_syncs += 1;
                status.consecutive_failures = self.consecutive_failures;
                error!("Terminal refused the clock write");
            }
            Err(e) => {
                self.consecutive_failures += 1;
                status.failed_syncs += 1;
                status.consecutive_failures = self.consecutive_failures;
                error!(error = %e, "Clock write failed");
            }
        }

        let interval = self.planner.next_interval();
        status.next_attempt_at =
            Some(now + ChronoDuration::from_std(interval).unwrap_or_else(|_| ChronoDuration::zero()));
        interval
    }

    async fn publish_window_state(&self, now: DateTime<Utc>) {
        let mut status = self.scheduler.sync_status.write().await;
        status.service_day = self.window.is_service_day(now);
        status.in_window = self.window.is_in_window(now);
        status.phase = Some(self.window.phase(now));
    }
}

// ============================================================================
// Coordination Loop
// ============================================================================

/// Metrics bookkeeping, component checks, and the auto-restart trigger.
pub(super) async fn coordination_loop(scheduler: Arc<Scheduler>, cancel: CancellationToken) {
    info!("Coordination loop started");
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let cycle_start = Instant::now();
        scheduler.metrics.write().await.begin_cycle(Utc::now());
        scheduler.component_check().await;

        match scheduler.check_loop_liveness().await {
            Ok(()) => {
                scheduler
                    .metrics
                    .write()
                    .await
                    .complete_cycle(cycle_start.elapsed());
            }
            Err(e) => {
                error!(error = %e, "Coordination cycle failed");
                let mut metrics = scheduler.metrics.write().await;
                metrics.fail_cycle();
                if metrics.failed_cycles > FAILED_CYCLE_RESTART_THRESHOLD {
                    scheduler.restart_requested.store(true, Ordering::SeqCst);
                }
            }
        }

        if scheduler.config.enable_auto_restart
            && scheduler.restart_requested.swap(false, Ordering::SeqCst)
        {
            info!("Restart condition detected, scheduling restart");
            // Detached so stop() can join this loop promptly.
            let restarting = Arc::clone(&scheduler);
            tokio::spawn(async move {
                restarting.restart().await;
            });
            break;
        }

        if !sleep_cancellable(COORDINATION_TICK, &cancel).await {
            break;
        }
    }
    info!("Coordination loop stopped");
}

// ============================================================================
// Health & Metrics Loops
// ============================================================================

pub(super) async fn health_loop(scheduler: Arc<Scheduler>, cancel: CancellationToken) {
    debug!("Health check loop started");
    loop {
        if !sleep_cancellable(scheduler.config.health_check_interval, &cancel).await {
            break;
        }
        scheduler.run_health_check().await;
    }
    debug!("Health check loop stopped");
}

pub(super) async fn metrics_loop(scheduler: Arc<Scheduler>, cancel: CancellationToken) {
    debug!("Metrics loop started");
    loop {
        if !sleep_cancellable(scheduler.config.metrics_collection_interval, &cancel).await {
            break;
        }
        let metrics = scheduler.metrics.read().await.clone();
        info!(
            total_cycles = metrics.total_cycles,
            failed_cycles = metrics.failed_cycles,
            success_rate = metrics.success_rate(),
            avg_cycle_secs = metrics.avg_cycle_duration_secs,
            "Metrics snapshot"
        );
    }
    debug!("Metrics loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::device::{DeviceEndpoint, DeviceManager, SimulatedDevice, SimulatedHandle};
    use crate::scheduler::SchedulerState;
    use chrono::{NaiveTime, TimeZone};

    async fn running_scheduler(reject_writes: bool) -> (Arc<Scheduler>, SimulatedHandle) {
        let cfg = ServiceConfig::default().validate().expect("valid config");
        let device = SimulatedDevice::new("sim", 4370, ChronoDuration::seconds(300));
        let handle = device.handle();
        handle.reject_writes(reject_writes);

        let manager = Arc::new(DeviceManager::new(Box::new(device), cfg.connection.clone()));
        let endpoint = DeviceEndpoint {
            address: "sim".to_string(),
            port: 4370,
            user: "admin".to_string(),
            secret: String::new(),
        };
        manager.connect(endpoint.clone()).await.expect("connect");

        let scheduler = Arc::new(Scheduler::new(manager, endpoint, cfg.window, cfg.scheduler));
        (scheduler, handle)
    }

    fn time(value: &str) -> NaiveTime {
        NaiveTime::parse_from_str(value, "%H:%M:%S").expect("valid time")
    }

    /// 2026-08-24 is a Monday.
    fn monday(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 24, h, m, s)
            .single()
            .expect("valid datetime")
    }

    #[tokio::test]
    async fn active_window_tick_writes_and_paces() {
        let (scheduler, handle) = running_scheduler(false).await;
        let mut sync = SyncLoop::new(Arc::clone(&scheduler));

        let wait = sync.tick(monday(7, 52, 0)).await;

        let written = handle.set_calls();
        assert_eq!(written.len(), 1);
        assert!(written[0].time() >= time("07:55:00"));
        assert!(written[0].time() <= time("07:59:59"));

        // Base interval 30-90s widened by at most floor(90 * 0.1) jitter.
        assert!((21..=99).contains(&wait.as_secs()), "wait: {wait:?}");

        let status = scheduler.status().await;
        assert_eq!(status.sync.total_syncs, 1);
        assert_eq!(status.sync.successful_syncs, 1);
        assert!(status.sync.last_sync_at.is_some());
        assert!(status.sync.next_attempt_at.is_some());
    }

    #[tokio::test]
    async fn sunday_tick_sleeps_to_monday_opening() {
        let (scheduler, handle) = running_scheduler(false).await;
        let mut sync = SyncLoop::new(Arc::clone(&scheduler));

        // 2026-08-23 07:56 UTC is a Sunday inside what would be the window.
        let sunday = Utc
            .with_ymd_and_hms(2026, 8, 23, 7, 56, 0)
            .single()
            .expect("valid datetime");
        let wait = sync.tick(sunday).await;

        assert!(handle.set_calls().is_empty());
        // Sunday 07:56 to Monday 07:50 is 23h54m.
        assert_eq!(wait, Duration::from_secs(23 * 3600 + 54 * 60));
        assert!(!scheduler.status().await.sync.service_day);
    }

    #[tokio::test]
    async fn tail_tick_waits_for_window_close_without_writing() {
        let (scheduler, handle) = running_scheduler(false).await;
        let mut sync = SyncLoop::new(Arc::clone(&scheduler));

        let wait = sync.tick(monday(8, 5, 0)).await;

        assert!(handle.set_calls().is_empty());
        assert_eq!(wait, Duration::from_secs(5 * 60));
        assert_eq!(
            scheduler.status().await.sync.phase,
            Some(WindowPhase::TailWindow)
        );
    }

    #[tokio::test]
    async fn second_tick_within_the_throttle_is_idle() {
        let (scheduler, handle) = running_scheduler(false).await;
        let mut sync = SyncLoop::new(Arc::clone(&scheduler));

        let now = monday(7, 52, 0);
        sync.tick(now).await;
        let wait = sync.tick(now).await;

        assert_eq!(handle.set_calls().len(), 1, "throttled tick must not write");
        assert_eq!(wait, IDLE_TICK);
    }

    #[tokio::test]
    async fn repeated_failures_trigger_the_cooldown_pause() {
        let (scheduler, handle) = running_scheduler(true).await;
        let mut sync = SyncLoop::new(Arc::clone(&scheduler));

        // Three rejected writes, spaced past the 30s throttle.
        for i in 0..3 {
            sync.tick(monday(7, 52, 0) + ChronoDuration::seconds(31 * i))
                .await;
        }
        assert!(handle.set_calls().is_empty());
        let status = scheduler.status().await;
        assert_eq!(status.sync.failed_syncs, 3);
        assert_eq!(status.sync.consecutive_failures, 3);

        // The next due tick pauses instead of writing, and resets the streak.
        let wait = sync.tick(monday(7, 54, 4)).await;
        assert_eq!(wait, Duration::from_secs(300));
        assert_eq!(scheduler.status().await.sync.failed_syncs, 3);
        assert_eq!(scheduler.status().await.sync.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dead_loop_escalates_to_a_bounded_restart() {
        let (scheduler, _handle) = running_scheduler(false).await;
        assert!(scheduler.start().await);

        // Kill the sync loop out from under the scheduler.
        {
            let tasks = scheduler.tasks.lock().await;
            for (name, handle) in tasks.iter() {
                if *name == "sync" {
                    handle.abort();
                }
            }
        }

        // Six failed coordination cycles raise the restart flag; the restart
        // stops everything, waits the configured delay, and starts fresh
        // loops under the lifetime restart budget.
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(scheduler.state().await, SchedulerState::Running);
        let status = scheduler.status().await;
        assert_eq!(status.restart_count, 1);
        assert!(status.metrics.failed_cycles >= 6);

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_sleep_reports_interruption() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!sleep_cancellable(Duration::from_secs(3600), &cancel).await);

        let fresh = CancellationToken::new();
        assert!(sleep_cancellable(Duration::from_secs(1), &fresh).await);
    }
}
