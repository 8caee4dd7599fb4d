//! Lifecycle coordination for the clock maintenance service
//!
//! The [`Scheduler`] owns the background loops and the connection to the
//! terminal, and exposes the start/stop/restart lifecycle plus the status
//! surface.
//!
//! ## Architecture
//!
//! - `start` connects the device manager and spawns the sync, coordination,
//!   health, and metrics loops under one cancellation token
//! - `stop` cancels the token, joins each loop under a bounded wait, and
//!   disconnects the device
//! - the coordination loop counts cycle outcomes; too many failed cycles
//!   raise the restart flag, honored on the next pass within a bounded
//!   restart budget
//! - callbacks fire on start, stop, and every periodic health check; a
//!   callback error is logged and never disturbs the scheduler
//!
//! Metric and sync counters span the process lifetime. Stopping and starting
//! again resets the uptime anchor, never the counters.

mod events;
mod loops;
mod metrics;
mod status;

pub use events::{EventContext, SchedulerEvent};
pub use metrics::SchedulerMetrics;
pub use status::{HealthReport, StatusSnapshot, SyncStatus};

use crate::config::{SchedulerConfig, WindowConfig};
use crate::device::{Command, CommandOutput, ConnectionState, DeviceEndpoint, DeviceManager};
use crate::schedule::TargetGenerator;
use chrono::{DateTime, Utc};
use events::CallbackRegistry;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Bounded wait for each background loop to wind down during stop.
const TASK_STOP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Scheduler lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Coordinates the device connection and the background loops.
pub struct Scheduler {
    device: Arc<DeviceManager>,
    endpoint: DeviceEndpoint,
    window_config: WindowConfig,
    config: SchedulerConfig,
    state: RwLock<SchedulerState>,
    metrics: RwLock<SchedulerMetrics>,
    sync_status: RwLock<SyncStatus>,
    /// Replaced with a fresh token on every start.
    cancel: RwLock<CancellationToken>,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    restart_count: AtomicU32,
    restart_requested: AtomicBool,
    callbacks: CallbackRegistry,
}

impl Scheduler {
    pub fn new(
        device: Arc<DeviceManager>,
        endpoint: DeviceEndpoint,
        window_config: WindowConfig,
        config: SchedulerConfig,
    ) -> Self {
        info!(
            health_interval_secs = config.health_check_interval.as_secs(),
            auto_restart = config.enable_auto_restart,
            "Scheduler initialized"
        );
        Self {
            device,
            endpoint,
            window_config,
            config,
            state: RwLock::new(SchedulerState::Stopped),
            metrics: RwLock::new(SchedulerMetrics::default()),
            sync_status: RwLock::new(SyncStatus::default()),
            cancel: RwLock::new(CancellationToken::new()),
            tasks: Mutex::new(Vec::new()),
            restart_count: AtomicU32::new(0),
            restart_requested: AtomicBool::new(false),
            callbacks: CallbackRegistry::default(),
        }
    }

    /// Start the scheduler: connect the device and spawn the loops.
    ///
    /// Returns false without side effects when not currently stopped.
    /// A failed device connection leaves the scheduler in `Error`.
    pub async fn start(self: &Arc<Self>) -> bool {
        {
            let mut state = self.state.write().await;
            if *state != SchedulerState::Stopped {
                warn!(state = %*state, "Scheduler start rejected in current state");
                return false;
            }
            *state = SchedulerState::Starting;
        }

        info!("Starting scheduler");
        self.metrics.write().await.started_at = Some(Utc::now());

        if !self.device.is_connected().await {
            info!("Connecting device manager");
            if let Err(e) = self.device.connect(self.endpoint.clone()).await {
                error!(error = %e, "Failed to start scheduler: device connection failed");
                *self.state.write().await = SchedulerState::Error;
                return false;
            }
        }

        let cancel = CancellationToken::new();
        *self.cancel.write().await = cancel.clone();

        {
            let mut tasks = self.tasks.lock().await;
            tasks.push((
                "sync",
                tokio::spawn(loops::SyncLoop::new(Arc::clone(self)).run(cancel.clone())),
            ));
            tasks.push((
                "coordination",
                tokio::spawn(loops::coordination_loop(Arc::clone(self), cancel.clone())),
            ));
            tasks.push((
                "health",
                tokio::spawn(loops::health_loop(Arc::clone(self), cancel.clone())),
            ));
            if self.config.enable_metrics {
                tasks.push((
                    "metrics",
                    tokio::spawn(loops::metrics_loop(Arc::clone(self), cancel)),
                ));
            }
        }

        self.sync_status.write().await.active = true;
        *self.state.write().await = SchedulerState::Running;
        info!("Scheduler started");

        self.callbacks.fire(&EventContext {
            event: SchedulerEvent::Start,
            health: None,
        });
        true
    }

    /// Stop the scheduler gracefully. True if already stopped.
    ///
    /// Each loop gets a bounded wait to wind down; a loop that overruns it
    /// is logged and left to the cancellation token.
    pub async fn stop(&self) -> bool {
        {
            let mut state = self.state.write().await;
            if *state == SchedulerState::Stopped {
                return true;
            }
            *state = SchedulerState::Stopping;
        }

        info!("Stopping scheduler");
        self.cancel.read().await.cancel();

        let drained: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for (name, handle) in drained {
            if timeout(TASK_STOP_TIMEOUT, handle).await.is_err() {
                warn!(task = name, "Loop did not stop within grace period");
            }
        }

        self.sync_status.write().await.active = false;
        self.device.disconnect().await;
        *self.state.write().await = SchedulerState::Stopped;
        info!("Scheduler stopped");

        self.callbacks.fire(&EventContext {
            event: SchedulerEvent::Stop,
            health: None,
        });
        true
    }

    /// Stop, wait the configured delay, and start again.
    ///
    /// Bounded by the restart budget; returns false once it is spent. The
    /// budget spans the process lifetime, matching the counters.
    ///
    /// The future is boxed: restart awaits start, which spawns the
    /// coordination loop, which can invoke restart again, so the unboxed
    /// future type would be recursive.
    pub fn restart(self: &Arc<Self>) -> Pin<Box<dyn Future<Output = bool> + Send + '_>> {
        Box::pin(self.restart_inner())
    }

    async fn restart_inner(self: &Arc<Self>) -> bool {
        let used = self.restart_count.load(Ordering::SeqCst);
        if used >= self.config.max_restart_attempts {
            error!(
                attempts = used,
                "Restart budget exhausted, refusing to restart"
            );
            return false;
        }

        info!(attempt = used + 1, "Restarting scheduler");
        self.stop().await;
        tokio::time::sleep(self.config.restart_delay).await;
        self.restart_count.fetch_add(1, Ordering::SeqCst);
        self.start().await
    }

    /// Write the terminal clock immediately, outside the window logic.
    ///
    /// Draws a randomized target when none is given. Does not touch the sync
    /// counters; the paced loop remains the only writer of those.
    pub async fn force_sync(&self, target: Option<DateTime<Utc>>) -> bool {
        let target =
            target.unwrap_or_else(|| TargetGenerator::new(&self.window_config).generate(Utc::now()));
        info!(target = %target, "Forcing terminal clock write");

        match self.device.execute_command(Command::SetTime(target)).await {
            Ok(CommandOutput::Ack(true)) => {
                info!(target = %target, "Forced clock write accepted");
                true
            }
            Ok(_) => {
                error!("Terminal refused the forced clock write");
                false
            }
            Err(e) => {
                error!(error = %e, "Forced clock write failed");
                false
            }
        }
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }

    pub async fn is_running(&self) -> bool {
        *self.state.read().await == SchedulerState::Running
    }

    /// Register a handler for a scheduler event.
    pub fn register_callback<F>(&self, event: SchedulerEvent, handler: F)
    where
        F: Fn(&EventContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks.register(event, Box::new(handler));
    }

    /// Full status snapshot for the status surface.
    pub async fn status(&self) -> StatusSnapshot {
        let state = *self.state.read().await;
        let metrics = self.metrics.read().await.clone();
        StatusSnapshot {
            state,
            is_running: state == SchedulerState::Running,
            uptime_seconds: metrics.uptime_seconds(Utc::now()),
            restart_count: self.restart_count.load(Ordering::SeqCst),
            cycle_success_rate: metrics.success_rate(),
            metrics,
            sync: self.sync_status.read().await.clone(),
            connection: self.device.snapshot().await,
        }
    }

    /// Build the current health report.
    pub async fn health_report(&self) -> HealthReport {
        let state = *self.state.read().await;
        let metrics = self.metrics.read().await.clone();
        HealthReport {
            state,
            device_connected: self.device.is_connected().await,
            sync_healthy: self.sync_status.read().await.is_healthy(),
            uptime_seconds: metrics.uptime_seconds(Utc::now()),
            cycle_success_rate: metrics.success_rate(),
        }
    }

    /// Periodic health pass: log the report and fire the callback.
    pub(crate) async fn run_health_check(&self) {
        let report = self.health_report().await;
        if report.all_healthy() {
            debug!("All components healthy");
        } else {
            warn!(
                state = %report.state,
                device_connected = report.device_connected,
                sync_healthy = report.sync_healthy,
                "Health check issues detected"
            );
        }
        self.callbacks.fire(&EventContext {
            event: SchedulerEvent::HealthCheck,
            health: Some(report),
        });
    }

    /// Per-cycle component check for the coordination loop. Log-only: a
    /// degraded or errored device never fails the cycle, the manager's own
    /// health loop keeps retrying reconnection on its own clock.
    pub(crate) async fn component_check(&self) {
        let connection_state = self.device.state().await;
        if connection_state == ConnectionState::Error {
            warn!("Device manager in error state");
        } else if !self.device.is_connected().await {
            warn!(state = %connection_state, "Device manager not connected");
        }
        if !self.sync_status.read().await.is_healthy() {
            warn!("Sync loop unhealthy");
        }
    }

    /// Fallible portion of a coordination cycle.
    ///
    /// Fails when a sibling background loop has exited while the scheduler
    /// is still running; repeated failures escalate to a restart.
    pub(crate) async fn check_loop_liveness(&self) -> anyhow::Result<()> {
        if *self.state.read().await != SchedulerState::Running {
            return Ok(());
        }
        let tasks = self.tasks.lock().await;
        for (name, handle) in tasks.iter() {
            if *name != "coordination" && handle.is_finished() {
                anyhow::bail!("{name} loop exited unexpectedly");
            }
        }
        Ok(())
    }
}
