//! Coordination cycle metrics
//!
//! Counters cover the whole process lifetime; a stop/start pair resets the
//! uptime anchor but never the cycle counts. Cycle duration is smoothed with
//! an exponential moving average so one slow pass does not swing the
//! reported figure.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Smoothing factor for the cycle duration average.
const EMA_ALPHA: f64 = 0.1;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// When the current run began; reset on every start
    pub started_at: Option<DateTime<Utc>>,
    pub total_cycles: u64,
    pub successful_cycles: u64,
    pub failed_cycles: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    /// Exponential moving average of cycle work time
    pub avg_cycle_duration_secs: f64,
}

impl SchedulerMetrics {
    /// Count a cycle as begun. Called at the top of every pass, before the
    /// outcome is known.
    pub fn begin_cycle(&mut self, now: DateTime<Utc>) {
        self.total_cycles += 1;
        self.last_cycle_at = Some(now);
    }

    /// Record a completed cycle's work duration.
    ///
    /// The first cycle seeds the average directly; later cycles blend in
    /// with weight [`EMA_ALPHA`].
    pub fn complete_cycle(&mut self, duration: Duration) {
        let secs = duration.as_secs_f64();
        if self.total_cycles <= 1 {
            self.avg_cycle_duration_secs = secs;
        } else {
            self.avg_cycle_duration_secs =
                EMA_ALPHA * secs + (1.0 - EMA_ALPHA) * self.avg_cycle_duration_secs;
        }
        self.successful_cycles += 1;
    }

    pub fn fail_cycle(&mut self) {
        self.failed_cycles += 1;
    }

    /// Cycle success rate in percent. 100 when nothing has run yet.
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_cycles == 0 {
            100.0
        } else {
            self.successful_cycles as f64 / self.total_cycles as f64 * 100.0
        }
    }

    /// Seconds since the most recent start. Zero before the first start;
    /// keeps counting across a stop, since only start moves the anchor.
    pub fn uptime_seconds(&self, now: DateTime<Utc>) -> u64 {
        self.started_at
            .map(|at| u64::try_from((now - at).num_seconds()).unwrap_or(0))
            .unwrap_or(0)
    }
}
