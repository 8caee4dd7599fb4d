//! Status and health reporting types
//!
//! Everything here serializes to JSON for the status surface. The health
//! rule for the sync loop: healthy while active with a write failure ratio
//! under 10%, and trivially healthy before the first write.

use super::{SchedulerMetrics, SchedulerState};
use crate::device::ConnectionSnapshot;
use crate::schedule::WindowPhase;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Live view of the clock-write loop.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatus {
    /// Whether the sync loop is running
    pub active: bool,
    pub service_day: bool,
    pub in_window: bool,
    pub phase: Option<WindowPhase>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub consecutive_failures: u32,
}

impl SyncStatus {
    /// Write success rate in percent; 100 before the first write.
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_syncs == 0 {
            100.0
        } else {
            self.successful_syncs as f64 / self.total_syncs as f64 * 100.0
        }
    }

    /// Healthy while active and failing less than 10% of writes.
    #[allow(clippy::cast_precision_loss)]
    pub fn is_healthy(&self) -> bool {
        if !self.active {
            return false;
        }
        if self.total_syncs == 0 {
            return true;
        }
        (self.failed_syncs as f64 / self.total_syncs as f64) < 0.1
    }
}

/// Periodic health check result, passed to health-check callbacks.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub state: SchedulerState,
    pub device_connected: bool,
    pub sync_healthy: bool,
    pub uptime_seconds: u64,
    pub cycle_success_rate: f64,
}

impl HealthReport {
    pub fn all_healthy(&self) -> bool {
        self.state == SchedulerState::Running && self.device_connected && self.sync_healthy
    }
}

/// Full scheduler status for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: SchedulerState,
    pub is_running: bool,
    pub uptime_seconds: u64,
    pub restart_count: u32,
    pub cycle_success_rate: f64,
    pub metrics: SchedulerMetrics,
    pub sync: SyncStatus,
    pub connection: ConnectionSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_sync_is_unhealthy() {
        let status = SyncStatus::default();
        assert!(!status.is_healthy());
    }

    #[test]
    fn active_sync_is_healthy_before_first_write() {
        let status = SyncStatus {
            active: true,
            ..SyncStatus::default()
        };
        assert!(status.is_healthy());
        assert!((status.success_rate() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn ten_percent_failures_is_the_unhealthy_boundary() {
        let mut status = SyncStatus {
            active: true,
            total_syncs: 20,
            successful_syncs: 19,
            failed_syncs: 1,
            ..SyncStatus::default()
        };
        // 5% failure ratio is under the limit.
        assert!(status.is_healthy());

        status.total_syncs = 10;
        status.successful_syncs = 9;
        // Exactly 10% is no longer healthy.
        assert!(!status.is_healthy());
    }

    #[test]
    fn health_report_requires_all_components() {
        let mut report = HealthReport {
            state: SchedulerState::Running,
            device_connected: true,
            sync_healthy: true,
            uptime_seconds: 10,
            cycle_success_rate: 100.0,
        };
        assert!(report.all_healthy());

        report.device_connected = false;
        assert!(!report.all_healthy());
    }

    #[test]
    fn status_serializes_to_json() {
        let status = SyncStatus {
            active: true,
            phase: Some(WindowPhase::ActiveWindow),
            ..SyncStatus::default()
        };
        let value = serde_json::to_value(&status).expect("serializable");
        assert_eq!(value["phase"], "active_window");
        assert_eq!(value["active"], true);
    }
}
