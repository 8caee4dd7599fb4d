//! Daily service window detection
//!
//! The window recurs every service day (Monday through Saturday; Sunday is
//! skipped). Both window boundaries are inclusive. The cutoff splits the
//! window into an active phase, where clock writes happen, and a wait-only
//! tail, so a value written before the cutoff is never redundantly replaced.

use crate::config::WindowConfig;
use chrono::{DateTime, Datelike, Days, NaiveTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Where `now` falls relative to the daily window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPhase {
    /// Service day, before the window opens
    BeforeWindow,
    /// Inside the window and before the cutoff; writes are allowed
    ActiveWindow,
    /// Inside the window at or past the cutoff; wait for the window to close
    TailWindow,
    /// Past the window, or a non-service day
    OutsideWindow,
}

impl std::fmt::Display for WindowPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BeforeWindow => write!(f, "before_window"),
            Self::ActiveWindow => write!(f, "active_window"),
            Self::TailWindow => write!(f, "tail_window"),
            Self::OutsideWindow => write!(f, "outside_window"),
        }
    }
}

/// Immutable view of the configured daily window.
#[derive(Debug, Clone)]
pub struct SyncWindow {
    window_start: NaiveTime,
    window_end: NaiveTime,
    cutoff: NaiveTime,
}

impl SyncWindow {
    pub fn new(config: &WindowConfig) -> Self {
        Self {
            window_start: config.window_start,
            window_end: config.window_end,
            cutoff: config.cutoff,
        }
    }

    /// Monday through Saturday. Sunday is the one rest day.
    pub fn is_service_day(&self, now: DateTime<Utc>) -> bool {
        now.weekday().num_days_from_monday() != 6
    }

    /// Inside the daily window, boundaries inclusive, on a service day.
    pub fn is_in_window(&self, now: DateTime<Utc>) -> bool {
        if !self.is_service_day(now) {
            return false;
        }
        let tod = now.time();
        self.window_start <= tod && tod <= self.window_end
    }

    /// Whether a clock write is currently permitted.
    ///
    /// Requires a service day, a time-of-day inside the window, and strictly
    /// before the cutoff. `cutoff` itself is excluded: at exactly the cutoff
    /// the window has gone wait-only.
    pub fn is_sync_due(&self, now: DateTime<Utc>) -> bool {
        self.is_in_window(now) && now.time() < self.cutoff
    }

    /// Classify `now` into a window phase.
    pub fn phase(&self, now: DateTime<Utc>) -> WindowPhase {
        if !self.is_service_day(now) {
            return WindowPhase::OutsideWindow;
        }
        let tod = now.time();
        if tod < self.window_start {
            WindowPhase::BeforeWindow
        } else if tod > self.window_end {
            WindowPhase::OutsideWindow
        } else if tod < self.cutoff {
            WindowPhase::ActiveWindow
        } else {
            WindowPhase::TailWindow
        }
    }

    /// Time until the next window opening on a service day.
    ///
    /// Later today if the window has not opened yet, otherwise the next
    /// service day. Sundays are skipped entirely rather than woken through.
    pub fn until_next_open(&self, now: DateTime<Utc>) -> Duration {
        let mut date = now.date_naive();
        for _ in 0..7 {
            let open = date.and_time(self.window_start).and_utc();
            let service_day = open.weekday().num_days_from_monday() != 6;
            if service_day && open > now {
                return (open - now).to_std().unwrap_or(Duration::ZERO);
            }
            date = date + Days::new(1);
        }
        // Unreachable: at most one rest day per week.
        Duration::ZERO
    }

    /// Time until today's window closes. Zero if already past it.
    pub fn until_close(&self, now: DateTime<Utc>) -> Duration {
        let close = now.date_naive().and_time(self.window_end).and_utc();
        (close - now).to_std().unwrap_or(Duration::ZERO)
    }
}
