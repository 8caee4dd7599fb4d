//! Randomized target drawing and write pacing
//!
//! [`TargetGenerator`] draws a uniform timestamp from the configured
//! time-of-day range on the current date, avoids repeating the previous draw
//! to the second, and throttles generation to at most one draw per minimum
//! interval. [`IntervalPlanner`] produces the jittered sleep between writes.
//!
//! Both keep counters for the status surface but hold no clock of their own.

use crate::config::WindowConfig;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Timelike, Utc};
use rand::Rng;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Counters and bounds exposed through the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratorStats {
    pub targets_generated: u64,
    pub anti_repeat_nudges: u64,
    pub last_target: Option<NaiveTime>,
    pub range_start: NaiveTime,
    pub range_end: NaiveTime,
}

/// Draws randomized clock targets within the configured range.
#[derive(Debug)]
pub struct TargetGenerator {
    random_min: NaiveTime,
    random_max: NaiveTime,
    min_interval: ChronoDuration,
    last_target: Option<NaiveTime>,
    last_generated_at: Option<DateTime<Utc>>,
    targets_generated: u64,
    anti_repeat_nudges: u64,
}

impl TargetGenerator {
    pub fn new(config: &WindowConfig) -> Self {
        Self {
            random_min: config.random_min,
            random_max: config.random_max,
            min_interval: ChronoDuration::seconds(
                i64::try_from(config.min_interval_seconds).unwrap_or(i64::MAX),
            ),
            last_target: None,
            last_generated_at: None,
            targets_generated: 0,
            anti_repeat_nudges: 0,
        }
    }

    /// Draw a target on `now`'s date, uniform over the closed range.
    ///
    /// A minute-resolution upper bound covers its whole final minute, so a
    /// range of 07:55–07:59 spans 07:55:00 through 07:59:59 inclusive. A draw
    /// within one second of the previous target is nudged forward by 1–5
    /// seconds; if the nudge overshoots the range, the original draw stands.
    pub fn generate(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let date = now.date_naive();
        let floor = date.and_time(self.random_min).and_utc();
        let mut ceiling = date.and_time(self.random_max).and_utc();
        if self.random_max.second() == 0 {
            ceiling += ChronoDuration::seconds(59);
        }

        let span = (ceiling - floor).num_seconds().max(0);
        let offset = rand::thread_rng().gen_range(0..=span);
        let mut target = floor + ChronoDuration::seconds(offset);

        if let Some(last) = self.last_target {
            let repeat = (target.time() - last).num_seconds().abs() < 1;
            if repeat {
                let nudge = rand::thread_rng().gen_range(1..=5);
                target += ChronoDuration::seconds(nudge);
                if target > ceiling {
                    target = floor + ChronoDuration::seconds(offset);
                }
                self.anti_repeat_nudges += 1;
            }
        }

        self.last_target = Some(target.time());
        self.last_generated_at = Some(now);
        self.targets_generated += 1;

        debug!(target = %target, "Generated randomized clock target");
        target
    }

    /// Whether enough time has passed since the last draw.
    ///
    /// Always true before the first draw. The minimum write interval is the
    /// baseline; the jittered pacing on top of it belongs to
    /// [`IntervalPlanner`].
    pub fn should_generate(&self, now: DateTime<Utc>) -> bool {
        match self.last_generated_at {
            None => true,
            Some(at) => now - at >= self.min_interval,
        }
    }

    pub fn stats(&self) -> GeneratorStats {
        GeneratorStats {
            targets_generated: self.targets_generated,
            anti_repeat_nudges: self.anti_repeat_nudges,
            last_target: self.last_target,
            range_start: self.random_min,
            range_end: self.random_max,
        }
    }
}

/// Bounds exposed through the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct PlannerStats {
    pub min_seconds: u64,
    pub max_seconds: u64,
    pub jitter_factor: f64,
    pub intervals_planned: u64,
}

/// Produces the jittered sleep between consecutive write attempts.
#[derive(Debug)]
pub struct IntervalPlanner {
    min_seconds: u64,
    max_seconds: u64,
    jitter_factor: f64,
    intervals_planned: u64,
}

impl IntervalPlanner {
    pub fn new(config: &WindowConfig) -> Self {
        Self {
            min_seconds: config.min_interval_seconds,
            max_seconds: config.max_interval_seconds,
            jitter_factor: config.jitter_factor,
            intervals_planned: 0,
        }
    }

    /// Uniform base interval plus uniform jitter, clamped to at least 1s.
    ///
    /// The jitter range is `floor(base * jitter_factor)` seconds either way,
    /// so a jitter factor of zero reproduces the base draw exactly.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn next_interval(&mut self) -> Duration {
        let mut rng = rand::thread_rng();
        let base = rng.gen_range(self.min_seconds..=self.max_seconds) as i64;

        let jitter_range = (base as f64 * self.jitter_factor) as i64;
        let jitter = if jitter_range > 0 {
            rng.gen_range(-jitter_range..=jitter_range)
        } else {
            0
        };

        let secs = (base + jitter).max(1) as u64;
        self.intervals_planned += 1;

        debug!(base_secs = base, jitter_secs = jitter, final_secs = secs, "Planned next interval");
        Duration::from_secs(secs)
    }

    pub fn stats(&self) -> PlannerStats {
        PlannerStats {
            min_seconds: self.min_seconds,
            max_seconds: self.max_seconds,
            jitter_factor: self.jitter_factor,
            intervals_planned: self.intervals_planned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window_config() -> WindowConfig {
        WindowConfig {
            window_start: time("07:50"),
            window_end: time("08:10"),
            random_min: time("07:55"),
            random_max: time("07:59"),
            cutoff: time("08:00"),
            min_interval_seconds: 30,
            max_interval_seconds: 90,
            jitter_factor: 0.1,
            max_failures_before_pause: 3,
            failure_pause_duration: Duration::from_secs(300),
        }
    }

    fn time(hhmm: &str) -> NaiveTime {
        NaiveTime::parse_from_str(hhmm, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(hhmm, "%H:%M:%S"))
            .expect("valid time")
    }

    fn monday_morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 24, 7, 56, 0)
            .single()
            .expect("valid datetime")
    }

    #[test]
    fn draws_stay_inside_the_closed_range() {
        let mut generator = TargetGenerator::new(&window_config());
        let now = monday_morning();
        let floor = time("07:55");
        let ceiling = time("07:59:59");

        for _ in 0..10_000 {
            let target = generator.generate(now);
            assert_eq!(target.date_naive(), now.date_naive());
            assert!(target.time() >= floor, "below range: {target}");
            assert!(target.time() <= ceiling, "above range: {target}");
        }
        assert_eq!(generator.stats().targets_generated, 10_000);
    }

    #[test]
    fn degenerate_range_nudges_but_never_escapes() {
        // Single possible draw, so every draw after the first collides.
        let mut cfg = window_config();
        cfg.random_min = time("07:55:30");
        cfg.random_max = time("07:55:30");
        let mut generator = TargetGenerator::new(&cfg);
        let now = monday_morning();

        let first = generator.generate(now);
        let second = generator.generate(now);
        assert_eq!(first.time(), time("07:55:30"));
        // The nudge overshoots the one-second range and falls back.
        assert_eq!(second.time(), time("07:55:30"));
        assert_eq!(generator.stats().anti_repeat_nudges, 1);
    }

    #[test]
    fn second_resolution_bound_is_honored() {
        let mut cfg = window_config();
        cfg.random_min = time("07:55:00");
        cfg.random_max = time("07:55:10");
        let mut generator = TargetGenerator::new(&cfg);
        let now = monday_morning();

        for _ in 0..1_000 {
            let target = generator.generate(now);
            assert!(target.time() <= time("07:55:10"), "past bound: {target}");
        }
    }

    #[test]
    fn generation_is_throttled_by_the_minimum_interval() {
        let mut generator = TargetGenerator::new(&window_config());
        let now = monday_morning();
        assert!(generator.should_generate(now));

        generator.generate(now);
        assert!(!generator.should_generate(now + ChronoDuration::seconds(29)));
        assert!(generator.should_generate(now + ChronoDuration::seconds(30)));
    }

    #[test]
    fn zero_jitter_reproduces_the_base_draw() {
        let mut cfg = window_config();
        cfg.min_interval_seconds = 60;
        cfg.max_interval_seconds = 60;
        cfg.jitter_factor = 0.0;
        let mut planner = IntervalPlanner::new(&cfg);

        for _ in 0..100 {
            assert_eq!(planner.next_interval(), Duration::from_secs(60));
        }
        assert_eq!(planner.stats().intervals_planned, 100);
    }

    #[test]
    fn jittered_intervals_stay_in_the_widened_bounds() {
        let mut planner = IntervalPlanner::new(&window_config());
        // Widest possible jitter is floor(90 * 0.1) = 9 seconds either way.
        for _ in 0..1_000 {
            let interval = planner.next_interval().as_secs();
            assert!((21..=99).contains(&interval), "out of bounds: {interval}");
        }
    }

    #[test]
    fn interval_never_collapses_below_one_second() {
        let mut cfg = window_config();
        cfg.min_interval_seconds = 1;
        cfg.max_interval_seconds = 1;
        cfg.jitter_factor = 1.0;
        let mut planner = IntervalPlanner::new(&cfg);

        for _ in 0..100 {
            assert!(planner.next_interval() >= Duration::from_secs(1));
        }
    }
}
