//! Clocksmith: resilient clock maintenance for networked embedded terminals
//!
//! Keeps the wall clock of a remote terminal correct despite RTC drift and an
//! unreliable network link. During a daily weekday service window the service
//! writes a randomized target time to the terminal (randomization
//! desynchronizes fleets of terminals and avoids patterned writes),
//! rechecking on a jittered interval.
//!
//! ## Architecture
//!
//! - **Device layer**: the [`DeviceSession`](device::DeviceSession) contract
//!   plus [`DeviceManager`](device::DeviceManager), which owns the session,
//!   retries connects with exponential backoff, and health-checks the link
//! - **Schedule engine**: pure wall-clock window predicates and the
//!   randomized target/interval generators
//! - **Scheduler**: process-level state machine coordinating the sync loop,
//!   health-check loop, and metrics loop

pub mod config;
pub mod device;
pub mod schedule;
pub mod scheduler;

// Re-export the session contract and manager
pub use device::{
    ConnectionSnapshot, ConnectionState, DeviceEndpoint, DeviceError, DeviceManager,
    DeviceSession, SimulatedDevice,
};

// Re-export schedule engine types
pub use schedule::{IntervalPlanner, SyncWindow, TargetGenerator, WindowPhase};

// Re-export scheduler surface
pub use scheduler::{
    HealthReport, Scheduler, SchedulerEvent, SchedulerMetrics, SchedulerState, StatusSnapshot,
    SyncStatus,
};
