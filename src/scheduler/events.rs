//! Scheduler event callbacks
//!
//! Embedders hook lifecycle transitions and periodic health checks without
//! touching the scheduler's internals. Handlers run synchronously on the
//! firing task; a handler error is logged and never propagates, and the
//! remaining handlers for the event still run.

use super::HealthReport;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, error};

/// Hookable scheduler events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerEvent {
    /// Fired after a successful start
    Start,
    /// Fired after a stop completes
    Stop,
    /// Fired after every periodic health check
    HealthCheck,
}

impl std::fmt::Display for SchedulerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
            Self::HealthCheck => write!(f, "health_check"),
        }
    }
}

/// Payload handed to event handlers.
#[derive(Debug)]
pub struct EventContext {
    pub event: SchedulerEvent,
    /// Present for health-check events only
    pub health: Option<HealthReport>,
}

pub(super) type EventHandler = Box<dyn Fn(&EventContext) -> anyhow::Result<()> + Send + Sync>;

/// Per-event handler lists.
#[derive(Default)]
pub(super) struct CallbackRegistry {
    handlers: Mutex<HashMap<SchedulerEvent, Vec<EventHandler>>>,
}

impl CallbackRegistry {
    pub(super) fn register(&self, event: SchedulerEvent, handler: EventHandler) {
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.entry(event).or_default().push(handler);
            debug!(event = %event, "Registered event callback");
        }
    }

    /// Run every handler registered for the context's event.
    pub(super) fn fire(&self, context: &EventContext) {
        let Ok(handlers) = self.handlers.lock() else {
            return;
        };
        let Some(for_event) = handlers.get(&context.event) else {
            return;
        };
        for handler in for_event {
            if let Err(e) = handler(context) {
                error!(event = %context.event, error = %e, "Event callback failed");
            }
        }
    }
}
