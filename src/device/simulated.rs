//! In-memory terminal backend for demos and integration tests
//!
//! Models a terminal whose clock is the host clock plus a drift offset.
//! `set_time` replaces the offset, so a read immediately after a write
//! returns (approximately) the written value. Failure injection knobs let
//! tests script connect refusals and write rejections.

use super::{DeviceError, DeviceSession};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Shared inner state, observable through [`SimulatedHandle`].
#[derive(Debug)]
struct SimState {
    connected: bool,
    authenticated: bool,
    /// Terminal clock = host clock + offset
    clock_offset: ChronoDuration,
    /// Credentials the simulated terminal accepts
    accept_user: String,
    accept_secret: String,
    /// Every timestamp written via `set_time`
    set_calls: Vec<DateTime<Utc>>,
    /// Count of `get_time` reads
    get_calls: u64,
    /// Remaining `connect` calls to refuse before accepting
    fail_connects_remaining: u32,
    /// When true, `set_time` returns `Ok(false)`
    reject_writes: bool,
    /// When true, `get_time` fails
    fail_reads: bool,
}

/// Observer/controller handle for a [`SimulatedDevice`].
///
/// Clone-cheap; stays valid after the device is boxed into a manager.
#[derive(Clone)]
pub struct SimulatedHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedHandle {
    /// Timestamps written so far, in call order.
    pub fn set_calls(&self) -> Vec<DateTime<Utc>> {
        self.lock().set_calls.clone()
    }

    /// Number of `get_time` reads issued against the terminal.
    pub fn get_calls(&self) -> u64 {
        self.lock().get_calls
    }

    /// Current drift offset of the simulated clock.
    pub fn clock_offset(&self) -> ChronoDuration {
        self.lock().clock_offset
    }

    /// Whether the session currently holds an authenticated connection.
    pub fn is_authenticated(&self) -> bool {
        self.lock().authenticated
    }

    /// Refuse the next `n` connect attempts.
    pub fn fail_next_connects(&self, n: u32) {
        self.lock().fail_connects_remaining = n;
    }

    /// Make `set_time` return `Ok(false)` until cleared.
    pub fn reject_writes(&self, reject: bool) {
        self.lock().reject_writes = reject;
    }

    /// Make `get_time` fail until cleared.
    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        // Inner state never panics while locked, so poisoning is unreachable;
        // recover the guard rather than propagate a PoisonError.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Simulated terminal session.
pub struct SimulatedDevice {
    state: Arc<Mutex<SimState>>,
    address: String,
    port: u16,
}

impl SimulatedDevice {
    /// Create a simulated terminal with the given initial clock drift.
    pub fn new(address: &str, port: u16, initial_drift: ChronoDuration) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                connected: false,
                authenticated: false,
                clock_offset: initial_drift,
                accept_user: "admin".to_string(),
                accept_secret: String::new(),
                set_calls: Vec::new(),
                get_calls: 0,
                fail_connects_remaining: 0,
                reject_writes: false,
                fail_reads: false,
            })),
            address: address.to_string(),
            port,
        }
    }

    /// Set the credentials the terminal accepts (defaults: `admin` / empty).
    pub fn with_credentials(self, user: &str, secret: &str) -> Self {
        {
            let mut st = self.lock();
            st.accept_user = user.to_string();
            st.accept_secret = secret.to_string();
        }
        self
    }

    /// Observer handle; grab one before boxing the device into a manager.
    pub fn handle(&self) -> SimulatedHandle {
        SimulatedHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl DeviceSession for SimulatedDevice {
    async fn connect(&mut self) -> Result<(), DeviceError> {
        let mut st = self.lock();
        if st.fail_connects_remaining > 0 {
            st.fail_connects_remaining -= 1;
            return Err(DeviceError::Connection {
                address: self.address.clone(),
                port: self.port,
                reason: "simulated refusal".to_string(),
            });
        }
        st.connected = true;
        debug!(address = %self.address, "Simulated terminal connected");
        Ok(())
    }

    async fn disconnect(&mut self) {
        let mut st = self.lock();
        st.connected = false;
        st.authenticated = false;
    }

    async fn verify(&mut self, user: &str, secret: &str) -> Result<bool, DeviceError> {
        let mut st = self.lock();
        if !st.connected {
            return Err(DeviceError::Connection {
                address: self.address.clone(),
                port: self.port,
                reason: "verify on closed transport".to_string(),
            });
        }
        let ok = user == st.accept_user && secret == st.accept_secret;
        st.authenticated = ok;
        Ok(ok)
    }

    async fn enable(&mut self) {
        debug!(address = %self.address, "Simulated terminal enabled");
    }

    async fn get_time(&mut self) -> Result<DateTime<Utc>, DeviceError> {
        let mut st = self.lock();
        if !st.connected {
            return Err(DeviceError::Connection {
                address: self.address.clone(),
                port: self.port,
                reason: "read on closed transport".to_string(),
            });
        }
        if st.fail_reads {
            return Err(DeviceError::Command {
                command: "get_time",
                reason: "simulated read failure".to_string(),
            });
        }
        st.get_calls += 1;
        Ok(Utc::now() + st.clock_offset)
    }

    async fn set_time(&mut self, target: DateTime<Utc>) -> Result<bool, DeviceError> {
        let mut st = self.lock();
        if !st.connected {
            return Err(DeviceError::Connection {
                address: self.address.clone(),
                port: self.port,
                reason: "write on closed transport".to_string(),
            });
        }
        if st.reject_writes {
            return Ok(false);
        }
        st.clock_offset = target - Utc::now();
        st.set_calls.push(target);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_time_replaces_drift() {
        let mut dev = SimulatedDevice::new("sim", 4370, ChronoDuration::seconds(90));
        let handle = dev.handle();

        dev.connect().await.expect("connect");
        let drifted = dev.get_time().await.expect("read");
        assert!((drifted - Utc::now()).num_seconds() >= 89);

        let target = Utc::now();
        assert!(dev.set_time(target).await.expect("write"));
        assert_eq!(handle.set_calls().len(), 1);
        assert!(handle.clock_offset().num_seconds().abs() <= 1);
    }

    #[tokio::test]
    async fn scripted_connect_refusals() {
        let mut dev = SimulatedDevice::new("sim", 4370, ChronoDuration::zero());
        dev.handle().fail_next_connects(2);

        assert!(dev.connect().await.is_err());
        assert!(dev.connect().await.is_err());
        assert!(dev.connect().await.is_ok());
    }

    #[tokio::test]
    async fn verify_checks_credentials() {
        let mut dev = SimulatedDevice::new("sim", 4370, ChronoDuration::zero())
            .with_credentials("admin", "s3cret");
        dev.connect().await.expect("connect");

        assert!(!dev.verify("admin", "wrong").await.expect("verify"));
        assert!(dev.verify("admin", "s3cret").await.expect("verify"));
    }

    #[tokio::test]
    async fn io_on_closed_transport_fails() {
        let mut dev = SimulatedDevice::new("sim", 4370, ChronoDuration::zero());
        assert!(dev.get_time().await.is_err());
        assert!(dev.set_time(Utc::now()).await.is_err());
    }
}
