//! Device layer: session contract, connection manager, simulated backend
//!
//! The wire protocol itself lives outside this crate. Everything here talks
//! to the terminal through the [`DeviceSession`] trait; [`DeviceManager`]
//! owns the one live session and absorbs connection-layer failures.

mod error;
mod manager;
mod simulated;

pub use error::DeviceError;
pub use manager::{Command, CommandOutput, ConnectionSnapshot, ConnectionState, DeviceManager};
pub use simulated::{SimulatedDevice, SimulatedHandle};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Address, port, and credentials for one terminal.
#[derive(Debug, Clone)]
pub struct DeviceEndpoint {
    pub address: String,
    pub port: u16,
    pub user: String,
    pub secret: String,
}

impl DeviceEndpoint {
    /// `address:port` for log fields.
    pub fn location(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Protocol-level handle to a remote terminal.
///
/// Implementations own framing, authentication bytes, and command encoding.
/// Calls may block on network I/O internally (wrap blocking SDKs in
/// `spawn_blocking`); callers enforce deadlines externally with
/// `tokio::time::timeout`, so implementations must stay cancel-safe at
/// `.await` points.
#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// Open the transport to the terminal. Re-callable after `disconnect`.
    async fn connect(&mut self) -> Result<(), DeviceError>;

    /// Tear down the transport. Must be idempotent; never fails.
    async fn disconnect(&mut self);

    /// Present credentials. `Ok(false)` means the terminal rejected them.
    async fn verify(&mut self, user: &str, secret: &str) -> Result<bool, DeviceError>;

    /// Enable the terminal for normal interaction after authentication.
    async fn enable(&mut self);

    /// Read the terminal's current clock.
    async fn get_time(&mut self) -> Result<DateTime<Utc>, DeviceError>;

    /// Write the terminal's clock. `Ok(false)` means the terminal refused.
    async fn set_time(&mut self, target: DateTime<Utc>) -> Result<bool, DeviceError>;
}
