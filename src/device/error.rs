//! Typed device failures with diagnostic context
//!
//! One variant per failure class. Each carries the address/operation/timeout
//! context a log reader needs; none are swallowed below the manager's public
//! surface. Health-probe failures are not an error variant at all; they are
//! log events confined to the health loop.

use std::time::Duration;
use thiserror::Error;

/// Failure classes surfaced by [`DeviceManager`](super::DeviceManager) and
/// [`DeviceSession`](super::DeviceSession) implementations.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Transport could not be established or was rejected by the terminal.
    #[error("connection to {address}:{port} failed: {reason}")]
    Connection {
        address: String,
        port: u16,
        reason: String,
    },

    /// Terminal rejected the presented credentials.
    #[error("authentication rejected by {address}: {reason}")]
    Authentication { address: String, reason: String },

    /// An operation exceeded its deadline.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    /// Terminal refused or failed a well-formed command.
    #[error("command {command} failed: {reason}")]
    Command { command: &'static str, reason: String },

    /// Command issued while no authenticated session exists. Raised before
    /// any device I/O is attempted.
    #[error("device not connected ({})", .address.as_deref().unwrap_or("no endpoint"))]
    NotConnected { address: Option<String> },
}

impl DeviceError {
    /// True for the timeout class, regardless of operation.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// True for the authentication class.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let err = DeviceError::Connection {
            address: "10.0.0.7".to_string(),
            port: 4370,
            reason: "refused".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("10.0.0.7:4370"));
        assert!(msg.contains("refused"));
    }

    #[test]
    fn not_connected_with_and_without_address() {
        let bare = DeviceError::NotConnected { address: None };
        assert_eq!(bare.to_string(), "device not connected (no endpoint)");

        let addressed = DeviceError::NotConnected {
            address: Some("10.0.0.7".to_string()),
        };
        assert!(addressed.to_string().contains("10.0.0.7"));
    }

    #[test]
    fn classification_helpers() {
        let timeout = DeviceError::Timeout {
            operation: "connect",
            timeout: Duration::from_secs(10),
        };
        assert!(timeout.is_timeout());
        assert!(!timeout.is_authentication());
    }
}
