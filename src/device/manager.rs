//! Connection manager: owns the one live terminal session
//!
//! Produces and maintains exactly one authenticated session, absorbing
//! connection-layer failures. Connect attempts retry with exponential
//! backoff under a per-attempt timeout; a background health loop probes the
//! link and triggers reconnection with the last-known endpoint. The whole
//! connect/reconnect sequence is serialized by an async mutex so at most one
//! attempt is ever in flight.
//!
//! Error policy: `connect` and `execute_command` surface typed errors to the
//! caller. Health-probe and reconnection failures never propagate; they are
//! logged, drive the state machine (`Reconnecting` / `Error`), and the loop
//! keeps retrying.

use super::{DeviceEndpoint, DeviceError, DeviceSession};
use crate::config::ConnectionConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Deadline for the lightweight health probe read.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for a single device command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Bounded wait for background tasks to wind down during disconnect.
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection lifecycle. Commands are only issued in `Authenticated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticated,
    Reconnecting,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Authenticated => write!(f, "authenticated"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Commands the manager knows how to issue.
///
/// The command set is closed: an unknown command cannot be constructed, and
/// `SetTime` carries its argument by type, so the malformed-command failure
/// mode is unrepresentable.
#[derive(Debug, Clone, Copy)]
pub enum Command {
    GetTime,
    SetTime(DateTime<Utc>),
}

impl Command {
    /// Stable name for logs and timeout errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetTime => "get_time",
            Self::SetTime(_) => "set_time",
        }
    }
}

/// Result of a successfully transported command.
#[derive(Debug, Clone, Copy)]
pub enum CommandOutput {
    /// Terminal clock reading (`GetTime`)
    Time(DateTime<Utc>),
    /// Whether the terminal accepted the write (`SetTime`)
    Ack(bool),
}

/// Point-in-time copy of the manager's externally visible state.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub authenticated: bool,
    pub health_monitoring: bool,
}

/// Manages the single session to one terminal.
pub struct DeviceManager {
    config: ConnectionConfig,
    /// The live session handle. Exclusively owned; callers go through the
    /// manager's operations, never the handle.
    session: Mutex<Box<dyn DeviceSession>>,
    state: RwLock<ConnectionState>,
    /// Last-known endpoint, kept for reconnection.
    endpoint: RwLock<Option<DeviceEndpoint>>,
    /// Admits one connect/reconnect sequence at a time.
    connect_lock: Mutex<()>,
    /// Interrupts backoff sleeps; replaced with a fresh token after each
    /// disconnect so the manager remains reusable.
    shutdown: RwLock<CancellationToken>,
    health_cancel: Mutex<Option<CancellationToken>>,
    health_task: Mutex<Option<JoinHandle<()>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceManager {
    /// Wrap a session in a manager. The session starts disconnected; call
    /// [`connect`](Self::connect) to bring it up.
    pub fn new(session: Box<dyn DeviceSession>, config: ConnectionConfig) -> Self {
        Self {
            config,
            session: Mutex::new(session),
            state: RwLock::new(ConnectionState::Disconnected),
            endpoint: RwLock::new(None),
            connect_lock: Mutex::new(()),
            shutdown: RwLock::new(CancellationToken::new()),
            health_cancel: Mutex::new(None),
            health_task: Mutex::new(None),
            reconnect_task: Mutex::new(None),
        }
    }

    /// Connect and authenticate, retrying with exponential backoff.
    ///
    /// Runs the full sequence under the connection lock. Each attempt:
    /// transport connect under `connect_timeout`, then credential
    /// verification (an authentication failure consumes a retry slot like
    /// any other failure), then device enable. Success starts the health
    /// loop and leaves the state `Authenticated`. Exhausting the retry
    /// budget leaves the state `Error` and returns the last observed error.
    pub async fn connect(
        self: &Arc<Self>,
        endpoint: DeviceEndpoint,
    ) -> Result<(), DeviceError> {
        let cancel = self.shutdown.read().await.clone();
        let _guard = self.connect_lock.lock().await;
        *self.endpoint.write().await = Some(endpoint.clone());

        info!(
            endpoint = %endpoint.location(),
            timeout_secs = self.config.connect_timeout.as_secs(),
            "Connecting to terminal"
        );

        let mut last_error: Option<DeviceError> = None;

        for attempt in 0..self.config.max_retry_attempts {
            if cancel.is_cancelled() {
                debug!("Connect sequence interrupted by shutdown");
                break;
            }

            self.set_state(ConnectionState::Connecting).await;
            info!(
                attempt = attempt + 1,
                max_attempts = self.config.max_retry_attempts,
                endpoint = %endpoint.location(),
                "Connection attempt"
            );

            match self.attempt_once(&endpoint).await {
                Ok(()) => {
                    self.set_state(ConnectionState::Authenticated).await;
                    info!(
                        endpoint = %endpoint.location(),
                        attempt = attempt + 1,
                        "Terminal session authenticated"
                    );
                    self.start_health_monitor().await;
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        endpoint = %endpoint.location(),
                        error = %e,
                        "Connection attempt failed"
                    );
                    last_error = Some(e);
                }
            }

            // Clean up whatever the failed attempt left half-open.
            self.session.lock().await.disconnect().await;

            if attempt + 1 < self.config.max_retry_attempts {
                let delay = u64::from(self.config.retry_backoff_base).saturating_pow(attempt);
                info!(delay_secs = delay, "Backing off before next attempt");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Backoff interrupted by shutdown");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                }
            }
        }

        self.set_state(ConnectionState::Error).await;
        let err = last_error.unwrap_or_else(|| DeviceError::Connection {
            address: endpoint.address.clone(),
            port: endpoint.port,
            reason: "connection failed after all retry attempts".to_string(),
        });
        error!(
            endpoint = %endpoint.location(),
            max_attempts = self.config.max_retry_attempts,
            error = %err,
            "All connection attempts failed"
        );
        Err(err)
    }

    /// One connect + authenticate + enable pass.
    async fn attempt_once(&self, endpoint: &DeviceEndpoint) -> Result<(), DeviceError> {
        let mut session = self.session.lock().await;

        match timeout(self.config.connect_timeout, session.connect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(DeviceError::Timeout {
                    operation: "connect",
                    timeout: self.config.connect_timeout,
                })
            }
        }
        self.set_state(ConnectionState::Connected).await;

        // Authentication inherits the surrounding attempt; no separate
        // timeout beyond what the session's own I/O enforces.
        match session.verify(&endpoint.user, &endpoint.secret).await {
            Ok(true) => {
                session.enable().await;
                Ok(())
            }
            Ok(false) => Err(DeviceError::Authentication {
                address: endpoint.address.clone(),
                reason: "credentials rejected".to_string(),
            }),
            Err(e) if e.is_authentication() => Err(e),
            Err(e) => Err(DeviceError::Authentication {
                address: endpoint.address.clone(),
                reason: e.to_string(),
            }),
        }
    }

    /// Tear down the session and stop monitoring. Idempotent.
    pub async fn disconnect(&self) {
        // Interrupt any in-flight backoff first so a concurrent connect
        // releases the connection lock promptly.
        self.shutdown.read().await.cancel();
        self.stop_health_monitor().await;

        let _guard = self.connect_lock.lock().await;
        self.session.lock().await.disconnect().await;
        *self.endpoint.write().await = None;
        self.set_state(ConnectionState::Disconnected).await;

        // Fresh token so the manager can connect again later.
        *self.shutdown.write().await = CancellationToken::new();
        info!("Terminal disconnected");
    }

    /// Probe the session with a lightweight clock read.
    ///
    /// False immediately unless `Authenticated`; otherwise true iff the read
    /// completes within the probe deadline.
    pub async fn test_connection(&self) -> bool {
        if !self.is_connected().await {
            return false;
        }

        let mut session = self.session.lock().await;
        match timeout(PROBE_TIMEOUT, session.get_time()).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "Connection probe failed");
                false
            }
            Err(_) => {
                warn!(
                    timeout_secs = PROBE_TIMEOUT.as_secs(),
                    "Connection probe timed out"
                );
                false
            }
        }
    }

    /// Execute a command against the authenticated session.
    ///
    /// Fails fast with a not-connected error (zero device I/O) unless the
    /// state is `Authenticated`. Each command is bounded by a fixed deadline;
    /// a timeout is returned as-is; retry policy belongs to the caller.
    pub async fn execute_command(&self, command: Command) -> Result<CommandOutput, DeviceError> {
        if !self.is_connected().await {
            let address = self
                .endpoint
                .read()
                .await
                .as_ref()
                .map(|e| e.location());
            return Err(DeviceError::NotConnected { address });
        }

        debug!(command = command.name(), "Executing terminal command");
        let mut session = self.session.lock().await;

        let result = match command {
            Command::GetTime => timeout(COMMAND_TIMEOUT, session.get_time())
                .await
                .map(|r| r.map(CommandOutput::Time)),
            Command::SetTime(target) => timeout(COMMAND_TIMEOUT, session.set_time(target))
                .await
                .map(|r| r.map(CommandOutput::Ack)),
        };

        match result {
            Ok(Ok(output)) => {
                debug!(command = command.name(), "Command completed");
                Ok(output)
            }
            Ok(Err(e)) => {
                error!(command = command.name(), error = %e, "Command failed");
                Err(e)
            }
            Err(_) => {
                error!(
                    command = command.name(),
                    timeout_secs = COMMAND_TIMEOUT.as_secs(),
                    "Command timed out"
                );
                Err(DeviceError::Timeout {
                    operation: command.name(),
                    timeout: COMMAND_TIMEOUT,
                })
            }
        }
    }

    /// True iff the session is authenticated and ready for commands.
    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Authenticated
    }

    /// Current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Snapshot of state, endpoint, and monitoring liveness.
    pub async fn snapshot(&self) -> ConnectionSnapshot {
        let state = *self.state.read().await;
        let endpoint = self.endpoint.read().await.clone();
        let health_monitoring = self
            .health_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished());
        ConnectionSnapshot {
            state,
            address: endpoint.as_ref().map(|e| e.address.clone()),
            port: endpoint.as_ref().map(|e| e.port),
            authenticated: state == ConnectionState::Authenticated,
            health_monitoring,
        }
    }

    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    // ------------------------------------------------------------------
    // Health monitoring
    // ------------------------------------------------------------------

    /// Start the health loop if it is not already running.
    ///
    /// Awaited from `connect` with the connection lock held, so a disconnect
    /// that follows the connect cannot observe an empty task slot and leave
    /// a stray loop behind.
    async fn start_health_monitor(self: &Arc<Self>) {
        let mut task_slot = self.health_task.lock().await;
        if task_slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        // A concurrent disconnect cancels before it stops monitoring; once
        // the token reads cancelled here, the slot must stay empty.
        if self.shutdown.read().await.is_cancelled() {
            debug!("Shutdown in progress, not starting health monitoring");
            return;
        }

        let cancel = CancellationToken::new();
        *self.health_cancel.lock().await = Some(cancel.clone());

        let manager = Arc::clone(self);
        *task_slot = Some(tokio::spawn(async move {
            manager.health_loop(cancel).await;
        }));

        info!(
            interval_secs = self.config.health_check_interval.as_secs(),
            "Health monitoring started"
        );
    }

    /// Stop the health loop and any in-flight reconnect task.
    async fn stop_health_monitor(&self) {
        if let Some(cancel) = self.health_cancel.lock().await.take() {
            cancel.cancel();
        }

        if let Some(handle) = self.health_task.lock().await.take() {
            if timeout(TASK_STOP_TIMEOUT, handle).await.is_err() {
                warn!("Health loop did not stop within grace period");
            }
        }
        if let Some(handle) = self.reconnect_task.lock().await.take() {
            if timeout(TASK_STOP_TIMEOUT, handle).await.is_err() {
                warn!("Reconnect task did not stop within grace period");
            }
        }
        debug!("Health monitoring stopped");
    }

    /// Periodic probe; failed probes hand off to the reconnect task.
    ///
    /// Reconnection failure is never fatal here; the loop keeps probing and
    /// will trigger another reconnect on the next failed tick.
    async fn health_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.health_check_interval) => {}
            }

            if self.test_connection().await {
                debug!("Connection probe ok");
                continue;
            }

            warn!("Health check failed, initiating reconnection");
            self.set_state(ConnectionState::Reconnecting).await;
            self.spawn_reconnect().await;
        }
    }

    /// Spawn the reconnect task unless one is already in flight.
    async fn spawn_reconnect(self: &Arc<Self>) {
        let mut slot = self.reconnect_task.lock().await;
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Reconnect already in progress");
            return;
        }

        let manager = Arc::clone(self);
        *slot = Some(tokio::spawn(Self::reconnect_once(manager)));
    }

    /// Boxed reconnect body. Kept as a separate non-async fn returning a
    /// boxed future to break the recursive opaque-type cycle
    /// (connect -> health loop -> reconnect -> connect).
    fn reconnect_once(
        manager: Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            let endpoint = manager.endpoint.read().await.clone();
            let Some(endpoint) = endpoint else {
                error!("Cannot reconnect: no stored endpoint");
                manager.set_state(ConnectionState::Error).await;
                return;
            };

            match manager.connect(endpoint.clone()).await {
                Ok(()) => info!(endpoint = %endpoint.location(), "Reconnection successful"),
                Err(e) => {
                    error!(
                        endpoint = %endpoint.location(),
                        error = %e,
                        "Reconnection failed"
                    );
                    manager.set_state(ConnectionState::Error).await;
                }
            }
        })
    }
}
