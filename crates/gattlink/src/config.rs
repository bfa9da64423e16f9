//! Controller configuration

use std::time::Duration;

/// Default ATT MTU before any exchange
pub const DEFAULT_MTU: u16 = 23;
/// Largest ATT MTU a peer may negotiate
pub const MAX_MTU: u16 = 517;
/// ATT write request header (opcode + handle)
pub const WRITE_HEADER_LEN: u16 = 3;
/// Transaction timeout used when none is configured (ms)
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 30000;

/// Configuration for a [`GattController`](crate::gatt::GattController)
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// MTU to request automatically once discovery succeeds
    pub requested_mtu: Option<u16>,
    /// How long one submission may stay in flight before it is failed with
    /// [`GattError::Timeout`](crate::error::GattError::Timeout). `None`
    /// disables the watchdog.
    pub operation_timeout: Option<Duration>,
    /// How often the dispatcher checks the in-flight operation for expiry
    pub watchdog_interval: Duration,
    /// Name of the dispatcher thread
    pub thread_name: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            requested_mtu: None,
            operation_timeout: Some(Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS)),
            watchdog_interval: Duration::from_millis(250),
            thread_name: "gattlink-dispatch".into(),
        }
    }
}

impl ControllerConfig {
    /// MTU to request once discovery succeeds.
    ///
    /// Values outside `DEFAULT_MTU..=MAX_MTU` are clamped into that range.
    /// [`GattController::request_mtu`](crate::GattController::request_mtu)
    /// rejects them instead, since there the caller gets an error back.
    pub fn with_requested_mtu(mut self, mtu: u16) -> Self {
        self.requested_mtu = Some(mtu.clamp(DEFAULT_MTU, MAX_MTU));
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}
