//! Connection lifecycle
//!
//! ```text
//! Disconnected --connect--> Connecting --link up--> Connected --discover--> Discovering
//!      ^                        |                                               |
//!      +------- link error -----+                      discovery ok --> Ready <-+
//!      +------- link down / disconnect / discovery failure (any state) ---------+
//! ```

use crate::address::BdAddr;
use crate::config::{DEFAULT_MTU, WRITE_HEADER_LEN};
use crate::error::{GattError, GattResult};

/// Defines the connection state of a GATT controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Discovering,
    Ready,
}

/// Link state plus the negotiated MTU
#[derive(Debug)]
pub(crate) struct Link {
    state: ConnectionState,
    address: Option<BdAddr>,
    mtu: u16,
}

impl Link {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            address: None,
            mtu: DEFAULT_MTU,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn address(&self) -> Option<BdAddr> {
        self.address
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    /// Payload bytes that fit in one write at the current MTU
    pub fn fragment_size(&self) -> usize {
        fragment_size(self.mtu)
    }

    pub fn set_mtu(&mut self, mtu: u16) {
        self.mtu = mtu;
    }

    pub fn begin_connect(&mut self, address: BdAddr) -> GattResult<()> {
        if self.state != ConnectionState::Disconnected {
            return Err(GattError::InvalidState(self.state));
        }
        self.state = ConnectionState::Connecting;
        self.address = Some(address);
        Ok(())
    }

    /// Returns `false` if the link was not being opened.
    pub fn link_up(&mut self) -> bool {
        if self.state != ConnectionState::Connecting {
            return false;
        }
        self.state = ConnectionState::Connected;
        true
    }

    pub fn begin_discovery(&mut self) -> GattResult<()> {
        match self.state {
            ConnectionState::Connected | ConnectionState::Ready => {
                self.state = ConnectionState::Discovering;
                Ok(())
            }
            other => Err(GattError::InvalidState(other)),
        }
    }

    /// Returns `false` if no discovery was running.
    pub fn discovery_succeeded(&mut self) -> bool {
        if self.state != ConnectionState::Discovering {
            return false;
        }
        self.state = ConnectionState::Ready;
        true
    }

    /// Back to `Disconnected` with the default MTU. Returns the address of
    /// the link that was torn down, or `None` if already disconnected.
    pub fn reset(&mut self) -> Option<BdAddr> {
        if self.state == ConnectionState::Disconnected {
            return None;
        }
        self.state = ConnectionState::Disconnected;
        self.mtu = DEFAULT_MTU;
        self.address.take()
    }
}

/// `max(1, mtu - 3)`
pub fn fragment_size(mtu: u16) -> usize {
    mtu.saturating_sub(WRITE_HEADER_LEN).max(1) as usize
}
