//! Session states and radio permissions.

use std::fmt;

use serde::Serialize;

/// Lifecycle of the single live link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Scanning,
    Connecting(String),
    DiscoveringServices(String),
    Subscribing(String),
    Ready(String),
    Disconnecting,
}

impl SessionState {
    /// Address of the device the state refers to, if any
    pub fn address(&self) -> Option<&str> {
        match self {
            SessionState::Connecting(address)
            | SessionState::DiscoveringServices(address)
            | SessionState::Subscribing(address)
            | SessionState::Ready(address) => Some(address),
            SessionState::Idle | SessionState::Scanning | SessionState::Disconnecting => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, SessionState::Ready(_))
    }

    /// Whether a connect sequence is in flight
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting(_)
                | SessionState::DiscoveringServices(_)
                | SessionState::Subscribing(_)
        )
    }
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::Scanning => f.write_str("scanning"),
            SessionState::Connecting(address) => write!(f, "connecting to {}", address),
            SessionState::DiscoveringServices(address) => {
                write!(f, "discovering services on {}", address)
            }
            SessionState::Subscribing(address) => write!(f, "subscribing to {}", address),
            SessionState::Ready(address) => write!(f, "ready ({})", address),
            SessionState::Disconnecting => f.write_str("disconnecting"),
        }
    }
}

/// Radio permissions the operator may withhold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Scan,
    Connect,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Scan => f.write_str("bluetooth scan"),
            Permission::Connect => f.write_str("bluetooth connect"),
        }
    }
}

/// Currently granted radio permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub scan: bool,
    pub connect: bool,
}

impl Permissions {
    pub fn granted(&self, permission: Permission) -> bool {
        match permission {
            Permission::Scan => self.scan,
            Permission::Connect => self.connect,
        }
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            scan: true,
            connect: true,
        }
    }
}
