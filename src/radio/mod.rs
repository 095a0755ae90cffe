//! # Radio Module
//!
//! The narrow contract the session engine needs from a platform radio stack.
//!
//! Requests on [`Radio`] never block: they are accepted or rejected
//! immediately, and their outcome arrives later as a [`RadioEvent`] on the
//! channel the radio was created with. Every link-scoped event carries the
//! [`LinkId`] it belongs to so that the session can discard events from
//! links it has already released.

pub mod btle;

use std::fmt;

use bytes::Bytes;
use thiserror::Error;
use uuid::Uuid;

use crate::discovery::DiscoveredDevice;

/// Identity of one opened link
///
/// Issued by the radio for every `open_link` call and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// A GATT service and the characteristics it exposes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

/// Everything the radio reports back asynchronously
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    /// An advertisement was received while scanning
    Sighting(DiscoveredDevice),
    /// The scan stopped on its own
    ScanFailed { reason: String },
    /// The link finished connecting
    Connected { link: LinkId },
    /// The link dropped, or failed to connect (`reason` is set on failure)
    Disconnected { link: LinkId, reason: Option<String> },
    /// Service discovery finished
    ServicesDiscovered {
        link: LinkId,
        result: Result<Vec<ServiceInfo>, String>,
    },
    /// Enabling notifications was acknowledged (or rejected)
    Subscribed {
        link: LinkId,
        characteristic: Uuid,
        result: Result<(), String>,
    },
    /// A notification arrived on a subscribed characteristic
    Notification {
        link: LinkId,
        characteristic: Uuid,
        value: Bytes,
    },
    /// A characteristic write failed
    WriteFailed { link: LinkId, reason: String },
}

impl RadioEvent {
    /// Link the event refers to, if it is link-scoped
    pub fn link(&self) -> Option<LinkId> {
        match self {
            RadioEvent::Sighting(_) | RadioEvent::ScanFailed { .. } => None,
            RadioEvent::Connected { link }
            | RadioEvent::Disconnected { link, .. }
            | RadioEvent::ServicesDiscovered { link, .. }
            | RadioEvent::Subscribed { link, .. }
            | RadioEvent::Notification { link, .. }
            | RadioEvent::WriteFailed { link, .. } => Some(*link),
        }
    }
}

/// Radio stack errors
#[derive(Debug, Error)]
pub enum RadioError {
    #[error("Error communicating with radio (btleplug): {0}")]
    Btle(#[from] btleplug::Error),

    #[error("No bluetooth adapter available")]
    NoAdapter,

    #[error("Radio permission denied")]
    PermissionDenied,

    #[error("Unknown link {0}")]
    UnknownLink(LinkId),

    #[error("Radio request rejected: {0}")]
    Rejected(String),
}

/// Platform radio operations used by the session engine
pub trait Radio: Send {
    /// Begin reporting `Sighting` events
    fn start_scan(&mut self) -> Result<(), RadioError>;

    /// Stop reporting sightings
    fn stop_scan(&mut self) -> Result<(), RadioError>;

    /// Start connecting to `address`, reporting `Connected` or `Disconnected`
    fn open_link(&mut self, address: &str) -> Result<LinkId, RadioError>;

    /// Disconnect and release every resource held for `link`
    ///
    /// Must be idempotent: closing an unknown or already closed link is a no-op.
    fn close_link(&mut self, link: LinkId);

    /// Start service discovery, reporting `ServicesDiscovered`
    fn discover_services(&mut self, link: LinkId) -> Result<(), RadioError>;

    /// Enable notifications, reporting `Subscribed` and then `Notification`s
    fn subscribe(&mut self, link: LinkId, characteristic: Uuid) -> Result<(), RadioError>;

    /// Write a value, reporting `WriteFailed` only on failure
    fn write_characteristic(
        &mut self,
        link: LinkId,
        characteristic: Uuid,
        value: Bytes,
    ) -> Result<(), RadioError>;
}
