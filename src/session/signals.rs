//! Observer-facing outputs of the session.
//!
//! Status values (state, connected address, device list) live in `watch`
//! cells: a late subscriber immediately sees the current value. Raw lines go
//! through a bounded `broadcast` channel: the session never waits on a slow
//! subscriber, which instead loses the oldest unread lines.

use tokio::sync::{broadcast, watch};

use super::state::SessionState;
use crate::discovery::DiscoveredDevice;

/// Default capacity of the raw line channel
pub const DEFAULT_LINE_BUFFER: usize = 64;

#[derive(Debug)]
pub struct Signals {
    state: watch::Sender<SessionState>,
    connected: watch::Sender<Option<String>>,
    devices: watch::Sender<Vec<DiscoveredDevice>>,
    lines: broadcast::Sender<String>,
}

impl Signals {
    pub fn new(line_buffer: usize) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (connected, _) = watch::channel(None);
        let (devices, _) = watch::channel(Vec::new());
        let (lines, _) = broadcast::channel(line_buffer.max(1));
        Self {
            state,
            connected,
            devices,
            lines,
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Address of the ready device, `None` while disconnected
    pub fn subscribe_connected(&self) -> watch::Receiver<Option<String>> {
        self.connected.subscribe()
    }

    pub fn subscribe_devices(&self) -> watch::Receiver<Vec<DiscoveredDevice>> {
        self.devices.subscribe()
    }

    pub fn subscribe_lines(&self) -> broadcast::Receiver<String> {
        self.lines.subscribe()
    }

    pub fn connected(&self) -> Option<String> {
        self.connected.borrow().clone()
    }

    pub(crate) fn publish_state(&self, state: SessionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    pub(crate) fn publish_connected(&self, address: Option<String>) {
        self.connected.send_replace(address);
    }

    pub(crate) fn publish_devices(&self, devices: Vec<DiscoveredDevice>) {
        self.devices.send_replace(devices);
    }

    pub(crate) fn publish_line(&self, line: String) {
        // No subscribers is fine; lines are best-effort
        let _ = self.lines.send(line);
    }
}

impl Default for Signals {
    fn default() -> Self {
        Self::new(DEFAULT_LINE_BUFFER)
    }
}
