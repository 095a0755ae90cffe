//! # Discovery Cache
//!
//! Aggregates advertisement sightings into a stable, deduplicated device list.
//!
//! BLE advertisements arrive many times per second per device. The cache keys
//! sightings by address, keeps first-seen order, and only reports a change
//! when a sighting is new or its name or signal strength differs.

use indexmap::IndexMap;
use serde::Serialize;

/// A device seen while scanning
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredDevice {
    /// Advertised name, if any
    pub name: Option<String>,
    /// Stable radio address
    pub address: String,
    /// Received signal strength in dBm
    pub signal_strength: i32,
}

impl DiscoveredDevice {
    pub fn new(name: Option<String>, address: impl Into<String>, signal_strength: i32) -> Self {
        Self {
            name,
            address: address.into(),
            signal_strength,
        }
    }
}

/// Deduplicating device list keyed by address
#[derive(Debug, Default)]
pub struct DiscoveryCache {
    devices: IndexMap<String, DiscoveredDevice>,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting
    ///
    /// # Returns
    ///
    /// * `bool` - `true` when the list changed and should be republished
    pub fn observe(&mut self, sighting: DiscoveredDevice) -> bool {
        match self.devices.get_mut(&sighting.address) {
            Some(existing) if *existing == sighting => false,
            Some(existing) => {
                // Updated in place, keeping discovery order
                *existing = sighting;
                true
            }
            None => {
                self.devices.insert(sighting.address.clone(), sighting);
                true
            }
        }
    }

    /// Forget every device
    pub fn clear(&mut self) {
        self.devices.clear();
    }

    /// Snapshot of the devices in discovery order
    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        self.devices.values().cloned().collect()
    }

    pub fn get(&self, address: &str) -> Option<&DiscoveredDevice> {
        self.devices.get(address)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
