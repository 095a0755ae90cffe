//! # Session Module
//!
//! Owns the single live radio link and drives it through
//! `Scanning → Connecting → DiscoveringServices → Subscribing → Ready`.
//!
//! This module handles:
//! - Scanning and feeding sightings into the discovery cache
//! - Connect/disconnect, always releasing the previous link first
//! - Service discovery and the notification subscription handshake
//! - Splitting notifications into lines for the telemetry pipeline
//! - Encoding and writing operator commands
//!
//! Radio callbacks are delivered as [`RadioEvent`]s to [`Session::handle_event`].
//! Events from any link other than the current one are dropped, which is what
//! cancels a superseded connect sequence.

mod signals;
mod state;

pub use signals::{Signals, DEFAULT_LINE_BUFFER};
pub use state::{Permission, Permissions, SessionState};

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::discovery::{DiscoveredDevice, DiscoveryCache};
use crate::error::{Result, SoilLinkError};
use crate::protocol::decoder::decode_lines;
use crate::protocol::encoder::{encode_command, Command};
use crate::radio::{LinkId, Radio, RadioEvent, ServiceInfo};

/// Sensor service
pub const DEFAULT_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9f);

/// Characteristic the sensor notifies lines on
pub const DEFAULT_NOTIFY_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9f);

/// Characteristic commands are written to
pub const DEFAULT_WRITE_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9f);

/// Minimum interval between unforced scan restarts
pub const DEFAULT_SCAN_THROTTLE: Duration = Duration::from_millis(5000);

/// GATT layout of the sensor
///
/// Notify and write may name the same characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattProfile {
    pub service: Uuid,
    pub notify: Uuid,
    pub write: Uuid,
}

impl Default for GattProfile {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE_UUID,
            notify: DEFAULT_NOTIFY_UUID,
            write: DEFAULT_WRITE_UUID,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub profile: GattProfile,
    /// Zero disables throttling
    pub scan_throttle: Duration,
    pub line_buffer: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            profile: GattProfile::default(),
            scan_throttle: DEFAULT_SCAN_THROTTLE,
            line_buffer: DEFAULT_LINE_BUFFER,
        }
    }
}

/// Outcome of a scan request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStart {
    Started,
    /// An unforced restart came too soon after the previous one
    Throttled,
    /// A link is live; scanning is not available
    Busy,
}

#[derive(Debug)]
struct ActiveLink {
    id: LinkId,
    address: String,
}

/// The device session state machine
pub struct Session<R: Radio> {
    radio: R,
    options: SessionOptions,
    state: SessionState,
    link: Option<ActiveLink>,
    discovery: DiscoveryCache,
    permissions: Permissions,
    last_scan_start: Option<Instant>,
    signals: Signals,
}

impl<R: Radio> std::fmt::Debug for Session<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("link", &self.link)
            .field("permissions", &self.permissions)
            .finish_non_exhaustive()
    }
}

impl<R: Radio> Session<R> {
    pub fn new(radio: R, options: SessionOptions) -> Self {
        let signals = Signals::new(options.line_buffer);
        Self {
            radio,
            options,
            state: SessionState::Idle,
            link: None,
            discovery: DiscoveryCache::new(),
            permissions: Permissions::default(),
            last_scan_start: None,
            signals,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    pub fn profile(&self) -> &GattProfile {
        &self.options.profile
    }

    /// Link whose events are currently accepted
    pub fn current_link(&self) -> Option<LinkId> {
        self.link.as_ref().map(|link| link.id)
    }

    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        self.discovery.devices()
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn set_permissions(&mut self, permissions: Permissions) {
        self.permissions = permissions;
    }

    /// Start (or restart) scanning
    ///
    /// Clears the device list. Unforced restarts within the throttle
    /// interval of the previous start are skipped.
    ///
    /// # Errors
    ///
    /// Returns error if scan permission is missing or the radio rejects the scan
    pub fn start_scan(&mut self, force: bool) -> Result<ScanStart> {
        self.require(Permission::Scan)?;

        if !matches!(self.state, SessionState::Idle | SessionState::Scanning) {
            debug!("Not scanning while {}", self.state);
            return Ok(ScanStart::Busy);
        }

        if !force && !self.options.scan_throttle.is_zero() {
            if let Some(last) = self.last_scan_start {
                if last.elapsed() < self.options.scan_throttle {
                    debug!("Scan restart throttled");
                    return Ok(ScanStart::Throttled);
                }
            }
        }

        if self.state == SessionState::Scanning {
            if let Err(e) = self.radio.stop_scan() {
                warn!("Failed to stop previous scan: {}", e);
            }
        }

        self.discovery.clear();
        self.signals.publish_devices(Vec::new());

        if let Err(e) = self.radio.start_scan() {
            warn!("Failed to start scan: {}", e);
            self.set_state(SessionState::Idle);
            return Err(e.into());
        }

        self.last_scan_start = Some(Instant::now());
        self.set_state(SessionState::Scanning);
        info!("Scanning for devices");
        Ok(ScanStart::Started)
    }

    /// Stop scanning; no-op when not scanning
    pub fn stop_scan(&mut self) -> Result<()> {
        self.require(Permission::Scan)?;

        if self.state != SessionState::Scanning {
            return Ok(());
        }

        if let Err(e) = self.radio.stop_scan() {
            warn!("Failed to stop scan: {}", e);
        }
        self.set_state(SessionState::Idle);
        Ok(())
    }

    /// Connect to a device, superseding any scan or previous link
    ///
    /// # Returns
    ///
    /// * `Result<LinkId>` - The new link; the sequence continues via events
    ///
    /// # Errors
    ///
    /// Returns error if connect permission is missing or the radio refuses
    /// to open the link (the session is then idle)
    pub fn connect(&mut self, address: &str) -> Result<LinkId> {
        self.require(Permission::Connect)?;

        if self.state == SessionState::Scanning {
            if let Err(e) = self.radio.stop_scan() {
                warn!("Failed to stop scan: {}", e);
            }
        }

        if let Some(previous) = self.link.as_ref() {
            info!("Releasing {} ({}) before connecting", previous.id, previous.address);
        }
        self.release_link();
        self.signals.publish_connected(None);

        match self.radio.open_link(address) {
            Ok(id) => {
                info!("Connecting to {} on {}", address, id);
                self.link = Some(ActiveLink {
                    id,
                    address: address.to_string(),
                });
                self.set_state(SessionState::Connecting(address.to_string()));
                Ok(id)
            }
            Err(e) => {
                warn!("Failed to open link to {}: {}", address, e);
                self.set_state(SessionState::Idle);
                Err(e.into())
            }
        }
    }

    /// Stop scanning, release the link and return to idle
    pub fn disconnect(&mut self) -> Result<()> {
        self.require(Permission::Connect)?;

        if self.state == SessionState::Scanning {
            if let Err(e) = self.radio.stop_scan() {
                warn!("Failed to stop scan: {}", e);
            }
        }

        if self.link.is_some() {
            self.set_state(SessionState::Disconnecting);
            self.release_link();
            info!("Disconnected");
        }

        self.set_state(SessionState::Idle);
        self.signals.publish_connected(None);
        Ok(())
    }

    /// Encode and write free-form command text
    ///
    /// Replies arrive later as lines; nothing is awaited here.
    ///
    /// # Errors
    ///
    /// Returns error if the session is not ready, the text is blank, or the
    /// radio refuses the write
    pub fn send_command(&mut self, text: &str) -> Result<()> {
        self.require(Permission::Connect)?;

        let link = match (&self.state, &self.link) {
            (SessionState::Ready(_), Some(link)) => link.id,
            _ => return Err(SoilLinkError::NotReady),
        };

        let text = text.trim();
        let frame = encode_command(text, &[]).ok_or(SoilLinkError::EmptyCommand)?;

        self.radio
            .write_characteristic(link, self.options.profile.write, frame)
            .map_err(|e| {
                warn!("Failed to write command {:?}: {}", text, e);
                SoilLinkError::from(e)
            })?;

        debug!("Sent command {:?} on {}", text, link);
        Ok(())
    }

    /// Send a command from the device vocabulary
    pub fn send(&mut self, command: Command) -> Result<()> {
        self.send_command(&command.to_string())
    }

    /// Apply one radio event
    ///
    /// # Returns
    ///
    /// * `Vec<String>` - Lines decoded from a notification (empty otherwise)
    pub fn handle_event(&mut self, event: RadioEvent) -> Vec<String> {
        if let Some(link) = event.link() {
            if self.current_link() != Some(link) {
                debug!("Ignoring event from stale {}", link);
                return Vec::new();
            }
        }

        match event {
            RadioEvent::Sighting(device) => {
                if self.state == SessionState::Scanning && self.discovery.observe(device) {
                    self.signals.publish_devices(self.discovery.devices());
                }
            }
            RadioEvent::ScanFailed { reason } => {
                warn!("Scan failed: {}", reason);
                if self.state == SessionState::Scanning {
                    self.set_state(SessionState::Idle);
                }
            }
            RadioEvent::Connected { link } => self.on_connected(link),
            RadioEvent::Disconnected { reason, .. } => {
                match reason {
                    Some(reason) => warn!("Link lost: {}", reason),
                    None => info!("Link closed by device"),
                }
                self.release_link();
                self.set_state(SessionState::Idle);
                self.signals.publish_connected(None);
            }
            RadioEvent::ServicesDiscovered { link, result } => match result {
                Ok(services) => self.on_services(link, &services),
                Err(reason) => {
                    if self.state.is_connecting() {
                        self.abort(&format!("service discovery failed: {}", reason));
                    }
                }
            },
            RadioEvent::Subscribed {
                characteristic,
                result,
                ..
            } => self.on_subscribed(characteristic, result),
            RadioEvent::Notification {
                characteristic,
                value,
                ..
            } => {
                if !self.state.is_ready() || characteristic != self.options.profile.notify {
                    debug!("Dropping notification on {} while {}", characteristic, self.state);
                    return Vec::new();
                }

                let lines = decode_lines(&value);
                for line in &lines {
                    debug!("Received line: {}", line);
                    self.signals.publish_line(line.clone());
                }
                return lines;
            }
            RadioEvent::WriteFailed { reason, .. } => {
                if self.state.is_connecting() {
                    self.abort(&format!("write failed: {}", reason));
                } else {
                    warn!("Write failed: {}", reason);
                }
            }
        }

        Vec::new()
    }

    fn on_connected(&mut self, link: LinkId) {
        let SessionState::Connecting(address) = &self.state else {
            debug!("Unexpected connect event while {}", self.state);
            return;
        };
        let address = address.clone();

        info!("Connected to {}; discovering services", address);
        match self.radio.discover_services(link) {
            Ok(()) => self.set_state(SessionState::DiscoveringServices(address)),
            Err(e) => self.abort(&format!("service discovery rejected: {}", e)),
        }
    }

    fn on_services(&mut self, link: LinkId, services: &[ServiceInfo]) {
        let SessionState::DiscoveringServices(address) = &self.state else {
            debug!("Unexpected services event while {}", self.state);
            return;
        };
        let address = address.clone();
        let profile = self.options.profile;

        let Some(service) = services.iter().find(|s| s.uuid == profile.service) else {
            self.abort(&format!("service {} not found", profile.service));
            return;
        };

        for characteristic in [profile.notify, profile.write] {
            if !service.characteristics.contains(&characteristic) {
                self.abort(&format!("characteristic {} not found", characteristic));
                return;
            }
        }

        info!("Subscribing to {} on {}", profile.notify, address);
        match self.radio.subscribe(link, profile.notify) {
            Ok(()) => self.set_state(SessionState::Subscribing(address)),
            Err(e) => self.abort(&format!("subscription rejected: {}", e)),
        }
    }

    fn on_subscribed(&mut self, characteristic: Uuid, result: std::result::Result<(), String>) {
        let SessionState::Subscribing(address) = &self.state else {
            debug!("Unexpected subscription event while {}", self.state);
            return;
        };
        if characteristic != self.options.profile.notify {
            debug!("Ignoring subscription of {}", characteristic);
            return;
        }
        let address = address.clone();

        match result {
            Ok(()) => {
                info!("Session ready on {}", address);
                self.set_state(SessionState::Ready(address.clone()));
                self.signals.publish_connected(Some(address));
            }
            Err(reason) => self.abort(&format!("subscription failed: {}", reason)),
        }
    }

    /// Abort the in-flight connect sequence after a link fault
    fn abort(&mut self, reason: &str) {
        match self.link.as_ref() {
            Some(link) => warn!("Connection to {} failed: {}", link.address, reason),
            None => warn!("Connection failed: {}", reason),
        }
        self.release_link();
        self.set_state(SessionState::Idle);
        self.signals.publish_connected(None);
    }

    fn release_link(&mut self) {
        if let Some(link) = self.link.take() {
            debug!("Closing {}", link.id);
            self.radio.close_link(link.id);
        }
    }

    fn require(&self, permission: Permission) -> Result<()> {
        if self.permissions.granted(permission) {
            return Ok(());
        }
        warn!("No {} permission", permission);
        Err(SoilLinkError::PermissionDenied(permission))
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("Session state: {} -> {}", self.state, state);
        }
        self.state = state.clone();
        self.signals.publish_state(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decoder::verify_checksum;
    use crate::radio::mocks::{Call, MockRadio};
    use bytes::Bytes;

    const ADDR_A: &str = "AA:BB:CC:DD:EE:01";
    const ADDR_B: &str = "AA:BB:CC:DD:EE:02";

    fn options() -> SessionOptions {
        SessionOptions {
            scan_throttle: Duration::ZERO,
            ..SessionOptions::default()
        }
    }

    fn new_session() -> (Session<MockRadio>, MockRadio) {
        let radio = MockRadio::new();
        (Session::new(radio.clone(), options()), radio)
    }

    fn sensor_services() -> Vec<ServiceInfo> {
        let profile = GattProfile::default();
        vec![ServiceInfo {
            uuid: profile.service,
            characteristics: vec![profile.notify, profile.write],
        }]
    }

    fn drive_to_ready(session: &mut Session<MockRadio>, address: &str) -> LinkId {
        let link = session.connect(address).unwrap();
        session.handle_event(RadioEvent::Connected { link });
        session.handle_event(RadioEvent::ServicesDiscovered {
            link,
            result: Ok(sensor_services()),
        });
        session.handle_event(RadioEvent::Subscribed {
            link,
            characteristic: DEFAULT_NOTIFY_UUID,
            result: Ok(()),
        });
        link
    }

    fn notification(link: LinkId, text: &str) -> RadioEvent {
        RadioEvent::Notification {
            link,
            characteristic: DEFAULT_NOTIFY_UUID,
            value: Bytes::from(text.to_string()),
        }
    }

    #[test]
    fn test_initial_state() {
        let (session, _) = new_session();
        assert_eq!(session.state(), &SessionState::Idle);
        assert_eq!(session.current_link(), None);
        assert_eq!(session.signals().connected(), None);
    }

    #[test]
    fn test_start_scan_clears_devices() {
        let (mut session, radio) = new_session();
        assert_eq!(session.start_scan(false).unwrap(), ScanStart::Started);
        session.handle_event(RadioEvent::Sighting(DiscoveredDevice::new(None, ADDR_A, -50)));
        assert_eq!(session.devices().len(), 1);

        assert_eq!(session.start_scan(true).unwrap(), ScanStart::Started);
        assert!(session.devices().is_empty());
        assert_eq!(session.state(), &SessionState::Scanning);
        assert_eq!(
            radio.get_calls(),
            vec![Call::StartScan, Call::StopScan, Call::StartScan]
        );
    }

    #[test]
    fn test_scan_throttle() {
        let radio = MockRadio::new();
        let mut session = Session::new(radio.clone(), SessionOptions::default());

        assert_eq!(session.start_scan(false).unwrap(), ScanStart::Started);
        assert_eq!(session.start_scan(false).unwrap(), ScanStart::Throttled);
        assert_eq!(session.start_scan(true).unwrap(), ScanStart::Started);
    }

    #[test]
    fn test_sightings_published_on_change_only() {
        let (mut session, _) = new_session();
        let mut devices = session.signals().subscribe_devices();
        session.start_scan(false).unwrap();
        devices.borrow_and_update();

        let sighting = DiscoveredDevice::new(Some("Sensor".to_string()), ADDR_A, -50);
        session.handle_event(RadioEvent::Sighting(sighting.clone()));
        assert!(devices.has_changed().unwrap());
        assert_eq!(devices.borrow_and_update().len(), 1);

        session.handle_event(RadioEvent::Sighting(sighting));
        assert!(!devices.has_changed().unwrap());
    }

    #[test]
    fn test_sightings_ignored_when_not_scanning() {
        let (mut session, _) = new_session();
        session.handle_event(RadioEvent::Sighting(DiscoveredDevice::new(None, ADDR_A, -50)));
        assert!(session.devices().is_empty());
    }

    #[test]
    fn test_stop_scan_idempotent() {
        let (mut session, radio) = new_session();
        session.stop_scan().unwrap();
        assert!(radio.get_calls().is_empty());

        session.start_scan(false).unwrap();
        session.stop_scan().unwrap();
        session.stop_scan().unwrap();
        assert_eq!(radio.get_calls(), vec![Call::StartScan, Call::StopScan]);
        assert_eq!(session.state(), &SessionState::Idle);
    }

    #[test]
    fn test_scan_busy_while_linked() {
        let (mut session, _) = new_session();
        session.connect(ADDR_A).unwrap();
        assert_eq!(session.start_scan(true).unwrap(), ScanStart::Busy);
        assert_eq!(session.state(), &SessionState::Connecting(ADDR_A.to_string()));
    }

    #[test]
    fn test_full_connect_sequence() {
        let (mut session, radio) = new_session();
        let mut states = session.signals().subscribe_state();

        session.start_scan(false).unwrap();
        let link = session.connect(ADDR_A).unwrap();
        assert_eq!(session.state(), &SessionState::Connecting(ADDR_A.to_string()));

        session.handle_event(RadioEvent::Connected { link });
        assert_eq!(
            session.state(),
            &SessionState::DiscoveringServices(ADDR_A.to_string())
        );

        session.handle_event(RadioEvent::ServicesDiscovered {
            link,
            result: Ok(sensor_services()),
        });
        assert_eq!(session.state(), &SessionState::Subscribing(ADDR_A.to_string()));
        // Not ready until the subscription is acknowledged
        assert_eq!(session.signals().connected(), None);

        session.handle_event(RadioEvent::Subscribed {
            link,
            characteristic: DEFAULT_NOTIFY_UUID,
            result: Ok(()),
        });
        assert_eq!(session.state(), &SessionState::Ready(ADDR_A.to_string()));
        assert_eq!(session.signals().connected(), Some(ADDR_A.to_string()));
        assert_eq!(*states.borrow_and_update(), SessionState::Ready(ADDR_A.to_string()));

        assert_eq!(
            radio.get_calls(),
            vec![
                Call::StartScan,
                Call::StopScan,
                Call::OpenLink(ADDR_A.to_string(), link),
                Call::DiscoverServices(link),
                Call::Subscribe(link, DEFAULT_NOTIFY_UUID),
            ]
        );
    }

    #[test]
    fn test_connect_supersedes_previous_link() {
        let (mut session, radio) = new_session();
        let link_a = session.connect(ADDR_A).unwrap();
        let link_b = session.connect(ADDR_B).unwrap();

        assert_ne!(link_a, link_b);
        assert_eq!(session.current_link(), Some(link_b));
        assert!(radio.get_calls().contains(&Call::CloseLink(link_a)));
        assert_eq!(session.state(), &SessionState::Connecting(ADDR_B.to_string()));
    }

    #[test]
    fn test_stale_callbacks_ignored() {
        let (mut session, radio) = new_session();
        let link_a = session.connect(ADDR_A).unwrap();
        let link_b = session.connect(ADDR_B).unwrap();
        radio.clear_calls();

        // Late callbacks for A's link
        session.handle_event(RadioEvent::Connected { link: link_a });
        session.handle_event(RadioEvent::ServicesDiscovered {
            link: link_a,
            result: Ok(sensor_services()),
        });
        session.handle_event(RadioEvent::Subscribed {
            link: link_a,
            characteristic: DEFAULT_NOTIFY_UUID,
            result: Ok(()),
        });
        session.handle_event(RadioEvent::Disconnected {
            link: link_a,
            reason: Some("timeout".to_string()),
        });
        assert!(session.handle_event(notification(link_a, "stale\n")).is_empty());

        assert_eq!(session.state(), &SessionState::Connecting(ADDR_B.to_string()));
        assert_eq!(session.current_link(), Some(link_b));
        assert_eq!(session.signals().connected(), None);
        assert!(radio.get_calls().is_empty());

        // B's own sequence still completes
        session.handle_event(RadioEvent::Connected { link: link_b });
        session.handle_event(RadioEvent::ServicesDiscovered {
            link: link_b,
            result: Ok(sensor_services()),
        });
        session.handle_event(RadioEvent::Subscribed {
            link: link_b,
            characteristic: DEFAULT_NOTIFY_UUID,
            result: Ok(()),
        });
        assert_eq!(session.state(), &SessionState::Ready(ADDR_B.to_string()));
        assert_eq!(session.signals().connected(), Some(ADDR_B.to_string()));
    }

    #[test]
    fn test_stale_events_after_disconnect_ignored() {
        let (mut session, _) = new_session();
        let link = drive_to_ready(&mut session, ADDR_A);
        session.disconnect().unwrap();

        assert!(session.handle_event(notification(link, "late\n")).is_empty());
        session.handle_event(RadioEvent::Connected { link });
        assert_eq!(session.state(), &SessionState::Idle);
    }

    #[test]
    fn test_open_link_failure_returns_idle() {
        let (mut session, radio) = new_session();
        radio.set_open_error("adapter off");
        assert!(matches!(session.connect(ADDR_A), Err(SoilLinkError::Radio(_))));
        assert_eq!(session.state(), &SessionState::Idle);
        assert_eq!(session.current_link(), None);
    }

    #[test]
    fn test_connect_failure_releases_link() {
        let (mut session, radio) = new_session();
        let link = session.connect(ADDR_A).unwrap();
        session.handle_event(RadioEvent::Disconnected {
            link,
            reason: Some("status 133".to_string()),
        });

        assert_eq!(session.state(), &SessionState::Idle);
        assert_eq!(session.current_link(), None);
        assert!(radio.get_calls().contains(&Call::CloseLink(link)));
    }

    #[test]
    fn test_missing_service_aborts() {
        let (mut session, radio) = new_session();
        let link = session.connect(ADDR_A).unwrap();
        session.handle_event(RadioEvent::Connected { link });
        session.handle_event(RadioEvent::ServicesDiscovered {
            link,
            result: Ok(vec![ServiceInfo {
                uuid: Uuid::from_u128(0x1800),
                characteristics: vec![],
            }]),
        });

        assert_eq!(session.state(), &SessionState::Idle);
        assert_eq!(session.current_link(), None);
        assert!(radio.get_calls().contains(&Call::CloseLink(link)));
        assert!(!radio
            .get_calls()
            .iter()
            .any(|call| matches!(call, Call::Subscribe(..))));
    }

    #[test]
    fn test_missing_characteristic_aborts() {
        let (mut session, _) = new_session();
        let link = session.connect(ADDR_A).unwrap();
        session.handle_event(RadioEvent::Connected { link });
        session.handle_event(RadioEvent::ServicesDiscovered {
            link,
            result: Ok(vec![ServiceInfo {
                uuid: DEFAULT_SERVICE_UUID,
                characteristics: vec![DEFAULT_NOTIFY_UUID],
            }]),
        });
        assert_eq!(session.state(), &SessionState::Idle);
    }

    #[test]
    fn test_service_discovery_failure_aborts() {
        let (mut session, _) = new_session();
        let link = session.connect(ADDR_A).unwrap();
        session.handle_event(RadioEvent::Connected { link });
        session.handle_event(RadioEvent::ServicesDiscovered {
            link,
            result: Err("status 129".to_string()),
        });
        assert_eq!(session.state(), &SessionState::Idle);
        assert_eq!(session.current_link(), None);
    }

    #[test]
    fn test_subscription_rejected_aborts() {
        let (mut session, radio) = new_session();
        let link = session.connect(ADDR_A).unwrap();
        session.handle_event(RadioEvent::Connected { link });
        session.handle_event(RadioEvent::ServicesDiscovered {
            link,
            result: Ok(sensor_services()),
        });
        session.handle_event(RadioEvent::Subscribed {
            link,
            characteristic: DEFAULT_NOTIFY_UUID,
            result: Err("descriptor write failed".to_string()),
        });

        assert_eq!(session.state(), &SessionState::Idle);
        assert_eq!(session.signals().connected(), None);
        assert!(radio.get_calls().contains(&Call::CloseLink(link)));
    }

    #[test]
    fn test_notifications_split_into_lines() {
        let (mut session, _) = new_session();
        let mut lines_rx = session.signals().subscribe_lines();
        let link = drive_to_ready(&mut session, ADDR_A);

        let lines = session.handle_event(notification(link, "OK r:5\r\n{\"s\":1}\r\n"));
        assert_eq!(lines, vec!["OK r:5", "{\"s\":1}"]);
        assert_eq!(lines_rx.try_recv().unwrap(), "OK r:5");
        assert_eq!(lines_rx.try_recv().unwrap(), "{\"s\":1}");
    }

    #[test]
    fn test_notification_on_other_characteristic_dropped() {
        let (mut session, _) = new_session();
        let link = drive_to_ready(&mut session, ADDR_A);
        let lines = session.handle_event(RadioEvent::Notification {
            link,
            characteristic: DEFAULT_WRITE_UUID,
            value: Bytes::from_static(b"echo\n"),
        });
        assert!(lines.is_empty());
    }

    #[test]
    fn test_send_command_requires_ready() {
        let (mut session, radio) = new_session();
        assert!(matches!(session.send_command("GET"), Err(SoilLinkError::NotReady)));

        session.connect(ADDR_A).unwrap();
        assert!(matches!(session.send_command("GET"), Err(SoilLinkError::NotReady)));
        assert!(radio.writes().is_empty());
    }

    #[test]
    fn test_send_command_encodes_frame() {
        let (mut session, radio) = new_session();
        let link = drive_to_ready(&mut session, ADDR_A);

        session.send_command("  RATE 5 ").unwrap();
        session.send(Command::Start).unwrap();

        let calls = radio.get_calls();
        assert!(calls.contains(&Call::Write(
            link,
            DEFAULT_WRITE_UUID,
            encode_command("RATE 5", &[]).unwrap()
        )));

        let writes = radio.writes();
        assert_eq!(writes.len(), 2);
        let line = std::str::from_utf8(&writes[0]).unwrap().trim_end();
        assert_eq!(verify_checksum(line), ("RATE 5", true));
        assert_eq!(&writes[1][..], &Command::Start.encode()[..]);
    }

    #[test]
    fn test_send_empty_command_rejected() {
        let (mut session, radio) = new_session();
        drive_to_ready(&mut session, ADDR_A);
        assert!(matches!(session.send_command("   "), Err(SoilLinkError::EmptyCommand)));
        assert!(radio.writes().is_empty());
    }

    #[test]
    fn test_write_failure_keeps_session() {
        let (mut session, radio) = new_session();
        let link = drive_to_ready(&mut session, ADDR_A);

        radio.set_write_error("busy");
        assert!(matches!(session.send_command("GET"), Err(SoilLinkError::Radio(_))));
        assert!(session.state().is_ready());

        session.handle_event(RadioEvent::WriteFailed {
            link,
            reason: "gatt error".to_string(),
        });
        assert!(session.state().is_ready());
    }

    #[test]
    fn test_disconnect_returns_idle() {
        let (mut session, radio) = new_session();
        let link = drive_to_ready(&mut session, ADDR_A);

        session.disconnect().unwrap();
        assert_eq!(session.state(), &SessionState::Idle);
        assert_eq!(session.current_link(), None);
        assert_eq!(session.signals().connected(), None);
        assert!(radio.get_calls().contains(&Call::CloseLink(link)));
    }

    #[test]
    fn test_device_disconnect_returns_idle() {
        let (mut session, _) = new_session();
        let link = drive_to_ready(&mut session, ADDR_A);
        session.handle_event(RadioEvent::Disconnected { link, reason: None });
        assert_eq!(session.state(), &SessionState::Idle);
        assert_eq!(session.signals().connected(), None);
    }

    #[test]
    fn test_permission_denied_has_no_effect() {
        let (mut session, radio) = new_session();
        session.set_permissions(Permissions {
            scan: false,
            connect: false,
        });

        assert!(matches!(
            session.start_scan(true),
            Err(SoilLinkError::PermissionDenied(Permission::Scan))
        ));
        assert!(matches!(
            session.connect(ADDR_A),
            Err(SoilLinkError::PermissionDenied(Permission::Connect))
        ));
        assert!(session.disconnect().is_err());
        assert!(session.stop_scan().is_err());

        assert_eq!(session.state(), &SessionState::Idle);
        assert!(radio.get_calls().is_empty());
    }

    #[test]
    fn test_reconnect_after_ready_releases_old_link() {
        let (mut session, radio) = new_session();
        let link_a = drive_to_ready(&mut session, ADDR_A);
        let link_b = session.connect(ADDR_B).unwrap();

        assert!(radio.get_calls().contains(&Call::CloseLink(link_a)));
        assert_eq!(session.signals().connected(), None);
        assert_eq!(session.current_link(), Some(link_b));
        assert!(!session.state().is_ready());
    }
}
