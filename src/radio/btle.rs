//! Radio implementation on top of `btleplug`.
//!
//! Every request spawns a tokio task that performs the radio I/O and reports
//! its outcome as a [`RadioEvent`]. Tasks belonging to a link are aborted
//! when the link is closed.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{LinkId, Radio, RadioError, RadioEvent, ServiceInfo};
use crate::discovery::DiscoveredDevice;

/// Reported by platforms that hide the hardware address
const HIDDEN_ADDRESS: &str = "00:00:00:00:00:00";

/// Default delay between enabling notifications and the previous GATT step
pub const DEFAULT_SUBSCRIBE_DELAY: Duration = Duration::from_millis(300);

struct LinkSlot {
    address: String,
    peripheral: Arc<OnceLock<Peripheral>>,
    tasks: Vec<JoinHandle<()>>,
}

impl LinkSlot {
    fn track(&mut self, task: JoinHandle<()>) {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(task);
    }

    fn abort(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// `Radio` backed by the first bluetooth adapter of the host
pub struct BtleRadio {
    adapter: Adapter,
    events: UnboundedSender<RadioEvent>,
    scan_task: Option<JoinHandle<()>>,
    links: HashMap<LinkId, LinkSlot>,
    next_link: u64,
    subscribe_delay: Duration,
}

impl BtleRadio {
    /// Open the first available adapter
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` when the host refuses bluetooth access,
    /// `NoAdapter` when there is no adapter.
    pub async fn new(
        events: UnboundedSender<RadioEvent>,
        subscribe_delay: Duration,
    ) -> Result<Self, RadioError> {
        let manager = Manager::new().await.map_err(map_error)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(map_error)?
            .into_iter()
            .next()
            .ok_or(RadioError::NoAdapter)?;

        info!(
            "Using adapter {}",
            adapter.adapter_info().await.unwrap_or_else(|_| "UNKNOWN".to_string())
        );

        Ok(Self {
            adapter,
            events,
            scan_task: None,
            links: HashMap::new(),
            next_link: 0,
            subscribe_delay,
        })
    }

    fn slot(&mut self, link: LinkId) -> Result<&mut LinkSlot, RadioError> {
        self.links.get_mut(&link).ok_or(RadioError::UnknownLink(link))
    }
}

impl Radio for BtleRadio {
    fn start_scan(&mut self) -> Result<(), RadioError> {
        if self.scan_task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return Ok(());
        }

        let adapter = self.adapter.clone();
        let events = self.events.clone();
        self.scan_task = Some(tokio::spawn(async move {
            if let Err(e) = run_scan(&adapter, &events).await {
                warn!("Scan failed: {}", e);
                emit(&events, RadioEvent::ScanFailed { reason: e.to_string() });
            }
        }));
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), RadioError> {
        let Some(task) = self.scan_task.take() else {
            return Ok(());
        };
        task.abort();

        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                debug!("Stopping scan failed: {}", e);
            }
        });
        Ok(())
    }

    fn open_link(&mut self, address: &str) -> Result<LinkId, RadioError> {
        self.next_link += 1;
        let link = LinkId(self.next_link);
        let cell = Arc::new(OnceLock::new());

        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let target = address.to_string();
        let peripheral_cell = Arc::clone(&cell);
        let task = tokio::spawn(async move {
            run_link(adapter, events, link, target, peripheral_cell).await;
        });

        debug!("Opening {} to {}", link, address);
        self.links.insert(
            link,
            LinkSlot {
                address: address.to_string(),
                peripheral: cell,
                tasks: vec![task],
            },
        );
        Ok(link)
    }

    fn close_link(&mut self, link: LinkId) {
        let Some(mut slot) = self.links.remove(&link) else {
            return;
        };
        slot.abort();
        debug!("Closing {} to {}", link, slot.address);

        if let Some(peripheral) = slot.peripheral.get().cloned() {
            tokio::spawn(async move {
                if let Err(e) = peripheral.disconnect().await {
                    debug!("Disconnect failed: {}", e);
                }
            });
        }
    }

    fn discover_services(&mut self, link: LinkId) -> Result<(), RadioError> {
        let events = self.events.clone();
        let slot = self.slot(link)?;
        let cell = Arc::clone(&slot.peripheral);

        slot.track(tokio::spawn(async move {
            let result = match cell.get() {
                Some(peripheral) => discover(peripheral).await.map_err(|e| e.to_string()),
                None => Err("link is not connected".to_string()),
            };
            emit(&events, RadioEvent::ServicesDiscovered { link, result });
        }));
        Ok(())
    }

    fn subscribe(&mut self, link: LinkId, characteristic: Uuid) -> Result<(), RadioError> {
        let events = self.events.clone();
        let delay = self.subscribe_delay;
        let slot = self.slot(link)?;
        let cell = Arc::clone(&slot.peripheral);

        slot.track(tokio::spawn(async move {
            sleep(delay).await;
            let Some(peripheral) = cell.get() else {
                emit(
                    &events,
                    RadioEvent::Subscribed {
                        link,
                        characteristic,
                        result: Err("link is not connected".to_string()),
                    },
                );
                return;
            };
            forward_notifications(peripheral, &events, link, characteristic).await;
        }));
        Ok(())
    }

    fn write_characteristic(
        &mut self,
        link: LinkId,
        characteristic: Uuid,
        value: Bytes,
    ) -> Result<(), RadioError> {
        let events = self.events.clone();
        let slot = self.slot(link)?;
        let Some(peripheral) = slot.peripheral.get().cloned() else {
            return Err(RadioError::Rejected(format!("{} is not connected", link)));
        };

        slot.track(tokio::spawn(async move {
            let result = match find_characteristic(&peripheral, characteristic) {
                Some(target) => peripheral
                    .write(&target, &value, write_type(target.properties))
                    .await
                    .map_err(|e| e.to_string()),
                None => Err(format!("characteristic {} not found", characteristic)),
            };
            if let Err(reason) = result {
                warn!("Write to {} failed: {}", characteristic, reason);
                emit(&events, RadioEvent::WriteFailed { link, reason });
            }
        }));
        Ok(())
    }
}

impl Drop for BtleRadio {
    fn drop(&mut self) {
        if let Some(task) = self.scan_task.take() {
            task.abort();
        }
        for slot in self.links.values_mut() {
            slot.abort();
        }
    }
}

fn emit(events: &UnboundedSender<RadioEvent>, event: RadioEvent) {
    if events.send(event).is_err() {
        debug!("Radio event dropped, receiver is gone");
    }
}

fn map_error(error: btleplug::Error) -> RadioError {
    match error {
        btleplug::Error::PermissionDenied => RadioError::PermissionDenied,
        other => RadioError::Btle(other),
    }
}

/// Address shown to the operator, falling back to the platform id
fn display_address(address: String, id: String) -> String {
    if address == HIDDEN_ADDRESS {
        id
    } else {
        address
    }
}

/// Prefer unacknowledged writes when the characteristic allows them
fn write_type(properties: CharPropFlags) -> WriteType {
    if properties.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE) {
        WriteType::WithoutResponse
    } else {
        WriteType::WithResponse
    }
}

async fn sighting(peripheral: &Peripheral) -> Result<Option<DiscoveredDevice>, btleplug::Error> {
    let Some(properties) = peripheral.properties().await? else {
        return Ok(None);
    };
    let address = display_address(properties.address.to_string(), peripheral.id().to_string());
    let signal_strength = properties.rssi.map(i32::from).unwrap_or(0);
    Ok(Some(DiscoveredDevice::new(properties.local_name, address, signal_strength)))
}

async fn run_scan(
    adapter: &Adapter,
    events: &UnboundedSender<RadioEvent>,
) -> Result<(), btleplug::Error> {
    let mut central_events = adapter.events().await?;
    adapter.start_scan(ScanFilter::default()).await?;
    info!("Scanning...");

    while let Some(event) = central_events.next().await {
        let id = match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
            _ => continue,
        };
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                debug!("Peripheral lookup failed: {}", e);
                continue;
            }
        };
        match sighting(&peripheral).await {
            Ok(Some(device)) => emit(events, RadioEvent::Sighting(device)),
            Ok(None) => {}
            Err(e) => debug!("Could not query peripheral properties: {}", e),
        }
    }

    Ok(())
}

async fn find_peripheral(
    adapter: &Adapter,
    address: &str,
) -> Result<Option<Peripheral>, btleplug::Error> {
    for peripheral in adapter.peripherals().await? {
        match sighting(&peripheral).await {
            Ok(Some(device)) if device.address == address => return Ok(Some(peripheral)),
            Ok(_) => {}
            Err(e) => debug!("Could not query peripheral properties: {}", e),
        }
    }
    Ok(None)
}

/// Connect, then report `Disconnected` when the adapter sees the device drop
async fn run_link(
    adapter: Adapter,
    events: UnboundedSender<RadioEvent>,
    link: LinkId,
    address: String,
    cell: Arc<OnceLock<Peripheral>>,
) {
    let fail = |reason: String| {
        warn!("{} to {} failed: {}", link, address, reason);
        emit(&events, RadioEvent::Disconnected { link, reason: Some(reason) });
    };

    let peripheral = match find_peripheral(&adapter, &address).await {
        Ok(Some(p)) => p,
        Ok(None) => return fail(format!("device {} not found", address)),
        Err(e) => return fail(e.to_string()),
    };

    let mut central_events = match adapter.events().await {
        Ok(stream) => stream,
        Err(e) => return fail(e.to_string()),
    };

    if let Err(e) = peripheral.connect().await {
        return fail(e.to_string());
    }

    let id = peripheral.id();
    if cell.set(peripheral).is_err() {
        warn!("{} was already connected", link);
    }
    emit(&events, RadioEvent::Connected { link });

    while let Some(event) = central_events.next().await {
        if let CentralEvent::DeviceDisconnected(gone) = event {
            if gone == id {
                info!("{} to {} dropped", link, address);
                emit(&events, RadioEvent::Disconnected { link, reason: None });
                return;
            }
        }
    }
}

async fn discover(peripheral: &Peripheral) -> Result<Vec<ServiceInfo>, btleplug::Error> {
    peripheral.discover_services().await?;
    Ok(peripheral
        .services()
        .into_iter()
        .map(|service| ServiceInfo {
            uuid: service.uuid,
            characteristics: service.characteristics.iter().map(|c| c.uuid).collect(),
        })
        .collect())
}

fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Option<Characteristic> {
    peripheral.characteristics().into_iter().find(|c| c.uuid == uuid)
}

async fn forward_notifications(
    peripheral: &Peripheral,
    events: &UnboundedSender<RadioEvent>,
    link: LinkId,
    characteristic: Uuid,
) {
    let subscribed = async {
        let target = find_characteristic(peripheral, characteristic)
            .ok_or_else(|| format!("characteristic {} not found", characteristic))?;
        // Open the stream before subscribing so the first notification is not lost
        let stream = peripheral.notifications().await.map_err(|e| e.to_string())?;
        peripheral.subscribe(&target).await.map_err(|e| e.to_string())?;
        Ok::<_, String>(stream)
    }
    .await;

    let mut notifications = match subscribed {
        Ok(stream) => {
            emit(events, RadioEvent::Subscribed { link, characteristic, result: Ok(()) });
            stream
        }
        Err(reason) => {
            emit(events, RadioEvent::Subscribed { link, characteristic, result: Err(reason) });
            return;
        }
    };

    while let Some(notification) = notifications.next().await {
        if notification.uuid == characteristic {
            emit(
                events,
                RadioEvent::Notification {
                    link,
                    characteristic,
                    value: Bytes::from(notification.value),
                },
            );
        }
    }
}
