//! BLE Scanner Module
//!
//! Owns the btleplug adapter. A single pump task turns adapter events into
//! [`TransportEvent`]s: advertised names while a scan is running, and link
//! loss at any time.

use crate::domain::models::PeripheralId;
use crate::infrastructure::bluetooth::transport::{TransportError, TransportEvent, TransportResult};
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

const FIND_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Stable key for a btleplug peripheral.
pub(crate) fn peripheral_key(id: &btleplug::platform::PeripheralId) -> PeripheralId {
    PeripheralId::new(format!("{:?}", id))
}

/// Peripherals seen through this adapter, shared with the connection side.
#[derive(Debug, Default)]
pub(crate) struct PeripheralTable {
    pub peripherals: HashMap<PeripheralId, Peripheral>,
    pub connected: HashSet<PeripheralId>,
    announced: HashSet<PeripheralId>,
}

pub(crate) type SharedTable = Arc<Mutex<PeripheralTable>>;

pub(crate) fn lock(table: &SharedTable) -> std::sync::MutexGuard<'_, PeripheralTable> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// BLE scanner for discovering glasses earpieces
pub struct BleScanner {
    adapter: Adapter,
    table: SharedTable,
    scanning: Arc<AtomicBool>,
    pump: JoinHandle<()>,
}

impl BleScanner {
    /// Take the first adapter and start forwarding its events.
    pub async fn new(events: mpsc::UnboundedSender<TransportEvent>) -> TransportResult<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;
        match adapter.adapter_info().await {
            Ok(info) => info!("Using bluetooth adapter {}", info),
            Err(e) => debug!("Adapter info unavailable: {}", e),
        }

        let table = SharedTable::default();
        let scanning = Arc::new(AtomicBool::new(false));
        let stream = adapter.events().await?;
        let pump = tokio::spawn(pump_events(
            adapter.clone(),
            stream,
            table.clone(),
            scanning.clone(),
            events,
        ));

        Ok(Self {
            adapter,
            table,
            scanning,
            pump,
        })
    }

    pub(crate) fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    pub(crate) fn table(&self) -> SharedTable {
        self.table.clone()
    }

    /// Start scanning for peripherals offering `services`.
    pub fn start(&self, services: &[Uuid]) -> TransportResult<()> {
        lock(&self.table).announced.clear();
        self.scanning.store(true, Ordering::SeqCst);

        let adapter = self.adapter.clone();
        let filter = ScanFilter {
            services: services.to_vec(),
        };
        info!("Starting BLE scan for {:?}", services);
        tokio::spawn(async move {
            if let Err(e) = adapter.start_scan(filter).await {
                warn!("Failed to start scan: {}", e);
            }
        });
        Ok(())
    }

    /// Stop scanning
    pub fn stop(&self) -> TransportResult<()> {
        if !self.scanning.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Stopping BLE scan...");
        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        });
        Ok(())
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn pump_events(
    adapter: Adapter,
    mut stream: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
    table: SharedTable,
    scanning: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    while let Some(event) = stream.next().await {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                if !scanning.load(Ordering::SeqCst) {
                    continue;
                }
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let name = match peripheral.properties().await {
                    Ok(Some(props)) => props.local_name,
                    Ok(None) => None,
                    Err(e) => {
                        trace!("No properties for {:?}: {}", id, e);
                        None
                    }
                };
                // Names can arrive in a later update than the first sighting.
                let Some(name) = name else { continue };

                let key = peripheral_key(&id);
                let fresh = {
                    let mut table = lock(&table);
                    table.peripherals.insert(key.clone(), peripheral);
                    table.announced.insert(key.clone())
                };
                if fresh {
                    debug!("Discovered {} ({})", name, key);
                    let _ = events.send(TransportEvent::Discovered { id: key, name });
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                let key = peripheral_key(&id);
                let was_connected = lock(&table).connected.remove(&key);
                if was_connected {
                    info!("Link lost: {}", key);
                    let _ = events.send(TransportEvent::Disconnected(key));
                }
            }
            _ => {}
        }
    }
    debug!("Adapter event stream ended");
}

/// Named peripherals the platform already holds a link to that offer
/// `service`. They are cached so a later connect needs no scan, but stay out
/// of the connected set until the session connects them itself.
pub(crate) async fn connected_peripherals(
    adapter: &Adapter,
    table: &SharedTable,
    service: Uuid,
) -> TransportResult<Vec<(PeripheralId, String)>> {
    let mut found = Vec::new();
    for peripheral in adapter.peripherals().await? {
        if !peripheral.is_connected().await.unwrap_or(false) {
            continue;
        }
        let Some(props) = peripheral.properties().await? else { continue };
        let Some(name) = props.local_name else { continue };

        let mut offers = props.services.contains(&service) || peripheral.services().iter().any(|s| s.uuid == service);
        if !offers {
            match peripheral.discover_services().await {
                Ok(()) => offers = peripheral.services().iter().any(|s| s.uuid == service),
                Err(e) => trace!("Service discovery on {} failed: {}", name, e),
            }
        }
        if !offers {
            continue;
        }

        let key = peripheral_key(&peripheral.id());
        debug!("Already connected: {} ({})", name, key);
        lock(table).peripherals.insert(key.clone(), peripheral);
        found.push((key, name));
    }
    Ok(found)
}

/// Resolve a peripheral by key, scanning for it until `timeout` if the
/// adapter has not seen it yet.
pub(crate) async fn find_peripheral(
    adapter: &Adapter,
    table: &SharedTable,
    id: &PeripheralId,
    services: &[Uuid],
    timeout: Duration,
) -> TransportResult<Peripheral> {
    if let Some(peripheral) = lock(table).peripherals.get(id).cloned() {
        return Ok(peripheral);
    }

    let deadline = tokio::time::Instant::now() + timeout;
    let mut scan_started = false;
    loop {
        for peripheral in adapter.peripherals().await? {
            if &peripheral_key(&peripheral.id()) == id {
                lock(table).peripherals.insert(id.clone(), peripheral.clone());
                if scan_started {
                    let _ = adapter.stop_scan().await;
                }
                return Ok(peripheral);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            if scan_started {
                let _ = adapter.stop_scan().await;
            }
            return Err(TransportError::UnknownPeripheral(id.clone()));
        }
        if !scan_started {
            info!("{} not cached, scanning for it", id);
            adapter
                .start_scan(ScanFilter {
                    services: services.to_vec(),
                })
                .await?;
            scan_started = true;
        }
        tokio::time::sleep(FIND_POLL_INTERVAL).await;
    }
}
