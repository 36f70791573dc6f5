//! BLE Connection Module
//!
//! [`BtleplugTransport`] implements [`BleTransport`] on top of btleplug.
//! Each connected peripheral gets one writer task so its writes stay in
//! submission order, and one task forwarding its notifications. Closing a
//! link goes through the writer too, so it happens after every write queued
//! before it.

use crate::domain::models::PeripheralId;
use crate::infrastructure::bluetooth::protocol::{hex, WriteMode, UART_SERVICE_UUID};
use crate::infrastructure::bluetooth::scanner::{
    connected_peripherals, find_peripheral, lock, peripheral_key, BleScanner, SharedTable,
};
use crate::infrastructure::bluetooth::transport::{
    BleTransport, TransportError, TransportEvent, TransportResult,
};
use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

#[derive(Debug)]
enum WriterJob {
    Write {
        characteristic: Uuid,
        bytes: Vec<u8>,
        mode: WriteMode,
    },
    /// Close the link; the writer stops afterwards.
    Disconnect,
}

fn write_type(mode: WriteMode) -> WriteType {
    match mode {
        WriteMode::FireAndForget => WriteType::WithoutResponse,
        WriteMode::Acknowledged => WriteType::WithResponse,
    }
}

fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Option<Characteristic> {
    peripheral.characteristics().into_iter().find(|c| c.uuid == uuid)
}

/// The part of a peripheral the writer task drives.
trait GattLink: Send + Sync + 'static {
    fn write_characteristic(
        &self,
        characteristic: Uuid,
        bytes: &[u8],
        mode: WriteMode,
    ) -> impl Future<Output = TransportResult<()>> + Send;

    fn close(&self) -> impl Future<Output = TransportResult<()>> + Send;
}

impl GattLink for Peripheral {
    async fn write_characteristic(&self, characteristic: Uuid, bytes: &[u8], mode: WriteMode) -> TransportResult<()> {
        let target = find_characteristic(self, characteristic).ok_or_else(|| TransportError::CharacteristicNotFound {
            peripheral: peripheral_key(&self.id()),
            characteristic,
        })?;
        self.write(&target, bytes, write_type(mode)).await?;
        Ok(())
    }

    async fn close(&self) -> TransportResult<()> {
        self.disconnect().await?;
        Ok(())
    }
}

/// btleplug backed transport
pub struct BtleplugTransport {
    scanner: BleScanner,
    table: SharedTable,
    events: mpsc::UnboundedSender<TransportEvent>,
    writers: Mutex<HashMap<PeripheralId, mpsc::UnboundedSender<WriterJob>>>,
    listeners: Mutex<HashMap<PeripheralId, JoinHandle<()>>>,
    find_timeout: Duration,
    restored: Vec<PeripheralId>,
}

impl BtleplugTransport {
    /// `find_timeout` bounds how long a connect may scan for a peripheral
    /// the adapter has not seen yet.
    pub async fn new(events: mpsc::UnboundedSender<TransportEvent>, find_timeout: Duration) -> TransportResult<Self> {
        let scanner = BleScanner::new(events.clone()).await?;
        let table = scanner.table();
        Ok(Self {
            scanner,
            table,
            events,
            writers: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            find_timeout,
            restored: Vec::new(),
        })
    }

    /// Peripherals to report from [`BleTransport::restored_peripherals`].
    pub fn with_restored(mut self, ids: Vec<PeripheralId>) -> Self {
        self.restored = ids;
        self
    }

    fn peripheral(&self, id: &PeripheralId) -> TransportResult<Peripheral> {
        lock(&self.table)
            .peripherals
            .get(id)
            .cloned()
            .ok_or_else(|| TransportError::UnknownPeripheral(id.clone()))
    }

    fn writer(&self, id: &PeripheralId) -> TransportResult<mpsc::UnboundedSender<WriterJob>> {
        let mut writers = self.writers.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(tx) = writers.get(id).filter(|tx| !tx.is_closed()) {
            return Ok(tx.clone());
        }
        let peripheral = self.peripheral(id)?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(id.clone(), peripheral, rx, self.events.clone()));
        writers.insert(id.clone(), tx.clone());
        Ok(tx)
    }

    /// Stop forwarding notifications and hand back the writer, if any.
    fn detach(&self, id: &PeripheralId) -> Option<mpsc::UnboundedSender<WriterJob>> {
        if let Some(task) = self.listeners.lock().unwrap_or_else(|p| p.into_inner()).remove(id) {
            task.abort();
        }
        self.writers.lock().unwrap_or_else(|p| p.into_inner()).remove(id)
    }
}

impl BleTransport for BtleplugTransport {
    fn start_scan(&self, services: &[Uuid]) -> TransportResult<()> {
        self.scanner.start(services)
    }

    fn stop_scan(&self) -> TransportResult<()> {
        self.scanner.stop()
    }

    fn connected_peripherals(&self, service: Uuid) -> TransportResult<()> {
        let adapter = self.scanner.adapter().clone();
        let table = self.table.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            match connected_peripherals(&adapter, &table, service).await {
                Ok(peripherals) => {
                    let _ = events.send(TransportEvent::ConnectedPeripherals { service, peripherals });
                }
                Err(e) => warn!("Listing connected peripherals failed: {}", e),
            }
        });
        Ok(())
    }

    fn connect(&self, id: &PeripheralId) -> TransportResult<()> {
        let adapter = self.scanner.adapter().clone();
        let table = self.table.clone();
        let events = self.events.clone();
        let timeout = self.find_timeout;
        let id = id.clone();
        info!("Connecting to {}", id);
        tokio::spawn(async move {
            let result = async {
                let peripheral = find_peripheral(&adapter, &table, &id, &[UART_SERVICE_UUID], timeout).await?;
                if !peripheral.is_connected().await? {
                    peripheral.connect().await?;
                }
                Ok::<_, TransportError>(())
            }
            .await;
            match result {
                Ok(()) => {
                    lock(&table).connected.insert(id.clone());
                    let _ = events.send(TransportEvent::Connected(id));
                }
                Err(e) => {
                    warn!("Connect to {} failed: {}", id, e);
                    let _ = events.send(TransportEvent::ConnectFailed {
                        id,
                        reason: e.to_string(),
                    });
                }
            }
        });
        Ok(())
    }

    fn disconnect(&self, id: &PeripheralId) -> TransportResult<()> {
        let writer = self.detach(id);
        lock(&self.table).connected.remove(id);
        if writer.is_some_and(|tx| tx.send(WriterJob::Disconnect).is_ok()) {
            return Ok(());
        }
        let peripheral = self.peripheral(id)?;
        let id = id.clone();
        tokio::spawn(async move {
            match peripheral.close().await {
                Ok(()) => info!("Disconnected {}", id),
                Err(e) => warn!("Disconnect of {} failed: {}", id, e),
            }
        });
        Ok(())
    }

    fn discover_services(&self, id: &PeripheralId, services: &[Uuid]) -> TransportResult<()> {
        let peripheral = self.peripheral(id)?;
        let wanted = services.to_vec();
        let events = self.events.clone();
        let id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = peripheral.discover_services().await {
                error!("Service discovery on {} failed: {}", id, e);
                let _ = events.send(TransportEvent::ConnectFailed {
                    id,
                    reason: e.to_string(),
                });
                return;
            }
            let services = peripheral
                .services()
                .into_iter()
                .map(|s| s.uuid)
                .filter(|uuid| wanted.is_empty() || wanted.contains(uuid))
                .collect();
            let _ = events.send(TransportEvent::ServicesDiscovered { id, services });
        });
        Ok(())
    }

    fn discover_characteristics(&self, id: &PeripheralId, service: Uuid) -> TransportResult<()> {
        // btleplug resolves characteristics together with services.
        let peripheral = self.peripheral(id)?;
        let characteristics = peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service)
            .map(|s| s.characteristics.into_iter().map(|c| c.uuid).collect())
            .unwrap_or_default();
        let _ = self.events.send(TransportEvent::CharacteristicsDiscovered {
            id: id.clone(),
            service,
            characteristics,
        });
        Ok(())
    }

    fn subscribe_notifications(&self, id: &PeripheralId, characteristic: Uuid) -> TransportResult<()> {
        let peripheral = self.peripheral(id)?;
        let target = find_characteristic(&peripheral, characteristic).ok_or_else(|| {
            TransportError::CharacteristicNotFound {
                peripheral: id.clone(),
                characteristic,
            }
        })?;
        let events = self.events.clone();
        let key = id.clone();
        let task = tokio::spawn(async move {
            let mut stream = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Notification stream for {} unavailable: {}", key, e);
                    return;
                }
            };
            if let Err(e) = peripheral.subscribe(&target).await {
                error!("Subscribe on {} failed: {}", key, e);
                return;
            }
            debug!("Subscribed to {} on {}", characteristic, key);
            while let Some(notification) = stream.next().await {
                if notification.uuid != characteristic {
                    continue;
                }
                let _ = events.send(TransportEvent::Notification {
                    id: key.clone(),
                    characteristic,
                    data: notification.value,
                });
            }
            debug!("Notification stream for {} ended", key);
        });

        let mut listeners = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = listeners.insert(id.clone(), task) {
            previous.abort();
        }
        Ok(())
    }

    fn write(&self, id: &PeripheralId, characteristic: Uuid, bytes: Vec<u8>, mode: WriteMode) -> TransportResult<()> {
        if !self.is_connected(id) {
            return Err(TransportError::NotConnected(id.clone()));
        }
        self.writer(id)?
            .send(WriterJob::Write {
                characteristic,
                bytes,
                mode,
            })
            .map_err(|_| TransportError::NotConnected(id.clone()))
    }

    fn is_connected(&self, id: &PeripheralId) -> bool {
        lock(&self.table).connected.contains(id)
    }

    fn restored_peripherals(&self) -> Vec<PeripheralId> {
        self.restored.clone()
    }
}

async fn run_writer<L: GattLink>(
    id: PeripheralId,
    link: L,
    mut jobs: mpsc::UnboundedReceiver<WriterJob>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    while let Some(job) = jobs.recv().await {
        match job {
            WriterJob::Write {
                characteristic,
                bytes,
                mode,
            } => {
                trace!("-> {} {}", id, hex(&bytes));
                if let Err(e) = link.write_characteristic(characteristic, &bytes, mode).await {
                    error!("Write to {} failed: {}", id, e);
                    let _ = events.send(TransportEvent::WriteFailed {
                        id: id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
            WriterJob::Disconnect => {
                match link.close().await {
                    Ok(()) => info!("Disconnected {}", id),
                    Err(e) => warn!("Disconnect of {} failed: {}", id, e),
                }
                break;
            }
        }
    }
    debug!("Writer for {} stopped", id);
}
