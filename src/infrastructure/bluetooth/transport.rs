//! Transport Seam
//!
//! The narrow BLE capability the session drives. Every method only submits
//! work and returns immediately; outcomes come back as [`TransportEvent`]s on
//! the channel handed to the transport at construction. Writes to one
//! peripheral are performed in submission order.

use crate::domain::models::PeripheralId;
use crate::infrastructure::bluetooth::protocol::WriteMode;
use thiserror::Error;
use uuid::Uuid;

/// Asynchronous results reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Discovered {
        id: PeripheralId,
        name: String,
    },
    /// Peripherals the platform already holds a link to, named and
    /// offering `service`.
    ConnectedPeripherals {
        service: Uuid,
        peripherals: Vec<(PeripheralId, String)>,
    },
    Connected(PeripheralId),
    ConnectFailed {
        id: PeripheralId,
        reason: String,
    },
    Disconnected(PeripheralId),
    ServicesDiscovered {
        id: PeripheralId,
        services: Vec<Uuid>,
    },
    CharacteristicsDiscovered {
        id: PeripheralId,
        service: Uuid,
        characteristics: Vec<Uuid>,
    },
    Notification {
        id: PeripheralId,
        characteristic: Uuid,
        data: Vec<u8>,
    },
    WriteFailed {
        id: PeripheralId,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no bluetooth adapter available")]
    NoAdapter,

    #[error("unknown peripheral {0}")]
    UnknownPeripheral(PeripheralId),

    #[error("characteristic {characteristic} not found on {peripheral}")]
    CharacteristicNotFound {
        peripheral: PeripheralId,
        characteristic: Uuid,
    },

    #[error("peripheral {0} is not connected")]
    NotConnected(PeripheralId),

    #[error("bluetooth error: {0}")]
    Ble(String),
}

impl From<btleplug::Error> for TransportError {
    fn from(err: btleplug::Error) -> Self {
        TransportError::Ble(err.to_string())
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Command side of a BLE central.
pub trait BleTransport: Send + Sync {
    /// Report advertising peripherals offering any of `services` as
    /// [`TransportEvent::Discovered`].
    fn start_scan(&self, services: &[Uuid]) -> TransportResult<()>;

    fn stop_scan(&self) -> TransportResult<()>;

    /// Report peripherals already connected at the OS level that offer
    /// `service`, as one [`TransportEvent::ConnectedPeripherals`].
    fn connected_peripherals(&self, service: Uuid) -> TransportResult<()>;

    fn connect(&self, id: &PeripheralId) -> TransportResult<()>;

    fn disconnect(&self, id: &PeripheralId) -> TransportResult<()>;

    fn discover_services(&self, id: &PeripheralId, services: &[Uuid]) -> TransportResult<()>;

    fn discover_characteristics(&self, id: &PeripheralId, service: Uuid) -> TransportResult<()>;

    /// Forward value changes of `characteristic` as
    /// [`TransportEvent::Notification`].
    fn subscribe_notifications(&self, id: &PeripheralId, characteristic: Uuid) -> TransportResult<()>;

    fn write(&self, id: &PeripheralId, characteristic: Uuid, bytes: Vec<u8>, mode: WriteMode) -> TransportResult<()>;

    /// Transport level connection flag, polled by the heartbeat.
    fn is_connected(&self, id: &PeripheralId) -> bool;

    /// Peripherals handed back by the platform after a relaunch.
    fn restored_peripherals(&self) -> Vec<PeripheralId>;
}
