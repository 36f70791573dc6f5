//! Protocol engine and BLE session for Even G1 smart glasses.
//!
//! [`domain`] holds the data model, settings and shared device state;
//! [`infrastructure`] holds the wire protocol, the session state machine and
//! the btleplug transport.

pub mod domain;
pub mod infrastructure;

pub use domain::error::{ProtocolError, ProtocolResult};
pub use domain::models::{AppEvent, ConnectionState, KnownGlasses, PeripheralId, SessionPhase, Side};
pub use infrastructure::bluetooth::protocol::command::{GlassesCommand, InfoQuery};
pub use infrastructure::bluetooth::{BleTransport, BtleplugTransport, GlassesSession, SessionHandle, TransportEvent};
