//! Bluetooth Module
//!
//! Protocol engine and BLE session for Even G1 glasses. Each glasses unit is
//! two peripherals, one per earpiece, driven as a single session.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              SessionHandle / GlassesSession              │
//! │  (state machine, heartbeat, public API for the app)      │
//! └──────┬──────────────┬───────────────┬───────────────────┘
//!        │              │               │
//!        ▼              ▼               ▼
//! ┌────────────┐ ┌─────────────┐ ┌──────────────┐
//! │  Pairing   │ │  Dispatch   │ │   Protocol   │
//! │            │ │             │ │              │
//! │ - L/R by   │ │ - opcode →  │ │ - encoders   │
//! │   channel  │ │   listeners │ │ - chunking   │
//! │            │ │             │ │ - CRC / RLE  │
//! └────────────┘ └─────────────┘ └──────────────┘
//!        │
//!        ▼
//! ┌─────────────────────────────────────────────┐
//! │   BleTransport (Scanner + Connection)        │
//! │   btleplug, events back over a channel       │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Opcodes, command encoders, response decoders and chunking
//! - [`dispatch`] - Opcode-keyed listener registry
//! - [`pairing`] - Matching left and right earpieces into one unit
//! - [`transport`] - The BLE capability the session drives
//! - [`scanner`] - Adapter ownership and discovery
//! - [`connection`] - btleplug transport: connections, GATT, writes
//! - [`service`] - Session state machine and handle

pub mod connection;
pub mod dispatch;
pub mod pairing;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod transport;

pub use connection::BtleplugTransport;
pub use service::{GlassesSession, SessionHandle};
pub use transport::{BleTransport, TransportEvent};
