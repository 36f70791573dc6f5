//! Error taxonomy for the glasses protocol engine.
//!
//! Only the encoding variants ever reach callers of the session handle;
//! everything inbound or transport related is logged and recovered in place.

use crate::domain::models::PeripheralId;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid argument: {0}")]
    Validation(String),

    #[error("field `{field}` is {len} bytes, longer than the 255 byte limit")]
    FieldTooLong { field: &'static str, len: usize },

    #[error("frame would be {0} bytes, longer than its one byte length field allows")]
    FrameTooLong(usize),

    #[error("payload needs {0} chunks, more than a one byte chunk count allows")]
    TooManyChunks(usize),

    #[error("no write characteristic for {0}")]
    TransportUnavailable(String),

    #[error("malformed frame for opcode {opcode:#04X}: {len} bytes, need at least {min}")]
    MalformedFrame { opcode: u8, len: usize, min: usize },

    #[error("reassembly desync for {peripheral} opcode {opcode:#04X}: expected index {expected}, got {got}")]
    ReassemblyDesync {
        peripheral: PeripheralId,
        opcode: u8,
        expected: u8,
        got: u8,
    },

    #[error("checksum rejected by peer: {0:02X?}")]
    ChecksumFailure(Vec<u8>),

    #[error("unknown opcode {0:#04X}")]
    UnknownOpcode(u8),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("session is no longer running")]
    SessionClosed,
}

impl ProtocolError {
    /// Whether the error stems from a bad command argument.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ProtocolError::Validation(_)
                | ProtocolError::FieldTooLong { .. }
                | ProtocolError::FrameTooLong(_)
                | ProtocolError::TooManyChunks(_)
        )
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
