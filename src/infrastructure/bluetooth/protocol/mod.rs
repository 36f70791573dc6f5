//! G1 Glasses Protocol
//!
//! Byte-level definitions for talking to the glasses over the Nordic UART
//! service: opcodes, the shared response status convention, and the frame
//! types the encoders produce.
//!
//! Every frame starts with a one-byte [`Opcode`]. The same byte identifies
//! the request and its response; direction is known from context only.
//! Multi-byte integers are little-endian, except the CRC32 of a bitmap
//! transfer which is sent big-endian.

pub mod checksum;
pub mod chunk;
pub mod command;
pub mod config;
pub mod device;
pub mod info;
pub mod sequence;

use crate::domain::error::{ProtocolError, ProtocolResult};
use std::time::Duration;
use uuid::Uuid;

/// Nordic UART service exposed by each earpiece.
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);

/// Write (TX) characteristic - commands are written here.
pub const UART_TX_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);

/// Notify (RX) characteristic - responses and events arrive here.
pub const UART_RX_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// Sentinel written as a placeholder byte in many layouts.
pub(crate) const NULL: u8 = 0x00;

/// One-byte command identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Opcode {
    Error = 0x00,
    Brightness = 0x01,
    SilentMode = 0x03,
    AddNotif = 0x04,
    DashMode = 0x06,
    HeadsUpConfig = 0x08,
    Teleprompter = 0x09,
    Navigate = 0x0A,
    HeadTilt = 0x0B,
    Mic = 0x0E,
    Bmp = 0x15,
    Crc = 0x16,
    Exit = 0x18,
    Notes = 0x1E,
    BmpDone = 0x20,
    FirmwareInfo = 0x23,
    Heartbeat = 0x25,
    DashConfig = 0x26,
    WearDetection = 0x27,
    BrightnessState = 0x29,
    GlassesState = 0x2B,
    Battery = 0x2C,
    HeadsUp = 0x32,
    LensSerialNumber = 0x33,
    DeviceSerialNumber = 0x34,
    Uptime = 0x37,
    DashPosition = 0x3B,
    Notif = 0x4B,
    Ping = 0x4D,
    Text = 0x4E,
    NotifConfig = 0x4F,
    FirmwareInfoRes = 0x6E,
    MicData = 0xF1,
    Device = 0xF5,
    NotifSetting = 0xF6,
}

impl Opcode {
    /// Every opcode the glasses can emit or accept.
    pub const ALL: [Opcode; 35] = [
        Opcode::Error,
        Opcode::Brightness,
        Opcode::SilentMode,
        Opcode::AddNotif,
        Opcode::DashMode,
        Opcode::HeadsUpConfig,
        Opcode::Teleprompter,
        Opcode::Navigate,
        Opcode::HeadTilt,
        Opcode::Mic,
        Opcode::Bmp,
        Opcode::Crc,
        Opcode::Exit,
        Opcode::Notes,
        Opcode::BmpDone,
        Opcode::FirmwareInfo,
        Opcode::Heartbeat,
        Opcode::DashConfig,
        Opcode::WearDetection,
        Opcode::BrightnessState,
        Opcode::GlassesState,
        Opcode::Battery,
        Opcode::HeadsUp,
        Opcode::LensSerialNumber,
        Opcode::DeviceSerialNumber,
        Opcode::Uptime,
        Opcode::DashPosition,
        Opcode::Notif,
        Opcode::Ping,
        Opcode::Text,
        Opcode::NotifConfig,
        Opcode::FirmwareInfoRes,
        Opcode::MicData,
        Opcode::Device,
        Opcode::NotifSetting,
    ];

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| *op as u8 == byte)
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Minimum length of an inbound frame carrying this opcode, including
    /// the opcode byte. Shorter frames are dropped before dispatch.
    pub fn min_response_len(self) -> usize {
        match self {
            Opcode::Error
            | Opcode::Bmp
            | Opcode::Exit
            | Opcode::FirmwareInfo
            | Opcode::FirmwareInfoRes
            | Opcode::Heartbeat
            | Opcode::Ping
            | Opcode::Uptime
            | Opcode::Navigate
            | Opcode::Notes
            | Opcode::Teleprompter
            | Opcode::WearDetection
            | Opcode::DashConfig
            | Opcode::LensSerialNumber => 1,
            Opcode::Brightness
            | Opcode::SilentMode
            | Opcode::AddNotif
            | Opcode::DashMode
            | Opcode::HeadTilt
            | Opcode::BmpDone
            | Opcode::Notif
            | Opcode::NotifConfig
            | Opcode::Text
            | Opcode::Device
            | Opcode::MicData
            | Opcode::Battery => 2,
            Opcode::Mic | Opcode::HeadsUp | Opcode::NotifSetting => 3,
            Opcode::BrightnessState | Opcode::GlassesState | Opcode::DashPosition => 4,
            Opcode::HeadsUpConfig | Opcode::Crc => 6,
            Opcode::DeviceSerialNumber => 8,
        }
    }

    /// Opcodes whose inbound payloads span several notifications.
    pub fn is_chunked_inbound(self) -> bool {
        matches!(self, Opcode::NotifSetting)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, <Opcode as TryFrom<u8>>::Error> {
        Opcode::from_byte(value).ok_or(ProtocolError::UnknownOpcode(value))
    }
}

/// Tri-state status byte shared by many response frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Success,
    Continue,
    Failure,
}

impl ResponseStatus {
    pub const SUCCESS: u8 = 0xC9;
    pub const CONTINUE: u8 = 0xCA;
    pub const FAILURE: u8 = 0xCB;

    pub fn from_byte(byte: u8) -> Self {
        match byte {
            Self::SUCCESS => ResponseStatus::Success,
            Self::CONTINUE => ResponseStatus::Continue,
            _ => ResponseStatus::Failure,
        }
    }

    pub fn is_success(self) -> bool {
        self == ResponseStatus::Success
    }
}

/// Read the status byte of a response frame (`[opcode, status, ..]`).
pub fn decode_status(frame: &[u8]) -> ProtocolResult<ResponseStatus> {
    match frame {
        [_, status, ..] => Ok(ResponseStatus::from_byte(*status)),
        _ => Err(ProtocolError::MalformedFrame {
            opcode: frame.first().copied().unwrap_or_default(),
            len: frame.len(),
            min: 2,
        }),
    }
}

/// Which earpiece(s) a frame goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Both,
    Left,
    Right,
}

/// BLE write policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Write without response, for streaming and low-priority frames.
    FireAndForget,
    /// Write with response: the BLE stack confirms it accepted the write.
    Acknowledged,
}

/// A single characteristic write ready for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub bytes: Vec<u8>,
    pub target: Target,
    pub mode: WriteMode,
    /// Pause before the next frame of the same message is submitted.
    pub pause_after: Option<Duration>,
}

impl OutboundFrame {
    pub fn new(bytes: Vec<u8>, target: Target, mode: WriteMode) -> Self {
        Self {
            bytes,
            target,
            mode,
            pause_after: None,
        }
    }

    pub fn both(bytes: Vec<u8>) -> Self {
        Self::new(bytes, Target::Both, WriteMode::FireAndForget)
    }

    /// Settings that must land on both earpieces are written with response.
    pub fn both_acknowledged(bytes: Vec<u8>) -> Self {
        Self::new(bytes, Target::Both, WriteMode::Acknowledged)
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause_after = Some(pause);
        self
    }
}

/// Append a single-byte length-prefixed UTF-8 string.
pub(crate) fn push_prefixed(out: &mut Vec<u8>, field: &'static str, value: &str) -> ProtocolResult<()> {
    let bytes = value.as_bytes();
    let len = u8::try_from(bytes.len()).map_err(|_| ProtocolError::FieldTooLong {
        field,
        len: bytes.len(),
    })?;
    out.push(len);
    out.extend_from_slice(bytes);
    Ok(())
}

/// Build `[opcode, len] + body` where `len` counts the two header bytes.
pub(crate) fn with_length_header(opcode: Opcode, body: &[u8]) -> ProtocolResult<Vec<u8>> {
    let total = body.len() + 2;
    let len = u8::try_from(total).map_err(|_| ProtocolError::FrameTooLong(total))?;
    let mut out = Vec::with_capacity(total);
    out.push(opcode.as_byte());
    out.push(len);
    out.extend_from_slice(body);
    Ok(out)
}

/// Hex rendering for log lines.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Printable ASCII rendering of a payload, trailing NULs trimmed.
pub fn ascii(bytes: &[u8]) -> Option<String> {
    let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    let trimmed = &bytes[..end];
    if trimmed.is_ascii() {
        Some(String::from_utf8_lossy(trimmed).into_owned())
    } else {
        None
    }
}
