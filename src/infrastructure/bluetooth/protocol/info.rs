//! Device information queries and the decoders for their responses.

use super::{ascii, Opcode, ResponseStatus};
use crate::domain::models::WearState;

pub fn brightness_state() -> Vec<u8> {
    vec![Opcode::BrightnessState.as_byte()]
}

pub fn dash_position() -> Vec<u8> {
    vec![Opcode::DashPosition.as_byte()]
}

pub fn heads_up_angle() -> Vec<u8> {
    vec![Opcode::HeadsUp.as_byte()]
}

pub fn battery() -> Vec<u8> {
    vec![Opcode::Battery.as_byte(), 0x02]
}

pub fn glasses_state() -> Vec<u8> {
    vec![Opcode::GlassesState.as_byte()]
}

pub fn firmware() -> Vec<u8> {
    vec![Opcode::FirmwareInfo.as_byte(), 0x74]
}

/// Reboots the glasses.
pub fn restart() -> Vec<u8> {
    vec![Opcode::FirmwareInfo.as_byte(), 0x72]
}

pub fn lens_serial_number() -> Vec<u8> {
    vec![Opcode::LensSerialNumber.as_byte()]
}

pub fn device_serial_number() -> Vec<u8> {
    vec![Opcode::DeviceSerialNumber.as_byte()]
}

/// `[0x29, status, level, auto]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrightnessState {
    pub level: u8,
    pub auto: bool,
}

impl BrightnessState {
    pub fn decode(frame: &[u8]) -> Option<Self> {
        match frame {
            [_, _, level, auto, ..] => Some(Self {
                level: *level,
                auto: *auto == 0x01,
            }),
            _ => None,
        }
    }
}

/// `[0x3B, status, vertical, distance]`, only meaningful on success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DashPosition {
    pub vertical: u8,
    pub distance: u8,
}

impl DashPosition {
    pub fn decode(frame: &[u8]) -> Option<Self> {
        match frame {
            [_, status, vertical, distance, ..] if ResponseStatus::from_byte(*status).is_success() => Some(Self {
                vertical: *vertical,
                distance: *distance,
            }),
            _ => None,
        }
    }
}

/// Head-up activation angle: `[0x32, _, angle, ..]`.
pub fn decode_heads_up_angle(frame: &[u8]) -> Option<u8> {
    frame.get(2).copied()
}

const BATTERY_LEVEL: u8 = 0x66;

/// Battery percentage from a `[0x2C, 0x66, level, ..]` response.
pub fn decode_battery(frame: &[u8]) -> Option<u8> {
    match frame {
        [_, BATTERY_LEVEL, level, ..] => Some(*level),
        _ => None,
    }
}

/// `[0x2B, _, mode, state]`. Only the left earpiece reports this reliably.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlassesStateReport {
    pub wear: Option<WearState>,
    /// State byte 0xFF: the glasses just powered on.
    pub powered_on: bool,
    pub silent_mode: Option<bool>,
}

impl GlassesStateReport {
    pub fn decode(frame: &[u8]) -> Option<Self> {
        let (mode, state) = match frame {
            [_, _, mode, state, ..] => (*mode, *state),
            _ => return None,
        };
        let wear = match state {
            0x06 => Some(WearState::Wearing),
            0x07 => Some(WearState::Off),
            0x08 => Some(WearState::CaseOpen),
            0x0B => Some(WearState::CaseClosed),
            _ => None,
        };
        let silent_mode = match mode {
            0x0C => Some(true),
            0x0A => Some(false),
            _ => None,
        };
        Some(Self {
            wear,
            powered_on: state == 0xFF,
            silent_mode,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameShape {
    Round,
    Square,
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameColour {
    Grey,
    Brown,
    Green,
    Unknown(String),
}

/// Decoded `[0x34, _, serial ascii..]` response. Bytes 2..6 carry the frame
/// model code, byte 7 the colour code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSerial {
    pub serial: String,
    pub shape: FrameShape,
    pub colour: FrameColour,
}

impl DeviceSerial {
    pub fn decode(frame: &[u8]) -> Option<Self> {
        let serial = ascii(frame.get(2..)?)?;
        let shape = match ascii(frame.get(2..6)?)?.as_str() {
            "S100" => FrameShape::Round,
            "S110" => FrameShape::Square,
            other => FrameShape::Unknown(other.to_string()),
        };
        let colour = match ascii(frame.get(7..8)?)?.as_str() {
            "A" => FrameColour::Grey,
            "B" => FrameColour::Brown,
            "C" => FrameColour::Green,
            other => FrameColour::Unknown(other.to_string()),
        };
        Some(Self { serial, shape, colour })
    }
}

/// ASCII payload after the opcode, e.g. lens serial or firmware banner.
pub fn decode_ascii_payload(frame: &[u8]) -> Option<String> {
    ascii(frame.get(1..)?).map(|text| text.trim().to_string())
}

/// `[0x00, code, message ascii..]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub code: u8,
    pub message: Option<String>,
}

impl ErrorReport {
    pub fn decode(frame: &[u8]) -> Option<Self> {
        let code = *frame.get(1)?;
        let message = frame.get(2..).and_then(ascii);
        Some(Self { code, message })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queries() {
        assert_eq!(battery(), vec![0x2C, 0x02]);
        assert_eq!(firmware(), vec![0x23, 0x74]);
        assert_eq!(restart(), vec![0x23, 0x72]);
        assert_eq!(glasses_state(), vec![0x2B]);
    }

    #[test]
    fn test_battery_decoder() {
        let left = [0x2C, 0x66, 0x4B, 0x00, 0xD3, 0x94, 0x20, 0, 0, 0, 0x01, 0x05];
        assert_eq!(decode_battery(&left), Some(0x4B));
        assert_eq!(decode_battery(&[0x2C, 0xC9, 0x4B]), None);
    }

    #[test]
    fn test_dash_position_requires_success() {
        assert_eq!(
            DashPosition::decode(&[0x3B, 0xC9, 0x02, 0x03]),
            Some(DashPosition {
                vertical: 2,
                distance: 3
            })
        );
        assert_eq!(DashPosition::decode(&[0x3B, 0xCB, 0x02, 0x03]), None);
    }

    #[test]
    fn test_glasses_state() {
        let report = GlassesStateReport::decode(&[0x2B, 0x69, 0x0A, 0x0B]).unwrap();
        assert_eq!(report.wear, Some(WearState::CaseClosed));
        assert_eq!(report.silent_mode, Some(false));

        let report = GlassesStateReport::decode(&[0x2B, 0x69, 0x0C, 0xFF]).unwrap();
        assert!(report.powered_on);
        assert_eq!(report.wear, None);
        assert_eq!(report.silent_mode, Some(true));
    }

    #[test]
    fn test_device_serial() {
        let serial = DeviceSerial::decode(b"\x34\x10S100LA12345").unwrap();
        assert_eq!(serial.shape, FrameShape::Round);
        assert_eq!(serial.colour, FrameColour::Grey);
        assert_eq!(serial.serial, "S100LA12345");

        let serial = DeviceSerial::decode(b"\x34\x10S110LCX").unwrap();
        assert_eq!(serial.shape, FrameShape::Square);
        assert_eq!(serial.colour, FrameColour::Green);
        assert_eq!(DeviceSerial::decode(b"\x34\x10S1"), None);
    }

    #[test]
    fn test_brightness_state_and_error() {
        assert_eq!(
            BrightnessState::decode(&[0x29, 0x65, 0x2A, 0x01]),
            Some(BrightnessState { level: 42, auto: true })
        );
        let report = ErrorReport::decode(b"\x00\x05oops").unwrap();
        assert_eq!(report.code, 5);
        assert_eq!(report.message.as_deref(), Some("oops"));
    }
}
