use crate::domain::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable transport-level identity of one BLE peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeripheralId(pub String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Which earpiece a peripheral represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    /// Derive the side from an advertised name (`..._L_...` / `..._R_...`).
    pub fn from_name(name: &str) -> Option<Self> {
        if name.contains("_L_") {
            Some(Side::Left)
        } else if name.contains("_R_") {
            Some(Side::Right)
        } else {
            None
        }
    }

    pub fn other(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => f.write_str("left"),
            Side::Right => f.write_str("right"),
        }
    }
}

/// Connection state published to the surrounding application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Active,
    Disconnected,
}

/// Fine-grained lifecycle phase of the glasses session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Scanning,
    /// The pairing scan has located one side of a channel but not the other.
    HalfConnected(Side),
    /// Relaunched with previously known peripherals, connecting directly.
    Restoring,
    Connecting,
    ServicesDiscovered,
    CharacteristicsReady,
    Active,
    Disconnected,
}

impl SessionPhase {
    pub fn connection_state(self) -> ConnectionState {
        match self {
            SessionPhase::Idle | SessionPhase::Scanning | SessionPhase::HalfConnected(_) => {
                ConnectionState::Idle
            }
            SessionPhase::Restoring
            | SessionPhase::Connecting
            | SessionPhase::ServicesDiscovered
            | SessionPhase::CharacteristicsReady => ConnectionState::Connecting,
            SessionPhase::Active => ConnectionState::Active,
            SessionPhase::Disconnected => ConnectionState::Disconnected,
        }
    }
}

/// Physical state of the glasses as reported by the left earpiece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WearState {
    Wearing,
    #[default]
    Off,
    CaseOpen,
    CaseClosed,
}

/// What the glasses display is currently showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlassesAppState {
    Text,
    Navigation,
    Dash,
    Bmp,
}

/// A left/right peripheral pair remembered across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownGlasses {
    pub left: PeripheralId,
    pub left_name: String,
    pub right: PeripheralId,
    pub right_name: String,
}

/// An app the glasses reported as newly added to the notification allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationApp {
    pub app_identifier: String,
    pub display_name: String,
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    ConnectionState(ConnectionState),
    PairConnected(KnownGlasses),
    NotificationAppAdded(NotificationApp),
    /// A completed bitmap transfer failed verification on one side.
    TransferFailed(Side, ProtocolError),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_from_name() {
        assert_eq!(Side::from_name("Even G1_7_L_39A1F0"), Some(Side::Left));
        assert_eq!(Side::from_name("Even G1_7_R_11B2C3"), Some(Side::Right));
        assert_eq!(Side::from_name("Even G1_7"), None);
        assert_eq!(Side::Left.other(), Side::Right);
        assert_eq!(Side::Right.other(), Side::Left);
    }

    #[test]
    fn test_phase_maps_to_connection_state() {
        assert_eq!(
            SessionPhase::HalfConnected(Side::Left).connection_state(),
            ConnectionState::Idle
        );
        assert_eq!(
            SessionPhase::CharacteristicsReady.connection_state(),
            ConnectionState::Connecting
        );
        assert_eq!(SessionPhase::Active.connection_state(), ConnectionState::Active);
    }
}
