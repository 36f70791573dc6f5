//! Logical commands and their translation into addressed frames.

use super::checksum::crc_frame;
use super::config::{self, CalendarEvent, DashLayout, DashSubMode, HeadsUpMode, Note, TimeWeather};
use super::device::{self, Directions, Notification, NotificationAllowList, TeleprompterPage};
use super::info;
use super::sequence::SequenceCounter;
use super::{OutboundFrame, Target, WriteMode};
use crate::domain::error::ProtocolResult;
use crate::domain::settings::SessionConfig;
use std::time::Duration;

/// Device information requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoQuery {
    BrightnessState,
    DashPosition,
    HeadsUpAngle,
    Battery,
    GlassesState,
    Firmware,
    LensSerialNumber,
    DeviceSerialNumber,
}

impl InfoQuery {
    /// Queries issued once a pair becomes active.
    pub const ON_CONNECT: [InfoQuery; 5] = [
        InfoQuery::GlassesState,
        InfoQuery::Battery,
        InfoQuery::BrightnessState,
        InfoQuery::DashPosition,
        InfoQuery::HeadsUpAngle,
    ];

    fn bytes(self) -> Vec<u8> {
        match self {
            InfoQuery::BrightnessState => info::brightness_state(),
            InfoQuery::DashPosition => info::dash_position(),
            InfoQuery::HeadsUpAngle => info::heads_up_angle(),
            InfoQuery::Battery => info::battery(),
            InfoQuery::GlassesState => info::glasses_state(),
            InfoQuery::Firmware => info::firmware(),
            InfoQuery::LensSerialNumber => info::lens_serial_number(),
            InfoQuery::DeviceSerialNumber => info::device_serial_number(),
        }
    }

    /// The side that answers reliably.
    fn target(self) -> Target {
        match self {
            InfoQuery::GlassesState => Target::Left,
            InfoQuery::BrightnessState | InfoQuery::DashPosition | InfoQuery::HeadsUpAngle => Target::Right,
            InfoQuery::Battery
            | InfoQuery::Firmware
            | InfoQuery::LensSerialNumber
            | InfoQuery::DeviceSerialNumber => Target::Both,
        }
    }
}

/// Every command the glasses accept.
#[derive(Debug, Clone, PartialEq)]
pub enum GlassesCommand {
    Brightness { level: u8, auto: bool },
    SilentMode(bool),
    WearDetection(bool),
    /// Head-up activation angle in degrees
    HeadTilt(u8),
    HeadsUpMode(HeadsUpMode),
    GetHeadsUpMode,
    DashPosition { show: bool, vertical: u8, distance: u8 },
    DashLayout { layout: DashLayout, sub_mode: DashSubMode },
    DashTimeWeather(TimeWeather),
    DashCalendar(CalendarEvent),
    DashMap { image: Vec<bool>, overlay: Vec<bool> },
    Notes(Vec<Note>),
    Text(String),
    TeleprompterPage(TeleprompterPage),
    TeleprompterCustomEnd,
    TeleprompterEnd,
    /// Raw 1-bit bitmap, sent with the done marker and CRC
    Bitmap(Vec<u8>),
    Heartbeat,
    NotificationAllowList(NotificationAllowList),
    Notify(Notification),
    NotificationConfig { direct_push: bool, duration_secs: u8 },
    NavigateInit,
    NavigateDirections(Directions),
    NavigatePrimaryImage { image: Vec<bool>, overlay: Vec<bool> },
    NavigateSecondaryImage { image: Vec<bool>, overlay: Vec<bool> },
    NavigatePoller,
    NavigateEnd,
    Mic(bool),
    Exit,
    Query(InfoQuery),
    Restart,
}

impl GlassesCommand {
    pub fn name(&self) -> &'static str {
        match self {
            GlassesCommand::Brightness { .. } => "brightness",
            GlassesCommand::SilentMode(_) => "silent mode",
            GlassesCommand::WearDetection(_) => "wear detection",
            GlassesCommand::HeadTilt(_) => "head tilt",
            GlassesCommand::HeadsUpMode(_) | GlassesCommand::GetHeadsUpMode => "heads-up config",
            GlassesCommand::DashPosition { .. } => "dash position",
            GlassesCommand::DashLayout { .. } => "dash layout",
            GlassesCommand::DashTimeWeather(_) => "dash time and weather",
            GlassesCommand::DashCalendar(_) => "dash calendar",
            GlassesCommand::DashMap { .. } => "dash map",
            GlassesCommand::Notes(_) => "notes",
            GlassesCommand::Text(_) => "text",
            GlassesCommand::TeleprompterPage(_)
            | GlassesCommand::TeleprompterCustomEnd
            | GlassesCommand::TeleprompterEnd => "teleprompter",
            GlassesCommand::Bitmap(_) => "bitmap",
            GlassesCommand::Heartbeat => "heartbeat",
            GlassesCommand::NotificationAllowList(_) => "notification allow-list",
            GlassesCommand::Notify(_) => "notification",
            GlassesCommand::NotificationConfig { .. } => "notification config",
            GlassesCommand::NavigateInit
            | GlassesCommand::NavigateDirections(_)
            | GlassesCommand::NavigatePrimaryImage { .. }
            | GlassesCommand::NavigateSecondaryImage { .. }
            | GlassesCommand::NavigatePoller
            | GlassesCommand::NavigateEnd => "navigation",
            GlassesCommand::Mic(_) => "mic",
            GlassesCommand::Exit => "exit",
            GlassesCommand::Query(_) => "query",
            GlassesCommand::Restart => "restart",
        }
    }
}

/// Pauses inside a bitmap transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapPacing {
    pub chunk_delay: Duration,
    pub crc_delay: Duration,
}

impl Default for BitmapPacing {
    fn default() -> Self {
        Self {
            chunk_delay: Duration::from_millis(8),
            crc_delay: Duration::from_millis(100),
        }
    }
}

impl From<&SessionConfig> for BitmapPacing {
    fn from(config: &SessionConfig) -> Self {
        Self {
            chunk_delay: config.bmp_chunk_delay,
            crc_delay: config.bmp_crc_delay,
        }
    }
}

/// Owns the per-family sequence counters and turns commands into frames.
#[derive(Debug)]
pub struct CommandEncoder {
    pacing: BitmapPacing,
    dash: SequenceCounter,
    note: SequenceCounter,
    notify: SequenceCounter,
    teleprompt: SequenceCounter,
    navigate: SequenceCounter,
    poller: SequenceCounter,
    heartbeat: SequenceCounter,
    text: SequenceCounter,
}

impl Default for CommandEncoder {
    fn default() -> Self {
        Self::new(BitmapPacing::default())
    }
}

fn both(frames: Vec<Vec<u8>>) -> Vec<OutboundFrame> {
    frames.into_iter().map(OutboundFrame::both).collect()
}

impl CommandEncoder {
    pub fn new(pacing: BitmapPacing) -> Self {
        Self {
            pacing,
            dash: SequenceCounter::new(),
            note: SequenceCounter::new(),
            notify: SequenceCounter::new(),
            teleprompt: SequenceCounter::new(),
            navigate: SequenceCounter::new(),
            poller: SequenceCounter::starting_at(1),
            heartbeat: SequenceCounter::new(),
            text: SequenceCounter::new(),
        }
    }

    /// Counters have no meaning across sessions.
    pub fn reset(&mut self) {
        *self = Self::new(self.pacing);
    }

    /// Validate and encode. Nothing is counted if validation fails.
    pub fn encode(&mut self, command: &GlassesCommand) -> ProtocolResult<Vec<OutboundFrame>> {
        let frames = match command {
            GlassesCommand::Brightness { level, auto } => vec![OutboundFrame::new(
                config::brightness(*level, *auto),
                Target::Right,
                WriteMode::Acknowledged,
            )],
            GlassesCommand::SilentMode(enabled) => vec![OutboundFrame::both_acknowledged(config::silent_mode(*enabled))],
            GlassesCommand::WearDetection(enabled) => vec![OutboundFrame::both_acknowledged(config::wear_detection(*enabled))],
            GlassesCommand::HeadTilt(angle) => vec![OutboundFrame::both_acknowledged(config::head_tilt(*angle)?)],
            GlassesCommand::HeadsUpMode(mode) => vec![OutboundFrame::new(
                config::heads_up_config(*mode),
                Target::Right,
                WriteMode::FireAndForget,
            )],
            GlassesCommand::GetHeadsUpMode => vec![OutboundFrame::new(
                config::get_heads_up_config(),
                Target::Right,
                WriteMode::Acknowledged,
            )],
            GlassesCommand::DashPosition {
                show,
                vertical,
                distance,
            } => vec![OutboundFrame::both_acknowledged(config::dash_position(*show, *vertical, *distance)?)],
            GlassesCommand::DashLayout { layout, sub_mode } => {
                vec![OutboundFrame::both(config::dash_layout(&mut self.dash, *layout, *sub_mode)?)]
            }
            GlassesCommand::DashTimeWeather(weather) => {
                vec![OutboundFrame::both(config::dash_time_weather(&mut self.dash, weather)?)]
            }
            GlassesCommand::DashCalendar(event) => {
                vec![OutboundFrame::both(config::dash_calendar(&mut self.dash, event)?)]
            }
            GlassesCommand::DashMap { image, overlay } => both(config::dash_map(&mut self.dash, image, overlay)?),
            GlassesCommand::Notes(notes) => both(config::notes(&mut self.note, notes)?),
            GlassesCommand::Text(text) => both(device::text(&mut self.text, text)?),
            GlassesCommand::TeleprompterPage(page) => both(device::teleprompter_page(&mut self.teleprompt, page)?),
            GlassesCommand::TeleprompterCustomEnd => {
                vec![OutboundFrame::both(device::teleprompter_custom_end(&mut self.teleprompt)?)]
            }
            GlassesCommand::TeleprompterEnd => vec![OutboundFrame::both(device::teleprompter_end(&self.teleprompt))],
            GlassesCommand::Bitmap(image) => self.bitmap(image)?,
            GlassesCommand::Heartbeat => vec![OutboundFrame::both(device::heartbeat(&mut self.heartbeat))],
            GlassesCommand::NotificationAllowList(allow) => both(device::notification_allow_list(allow)?),
            GlassesCommand::Notify(notification) => both(device::notification(&mut self.notify, notification)?),
            GlassesCommand::NotificationConfig {
                direct_push,
                duration_secs,
            } => vec![OutboundFrame::both(device::notification_config(*direct_push, *duration_secs))],
            GlassesCommand::NavigateInit => vec![OutboundFrame::both(device::navigate_init(&mut self.navigate)?)],
            GlassesCommand::NavigateDirections(directions) => {
                vec![OutboundFrame::both(device::navigate_directions(&self.navigate, directions)?)]
            }
            GlassesCommand::NavigatePrimaryImage { image, overlay } => {
                both(device::navigate_primary_image(&mut self.navigate, image, overlay)?)
            }
            GlassesCommand::NavigateSecondaryImage { image, overlay } => {
                both(device::navigate_secondary_image(&mut self.navigate, image, overlay)?)
            }
            GlassesCommand::NavigatePoller => vec![OutboundFrame::both(device::navigate_poller(
                &mut self.navigate,
                &mut self.poller,
            )?)],
            GlassesCommand::NavigateEnd => vec![OutboundFrame::both(device::navigate_end(&mut self.navigate)?)],
            GlassesCommand::Mic(enable) => vec![OutboundFrame::new(
                device::mic(*enable),
                Target::Right,
                WriteMode::Acknowledged,
            )],
            GlassesCommand::Exit => vec![OutboundFrame::both(device::exit())],
            GlassesCommand::Query(query) => {
                vec![OutboundFrame::new(query.bytes(), query.target(), WriteMode::Acknowledged)]
            }
            GlassesCommand::Restart => vec![OutboundFrame::both(info::restart())],
        };
        Ok(frames)
    }

    /// Chunks, then the done marker and the CRC, both acknowledged.
    fn bitmap(&self, image: &[u8]) -> ProtocolResult<Vec<OutboundFrame>> {
        let mut frames: Vec<OutboundFrame> = device::bitmap(image)?
            .into_iter()
            .map(|chunk| OutboundFrame::both(chunk).with_pause(self.pacing.chunk_delay))
            .collect();
        frames.push(
            OutboundFrame::new(device::bitmap_done(), Target::Both, WriteMode::Acknowledged)
                .with_pause(self.pacing.crc_delay),
        );
        frames.push(OutboundFrame::new(crc_frame(image), Target::Both, WriteMode::Acknowledged));
        Ok(frames)
    }
}
