//! Content commands: text, teleprompter, bitmaps, notifications, navigation,
//! microphone, heartbeat, and the 0xF5 device event stream.

use super::checksum::{pack_bits, rle_encode};
use super::chunk::{
    chunk_bitmap, chunk_indexed, split, ALLOW_LIST_CHUNK_LEN, ALLOW_LIST_LAYOUT, NAVIGATE_IMAGE_CHUNK_LEN,
    NOTIFY_CHUNK_LEN, NOTIFY_LAYOUT, TEXT_CHUNK_LEN,
};
use super::sequence::SequenceCounter;
use super::{with_length_header, Opcode, ResponseStatus, NULL};
use crate::domain::error::{ProtocolError, ProtocolResult};
use crate::domain::models::NotificationApp;
use serde::{Deserialize, Serialize};

pub fn exit() -> Vec<u8> {
    vec![Opcode::Exit.as_byte()]
}

pub fn mic(enable: bool) -> Vec<u8> {
    vec![Opcode::Mic.as_byte(), u8::from(enable)]
}

/// Reply to a mic toggle: `[0x0E, status, enabled]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MicResponse {
    pub status: ResponseStatus,
    pub enabled: bool,
}

impl MicResponse {
    pub fn decode(frame: &[u8]) -> Option<Self> {
        match frame {
            [_, status, enabled, ..] => Some(Self {
                status: ResponseStatus::from_byte(*status),
                enabled: *enabled == 1,
            }),
            _ => None,
        }
    }
}

/// `[0x25, 0x06, 0x00, seq, 0x04, seq]`.
pub fn heartbeat(seq: &mut SequenceCounter) -> Vec<u8> {
    let id = seq.next();
    vec![Opcode::Heartbeat.as_byte(), 0x06, 0x00, id, 0x04, id]
}

/// Free-form text on a fresh screen.
///
/// `[0x4E, seq, total, index, 0x71, 0x00, 0x00, page, pages] + utf8`, where
/// 0x71 means new content shown as text and the two zero bytes are the
/// (big-endian) character position. The whole text goes out as page 0 of 1.
pub fn text(seq: &mut SequenceCounter, text: &str) -> ProtocolResult<Vec<Vec<u8>>> {
    const NEW_TEXT_SCREEN: u8 = 0x71;
    let slices = split(text.as_bytes(), TEXT_CHUNK_LEN)?;
    let total = slices.len() as u8;
    let id = seq.next();
    Ok(slices
        .into_iter()
        .enumerate()
        .map(|(index, slice)| {
            let mut frame = vec![
                Opcode::Text.as_byte(),
                id,
                total,
                index as u8,
                NEW_TEXT_SCREEN,
                0x00,
                0x00,
                0x00,
                0x01,
            ];
            frame.extend_from_slice(slice);
            frame
        })
        .collect())
}

/// One teleprompter update: the visible text plus the text queued after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeleprompterPage {
    /// First page after opening the teleprompter.
    pub first: bool,
    pub visible: String,
    pub next: String,
    /// Scroll progress, 0..=100.
    pub completed_percent: u8,
}

const TELEPROMPT_CLOSED: &str = "Teleprompt Closed";

fn teleprompt_frame(control: [u8; 10], content: &[u8]) -> ProtocolResult<Vec<u8>> {
    let mut body = Vec::with_capacity(control.len() + content.len());
    body.extend_from_slice(&control);
    body.extend_from_slice(content);
    with_length_header(Opcode::Teleprompter, &body)
}

/// Two frames, visible text then next text. Each takes its own sequence id.
pub fn teleprompter_page(seq: &mut SequenceCounter, page: &TeleprompterPage) -> ProtocolResult<Vec<Vec<u8>>> {
    if page.completed_percent > 100 {
        return Err(ProtocolError::Validation(format!(
            "teleprompter progress {}% over 100",
            page.completed_percent
        )));
    }
    let screen = if page.first { 0x01 } else { 0x07 };
    let flag = if page.first { 0x08 } else { NULL };
    let parts = [page.visible.as_bytes(), page.next.as_bytes()];

    let mut frames = Vec::with_capacity(parts.len());
    for (index, part) in parts.iter().enumerate() {
        let control = [
            NULL,
            seq.current().wrapping_add(index as u8),
            screen,
            parts.len() as u8,
            NULL,
            index as u8 + 1,
            NULL,
            page.completed_percent,
            flag,
            NULL,
        ];
        frames.push(teleprompt_frame(control, part)?);
    }
    seq.reset_to(seq.current().wrapping_add(parts.len() as u8));
    Ok(frames)
}

/// Replaces the teleprompter with a centred "closed" message.
pub fn teleprompter_custom_end(seq: &mut SequenceCounter) -> ProtocolResult<Vec<u8>> {
    const MANUAL: u8 = 0x03;
    let control = [NULL, seq.current(), MANUAL, 0x01, NULL, 0x01, NULL, 100, NULL, NULL];
    let padding = " ".repeat(19);
    let content = format!("\n\n{padding}{TELEPROMPT_CLOSED}{padding}");
    let frame = teleprompt_frame(control, content.as_bytes())?;
    seq.next();
    Ok(frame)
}

pub fn teleprompter_end(seq: &SequenceCounter) -> Vec<u8> {
    vec![Opcode::Teleprompter.as_byte(), 0x06, NULL, seq.current(), 0x05, 0x01]
}

/// Bitmap chunks; see [`chunk_bitmap`].
pub fn bitmap(image: &[u8]) -> ProtocolResult<Vec<Vec<u8>>> {
    chunk_bitmap(image)
}

/// Marks the end of a bitmap transfer.
pub fn bitmap_done() -> Vec<u8> {
    vec![Opcode::BmpDone.as_byte(), 0x0D, 0x0E]
}

/// Which notification sources the glasses mirror.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NotificationAllowList {
    pub calendar: bool,
    pub call: bool,
    pub msg: bool,
    pub ios_mail: bool,
    /// `None` disables per-app forwarding.
    pub apps: Option<Vec<NotificationApp>>,
}

#[derive(Serialize)]
struct AllowListWire<'a> {
    calendar_enable: bool,
    call_enable: bool,
    msg_enable: bool,
    ios_mail_enable: bool,
    app: AllowListApps<'a>,
}

#[derive(Serialize)]
struct AllowListApps<'a> {
    list: Vec<AllowListEntry<'a>>,
    enable: bool,
}

#[derive(Serialize)]
struct AllowListEntry<'a> {
    id: &'a str,
    name: &'a str,
}

fn to_json<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| ProtocolError::Validation(format!("json encoding failed: {}", e)))
}

/// Allow-list JSON in 177-byte chunks `[0x04, count, index]`.
pub fn notification_allow_list(allow: &NotificationAllowList) -> ProtocolResult<Vec<Vec<u8>>> {
    let wire = AllowListWire {
        calendar_enable: allow.calendar,
        call_enable: allow.call,
        msg_enable: allow.msg,
        ios_mail_enable: allow.ios_mail,
        app: AllowListApps {
            list: allow
                .apps
                .iter()
                .flatten()
                .map(|app| AllowListEntry {
                    id: &app.app_identifier,
                    name: &app.display_name,
                })
                .collect(),
            enable: allow.apps.is_some(),
        },
    };
    chunk_indexed(ALLOW_LIST_LAYOUT, &[], &to_json(&wire)?, ALLOW_LIST_CHUNK_LEN)
}

/// A phone notification mirrored to the glasses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub app_identifier: String,
    pub display_name: String,
    pub title: String,
    pub subtitle: String,
    pub message: String,
    /// Milliseconds since the epoch, whole seconds only.
    #[serde(rename = "time_s")]
    pub timestamp_ms: u64,
}

impl Notification {
    /// Stamp a notification with the current time.
    pub fn new(
        app_identifier: impl Into<String>,
        display_name: impl Into<String>,
        title: impl Into<String>,
        subtitle: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let seconds = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
        Self {
            app_identifier: app_identifier.into(),
            display_name: display_name.into(),
            title: title.into(),
            subtitle: subtitle.into(),
            message: message.into(),
            timestamp_ms: seconds * 1000,
        }
    }
}

#[derive(Serialize)]
struct NotificationWire<'a> {
    ncs_notification: NotificationBody<'a>,
}

#[derive(Serialize)]
struct NotificationBody<'a> {
    msg_id: u32,
    #[serde(flatten)]
    notification: &'a Notification,
}

/// Notification JSON in 176-byte chunks `[0x4B, notify_id, count, index]`.
pub fn notification(notify_id: &mut SequenceCounter, notification: &Notification) -> ProtocolResult<Vec<Vec<u8>>> {
    const MSG_ID: u32 = 1_234_567_890;
    let wire = NotificationWire {
        ncs_notification: NotificationBody {
            msg_id: MSG_ID,
            notification,
        },
    };
    let frames = chunk_indexed(NOTIFY_LAYOUT, &[notify_id.current()], &to_json(&wire)?, NOTIFY_CHUNK_LEN)?;
    notify_id.next();
    Ok(frames)
}

/// `[0x4F, direct_push, duration_s]`.
pub fn notification_config(direct_push: bool, duration_secs: u8) -> Vec<u8> {
    vec![Opcode::NotifConfig.as_byte(), u8::from(direct_push), duration_secs]
}

/// `{"whitelist_app_add": {...}}`, sent by the glasses when the wearer
/// enables notifications for a new app.
#[derive(Debug, Deserialize)]
struct NotificationSettingWire {
    whitelist_app_add: Option<NotificationApp>,
}

/// Decode a reassembled 0xF6 payload.
pub fn decode_notification_setting(payload: &[u8]) -> ProtocolResult<Option<NotificationApp>> {
    let wire: NotificationSettingWire = serde_json::from_slice(payload).map_err(|_| ProtocolError::MalformedFrame {
        opcode: Opcode::NotifSetting.as_byte(),
        len: payload.len(),
        min: 0,
    })?;
    Ok(wire.whitelist_app_add)
}

/// Manoeuvre icon in the navigation view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionTurn {
    StraightDot = 0x01,
    Straight = 0x02,
    Right = 0x03,
    Left = 0x04,
    SlightRight = 0x05,
    SlightLeft = 0x06,
    StrongRight = 0x07,
    StrongLeft = 0x08,
    UTurnLeft = 0x09,
    UTurnRight = 0x0A,
    Merge = 0x0B,
    RightLaneRightStrongAtRoundabout = 0x0C,
    LeftLaneRightStrongAtRoundabout = 0x0D,
    RightLaneRightAtRoundabout = 0x0E,
    LeftLaneRightAtRoundabout = 0x0F,
    RightLaneSlightRightAtRoundabout = 0x10,
    LeftLaneSlightRightAtRoundabout = 0x11,
    RightLaneStraightAtRoundabout = 0x12,
    LeftLaneStraightAtRoundabout = 0x13,
    RightLaneSlightLeftAtRoundabout = 0x14,
    LeftLaneSlightLeftAtRoundabout = 0x15,
    RightLaneLeftAtRoundabout = 0x16,
    LeftLaneLeftAtRoundabout = 0x17,
    RightLaneStrongLeftAtRoundabout = 0x18,
    LeftLaneStrongLeftAtRoundabout = 0x19,
    RightLaneUTurnAtRoundabout = 0x1A,
    LeftLaneUTurnAtRoundabout = 0x1B,
    RightLaneEnterRoundabout = 0x1C,
    LeftLaneEnterRoundabout = 0x1D,
    RightLaneExitRoundabout = 0x1E,
    LeftLaneExitRoundabout = 0x1F,
    RightOfframp = 0x20,
    LeftOfframp = 0x21,
    SlightRightAtFork = 0x22,
    SlightLeftAtFork = 0x23,
}

/// Turn-by-turn step shown above the maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directions {
    pub total_duration: String,
    pub total_distance: String,
    pub direction: String,
    pub distance: String,
    pub speed: String,
    pub turn: DirectionTurn,
    /// Position marker on the secondary map, 0..=488.
    pub x: u16,
    /// 0..=136.
    pub y: u8,
}

/// Image width and height of the primary navigation map.
pub const PRIMARY_MAP_SIDE: usize = 136;
/// Secondary navigation map is 488 x 136.
pub const SECONDARY_MAP_WIDTH: usize = 488;

fn navigate_frame(body: &[u8]) -> ProtocolResult<Vec<u8>> {
    with_length_header(Opcode::Navigate, body)
}

pub fn navigate_init(seq: &mut SequenceCounter) -> ProtocolResult<Vec<u8>> {
    let frame = navigate_frame(&[NULL, seq.current(), 0x00, 0x01])?;
    seq.next();
    Ok(frame)
}

/// Header then NUL-terminated strings. Does not advance the counter.
pub fn navigate_directions(seq: &SequenceCounter, directions: &Directions) -> ProtocolResult<Vec<u8>> {
    let mut body = vec![NULL, seq.current(), 0x01, directions.turn as u8];
    body.extend_from_slice(&directions.x.to_be_bytes());
    body.extend_from_slice(&[directions.y, NULL]);
    for field in [
        &directions.total_duration,
        &directions.total_distance,
        &directions.direction,
        &directions.distance,
        &directions.speed,
    ] {
        body.extend_from_slice(field.as_bytes());
        body.push(NULL);
    }
    navigate_frame(&body)
}

fn navigate_image(
    seq: &mut SequenceCounter,
    part_type: u8,
    image: &[u8],
    trailer: &[u8],
) -> ProtocolResult<Vec<Vec<u8>>> {
    let slices = split(image, NAVIGATE_IMAGE_CHUNK_LEN)?;
    let count = slices.len() as u8;
    let mut frames = Vec::with_capacity(slices.len());
    for (index, slice) in slices.into_iter().enumerate() {
        let mut body = vec![
            NULL,
            seq.current().wrapping_add(index as u8),
            part_type,
            count,
            NULL,
            index as u8 + 1,
            NULL,
        ];
        body.extend_from_slice(trailer);
        body.extend_from_slice(slice);
        frames.push(navigate_frame(&body)?);
    }
    seq.reset_to(seq.current().wrapping_add(count));
    Ok(frames)
}

fn combined_bits(image: &[bool], overlay: &[bool], expected: usize) -> ProtocolResult<Vec<u8>> {
    if image.len() != expected || overlay.len() != expected {
        return Err(ProtocolError::Validation(format!(
            "navigation image needs {} pixels per layer, got {} and {}",
            expected,
            image.len(),
            overlay.len()
        )));
    }
    let pixels: Vec<bool> = image.iter().chain(overlay).copied().collect();
    Ok(pack_bits(&pixels))
}

/// Primary 136 x 136 map with overlay, run-length encoded.
pub fn navigate_primary_image(
    seq: &mut SequenceCounter,
    image: &[bool],
    overlay: &[bool],
) -> ProtocolResult<Vec<Vec<u8>>> {
    let bytes = combined_bits(image, overlay, PRIMARY_MAP_SIDE * PRIMARY_MAP_SIDE)?;
    navigate_image(seq, 0x02, &rle_encode(&bytes), &[])
}

/// Secondary 488 x 136 map with overlay, sent raw.
pub fn navigate_secondary_image(
    seq: &mut SequenceCounter,
    image: &[bool],
    overlay: &[bool],
) -> ProtocolResult<Vec<Vec<u8>>> {
    let bytes = combined_bits(image, overlay, SECONDARY_MAP_WIDTH * PRIMARY_MAP_SIDE)?;
    navigate_image(seq, 0x03, &bytes, &[NULL])
}

/// Keeps the navigation view alive. `poller` has its own counter, starting at 1.
pub fn navigate_poller(seq: &mut SequenceCounter, poller: &mut SequenceCounter) -> ProtocolResult<Vec<u8>> {
    let frame = navigate_frame(&[NULL, seq.current(), 0x04, poller.current()])?;
    seq.next();
    poller.next();
    Ok(frame)
}

pub fn navigate_end(seq: &mut SequenceCounter) -> ProtocolResult<Vec<u8>> {
    let frame = navigate_frame(&[NULL, seq.current(), 0x05, 0x01])?;
    seq.next();
    Ok(frame)
}

/// Unsolicited 0xF5 events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    DoubleTap,
    SingleTap,
    LookUp,
    LookDown,
    /// Triple tap turning silent mode on
    TripleTapSilent,
    /// Triple tap turning silent mode off
    TripleTapNormal,
    WearOn,
    WearOff,
    CaseOpen,
    Charging(bool),
    CaseClose,
    CaseCharging(bool),
    CaseBattery(u8),
    DashShown,
    DashHide,
    /// Seen on the wire, meaning not known
    Unknown(u8),
}

impl DeviceEvent {
    pub fn decode(frame: &[u8]) -> Option<Self> {
        let code = *frame.get(1)?;
        let arg = frame.get(2).copied();
        let event = match code {
            0x00 => Self::DoubleTap,
            0x01 => Self::SingleTap,
            0x02 => Self::LookUp,
            0x03 => Self::LookDown,
            0x04 => Self::TripleTapSilent,
            0x05 => Self::TripleTapNormal,
            0x06 => Self::WearOn,
            0x07 => Self::WearOff,
            0x08 => Self::CaseOpen,
            0x09 => Self::Charging(arg? == 1),
            0x0B => Self::CaseClose,
            0x0E => Self::CaseCharging(arg? == 1),
            0x0F => Self::CaseBattery(arg?),
            0x1E => Self::DashShown,
            0x1F => Self::DashHide,
            other => Self::Unknown(other),
        };
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_layout() {
        let mut seq = SequenceCounter::new();
        let frames = text(&mut seq, "hi").unwrap();
        assert_eq!(frames, vec![vec![0x4E, 0x00, 0x01, 0x00, 0x71, 0x00, 0x00, 0x00, 0x01, b'h', b'i']]);
        assert_eq!(seq.current(), 1);
    }

    #[test]
    fn test_long_text_is_chunked() {
        let mut seq = SequenceCounter::starting_at(5);
        let body = "a".repeat(TEXT_CHUNK_LEN + 10);
        let frames = text(&mut seq, &body).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[1][..4], &[0x4E, 5, 2, 1]);
        assert_eq!(frames[1].len(), 9 + 10);
    }

    #[test]
    fn test_heartbeat_sequence() {
        let mut seq = SequenceCounter::starting_at(0xFF);
        assert_eq!(heartbeat(&mut seq), vec![0x25, 0x06, 0x00, 0xFF, 0x04, 0xFF]);
        assert_eq!(heartbeat(&mut seq), vec![0x25, 0x06, 0x00, 0x00, 0x04, 0x00]);
    }

    #[test]
    fn test_teleprompter_page() {
        let mut seq = SequenceCounter::new();
        let page = TeleprompterPage {
            first: true,
            visible: "ab".into(),
            next: "c".into(),
            completed_percent: 10,
        };
        let frames = teleprompter_page(&mut seq, &page).unwrap();
        assert_eq!(frames[0], vec![0x09, 14, 0, 0, 0x01, 2, 0, 1, 0, 10, 0x08, 0, b'a', b'b']);
        assert_eq!(frames[1], vec![0x09, 13, 0, 1, 0x01, 2, 0, 2, 0, 10, 0x08, 0, b'c']);
        assert_eq!(seq.current(), 2);
        assert_eq!(teleprompter_end(&seq), vec![0x09, 0x06, 0, 2, 0x05, 0x01]);

        let bad = TeleprompterPage {
            completed_percent: 101,
            ..page
        };
        assert!(teleprompter_page(&mut seq, &bad).unwrap_err().is_validation());
    }

    #[test]
    fn test_teleprompter_custom_end() {
        let mut seq = SequenceCounter::starting_at(3);
        let frame = teleprompter_custom_end(&mut seq).unwrap();
        assert_eq!(frame[1] as usize, frame.len());
        assert_eq!(&frame[2..12], &[0, 3, 0x03, 1, 0, 1, 0, 100, 0, 0]);
        assert_eq!(&frame[12..14], b"\n\n");
        let text = String::from_utf8(frame[14..].to_vec()).unwrap();
        assert_eq!(text.trim(), "Teleprompt Closed");
        assert_eq!(seq.current(), 4);
    }

    #[test]
    fn test_notification_json_and_chunks() {
        let mut id = SequenceCounter::starting_at(7);
        let note = Notification {
            app_identifier: "dev.example".into(),
            display_name: "Example".into(),
            title: "Title".into(),
            subtitle: "Sub".into(),
            message: "m".repeat(300),
            timestamp_ms: 1_700_000_000_000,
        };
        let frames = notification(&mut id, &note).unwrap();
        assert!(frames.len() >= 2);
        assert!(frames.iter().all(|f| f[0] == 0x4B && f[1] == 7));
        assert_eq!(frames[0][2] as usize, frames.len());
        assert_eq!(id.current(), 8);

        let json: Vec<u8> = frames.iter().flat_map(|f| f[4..].to_vec()).collect();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        let body = &value["ncs_notification"];
        assert_eq!(body["msg_id"], 1_234_567_890);
        assert_eq!(body["time_s"], 1_700_000_000_000u64);
        assert_eq!(body["app_identifier"], "dev.example");
    }

    #[test]
    fn test_allow_list_json() {
        let allow = NotificationAllowList {
            calendar: true,
            apps: Some(vec![NotificationApp {
                app_identifier: "com.mail".into(),
                display_name: "Mail".into(),
            }]),
            ..Default::default()
        };
        let frames = notification_allow_list(&allow).unwrap();
        assert_eq!(&frames[0][..3], &[0x04, 1, 0]);
        let value: serde_json::Value = serde_json::from_slice(&frames[0][3..]).unwrap();
        assert_eq!(value["calendar_enable"], true);
        assert_eq!(value["app"]["enable"], true);
        assert_eq!(value["app"]["list"][0]["id"], "com.mail");
    }

    #[test]
    fn test_decode_notification_setting() {
        let payload = br#"{"whitelist_app_add": {"app_identifier": "com.x", "display_name": "X"}}"#;
        let app = decode_notification_setting(payload).unwrap().unwrap();
        assert_eq!(app.app_identifier, "com.x");
        assert_eq!(decode_notification_setting(b"{}").unwrap(), None);
        assert!(decode_notification_setting(b"{not json").is_err());
    }

    #[test]
    fn test_navigation_frames() {
        let mut seq = SequenceCounter::new();
        let mut poller = SequenceCounter::starting_at(1);
        assert_eq!(navigate_init(&mut seq).unwrap(), vec![0x0A, 0x06, 0, 0, 0, 1]);

        let directions = Directions {
            total_duration: "6min".into(),
            total_distance: "529m".into(),
            direction: "Right".into(),
            distance: "18 m".into(),
            speed: "0km/h".into(),
            turn: DirectionTurn::Right,
            x: 488,
            y: 0,
        };
        let frame = navigate_directions(&seq, &directions).unwrap();
        assert_eq!(&frame[..10], &[0x0A, frame[1], 0, 1, 0x01, 0x03, 0x01, 0xE8, 0, 0]);
        assert_eq!(&frame[10..15], b"6min\0");
        assert_eq!(*frame.last().unwrap(), 0);
        assert_eq!(frame[1] as usize, frame.len());

        assert_eq!(navigate_poller(&mut seq, &mut poller).unwrap(), vec![0x0A, 6, 0, 1, 4, 1]);
        assert_eq!(navigate_end(&mut seq).unwrap(), vec![0x0A, 6, 0, 2, 5, 1]);
        assert_eq!(poller.current(), 2);
    }

    #[test]
    fn test_navigation_images() {
        let mut seq = SequenceCounter::new();
        let blank = vec![false; PRIMARY_MAP_SIDE * PRIMARY_MAP_SIDE];
        let frames = navigate_primary_image(&mut seq, &blank, &blank).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][2..9], &[0, 0, 0x02, 1, 0, 1, 0]);
        assert_eq!(seq.current(), 1);

        let wide = vec![true; SECONDARY_MAP_WIDTH * PRIMARY_MAP_SIDE];
        let frames = navigate_secondary_image(&mut seq, &wide, &wide).unwrap();
        let bytes = SECONDARY_MAP_WIDTH * PRIMARY_MAP_SIDE * 2 / 8;
        assert_eq!(frames.len(), bytes.div_ceil(NAVIGATE_IMAGE_CHUNK_LEN));
        assert_eq!(&frames[1][2..10], &[0, 2, 0x03, frames.len() as u8, 0, 2, 0, 0]);

        assert!(navigate_primary_image(&mut seq, &blank[1..], &blank).is_err());
    }

    #[test]
    fn test_device_events() {
        assert_eq!(DeviceEvent::decode(&[0xF5, 0x01]), Some(DeviceEvent::SingleTap));
        assert_eq!(DeviceEvent::decode(&[0xF5, 0x00]), Some(DeviceEvent::DoubleTap));
        assert_eq!(DeviceEvent::decode(&[0xF5, 0x0F, 0x46]), Some(DeviceEvent::CaseBattery(0x46)));
        assert_eq!(DeviceEvent::decode(&[0xF5, 0x09, 0x01]), Some(DeviceEvent::Charging(true)));
        assert_eq!(DeviceEvent::decode(&[0xF5, 0x0E]), None);
        assert_eq!(DeviceEvent::decode(&[0xF5, 0x11]), Some(DeviceEvent::Unknown(0x11)));
    }

    #[test]
    fn test_mic_response() {
        let resp = MicResponse::decode(&[0x0E, 0xC9, 0x01]).unwrap();
        assert!(resp.status.is_success());
        assert!(resp.enabled);
        assert_eq!(MicResponse::decode(&[0x0E, 0xC9]), None);
    }
}
