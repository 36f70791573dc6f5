//! Display and dashboard configuration commands.

use super::checksum::{pack_bits, rle_encode};
use super::chunk::{split, MAP_CHUNK_LEN};
use super::sequence::SequenceCounter;
use super::{push_prefixed, with_length_header, Opcode, NULL};
use crate::domain::error::{ProtocolError, ProtocolResult};
use chrono::NaiveDateTime;

/// Highest brightness level the glasses accept.
pub const MAX_BRIGHTNESS: u8 = 63;
/// Highest head-up activation angle, in degrees.
pub const MAX_HEAD_TILT: u8 = 60;
/// Number of note slots on the dashboard.
pub const NOTE_SLOTS: usize = 4;

/// `[0x01, level, auto]`. Levels above 63 are clamped.
pub fn brightness(level: u8, auto: bool) -> Vec<u8> {
    vec![Opcode::Brightness.as_byte(), level.min(MAX_BRIGHTNESS), u8::from(auto)]
}

pub fn silent_mode(enabled: bool) -> Vec<u8> {
    vec![Opcode::SilentMode.as_byte(), if enabled { 0x0C } else { 0x0A }, NULL]
}

pub fn wear_detection(enabled: bool) -> Vec<u8> {
    vec![Opcode::WearDetection.as_byte(), u8::from(enabled)]
}

/// `[0x0B, angle, 0x01]`; the angle must be within 0..=60 degrees.
pub fn head_tilt(angle: u8) -> ProtocolResult<Vec<u8>> {
    if angle > MAX_HEAD_TILT {
        return Err(ProtocolError::Validation(format!(
            "head tilt angle {} outside 0..={}",
            angle, MAX_HEAD_TILT
        )));
    }
    Ok(vec![Opcode::HeadTilt.as_byte(), angle, 0x01])
}

/// What looking up shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadsUpMode {
    /// Show the dashboard
    Dashboard = 0x00,
    /// Show nothing
    Nothing = 0x02,
}

impl HeadsUpMode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Dashboard),
            0x02 => Some(Self::Nothing),
            _ => None,
        }
    }

    /// Mode reported in a heads-up config response (`[0x08, 0x06, 0, 0, 0x04, mode]`).
    pub fn from_response(frame: &[u8]) -> Option<Self> {
        frame.get(5).copied().and_then(Self::from_byte)
    }
}

pub fn heads_up_config(mode: HeadsUpMode) -> Vec<u8> {
    vec![Opcode::HeadsUpConfig.as_byte(), 0x06, NULL, NULL, 0x03, mode as u8]
}

pub fn get_heads_up_config() -> Vec<u8> {
    vec![Opcode::HeadsUpConfig.as_byte(), 0x06, NULL, NULL, 0x04, NULL]
}

/// Dashboard placement. `vertical` is 1..=8; `distance` is 1..=9 in half-metre
/// steps starting at 1m.
pub fn dash_position(show: bool, vertical: u8, distance: u8) -> ProtocolResult<Vec<u8>> {
    if !(1..=8).contains(&vertical) {
        return Err(ProtocolError::Validation(format!(
            "dash vertical position {} outside 1..=8",
            vertical
        )));
    }
    if !(1..=9).contains(&distance) {
        return Err(ProtocolError::Validation(format!(
            "dash distance {} outside 1..=9",
            distance
        )));
    }
    Ok(vec![
        Opcode::DashConfig.as_byte(),
        0x08,
        0x00,
        0x01,
        0x02,
        u8::from(show),
        vertical,
        distance,
    ])
}

/// Sub-command of the dash-mode family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashModeConfig {
    WeatherTime = 0x01,
    Calendar = 0x03,
    Layout = 0x06,
    Map = 0x07,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashLayout {
    Full = 0x00,
    Dual = 0x01,
    Minimal = 0x02,
}

/// Pane shown next to the clock in full and dual layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DashSubMode {
    Notes = 0x00,
    Stock = 0x01,
    News = 0x02,
    Calendar = 0x03,
    Navigation = 0x04,
    Map = 0x05,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherIcon {
    Night = 0x01,
    Clouds = 0x02,
    Drizzle = 0x03,
    HeavyDrizzle = 0x04,
    Rain = 0x05,
    HeavyRain = 0x06,
    Thunder = 0x07,
    ThunderStorm = 0x08,
    Snow = 0x09,
    Mist = 0x0A,
    Fog = 0x0B,
    Sand = 0x0C,
    Squalls = 0x0D,
    Tornado = 0x0E,
    Freezing = 0x0F,
    Sunny = 0x10,
}

/// Clock and weather shown on the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeWeather {
    /// Wall-clock time as the wearer sees it. The glasses have no time zone,
    /// so local time is sent as if it were UTC.
    pub local_time: NaiveDateTime,
    pub icon: WeatherIcon,
    /// Temperature in the chosen unit.
    pub temperature: u8,
    pub fahrenheit: bool,
    pub twelve_hour: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    pub name: String,
    pub time: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub title: String,
    pub text: String,
}

/// `[0x06, len, 0x00, seq, config] + data`.
fn dash_frame(seq: u8, config: DashModeConfig, data: &[u8]) -> ProtocolResult<Vec<u8>> {
    let mut body = Vec::with_capacity(3 + data.len());
    body.extend_from_slice(&[NULL, seq, config as u8]);
    body.extend_from_slice(data);
    with_length_header(Opcode::DashMode, &body)
}

/// The counter only advances once the frame has been built.
fn dash_general(seq: &mut SequenceCounter, config: DashModeConfig, data: &[u8]) -> ProtocolResult<Vec<u8>> {
    let frame = dash_frame(seq.current(), config, data)?;
    seq.next();
    Ok(frame)
}

pub fn dash_layout(seq: &mut SequenceCounter, layout: DashLayout, sub_mode: DashSubMode) -> ProtocolResult<Vec<u8>> {
    let sub = if layout == DashLayout::Minimal { NULL } else { sub_mode as u8 };
    dash_general(seq, DashModeConfig::Layout, &[layout as u8, sub])
}

/// Seconds (i32 LE) and milliseconds (i64 LE) since the epoch, then the
/// weather icon, temperature, unit and clock format.
pub fn dash_time_weather(seq: &mut SequenceCounter, weather: &TimeWeather) -> ProtocolResult<Vec<u8>> {
    let utc = weather.local_time.and_utc();
    let seconds = i32::try_from(utc.timestamp())
        .map_err(|_| ProtocolError::Validation(format!("time {} out of range", weather.local_time)))?;
    let millis = utc.timestamp_millis();

    let mut data = Vec::with_capacity(16);
    data.extend_from_slice(&seconds.to_le_bytes());
    data.extend_from_slice(&millis.to_le_bytes());
    data.extend_from_slice(&[
        weather.icon as u8,
        weather.temperature,
        u8::from(weather.fahrenheit),
        u8::from(weather.twelve_hour),
    ]);
    dash_general(seq, DashModeConfig::WeatherTime, &data)
}

/// Calendar pane content as `(tag, len, value)` fields after a fixed preamble.
pub fn dash_calendar(seq: &mut SequenceCounter, event: &CalendarEvent) -> ProtocolResult<Vec<u8>> {
    let mut data = vec![0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01];
    data.push(0x01);
    push_prefixed(&mut data, "calendar name", &event.name)?;
    data.push(0x02);
    push_prefixed(&mut data, "calendar time", &event.time)?;
    data.push(0x03);
    push_prefixed(&mut data, "calendar location", &event.location)?;
    dash_general(seq, DashModeConfig::Calendar, &data)
}

/// Map part payloads, each `[count, 0x00, index + 1, 0x00] + slice`.
fn map_parts(bytes: &[u8]) -> ProtocolResult<Vec<Vec<u8>>> {
    let slices = split(bytes, MAP_CHUNK_LEN)?;
    let count = slices.len() as u8;
    Ok(slices
        .into_iter()
        .enumerate()
        .map(|(index, slice)| {
            let mut data = vec![count, NULL, index as u8 + 1, NULL];
            data.extend_from_slice(slice);
            data
        })
        .collect())
}

/// Dashboard map in three phases: a start signal, the RLE image with its
/// overlay, and a terminator. Every part takes its own sequence id, handed
/// out only once all three phases have been built.
pub fn dash_map(seq: &mut SequenceCounter, image: &[bool], overlay: &[bool]) -> ProtocolResult<Vec<Vec<u8>>> {
    const MAP_TRANSFER: u8 = 0x04;

    let pixels: Vec<bool> = image.iter().chain(overlay).copied().collect();
    let mut main = vec![NULL, MAP_TRANSFER, 0x02];
    main.extend(rle_encode(&pack_bits(&pixels)));

    let mut parts = map_parts(&[NULL, NULL, MAP_TRANSFER, NULL])?;
    parts.extend(map_parts(&main)?);
    parts.extend(map_parts(&[NULL, MAP_TRANSFER, 0x03, 0x01])?);

    let first = seq.current();
    let frames = parts
        .iter()
        .enumerate()
        .map(|(i, data)| dash_frame(first.wrapping_add(i as u8), DashModeConfig::Map, data))
        .collect::<ProtocolResult<Vec<_>>>()?;
    seq.reset_to(first.wrapping_add(frames.len() as u8));
    Ok(frames)
}

/// One frame per note slot, always four. Slots past the given notes are
/// cleared. Each frame takes a fresh note id.
pub fn notes(note_id: &mut SequenceCounter, notes: &[Note]) -> ProtocolResult<Vec<Vec<u8>>> {
    if notes.len() > NOTE_SLOTS {
        return Err(ProtocolError::Validation(format!(
            "{} notes given, the dashboard holds {}",
            notes.len(),
            NOTE_SLOTS
        )));
    }

    // Validate everything before touching the counter.
    let mut bodies = Vec::with_capacity(NOTE_SLOTS);
    for slot in 0..NOTE_SLOTS {
        let index = slot as u8 + 1;
        let body = match notes.get(slot) {
            Some(note) => {
                let mut body = vec![NULL, NULL, 0x03, 0x01, 0x00, 0x01, 0x00, index, 0x01];
                push_prefixed(&mut body, "note title", &note.title)?;
                let text = note.text.as_bytes();
                let text_len = u8::try_from(text.len()).map_err(|_| ProtocolError::FieldTooLong {
                    field: "note text",
                    len: text.len(),
                })?;
                body.extend_from_slice(&[text_len, NULL]);
                body.extend_from_slice(text);
                body
            }
            None => vec![
                NULL, NULL, 0x03, 0x01, 0x00, 0x01, 0x00, index, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00,
            ],
        };
        // Length check now; the id byte does not change the size.
        with_length_header(Opcode::Notes, &body)?;
        bodies.push(body);
    }

    bodies
        .into_iter()
        .map(|mut body| {
            body[1] = note_id.advance();
            with_length_header(Opcode::Notes, &body)
        })
        .collect()
}
