//! Chunked transfer encoding for payloads larger than one BLE write.
//!
//! Each command family has a fixed, empirically determined chunk limit; the
//! glasses do not negotiate MTU. A chunked frame carries the opcode, an
//! optional family specific prefix, the total chunk count and the chunk's
//! own index:
//!
//! ```text
//! [opcode] [prefix ..] [total] [index] [data ..]
//! ```
//!
//! Count and index are single bytes, so a payload needing more than 255
//! chunks is rejected instead of truncated.
//!
//! The receiving side accumulates chunks per (peripheral, opcode). Index 0
//! always starts a fresh transfer, superseding whatever was in flight.

use super::checksum::BMP_ADDRESS;
use super::Opcode;
use crate::domain::error::{ProtocolError, ProtocolResult};
use crate::domain::models::PeripheralId;
use std::collections::HashMap;
use tracing::{trace, warn};

/// Notification payload (0x4B).
pub const NOTIFY_CHUNK_LEN: usize = 176;
/// Notification allow-list (0x04).
pub const ALLOW_LIST_CHUNK_LEN: usize = 177;
/// Dashboard map image (0x06, map sub-command).
pub const MAP_CHUNK_LEN: usize = 182;
/// Navigation images (0x0A).
pub const NAVIGATE_IMAGE_CHUNK_LEN: usize = 185;
/// Raw bitmap (0x15).
pub const BMP_CHUNK_LEN: usize = 194;
/// Free-form text (0x4E).
pub const TEXT_CHUNK_LEN: usize = 176;

/// Count and index of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub total: u8,
    pub index: u8,
}

/// Position of the count/index bytes inside a family's frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedLayout {
    pub opcode: Opcode,
    /// Bytes between the opcode and the count byte.
    pub prefix_len: usize,
}

impl IndexedLayout {
    pub const fn new(opcode: Opcode, prefix_len: usize) -> Self {
        Self { opcode, prefix_len }
    }

    fn header_len(&self) -> usize {
        1 + self.prefix_len + 2
    }

    /// Split an inbound frame into its chunk header and data slice.
    pub fn parse<'a>(&self, frame: &'a [u8]) -> ProtocolResult<(ChunkHeader, &'a [u8])> {
        let header_len = self.header_len();
        if frame.len() < header_len {
            return Err(ProtocolError::MalformedFrame {
                opcode: self.opcode.as_byte(),
                len: frame.len(),
                min: header_len,
            });
        }
        let header = ChunkHeader {
            total: frame[header_len - 2],
            index: frame[header_len - 1],
        };
        Ok((header, &frame[header_len..]))
    }
}

/// Inbound notification-setting updates: `[0xF6, parts, seq, data..]`.
pub const NOTIF_SETTING_LAYOUT: IndexedLayout = IndexedLayout::new(Opcode::NotifSetting, 0);
/// Allow-list upload: `[0x04, count, index, data..]`.
pub const ALLOW_LIST_LAYOUT: IndexedLayout = IndexedLayout::new(Opcode::AddNotif, 0);
/// Notification upload: `[0x4B, notify_id, count, index, data..]`.
pub const NOTIFY_LAYOUT: IndexedLayout = IndexedLayout::new(Opcode::Notif, 1);

/// Split `payload` into at most 255 slices of `max_len` bytes.
///
/// An empty payload yields one empty slice so it still produces a frame.
pub fn split(payload: &[u8], max_len: usize) -> ProtocolResult<Vec<&[u8]>> {
    if max_len == 0 {
        return Err(ProtocolError::Validation("chunk length must be non-zero".into()));
    }
    if payload.is_empty() {
        return Ok(vec![payload]);
    }
    let count = payload.len().div_ceil(max_len);
    if count > u8::MAX as usize {
        return Err(ProtocolError::TooManyChunks(count));
    }
    Ok(payload.chunks(max_len).collect())
}

/// Chunk a payload using an indexed layout.
pub fn chunk_indexed(
    layout: IndexedLayout,
    prefix: &[u8],
    payload: &[u8],
    max_len: usize,
) -> ProtocolResult<Vec<Vec<u8>>> {
    debug_assert_eq!(prefix.len(), layout.prefix_len);
    let slices = split(payload, max_len)?;
    let total = slices.len() as u8;
    Ok(slices
        .into_iter()
        .enumerate()
        .map(|(index, slice)| {
            let mut frame = Vec::with_capacity(layout.header_len() + slice.len());
            frame.push(layout.opcode.as_byte());
            frame.extend_from_slice(prefix);
            frame.push(total);
            frame.push(index as u8);
            frame.extend_from_slice(slice);
            frame
        })
        .collect())
}

/// Chunk a raw bitmap: `[0x15, index] (+ address on chunk 0) + data`.
pub fn chunk_bitmap(image: &[u8]) -> ProtocolResult<Vec<Vec<u8>>> {
    let slices = split(image, BMP_CHUNK_LEN)?;
    Ok(slices
        .into_iter()
        .enumerate()
        .map(|(index, slice)| {
            let mut frame = Vec::with_capacity(2 + BMP_ADDRESS.len() + slice.len());
            frame.push(Opcode::Bmp.as_byte());
            frame.push(index as u8);
            if index == 0 {
                frame.extend_from_slice(&BMP_ADDRESS);
            }
            frame.extend_from_slice(slice);
            frame
        })
        .collect())
}

/// Identity of an in-progress inbound transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReassemblyKey {
    pub peripheral: PeripheralId,
    pub opcode: Opcode,
}

#[derive(Debug)]
struct InFlight {
    total: u8,
    chunks: Vec<Vec<u8>>,
}

/// Per (peripheral, opcode) accumulation of inbound chunks.
#[derive(Debug, Default)]
pub struct Reassembler {
    in_flight: HashMap<ReassemblyKey, InFlight>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk. Returns the complete payload once the last index
    /// arrives.
    ///
    /// Chunks must arrive strictly in order starting at 0. Any other index
    /// abandons the in-flight transfer for that key.
    pub fn feed(
        &mut self,
        peripheral: &PeripheralId,
        opcode: Opcode,
        header: ChunkHeader,
        data: &[u8],
    ) -> ProtocolResult<Option<Vec<u8>>> {
        let key = ReassemblyKey {
            peripheral: peripheral.clone(),
            opcode,
        };

        if header.total == 0 || header.index >= header.total {
            self.in_flight.remove(&key);
            return Err(ProtocolError::MalformedFrame {
                opcode: opcode.as_byte(),
                len: data.len(),
                min: 0,
            });
        }

        if header.index == 0 {
            if self.in_flight.contains_key(&key) {
                trace!("{} {:?}: new transfer supersedes in-flight chunks", peripheral, opcode);
            }
            self.in_flight.insert(
                key.clone(),
                InFlight {
                    total: header.total,
                    chunks: Vec::with_capacity(header.total as usize),
                },
            );
        }

        let Some(entry) = self.in_flight.get_mut(&key) else {
            return Err(ProtocolError::ReassemblyDesync {
                peripheral: peripheral.clone(),
                opcode: opcode.as_byte(),
                expected: 0,
                got: header.index,
            });
        };

        let expected = entry.chunks.len() as u8;
        if header.index != expected || header.total != entry.total {
            self.in_flight.remove(&key);
            warn!(
                "{} {:?}: chunk {}/{} out of order, abandoning transfer",
                peripheral, opcode, header.index, header.total
            );
            return Err(ProtocolError::ReassemblyDesync {
                peripheral: peripheral.clone(),
                opcode: opcode.as_byte(),
                expected,
                got: header.index,
            });
        }

        entry.chunks.push(data.to_vec());
        if entry.chunks.len() < entry.total as usize {
            return Ok(None);
        }

        let complete = self
            .in_flight
            .remove(&key)
            .map(|entry| entry.chunks.concat())
            .unwrap_or_default();
        Ok(Some(complete))
    }

    /// Parse the frame with `layout` and feed it.
    pub fn feed_frame(
        &mut self,
        peripheral: &PeripheralId,
        layout: IndexedLayout,
        frame: &[u8],
    ) -> ProtocolResult<Option<Vec<u8>>> {
        let (header, data) = layout.parse(frame)?;
        self.feed(peripheral, layout.opcode, header, data)
    }

    /// Drop partial transfers for one peripheral.
    pub fn clear_peripheral(&mut self, peripheral: &PeripheralId) {
        self.in_flight.retain(|key, _| &key.peripheral != peripheral);
    }

    pub fn clear(&mut self) {
        self.in_flight.clear();
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}
