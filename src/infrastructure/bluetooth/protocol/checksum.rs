//! Transfer verification and image packing helpers.

use super::{Opcode, ResponseStatus};
use crate::domain::error::{ProtocolError, ProtocolResult};

/// Glasses memory address a bitmap transfer is written to. Sent in front of
/// the first bitmap chunk and included in the transfer CRC.
pub const BMP_ADDRESS: [u8; 4] = [0x00, 0x1C, 0x00, 0x00];

/// CRC32 (IEEE, zlib-compatible) over `address ++ payload`.
pub fn transfer_crc32(address: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(address);
    hasher.update(payload);
    hasher.finalize()
}

/// `[0x16, crc (big-endian)]`, sent once the whole bitmap has been written.
pub fn crc_frame(payload: &[u8]) -> Vec<u8> {
    let crc = transfer_crc32(&BMP_ADDRESS, payload);
    let mut frame = Vec::with_capacity(5);
    frame.push(Opcode::Crc.as_byte());
    frame.extend_from_slice(&crc.to_be_bytes());
    frame
}

/// Status of the peer's CRC verification (`[0x16, crc x4, status]`).
///
/// Frames too short to carry the status byte are treated as success; the
/// device only answers short when it has nothing to complain about.
pub fn crc_response_status(frame: &[u8]) -> ResponseStatus {
    frame
        .get(5)
        .map_or(ResponseStatus::Success, |status| ResponseStatus::from_byte(*status))
}

/// `Ok` when the peer accepted the transfer CRC, otherwise
/// [`ProtocolError::ChecksumFailure`] carrying the reply.
pub fn verify_crc_response(frame: &[u8]) -> ProtocolResult<()> {
    if crc_response_status(frame).is_success() {
        Ok(())
    } else {
        Err(ProtocolError::ChecksumFailure(frame.to_vec()))
    }
}

/// Run-length encode as `(count, value)` pairs. Runs over 255 are split.
pub fn rle_encode(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut iter = bytes.iter().copied().peekable();
    while let Some(value) = iter.next() {
        let mut count: u8 = 1;
        while count < u8::MAX && iter.peek() == Some(&value) {
            iter.next();
            count += 1;
        }
        out.push(count);
        out.push(value);
    }
    out
}

/// Expand `(count, value)` pairs. A trailing odd byte is ignored.
pub fn rle_decode(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for pair in bytes.chunks_exact(2) {
        out.extend(std::iter::repeat(pair[1]).take(pair[0] as usize));
    }
    out
}

/// Pack pixels 8 per byte, first pixel in the least significant bit.
pub fn pack_bits(pixels: &[bool]) -> Vec<u8> {
    pixels
        .chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .fold(0u8, |byte, (i, on)| byte | (u8::from(*on) << i))
        })
        .collect()
}

/// Inverse of [`pack_bits`]; always yields a multiple of 8 pixels.
#[cfg(test)]
fn unpack_bits(bytes: &[u8]) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|byte| (0..8).map(move |i| byte & (1 << i) != 0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rle_encode_known_vector() {
        let data = [0x01, 0x20, 0x20, 0x20, 0x05, 0x05];
        assert_eq!(rle_encode(&data), vec![0x01, 0x01, 0x03, 0x20, 0x02, 0x05]);
    }

    #[test]
    fn test_rle_decode_known_vector() {
        let data = [0x01, 0x01, 0x03, 0x20, 0x02, 0x05];
        assert_eq!(rle_decode(&data), vec![0x01, 0x20, 0x20, 0x20, 0x05, 0x05]);
    }

    #[test]
    fn test_rle_empty() {
        assert!(rle_encode(&[]).is_empty());
        assert!(rle_decode(&[]).is_empty());
    }

    #[test]
    fn test_rle_splits_long_runs() {
        let data = vec![0xAA; 600];
        let encoded = rle_encode(&data);
        assert_eq!(encoded, vec![0xFF, 0xAA, 0xFF, 0xAA, 90, 0xAA]);
        assert_eq!(rle_decode(&encoded), data);
    }

    #[test]
    fn test_crc_deterministic_and_sensitive() {
        let payload = vec![0x10u8; 1000];
        assert_eq!(crc_frame(&payload), crc_frame(&payload));

        let mut changed = payload.clone();
        changed[500] ^= 0x01;
        assert_ne!(crc_frame(&payload), crc_frame(&changed));
    }

    #[test]
    fn test_crc_is_big_endian_over_address() {
        let payload = b"123456789";
        let crc = transfer_crc32(&BMP_ADDRESS, payload);
        let frame = crc_frame(payload);
        assert_eq!(frame[0], 0x16);
        assert_eq!(frame[1..], crc.to_be_bytes());
        assert_ne!(crc, transfer_crc32(&[], payload));
        // zlib check value for the empty address
        assert_eq!(transfer_crc32(&[], payload), 0xCBF4_3926);
    }

    #[test]
    fn test_crc_response() {
        assert_eq!(
            crc_response_status(&[0x16, 0xC2, 0x8F, 0x41, 0x43, 0xCA]),
            ResponseStatus::Continue
        );
        assert_eq!(
            crc_response_status(&[0x16, 0xC2, 0x8F, 0x41, 0x43, 0xC9]),
            ResponseStatus::Success
        );
        assert_eq!(crc_response_status(&[0x16, 0xC9]), ResponseStatus::Success);
    }

    #[test]
    fn test_rejected_crc_is_checksum_failure() {
        let rejected = [0x16, 0xC2, 0x8F, 0x41, 0x43, 0xCB];
        assert_eq!(
            verify_crc_response(&rejected),
            Err(ProtocolError::ChecksumFailure(rejected.to_vec()))
        );
        assert_eq!(verify_crc_response(&[0x16, 0xC2, 0x8F, 0x41, 0x43, 0xC9]), Ok(()));
    }

    #[test]
    fn test_pack_bits_lsb_first() {
        let mut pixels = vec![false; 8];
        pixels[0] = true;
        assert_eq!(pack_bits(&pixels), vec![0x01]);
        pixels[7] = true;
        assert_eq!(pack_bits(&pixels), vec![0x81]);
        assert_eq!(pack_bits(&[true, true, true]), vec![0x07]);
    }

    proptest! {
        #[test]
        fn prop_rle_round_trip(bytes in proptest::collection::vec(any::<u8>(), 0..2048)) {
            prop_assert_eq!(rle_decode(&rle_encode(&bytes)), bytes);
        }

        #[test]
        fn prop_rle_round_trip_long_runs(value in any::<u8>(), len in 0usize..2000) {
            let bytes = vec![value; len];
            prop_assert_eq!(rle_decode(&rle_encode(&bytes)), bytes);
        }

        #[test]
        fn prop_bits_round_trip(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            prop_assert_eq!(pack_bits(&unpack_bits(&bytes)), bytes);
        }
    }
}
