// Copyright 2020 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Stored object record: `{ magic, size: u32, payload }`, little-endian, padded with the
//! erase pattern up to the slot capacity.

use std::convert::TryFrom;

use super::layout::RecordFormat;
use crate::storage::flash::ERASED_BYTE;

/// Write a record for `payload` into `dst`, which spans the whole slot.
pub fn encode(format: &RecordFormat, payload: &[u8], dst: &mut [u8]) {
    let hlen = format.header_len();
    let magic = format.magic.to_le_bytes();
    dst[..format.magic_width].copy_from_slice(&magic[..format.magic_width]);
    dst[format.magic_width..hlen].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    dst[hlen..hlen + payload.len()].copy_from_slice(payload);
    for byte in dst[hlen + payload.len()..].iter_mut() {
        *byte = ERASED_BYTE;
    }
}

/// Payload length recorded in a slot header, or `None` when the slot does not hold a
/// valid record (erased, foreign magic, or a size beyond `capacity`).
pub fn decode_header(format: &RecordFormat, header: &[u8], capacity: usize) -> Option<usize> {
    let hlen = format.header_len();
    if header.len() < hlen {
        return None;
    }
    let mut magic = [0u8; 8];
    magic[..format.magic_width].copy_from_slice(&header[..format.magic_width]);
    if u64::from_le_bytes(magic) != format.magic {
        return None;
    }
    let mut size = [0u8; 4];
    size.copy_from_slice(&header[format.magic_width..hlen]);
    let size = usize::try_from(u32::from_le_bytes(size)).ok()?;
    if size > capacity {
        return None;
    }
    Some(size)
}

/// Invalidate whatever record `dst` holds by restoring the erase pattern.
pub fn erase(dst: &mut [u8]) {
    for byte in dst.iter_mut() {
        *byte = ERASED_BYTE;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload<'a>(format: &RecordFormat, slot: &'a [u8], capacity: usize) -> Option<&'a [u8]> {
        let size = decode_header(format, slot, capacity)?;
        slot.get(format.header_len()..format.header_len() + size)
    }

    #[test]
    fn test_wire_layout() {
        let format = RecordFormat::new(0x00AB_CDEF, 4).unwrap();
        let mut slot = [0u8; 16];
        encode(&format, b"abc", &mut slot);
        assert_eq!(
            slot,
            [
                0xEF, 0xCD, 0xAB, 0x00, 3, 0, 0, 0, b'a', b'b', b'c', 0xFF, 0xFF, 0xFF, 0xFF,
                0xFF
            ]
        );
        assert_eq!(payload(&format, &slot, 8), Some(&b"abc"[..]));
    }

    #[test]
    fn test_wide_magic() {
        let format = RecordFormat::new(0x0102_0304_0506_0708, 8).unwrap();
        let mut slot = [0u8; 14];
        encode(&format, b"hi", &mut slot);
        assert_eq!(&slot[..8], &[8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(payload(&format, &slot, 2), Some(&b"hi"[..]));
    }

    #[test]
    fn test_absent_records() {
        let format = RecordFormat::new(0x00AB_CDEF, 4).unwrap();
        let erased = [0xFFu8; 16];
        assert_eq!(payload(&format, &erased, 8), None);

        let mut slot = [0u8; 16];
        encode(&format, b"abc", &mut slot);
        let mut foreign = slot;
        foreign[0] ^= 1;
        assert_eq!(payload(&format, &foreign, 8), None);

        // Size field larger than the slot capacity.
        let mut oversize = slot;
        oversize[4] = 9;
        assert_eq!(payload(&format, &oversize, 8), None);

        erase(&mut slot);
        assert_eq!(payload(&format, &slot, 8), None);
    }

    #[test]
    fn test_empty_payload_is_present() {
        let format = RecordFormat::new(0x00AB_CDEF, 4).unwrap();
        let mut slot = [0u8; 8];
        encode(&format, b"", &mut slot);
        assert_eq!(payload(&format, &slot, 0), Some(&b""[..]));
    }
}
