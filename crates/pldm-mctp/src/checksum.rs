//! Check values used on the serial link
//!
//! The frame-check sequence is the RFC 1662 FCS-16 used by the MCTP serial
//! binding (DSP0253), without the final inversion. The CRC-32 is the zlib
//! variant some firmware appends to every inventory-table fragment.

use crc::{Crc, CRC_16_MCRF4XX, CRC_32_ISO_HDLC};

/// Reflected 0x1021, init 0xFFFF, no xor-out
pub const FCS16: Crc<u16> = Crc::<u16>::new(&CRC_16_MCRF4XX);

/// zlib CRC-32
pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// FCS-16 of `data`.
pub fn fcs16(data: &[u8]) -> u16 {
    FCS16.checksum(data)
}

/// FCS-16 over several non-contiguous slices, in order.
pub fn fcs16_parts(parts: &[&[u8]]) -> u16 {
    let mut digest = FCS16.digest();
    for part in parts {
        digest.update(part);
    }
    digest.finalize()
}

pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fcs16_check_value() {
        assert_eq!(fcs16(b"123456789"), 0x6F91);
        assert_eq!(fcs16(&[]), 0xFFFF);
    }

    #[test]
    fn test_fcs16_parts_matches_oneshot() {
        let data = b"\x01\x07\x01\x00\x10\xc8\x01";
        assert_eq!(fcs16_parts(&[&data[..2], &data[2..5], &data[5..]]), fcs16(data));
    }

    #[test]
    fn test_crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(&[]), 0);
    }
}
