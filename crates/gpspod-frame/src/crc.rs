//! CRC-16/CCITT-FALSE: poly `0x1021`, init `0xFFFF`, no reflection, no xor-out.

pub const CRC_INIT: u16 = 0xFFFF;

const POLY: u16 = 0x1021;

/// Checksum `data` from the standard initial value.
pub fn crc16(data: &[u8]) -> u16 {
    crc16_with(CRC_INIT, data)
}

/// Continue a checksum from `init` (the packet data CRC is seeded with the header CRC).
pub fn crc16_with(init: u16, data: &[u8]) -> u16 {
    let mut crc = init;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn empty_input_keeps_seed() {
        assert_eq!(crc16(&[]), CRC_INIT);
        assert_eq!(crc16_with(0x1234, &[]), 0x1234);
    }

    #[test]
    fn captured_header_checksum() {
        // part, length, sequence of the device info request packet
        assert_eq!(crc16(&[0x5D, 0x10, 0x01, 0x00]), 0xB82F);
    }

    #[test]
    fn seeded_checksum_is_incremental() {
        let whole = crc16(b"gps track pod");
        let split = crc16_with(crc16(b"gps track"), b" pod");
        assert_eq!(whole, split);
    }
}
