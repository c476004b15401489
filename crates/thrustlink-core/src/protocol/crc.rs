//! CRC16-CCITT (FALSE variant)
//!
//! Polynomial 0x1021, initial value 0xFFFF, no reflection, no final XOR.

const POLY: u16 = 0x1021;
const INIT: u16 = 0xFFFF;

/// Calculate the CRC16 of `bytes`
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc = INIT;
    for &b in bytes {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ POLY;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}
