//! Firmware transfer checksum.
//!
//! The Build HAT bootloader validates an uploaded image against the value
//! passed in the `load <length> <checksum>` command. The algorithm is a
//! 32-bit shift register seeded with 1 and fed one byte at a time.

/// Feedback polynomial applied when bit 31 shifts out.
const POLYNOMIAL: u32 = 0x1D87_2B41;

/// Compute the bootloader checksum of `data`.
///
/// Pure and total: the empty slice yields the seed value `1`.
pub fn checksum(data: &[u8]) -> u32 {
    data.iter().fold(1u32, |acc, &byte| {
        let shifted = if acc & 0x8000_0000 != 0 {
            (acc << 1) ^ POLYNOMIAL
        } else {
            acc << 1
        };
        shifted ^ u32::from(byte)
    })
}
