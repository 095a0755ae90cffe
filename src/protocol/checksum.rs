//! # Line Checksum
//!
//! Running XOR over every payload byte, rendered as two uppercase hex digits.
//!
//! **Width**: 8 bits
//! **Initial Value**: 0x00

/// Calculate the raw XOR checksum of a payload
///
/// # Arguments
///
/// * `payload` - Bytes preceding the `*` separator
///
/// # Returns
///
/// * `u8` - XOR of all bytes
pub fn xor_checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, &byte| acc ^ byte)
}

/// Render the checksum of a payload as it appears on the wire
///
/// # Examples
///
/// ```
/// use soil_link::protocol::checksum::checksum;
///
/// assert_eq!(checksum(b"GET"), "56");
/// assert_eq!(checksum(b""), "00");
/// ```
pub fn checksum(payload: &[u8]) -> String {
    format!("{:02X}", xor_checksum(payload))
}
